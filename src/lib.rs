pub mod sha;

pub mod config;
pub mod control;
pub mod error;
pub mod fetcher;
pub mod logs;
pub mod objects;
pub mod odb;
pub mod repository;
pub mod serve;
pub mod sync;
pub mod transport;
