use crate::error::GitSyncError;
use crate::objects::types::ObjectType;
use crate::sha::ObjectHash;
use bytes::Bytes;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

pub mod commit;
pub mod tree;
pub mod types;

/// A loose object after decompression: `"<kind> <len>\0<content>"`.
///
/// The decompressed bytes are kept whole so the digest is taken over exactly what
/// was received, not over a re-rendered header.
#[derive(Clone, Debug)]
pub struct GitObject {
    pub kind: ObjectType,
    pub kind_name: String,
    pub declared_length: usize,
    raw: Bytes,
    content_start: usize,
}

impl GitObject {
    /// Decompresses a stored object and checks its header against its content.
    pub fn decode(compressed: &[u8]) -> Result<GitObject, GitSyncError> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .map_err(|_| GitSyncError::DecompressionError)?;

        let header_size = data
            .iter()
            .position(|&b| b == b'\0')
            .ok_or_else(|| GitSyncError::MalformedObject("missing header terminator".into()))?;
        let header = std::str::from_utf8(&data[..header_size])
            .map_err(|_| GitSyncError::MalformedObject("header is not UTF-8".into()))?;
        let mut parts = header.split(' ');
        let (Some(kind_name), Some(length), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GitSyncError::MalformedObject(format!(
                "bad header {:?}",
                header
            )));
        };
        let declared_length = length
            .parse::<usize>()
            .map_err(|_| GitSyncError::MalformedObject(format!("bad length {:?}", length)))?;
        let actual = data.len() - header_size - 1;
        if declared_length != actual {
            return Err(GitSyncError::LengthMismatch {
                declared: declared_length,
                actual,
            });
        }
        Ok(GitObject {
            kind: ObjectType::from_str(kind_name),
            kind_name: kind_name.to_string(),
            declared_length,
            raw: Bytes::from(data),
            content_start: header_size + 1,
        })
    }

    pub fn content(&self) -> Bytes {
        self.raw.slice(self.content_start..)
    }

    pub fn digest(&self) -> ObjectHash {
        ObjectHash::digest(&self.raw)
    }

    /// Kind check (when constrained) followed by the digest check.
    pub fn verify(
        &self,
        expected_hash: &ObjectHash,
        expected_kind: Option<ObjectType>,
    ) -> Result<(), GitSyncError> {
        if let Some(expected) = expected_kind {
            if self.kind != expected {
                return Err(GitSyncError::TypeMismatch {
                    expected,
                    actual: self.kind,
                });
            }
        }
        let actual = self.digest();
        if actual != *expected_hash {
            return Err(GitSyncError::DigestMismatch {
                expected: *expected_hash,
                actual,
            });
        }
        Ok(())
    }
}

/// Renders and compresses an object the way git stores it loose.
pub fn encode_object(kind: ObjectType, content: &[u8]) -> Result<(ObjectHash, Bytes), GitSyncError> {
    let mut data = Vec::with_capacity(content.len() + 32);
    data.extend_from_slice(kind.to_raw());
    data.extend_from_slice(format!(" {}\0", content.len()).as_bytes());
    data.extend_from_slice(content);
    let hash = ObjectHash::digest(&data);

    Ok((hash, compress_raw(&data)?))
}

/// Compresses already rendered object bytes, header included.
pub fn compress_raw(data: &[u8]) -> Result<Bytes, GitSyncError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_encode_decode() {
        let (hash, raw) = encode_object(ObjectType::Blob, b"hello world").unwrap();
        assert_eq!(hash.to_string(), "95d09f2b10159347eece71399a7e2e907ea3df4f");
        let object = GitObject::decode(&raw).unwrap();
        assert_eq!(object.kind, ObjectType::Blob);
        assert_eq!(object.declared_length, 11);
        assert_eq!(&object.content()[..], b"hello world");
        assert!(object.verify(&hash, Some(ObjectType::Blob)).is_ok());
        assert!(object.verify(&hash, None).is_ok());
    }

    #[test]
    fn test_length_mismatch() {
        let raw = compress_raw(b"blob 12\0hello world").unwrap();
        assert!(matches!(
            GitObject::decode(&raw),
            Err(GitSyncError::LengthMismatch {
                declared: 12,
                actual: 11
            })
        ));
    }

    #[test]
    fn test_type_and_digest_mismatch() {
        let (hash, raw) = encode_object(ObjectType::Blob, b"hello world").unwrap();
        let object = GitObject::decode(&raw).unwrap();
        assert!(matches!(
            object.verify(&hash, Some(ObjectType::Tree)),
            Err(GitSyncError::TypeMismatch { .. })
        ));
        let other = ObjectHash::from_str("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        let err = object.verify(&other, None).unwrap_err();
        assert!(err.is_verification_failure());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            GitObject::decode(b"not zlib at all"),
            Err(GitSyncError::DecompressionError)
        ));
        assert!(GitObject::decode(&compress_raw(b"blob 3 abc").unwrap()).is_err());
        assert!(GitObject::decode(&compress_raw(b"blob x\0abc").unwrap()).is_err());
        assert!(GitObject::decode(&compress_raw(b"blob 3 1\0abc").unwrap()).is_err());
    }

    #[test]
    fn test_unknown_kind_decodes() {
        let object = GitObject::decode(&compress_raw(b"tag 3\0abc").unwrap()).unwrap();
        assert_eq!(object.kind, ObjectType::Unknown);
        assert_eq!(object.kind_name, "tag");
    }
}
