use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_metrics::{TaskMetrics, TaskMonitor};
use tracing::debug;

/// Executor handle passed to every component. All background work is spawned
/// through it so that it shows up in one task monitor.
#[derive(Clone)]
pub struct Control {
    pub task_mon: TaskMonitor,
    handle: Handle,
}

impl Control {
    /// Binds to the runtime this is called from.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Control::new(Handle::current())
    }

    pub fn new(handle: Handle) -> Self {
        Control {
            task_mon: TaskMonitor::builder().build(),
            handle,
        }
    }

    /// Spawn a task with monitoring instrumentation
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(self.task_mon.instrument(fut))
    }

    pub fn metrics(&self) -> TaskMetrics {
        self.task_mon.cumulative()
    }

    /// Logs cumulative task metrics every `period` until the returned task is aborted.
    pub fn start_metrics_logging(&self, period: Duration) -> JoinHandle<()> {
        let task_mon = self.task_mon.clone();
        self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let metrics = task_mon.cumulative();
                debug!(
                    instrumented = metrics.instrumented_count,
                    dropped = metrics.dropped_count,
                    polls = metrics.total_poll_count,
                    busy_ms = metrics.total_poll_duration.as_millis() as u64,
                    "task metrics"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_is_instrumented() {
        let control = Control::current();
        let value = control.spawn(async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(control.metrics().instrumented_count, 1);
    }

    #[tokio::test]
    async fn test_metrics_logging_runs_until_aborted() {
        crate::logs::init_test_tracing();
        let control = Control::current();
        control.spawn(async {}).await.unwrap();
        let logger = control.start_metrics_logging(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!logger.is_finished());
        logger.abort();
        assert!(logger.await.unwrap_err().is_cancelled());
        // the logger itself is not instrumented
        assert_eq!(control.metrics().instrumented_count, 1);
    }
}
