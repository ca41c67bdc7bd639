//! Serial execution context.
//!
//! A [`Strand`] runs posted closures one at a time, in posting order, on a
//! dedicated tokio task. Components that must never run their callbacks
//! concurrently with themselves (replicated object caches and their
//! listeners) post to a strand instead of taking a lock.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum StrandMessage {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

/// Handle to a serial execution context. Cloning shares the same context.
#[derive(Debug, Clone)]
pub struct Strand {
    name: &'static str,
    sender: mpsc::UnboundedSender<StrandMessage>,
}

impl Strand {
    /// Creates a strand and spawns its consumer task.
    ///
    /// Must be called from within a tokio runtime. The task exits once every
    /// handle has been dropped and the queue is drained.
    pub fn new(name: &'static str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<StrandMessage>();

        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    StrandMessage::Run(job) => job(),
                    StrandMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("🧵 Strand '{}' stopped", name);
        });

        Self { name, sender }
    }

    /// Queues `job` behind everything already posted.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(StrandMessage::Run(Box::new(job))).is_err() {
            warn!("Strand '{}' is gone, dropping posted job", self.name);
        }
    }

    /// Resolves once every job posted before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(StrandMessage::Flush(done)).is_err() {
            return;
        }
        let _ = wait.await;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_jobs_run_in_posting_order() {
        let strand = Strand::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            strand.post(move || seen.lock().unwrap().push(i));
        }
        strand.flush().await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_job_may_post_more_work() {
        let strand = Strand::new("nested");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = strand.clone();
        let log = seen.clone();
        strand.post(move || {
            log.lock().unwrap().push("outer");
            let log = log.clone();
            inner.post(move || log.lock().unwrap().push("inner"));
        });
        strand.flush().await;
        strand.flush().await;

        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }
}
