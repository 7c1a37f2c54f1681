//! Bounded-concurrency execution pool.
//!
//! Jobs are started strictly in submission order by a fixed set of workers.
//! A job receives a [`Done`] token and keeps its worker busy until the token
//! is completed, which may happen long after the job's own future returned.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Box<dyn FnOnce(Done) -> BoxFuture<'static, ()> + Send>;

/// Completion signal handed to every pool job. Completing it frees the
/// worker for the next queued job.
#[must_use = "a pool slot stays busy until its Done token is completed"]
pub struct Done {
    signal: Option<oneshot::Sender<()>>,
}

impl Done {
    fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { signal: Some(tx) }, rx)
    }

    pub fn complete(mut self) {
        if let Some(signal) = self.signal.take() {
            let _ = signal.send(());
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if self.signal.is_some() && !std::thread::panicking() {
            error!("pool job dropped its completion signal without completing it");
        }
    }
}

/// Output of a submitted job. Resolves to `None` when the pool was closed
/// before the job could start.
pub struct Submission<T> {
    output: oneshot::Receiver<T>,
}

impl<T> Future for Submission<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.output).poll(cx).map(Result::ok)
    }
}

pub struct Pool {
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl Pool {
    /// Spawns `size` workers on the current tokio runtime. A size of zero is
    /// treated as one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker in 0..size {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };

                    let (done, released) = Done::new();
                    job(done).await;
                    // A dropped token also frees the slot; the drop itself is logged.
                    let _ = released.await;
                }
                debug!(worker, "pool worker stopped");
            });
        }

        Self {
            queue: Mutex::new(Some(tx)),
        }
    }

    /// Queues `job`. The returned [`Submission`] resolves with the job's
    /// output as soon as the job's future finishes, independently of when
    /// the job completes its [`Done`] token.
    pub fn submit<F, Fut, T>(&self, task: F) -> Submission<T>
    where
        F: FnOnce(Done) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |done| {
            async move {
                let output = task(done).await;
                let _ = tx.send(output);
            }
            .boxed()
        });

        if let Some(queue) = self.queue.lock().as_ref() {
            if queue.send(job).is_err() {
                debug!("pool workers are gone, dropping job");
            }
        }

        Submission { output: rx }
    }

    /// Stops accepting jobs. Jobs already queued still run.
    pub fn close(&self) {
        self.queue.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().is_none()
    }
}
