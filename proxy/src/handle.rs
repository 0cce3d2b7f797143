use std::future::Future;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::{ProxyError, Result};

/// Caller-owned handle over an in-flight proxy operation.
///
/// The work runs on the proxy's worker pool whether or not the handle is ever
/// waited on; dropping the handle does not cancel it. The outcome is cached on
/// first completion, so `wait` and the polling calls can be repeated freely.
pub struct AsyncHandle<T> {
    receiver: Option<oneshot::Receiver<Result<T>>>,
    outcome: Option<Result<T>>,
}

impl<T: Send + 'static> AsyncHandle<T> {
    pub(crate) fn spawn<F>(runtime: &Handle, work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        runtime.spawn(async move {
            // The caller may have dropped the handle; the work still ran.
            let _ = tx.send(work.await);
        });

        Self {
            receiver: Some(rx),
            outcome: None,
        }
    }
}

impl<T> AsyncHandle<T> {
    /// A handle that is already complete, used for requests rejected up front.
    pub(crate) fn ready(outcome: Result<T>) -> Self {
        Self {
            receiver: None,
            outcome: Some(outcome),
        }
    }

    /// Non-blocking completion check.
    pub fn is_ready(&mut self) -> bool {
        if self.outcome.is_none() {
            if let Some(receiver) = self.receiver.as_mut() {
                match receiver.try_recv() {
                    Ok(outcome) => self.complete(outcome),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Closed) => self.complete(Err(aborted())),
                }
            }
        }
        self.outcome.is_some()
    }

    /// The outcome if the operation has finished, without blocking.
    pub fn try_result(&mut self) -> Option<&Result<T>> {
        if self.is_ready() {
            self.outcome.as_ref()
        } else {
            None
        }
    }

    /// Blocks the calling thread until the operation completes.
    ///
    /// On a worker of a multi-thread runtime the worker is handed off with
    /// `block_in_place` first. A current-thread runtime cannot be blocked
    /// without stalling the work itself, so there the outcome is a
    /// `ProxyError::Runtime`; use `join` instead.
    pub fn wait(&mut self) -> &Result<T> {
        let receiver = &mut self.receiver;
        self.outcome.get_or_insert_with(|| match receiver.take() {
            Some(rx) => block_on_receiver(rx),
            None => Err(aborted()),
        })
    }

    /// `wait`, then hand over the outcome.
    pub fn get(mut self) -> Result<T> {
        self.wait();
        self.outcome.take().unwrap_or_else(|| Err(aborted()))
    }

    /// Async counterpart of `get`.
    pub async fn join(mut self) -> Result<T> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        match self.receiver.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(aborted())),
            None => Err(aborted()),
        }
    }

    fn complete(&mut self, outcome: Result<T>) {
        self.outcome = Some(outcome);
        self.receiver = None;
    }
}

fn block_on_receiver<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    match Handle::try_current() {
        Err(_) => rx.blocking_recv().unwrap_or_else(|_| Err(aborted())),
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| rx.blocking_recv()).unwrap_or_else(|_| Err(aborted()))
        }
        Ok(_) => Err(ProxyError::Runtime(
            "blocking wait inside a current-thread runtime; use join".to_string(),
        )),
    }
}

fn aborted() -> ProxyError {
    ProxyError::Aborted("operation task ended without a result".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn wait_is_idempotent_and_runs_work_once() {
        let rt = runtime();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handle = {
            let runs = runs.clone();
            AsyncHandle::spawn(rt.handle(), async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(42u32)
            })
        };

        let first = handle.wait().clone();
        let second = handle.wait().clone();

        assert_eq!(first, Ok(42));
        assert_eq!(first, second);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn polling_reports_pending_then_ready() {
        let rt = runtime();
        let gate = Arc::new(Notify::new());

        let mut handle = {
            let gate = gate.clone();
            AsyncHandle::spawn(rt.handle(), async move {
                gate.notified().await;
                Ok("done")
            })
        };

        assert!(!handle.is_ready());
        assert!(handle.try_result().is_none());

        gate.notify_one();
        assert_eq!(handle.get(), Ok("done"));
    }

    #[test]
    fn dropped_handle_does_not_cancel_work() {
        let rt = runtime();
        let runs = Arc::new(AtomicUsize::new(0));

        {
            let runs = runs.clone();
            let _ = AsyncHandle::spawn(rt.handle(), async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ready_handle_carries_structural_error() {
        let mut handle: AsyncHandle<()> =
            AsyncHandle::ready(Err(ProxyError::InvalidRequest("empty key".to_string())));

        assert!(handle.is_ready());
        assert_eq!(
            handle.wait(),
            &Err(ProxyError::InvalidRequest("empty key".to_string()))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_blocks_in_place_on_a_multi_thread_runtime() {
        let handle = AsyncHandle::spawn(&Handle::current(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(5u8)
        });
        assert_eq!(handle.get(), Ok(5));
    }

    #[tokio::test]
    async fn wait_on_a_current_thread_runtime_is_an_error() {
        let (_tx, rx) = oneshot::channel::<Result<()>>();
        let mut handle = AsyncHandle {
            receiver: Some(rx),
            outcome: None,
        };
        assert!(matches!(handle.wait(), Err(ProxyError::Runtime(_))));
    }

    #[tokio::test]
    async fn join_works_inside_async_code() {
        let handle = AsyncHandle::spawn(&Handle::current(), async { Ok(7u8) });
        assert_eq!(handle.join().await, Ok(7));
    }
}
