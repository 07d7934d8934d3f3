use anyhow::Result;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct ProbeHandle {
    inner: Handle,
    cancel: CancellationToken,
}

pub struct ProbeRuntime {
    runtime: Runtime,
    cancel: CancellationToken,
}

impl ProbeRuntime {
    /// Build the multi-threaded Tokio runtime the poller runs on.
    ///
    /// ```
    /// use fareprobe_runtime::ProbeRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = ProbeRuntime::build("doctest-runtime", Some(1))
    ///     .expect("runtime builds");
    /// let value = runtime.block_on(async { 2 + 2 });
    /// assert_eq!(value, 4);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);

        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }

        let runtime = builder.build()?;
        Ok(Self {
            runtime,
            cancel: CancellationToken::new(),
        })
    }

    /// Obtain a cloned handle for spawning tasks and sharing cancellation.
    ///
    /// ```
    /// use fareprobe_runtime::ProbeRuntime;
    ///
    /// let runtime = ProbeRuntime::build("handle-example", Some(1)).unwrap();
    /// let handle = runtime.handle();
    /// assert!(!handle.cancellation().is_cancelled());
    /// ```
    pub fn handle(&self) -> ProbeHandle {
        ProbeHandle {
            inner: self.runtime.handle().clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Cancel outstanding work and give tasks `graceful` to wind down.
    pub fn shutdown(self, graceful: Duration) {
        self.cancel.cancel();
        self.runtime.shutdown_timeout(graceful);
    }
}

impl ProbeHandle {
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(fut)
    }

    /// Clone the shared cancellation token to coordinate shutdown.
    ///
    /// ```
    /// use fareprobe_runtime::ProbeRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = ProbeRuntime::build("cancel-example", Some(1)).unwrap();
    /// let cancel = runtime.handle().cancellation();
    /// cancel.cancel();
    /// assert!(runtime.handle().cancellation().is_cancelled());
    /// runtime.shutdown(Duration::from_millis(5));
    /// ```
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the shared token on the first Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        self.spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    match res {
                        Ok(()) => info!("runtime.ctrl_c"),
                        Err(err) => tracing::warn!(error = %err, "runtime.signal_unavailable"),
                    }
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        })
    }
}
