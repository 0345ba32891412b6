//! Supervisor for the bridge's long-running processes.
//!
//! The runner owns every top-level task of the bridge (one subscriber per TTS
//! application plus the delivery worker) and provides:
//! - Concurrent execution of named processes
//! - Graceful shutdown on SIGTERM/SIGINT through a shared cancellation token
//! - A bounded wait for running processes to acknowledge cancellation
//! - Cleanup closers that run regardless of how the processes stopped
//! - A process exit code derived from how the run ended
//!
//! # Example
//!
//! ```no_run
//! use bridge_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("tick");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("Cleaning up resources");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5));
//!
//!     runner.run().await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Boxed future returned by app processes and closers
pub type ProcessFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// Type alias for an app process function.
/// Takes a cancellation token and returns a future that resolves to Result<(), anyhow::Error>
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;

/// Type alias for a closer function.
/// Returns a future that resolves to Result<(), anyhow::Error>
pub type Closer = Box<dyn FnOnce() -> ProcessFuture + Send>;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stopped by a shutdown signal or an external cancellation
    Interrupted,
    /// Every process returned on its own without error
    Completed,
    /// A process returned an error or panicked
    Failed,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Interrupted | RunOutcome::Completed => 0,
            RunOutcome::Failed => 1,
        }
    }
}

/// Supervisor that manages long-running processes with graceful shutdown.
///
/// - App processes run concurrently until one fails or a shutdown signal is received
/// - On shutdown every process still running is cancelled and awaited
/// - Closers execute afterward, regardless of process outcome
pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    shutdown_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Closer timeout: 10 seconds
    /// - Shutdown timeout: 10 seconds
    /// - No app processes or closers
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds an unnamed app process to the runner.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let name = format!("process_{}", self.app_processes.len());
        self.with_named_process(name, process)
    }

    /// Adds a named app process to the runner.
    ///
    /// If any process returns an error, all processes are cancelled and
    /// closers are executed. The name only appears in logs.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let process: AppProcess =
            Box::new(move |token| -> ProcessFuture { Box::pin(process(token)) });
        self.app_processes.push((name.into(), process));
        self
    }

    /// Adds a closer to the runner.
    ///
    /// Closers are executed after all app processes have stopped.
    /// All closers will attempt to execute even if some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let closer: Closer = Box::new(move || -> ProcessFuture { Box::pin(closer()) });
        self.closers.push(closer);
        self
    }

    /// Sets the timeout for executing closers.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets how long cancelled processes get to stop before they are aborted.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets a custom cancellation token.
    ///
    /// This allows external control over process cancellation.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs all processes, then exits the application with the outcome's exit code.
    pub async fn run(self) {
        let outcome = self.run_until_stopped().await;
        match outcome {
            RunOutcome::Failed => tracing::error!("Application exiting with error"),
            _ => tracing::info!(outcome = ?outcome, "Application exiting normally"),
        }
        std::process::exit(outcome.exit_code());
    }

    /// Runs all app processes and waits for completion or shutdown.
    ///
    /// 1. Spawns all app processes concurrently
    /// 2. Monitors for SIGTERM/SIGINT signals
    /// 3. Cancels all processes when a signal is received or any process fails
    /// 4. Waits up to the shutdown timeout for running processes, then aborts the rest
    /// 5. Executes all closers with the configured timeout
    pub async fn run_until_stopped(self) -> RunOutcome {
        let token = self.cancellation_token;
        let interrupted = Arc::new(AtomicBool::new(false));
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            tracing::debug!(process = %name, "starting app process");
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        spawn_signal_handlers(token.clone(), Arc::clone(&interrupted));

        let mut failed = false;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                joined = join_set.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    if !record_exit(joined, false) {
                        failed = true;
                        token.cancel();
                        break;
                    }
                }
            }
        }

        // Already finished processes are gone from the set; wait for the rest
        if !join_set.is_empty() {
            token.cancel();
            tracing::info!(
                running = join_set.len(),
                "Cancelling running processes"
            );

            let drained = tokio::time::timeout(self.shutdown_timeout, async {
                let mut clean = true;
                while let Some(joined) = join_set.join_next().await {
                    clean &= record_exit(joined, true);
                }
                clean
            })
            .await;

            match drained {
                Ok(clean) => failed |= !clean,
                Err(_) => {
                    tracing::warn!(
                        remaining = join_set.len(),
                        timeout = ?self.shutdown_timeout,
                        "Processes did not stop in time, aborting"
                    );
                    join_set.shutdown().await;
                }
            }
        }

        if !self.closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", self.closer_timeout);

            let closer_result =
                tokio::time::timeout(self.closer_timeout, Self::run_closers_static(self.closers))
                    .await;

            match closer_result {
                Ok(_) => tracing::info!("All closers completed"),
                Err(_) => tracing::error!("Closers timed out after {:?}", self.closer_timeout),
            }
        }

        if failed {
            RunOutcome::Failed
        } else if interrupted.load(Ordering::SeqCst) || token.is_cancelled() {
            RunOutcome::Interrupted
        } else {
            RunOutcome::Completed
        }
    }

    /// Runs all closers concurrently.
    async fn run_closers_static(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();

        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("Closer completed successfully"),
                Ok(Err(err)) => tracing::error!("Closer error: {:#}", err),
                Err(err) => tracing::error!("Closer panicked: {}", err),
            }
        }
    }
}

/// Logs how a process ended. Returns false when the process failed.
///
/// Task cancellation is expected while shutting down and is not a failure.
fn record_exit(
    joined: Result<(String, Result<(), anyhow::Error>), JoinError>,
    shutting_down: bool,
) -> bool {
    match joined {
        Ok((name, Ok(()))) => {
            tracing::debug!(process = %name, "App process completed successfully");
            true
        }
        Ok((name, Err(err))) => {
            tracing::error!(process = %name, "App process error: {:#}", err);
            false
        }
        Err(err) if err.is_cancelled() => {
            if !shutting_down {
                tracing::warn!("App process was aborted");
            }
            true
        }
        Err(err) => {
            tracing::error!("App process panicked: {}", err);
            false
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken, interrupted: Arc<AtomicBool>) {
    let signal_token = token.clone();
    let signal_flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                signal_flag.store(true, Ordering::SeqCst);
                signal_token.cancel();
            }
            Err(err) => {
                tracing::error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!("Error setting up SIGTERM handler: {}", err);
                return;
            }
        };
        if sigterm.recv().await.is_some() {
            tracing::info!("Received SIGTERM signal");
            interrupted.store(true, Ordering::SeqCst);
            token.cancel();
        }
    });
}
