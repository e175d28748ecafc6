use crate::Backuper;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs [`Backuper::backup_now`] every `interval`, first immediately.
///
/// A run that outlasts the interval delays the next tick instead of queueing
/// a burst of catch-up runs. Failed runs are logged; their items stay pending
/// for the next tick.
pub struct Scheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
    backuper: Arc<Backuper>,
}

impl Scheduler {
    /// Spawn the loop on the current Tokio runtime.
    pub fn start(backuper: Arc<Backuper>) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&backuper), token.clone()));
        Self { token, handle, backuper }
    }

    pub fn backuper(&self) -> &Arc<Backuper> {
        &self.backuper
    }

    /// Stop scheduling, wait for an in-flight run to finish, then close the
    /// backends.
    pub async fn stop(self) -> Result<()> {
        self.token.cancel();
        self.handle.await.or_raise(|| ErrorKind::Task)?;
        tracing::debug!("scheduler stopped");
        self.backuper.close().await
    }
}

async fn run_loop(backuper: Arc<Backuper>, token: CancellationToken) {
    let config = backuper.config();
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval = ?config.interval, strategy = ?config.strategy, "scheduler started");
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                match backuper.backup_now(config.run_timeout).await {
                    Ok(summary) if summary.transferred > 0 => {
                        tracing::info!(transferred = summary.transferred, remaining = summary.remaining, "scheduled backup done");
                    },
                    Ok(_) => {},
                    Err(err) => tracing::error!(error = ?err, "scheduled backup failed"),
                }
            },
        }
    }
}
