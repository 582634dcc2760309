//! Abandoned transaction sweeper and runtime construction.
//!
//! A transaction the peer never answers would otherwise stay open forever.
//! The sweeper removes every entry idle for longer than
//! `transaction_timeout_ms`; a PROVISION abandoned this way also rolls back
//! the server it left pending.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use playpen_common::Config;
use playpen_proto::BaseCommand;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::network::Network;
use crate::transaction::now_ms;

impl Network {
    /// Remove transactions idle past the configured timeout as of `now_ms`.
    /// Returns how many were removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let expired = self
            .transactions
            .sweep_expired(now_ms, self.config().transaction_timeout_ms);

        for info in &expired {
            warn!(
                transaction_id = %info.id,
                peer = info.peer.as_deref().unwrap_or("-"),
                idle_ms = now_ms.saturating_sub(info.last_activity_ms),
                "abandoned transaction removed"
            );
            let pending = info.command().and_then(BaseCommand::provisioned_server_id);
            if let (Some(server_id), Some(peer)) = (pending, info.peer.as_deref()) {
                self.rollback_pending_server(peer, server_id);
            }
        }
        expired.len()
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval_ms` until `shutdown`
    /// is notified.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let network = Arc::clone(self);
        let interval_ms = self.config().sweep_interval_ms.max(1);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            info!(interval_ms, "transaction sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = network.sweep(now_ms());
                        if removed > 0 {
                            debug!(removed, "sweep finished");
                        }
                    }
                    _ = shutdown.notified() => {
                        info!("transaction sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Multi-threaded runtime sized by `scheduler_threads`.
pub fn build_runtime(config: &Config) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(config.scheduler_threads.max(1))
        .thread_name("playpen-net")
        .enable_all()
        .build()
}
