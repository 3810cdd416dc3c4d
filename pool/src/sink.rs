//! Share Sink: the external collaborator shares are handed to once
//! validated. The connection never awaits this before replying to the
//! miner — acceptance is a validation-layer decision, persistence is
//! best-effort and happens on its own channel.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::shares::Share;

#[async_trait::async_trait]
pub trait ShareSink: Send + Sync {
    async fn submit_share(&self, share: Share) -> anyhow::Result<()>;
}

/// Reference implementation: logs the share and drops it. Stands in for
/// whatever actually persists shares (a database, a payout ledger) in a
/// production deployment.
pub struct LoggingShareSink;

#[async_trait::async_trait]
impl ShareSink for LoggingShareSink {
    async fn submit_share(&self, share: Share) -> anyhow::Result<()> {
        info!(
            session_id = %share.session_id,
            worker = %share.worker_name,
            job_id = %share.job_id,
            block_candidate = share.block_candidate,
            "share accepted"
        );
        Ok(())
    }
}

/// Spawns the background task that drains accepted shares into `sink`.
/// Connections enqueue onto the returned sender and move on; this task
/// is the only thing that ever awaits the sink.
pub fn spawn_sink_worker<S: ShareSink + 'static>(
    sink: S,
    mut shares: mpsc::UnboundedReceiver<Share>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(share) = shares.recv().await {
            if let Err(err) = sink.submit_share(share).await {
                warn!(error = %err, "share sink rejected a share");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink {
        tx: std::sync::mpsc::Sender<()>,
    }

    #[async_trait::async_trait]
    impl ShareSink for CountingSink {
        async fn submit_share(&self, _share: Share) -> anyhow::Result<()> {
            let _ = self.tx.send(());
            Ok(())
        }
    }

    fn sample_share() -> Share {
        Share {
            session_id: "s1".to_string(),
            worker_name: "alice".to_string(),
            job_id: "J1".to_string(),
            extranonce2: vec![0, 0, 0, 1],
            ntime: 0,
            nonce: 0,
            submitted_at_secs: 0,
            hash: [0u8; 32],
            difficulty_at_submit: 1.0,
            block_candidate: false,
        }
    }

    #[tokio::test]
    async fn worker_drains_queued_shares_into_the_sink() {
        let (count_tx, count_rx) = std::sync::mpsc::channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_sink_worker(CountingSink { tx: count_tx }, rx);

        tx.send(sample_share()).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(count_rx.try_recv(), Ok(()));
    }
}
