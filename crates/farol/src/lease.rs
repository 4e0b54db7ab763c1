//! Session TTL keep-alive task
//!
//! Refreshes the session directory's TTL before it expires. The wake
//! interval is five-sixths of the TTL, leaving one sixth as safety
//! margin. The loop sleeps in one-second increments so a stop request
//! is observed within about a second regardless of the TTL.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::kv::{KvClient, PutOptions};

const POLL: Duration = Duration::from_secs(1);

/// Handle to the running keep-alive task.
pub struct LeaseKeeper {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    /// Spawn the keep-alive loop for `session_path` with the given TTL.
    pub fn spawn(kv: Arc<KvClient>, session_path: String, ttl: u32) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            debug!(%session_path, ttl, "lease keeper starting");
            let interval = renew_interval(ttl);
            let mut remaining = interval;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(%session_path, "lease keeper stopping");
                        break;
                    }
                    _ = tokio::time::sleep(POLL.min(remaining)) => {
                        remaining = remaining.saturating_sub(POLL);
                        if remaining.is_zero() {
                            // recreate-if-missing: no prevExist constraint
                            let opts = PutOptions::directory().with_ttl(ttl);
                            match kv.put(&session_path, opts).await {
                                Ok(_) => debug!(%session_path, "session ttl renewed"),
                                Err(e) => warn!(%session_path, error = %e, "session ttl renewal failed"),
                            }
                            remaining = interval;
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the loop and wait for it to finish. No renewal fires after
    /// this returns.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}

/// Wake interval for a TTL: renew at 5/6 of the window, never more
/// often than the poll granularity.
fn renew_interval(ttl: u32) -> Duration {
    let ttl_ms = u64::from(ttl) * 1000;
    Duration::from_millis(ttl_ms - ttl_ms / 6).max(POLL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_interval_leaves_one_sixth_margin() {
        assert_eq!(renew_interval(30), Duration::from_secs(25));
        assert_eq!(renew_interval(6), Duration::from_secs(5));
    }

    #[test]
    fn test_renew_interval_floors_at_poll_granularity() {
        // a degenerate ttl must not turn the loop into a busy spin
        assert_eq!(renew_interval(0), POLL);
        assert!(renew_interval(1) >= POLL);
    }

    #[tokio::test]
    async fn test_zero_ttl_does_not_hammer_the_store() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "action": "set",
                "node": { "key": "/farol/s", "dir": true, "createdIndex": 1, "modifiedIndex": 1 }
            })))
            .mount(&server)
            .await;

        let kv = Arc::new(
            KvClient::new(&format!("{}/v2/keys", server.uri()), 1000, 1000).unwrap(),
        );
        let keeper = LeaseKeeper::spawn(kv, "/farol/s".to_string(), 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        keeper.stop().await;

        let puts = server.received_requests().await.unwrap().len();
        assert!(puts <= 1, "{} renewal PUTs within 300ms for ttl=0", puts);
    }

    #[tokio::test]
    async fn test_stop_joins_promptly() {
        let kv = Arc::new(KvClient::new("http://127.0.0.1:1", 100, 100).unwrap());
        let keeper = LeaseKeeper::spawn(kv, "/farol/s".to_string(), 3600);
        // stop must return well before the renewal would fire
        tokio::time::timeout(Duration::from_secs(5), keeper.stop())
            .await
            .expect("stop should join within the poll granularity");
    }
}
