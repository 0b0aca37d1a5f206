//! Block-height gate run before submission

use super::ChainClient;
use crate::error::{TxError, TxResult};
use crate::shutdown::cancelled;

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Wait until the chain head reaches `target`.
///
/// Returns at once when no target is set. A failed poll counts as
/// "not reached yet". Each poll is bounded by the deadline and by shutdown.
pub async fn wait_for_height<C: ChainClient + ?Sized>(
    client: &C,
    target: Option<u64>,
    poll_interval: Duration,
    timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> TxResult<()> {
    let Some(target) = target else {
        return Ok(());
    };

    info!("Waiting for block height {}", target);
    let deadline = Instant::now() + timeout;
    let mut last_seen = None;

    loop {
        let polled = tokio::select! {
            polled = client.latest_header() => polled,
            _ = sleep_until(deadline) => {
                return Err(TxError::GateTimedOut { target, last_seen });
            }
            _ = cancelled(shutdown) => {
                return Err(TxError::Cancelled(format!("waiting for block height {}", target)));
            }
        };

        match polled {
            Ok(header) => {
                last_seen = Some(header.number);
                if header.number >= target {
                    info!("Block height {} reached (head {})", target, header.number);
                    return Ok(());
                }
                debug!("Head {} below target {}", header.number, target);
            }
            Err(e) => warn!("Failed to poll block height: {}", e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(TxError::GateTimedOut { target, last_seen });
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval.min(deadline - now)) => {}
            _ = cancelled(shutdown) => {
                return Err(TxError::Cancelled(format!("waiting for block height {}", target)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockHeader, MockChainClient, StalledClient};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            number,
            base_fee: None,
        }
    }

    #[tokio::test]
    async fn test_no_target_returns_immediately() {
        let mut client = MockChainClient::new();
        client.expect_latest_header().times(0);
        let (_tx, mut rx) = watch::channel(false);

        wait_for_height(&client, None, Duration::from_secs(1), Duration::from_secs(1), &mut rx)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_target_and_tolerates_poll_errors() {
        let polls = Arc::new(AtomicU64::new(0));
        let mut client = MockChainClient::new();
        let counter = polls.clone();
        client.expect_latest_header().returning(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Err(TxError::rpc("fetch latest header", "connection reset"));
            }
            Ok(header(100 + n))
        });
        let (_tx, mut rx) = watch::channel(false);

        wait_for_height(
            &client,
            Some(103),
            Duration::from_millis(500),
            Duration::from_secs(60),
            &mut rx,
        )
        .await
        .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_seen_height() {
        let mut client = MockChainClient::new();
        client.expect_latest_header().returning(|| Ok(header(10)));
        let (_tx, mut rx) = watch::channel(false);

        let err = wait_for_height(
            &client,
            Some(50),
            Duration::from_secs(1),
            Duration::from_secs(5),
            &mut rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            TxError::GateTimedOut {
                target: 50,
                last_seen: Some(10)
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_wait() {
        let mut client = MockChainClient::new();
        client.expect_latest_header().returning(|| Ok(header(1)));
        let (tx, mut rx) = watch::channel(false);

        let gate = tokio::spawn(async move {
            wait_for_height(
                &client,
                Some(1_000),
                Duration::from_secs(1),
                Duration::from_secs(3_600),
                &mut rx,
            )
            .await
        });
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();

        let err = gate.await.unwrap().unwrap_err();
        assert!(matches!(err, TxError::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_node_still_times_out() {
        let (_tx, mut rx) = watch::channel(false);
        let started = Instant::now();

        let err = wait_for_height(
            &StalledClient,
            Some(10),
            Duration::from_secs(1),
            Duration::from_secs(5),
            &mut rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            TxError::GateTimedOut {
                target: 10,
                last_seen: None
            }
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_stalled_poll() {
        let (tx, mut rx) = watch::channel(false);
        let started = Instant::now();

        let gate = tokio::spawn(async move {
            wait_for_height(
                &StalledClient,
                Some(10),
                Duration::from_secs(1),
                Duration::from_secs(3_600),
                &mut rx,
            )
            .await
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();

        let err = gate.await.unwrap().unwrap_err();
        assert!(matches!(err, TxError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
