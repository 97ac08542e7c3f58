//! External triggers for the stages: a fixed-interval tick for the scheduled
//! stages and a perpetual receive loop for the consumers.
//!
//! Shutdown is only observed between ticks and between consumer invocations.
//! A tick or invocation that has started always runs to completion.

use std::future::Future;
use std::time::Duration;

use anyhow::{Result, anyhow};
use pipeline::{ConsumeOutcome, Consumer, MessageHandler, ProcessingError};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Flips to `true` once Ctrl-C is received.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
        }
        let _ = tx.send(true);
    });
    rx
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Run `tick` every `period` until Ctrl-C, or exactly once.
///
/// A failed tick is logged and the next one runs on schedule. In `once`
/// mode the failure is returned.
pub async fn run_periodic<F, Fut, T>(name: &str, period: Duration, once: bool, mut tick: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProcessingError>>,
    T: std::fmt::Debug,
{
    if once {
        let outcome = tick().await.map_err(|e| anyhow!("{name} failed [{}]: {e}", e.code()))?;
        info!(stage = name, ?outcome, "Single run finished");
        return Ok(());
    }

    tick_until(name, period, tick, shutdown_signal()).await;
    Ok(())
}

async fn tick_until<F, Fut, T>(name: &str, period: Duration, mut tick: F, mut shutdown: watch::Receiver<bool>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProcessingError>>,
{
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(stage = name, period_seconds = period.as_secs(), "Starting periodic stage");
    loop {
        tokio::select! {
            biased;
            _ = stop_requested(&mut shutdown) => break,
            _ = timer.tick() => {}
        }

        if let Err(e) = tick().await {
            warn!(stage = name, code = e.code(), "Tick failed, waiting for the next one: {e}");
        }
    }

    info!(stage = name, "Shutting down");
}

/// Drive a consumer until Ctrl-C, or for a single invocation.
///
/// After a failed invocation the loop sleeps for `backoff` so a message that
/// keeps failing does not spin the process. Ctrl-C cuts the back-off short.
pub async fn run_consumer<H: MessageHandler>(
    consumer: &Consumer,
    handler: &H,
    once: bool,
    backoff: Duration,
) -> Result<()> {
    if once {
        let queue = &consumer.config().queue;
        let outcome = consumer
            .run_once(handler)
            .await
            .map_err(|e| anyhow!("consumer of {queue} failed [{}]: {e}", e.code()))?;
        info!(%queue, ?outcome, "Single run finished");
        return Ok(());
    }

    consume_until(consumer, handler, backoff, shutdown_signal()).await;
    Ok(())
}

async fn consume_until<H: MessageHandler>(
    consumer: &Consumer,
    handler: &H,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let queue = &consumer.config().queue;

    info!(%queue, "Starting consumer");
    while !*shutdown.borrow() {
        match consumer.run_once(handler).await {
            Ok(ConsumeOutcome::Empty) => debug!(%queue, "Long poll returned nothing"),
            Ok(ConsumeOutcome::Completed { handled, skipped }) => {
                debug!(%queue, handled, skipped, "Batch completed");
            }
            Err(e) => {
                warn!(%queue, code = e.code(), backoff_seconds = backoff.as_secs(), "Backing off after failure");
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut shutdown) => {}
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    info!(%queue, "Shutting down");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pipeline::{
        ConsumerConfig, CorrelationContext, MemoryChannel, MessageChannel, OutgoingMessage,
        ResponseReceivedUpdate,
    };

    use super::*;

    struct Rejecting;

    #[async_trait]
    impl MessageHandler for Rejecting {
        type Payload = ResponseReceivedUpdate;

        async fn handle(
            &self,
            payload: ResponseReceivedUpdate,
            _context: &CorrelationContext,
        ) -> Result<(), ProcessingError> {
            Err(ProcessingError::NotFound { entity: "eservice", id: payload.eservice_record_id.to_string() })
        }
    }

    /// Requests shutdown as soon as it starts handling, then finishes the
    /// message anyway.
    struct StopsMidway {
        shutdown: watch::Sender<bool>,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for StopsMidway {
        type Payload = ResponseReceivedUpdate;

        async fn handle(
            &self,
            _payload: ResponseReceivedUpdate,
            _context: &CorrelationContext,
        ) -> Result<(), ProcessingError> {
            let _ = self.shutdown.send(true);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const UPDATE: &[u8] = br#"{"eserviceRecordId":5,"status":"OK","responseReceived":"2024-05-01T10:00:00Z"}"#;

    fn consumer(channel: Arc<MemoryChannel>) -> Consumer {
        let config = ConsumerConfig { wait: Duration::from_millis(10), ..ConsumerConfig::new("responses") };
        Consumer::new(channel, config, "response-updater")
    }

    #[tokio::test]
    async fn test_single_consumer_run_on_empty_queue_succeeds() {
        let channel = Arc::new(MemoryChannel::new());
        run_consumer(&consumer(channel), &Rejecting, true, Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_consumer_run_reports_failure() {
        let channel = Arc::new(MemoryChannel::new());
        channel.send("responses", OutgoingMessage::new(UPDATE.to_vec())).await.unwrap();

        let err = run_consumer(&consumer(channel), &Rejecting, true, Duration::ZERO).await.unwrap_err();
        assert!(err.to_string().contains("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_single_periodic_run() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        run_periodic("scheduler", Duration::from_secs(60), true, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProcessingError>(())
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = run_periodic("scheduler", Duration::from_secs(60), true, || async {
            Err::<(), _>(ProcessingError::downstream("catalog", "503"))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_lets_current_invocation_finish() {
        let channel = Arc::new(MemoryChannel::new());
        for _ in 0..2 {
            channel.send("responses", OutgoingMessage::new(UPDATE.to_vec())).await.unwrap();
        }
        let (tx, rx) = watch::channel(false);
        let handler = StopsMidway { shutdown: tx, finished: AtomicUsize::new(0) };

        consume_until(&consumer(channel.clone()), &handler, Duration::ZERO, rx).await;

        assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
        assert_eq!(channel.len("responses").await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cuts_back_off_short() {
        let channel = Arc::new(MemoryChannel::new());
        channel.send("responses", OutgoingMessage::new(UPDATE.to_vec())).await.unwrap();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            consume_until(&consumer(channel), &Rejecting, Duration::from_secs(600), rx),
        )
        .await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn test_periodic_stage_stops_after_running_tick() {
        let (tx, rx) = watch::channel(false);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let tx = &tx;

        tick_until("scheduler", Duration::from_millis(10), move || async move {
            let _ = tx.send(true);
            tokio::time::sleep(Duration::from_millis(30)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProcessingError>(())
        }, rx)
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
