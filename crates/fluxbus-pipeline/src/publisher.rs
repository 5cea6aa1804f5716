//! At-least-once publisher with per-key ordering lanes.
//!
//! Each ordering key gets a dedicated lane: a tokio task that owns a
//! bounded `mpsc` receiver and processes jobs strictly FIFO, so retries
//! never reorder envelopes that share a key. Distinct keys run on distinct
//! lanes and never wait on each other. A retry backoff suspends only the
//! lane it happens on.
//!
//! Envelope life cycle: `Pending → Sending → {Acked | RetryWait} →
//! Sending → … → {Acked | Failed}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Notify};

use fluxbus_core::{
    DeliveryOutcome, DeliveryStatus, Envelope, InferenceError, PipelineError, RawEvent,
};

use crate::broker::{Broker, BrokerError, BrokerRecord};
use crate::config::RetryConfig;
use crate::metrics::PipelineMetrics;

/// One unit of work for a lane: the envelope plus the ack channel back to
/// the waiting caller.
struct LaneJob {
    envelope: Envelope,
    event: RawEvent,
    enrichment_error: Option<InferenceError>,
    ack: oneshot::Sender<DeliveryOutcome>,
}

/// Lane registry, shared with the lane tasks so an idle lane can reap its
/// own entry.
type LaneMap = Arc<Mutex<HashMap<String, mpsc::Sender<LaneJob>>>>;

/// State shared between the publisher front and all lane tasks.
struct LaneShared {
    broker: Arc<dyn Broker>,
    retry: RetryConfig,
    in_flight: AtomicUsize,
    drained: Notify,
    metrics: Arc<PipelineMetrics>,
}

impl LaneShared {
    fn record(&self, outcome: &DeliveryOutcome) {
        match outcome.status {
            DeliveryStatus::Acked => {
                self.metrics.acked_total.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryStatus::Failed => {
                self.metrics.failed_total.fetch_add(1, Ordering::Relaxed);
                if matches!(outcome.error, Some(PipelineError::Shutdown)) {
                    self.metrics
                        .shutdown_failures_total
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Reliable send primitive over the broker port.
///
/// Guarantees at-least-once delivery with per-key submission order
/// preserved under retry. Safe for concurrent use; cheap to share via
/// `Arc`.
pub struct Publisher {
    shared: Arc<LaneShared>,
    lanes: LaneMap,
    lane_capacity: usize,
    lane_idle: Duration,
    accepting: AtomicBool,
    abort_tx: watch::Sender<bool>,
}

impl Publisher {
    /// Creates a publisher over an already-connected broker.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        retry: RetryConfig,
        lane_capacity: usize,
        lane_idle_timeout: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(LaneShared {
                broker,
                retry,
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                metrics,
            }),
            lanes: Arc::new(Mutex::new(HashMap::new())),
            lane_capacity,
            lane_idle: lane_idle_timeout,
            accepting: AtomicBool::new(true),
            abort_tx,
        }
    }

    /// Number of sends that have not yet reached a terminal state.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Number of live lanes in the registry. Idle lanes reap themselves,
    /// so this tracks recent key activity rather than total keys seen.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Drives one envelope to a terminal [`DeliveryOutcome`].
    ///
    /// Blocks the caller for at most the retry budget (attempts times the
    /// capped backoff schedule). Never returns an error: failures are data.
    pub async fn send(
        &self,
        envelope: Envelope,
        event: RawEvent,
        enrichment_error: Option<InferenceError>,
    ) -> DeliveryOutcome {
        let topic = envelope.topic;
        let key = envelope.key.clone();

        if !self.accepting.load(Ordering::Acquire) {
            let outcome =
                DeliveryOutcome::failed(topic, key, 0, PipelineError::Shutdown, event)
                    .with_enrichment_error(enrichment_error);
            self.shared.record(&outcome);
            return outcome;
        }

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let (ack_tx, ack_rx) = oneshot::channel();
        let fallback_event = event.clone();
        let mut job = LaneJob {
            envelope,
            event,
            enrichment_error: enrichment_error.clone(),
            ack: ack_tx,
        };

        loop {
            let lane = self.lane(&job.envelope.key);
            let Err(rejected) = lane.send(job).await else {
                break;
            };
            job = rejected.0;
            // A closed lane during normal operation means it reaped itself
            // between lookup and send; the next lookup spawns a fresh one.
            if !self.accepting.load(Ordering::Acquire) {
                self.shared.finish_one();
                let outcome =
                    DeliveryOutcome::failed(topic, key, 0, PipelineError::Shutdown, job.event)
                        .with_enrichment_error(job.enrichment_error);
                self.shared.record(&outcome);
                return outcome;
            }
        }

        match ack_rx.await {
            Ok(outcome) => outcome,
            // Lane task went away without acking (runtime teardown).
            Err(_) => {
                DeliveryOutcome::failed(topic, key, 0, PipelineError::Shutdown, fallback_event)
                    .with_enrichment_error(enrichment_error)
            }
        }
    }

    /// Stops accepting sends, waits for in-flight work to reach a terminal
    /// state, and fails stragglers with a shutdown error once
    /// `drain_timeout` elapses.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.accepting.store(false, Ordering::Release);

        if tokio::time::timeout(drain_timeout, self.wait_drained())
            .await
            .is_err()
        {
            let pending = self.in_flight();
            tracing::warn!(pending, "drain timeout elapsed, failing in-flight sends");
            let _ = self.abort_tx.send(true);
            // Lanes fail everything promptly once aborted.
            self.wait_drained().await;
        }

        self.lanes.lock().clear();
    }

    /// Returns the lane sender for `key`, spawning the lane on first use.
    fn lane(&self, key: &str) -> mpsc::Sender<LaneJob> {
        let mut lanes = self.lanes.lock();
        if let Some(tx) = lanes.get(key) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::channel(self.lane_capacity);
        tokio::spawn(run_lane(
            key.to_owned(),
            tx.clone(),
            rx,
            Arc::clone(&self.shared),
            self.abort_tx.subscribe(),
            Arc::clone(&self.lanes),
            self.lane_idle,
        ));
        lanes.insert(key.to_owned(), tx.clone());
        tx
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.shared.drained.notified();
            if self.shared.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("lanes", &self.lanes.lock().len())
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.accepting.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Completes once the abort flag is set (or the publisher is gone).
async fn wait_abort(abort: &mut watch::Receiver<bool>) {
    while !*abort.borrow_and_update() {
        if abort.changed().await.is_err() {
            return;
        }
    }
}

/// Main loop for one ordering-key lane.
///
/// Owns the receiver exclusively; jobs run strictly FIFO. After
/// `idle_timeout` without work the lane unregisters itself, finishes
/// anything queued in the race window, and exits; the key's next send
/// spawns a fresh lane.
async fn run_lane(
    key: String,
    self_tx: mpsc::Sender<LaneJob>,
    mut rx: mpsc::Receiver<LaneJob>,
    shared: Arc<LaneShared>,
    mut abort: watch::Receiver<bool>,
    lanes: LaneMap,
    idle_timeout: Duration,
) {
    tracing::debug!(key = %key, "publisher lane started");
    loop {
        let job = tokio::select! {
            biased;
            () = wait_abort(&mut abort) => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            () = tokio::time::sleep(idle_timeout) => {
                {
                    let mut lanes = lanes.lock();
                    if lanes.get(&key).is_some_and(|tx| tx.same_channel(&self_tx)) {
                        lanes.remove(&key);
                    }
                }
                // Closing stops new sends but leaves queued jobs readable;
                // keep looping so a racing job is still delivered, then
                // recv() yields None and the loop ends.
                rx.close();
                tracing::debug!(key = %key, "idle lane reaped");
                continue;
            }
        };

        let outcome = deliver(&shared, job.envelope, job.event, job.enrichment_error, &mut abort).await;
        shared.record(&outcome);
        if let Err(outcome) = job.ack.send(outcome) {
            // Caller stopped waiting (ingest deadline); the terminal state
            // still gets logged and counted.
            tracing::debug!(
                key = %key,
                status = ?outcome.status,
                attempts = outcome.attempts,
                "delivery completed after caller stopped waiting"
            );
        }
        shared.finish_one();
    }

    // Shutdown path: fail everything still queued on this lane.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        let LaneJob {
            envelope,
            event,
            enrichment_error,
            ack,
        } = job;
        let outcome = DeliveryOutcome::failed(
            envelope.topic,
            envelope.key,
            envelope.attempt,
            PipelineError::Shutdown,
            event,
        )
        .with_enrichment_error(enrichment_error);
        shared.record(&outcome);
        let _ = ack.send(outcome);
        shared.finish_one();
    }
    tracing::debug!(key = %key, "publisher lane stopped");
}

/// Runs the retry loop for one envelope until a terminal outcome.
async fn deliver(
    shared: &LaneShared,
    mut envelope: Envelope,
    event: RawEvent,
    enrichment_error: Option<InferenceError>,
    abort: &mut watch::Receiver<bool>,
) -> DeliveryOutcome {
    let payload = match serde_json::to_vec(&envelope.payload) {
        Ok(payload) => payload,
        Err(err) => {
            let error = PipelineError::Delivery {
                attempts: 0,
                last: format!("payload serialization failed: {err}"),
            };
            return DeliveryOutcome::failed(envelope.topic, envelope.key, 0, error, event)
                .with_enrichment_error(enrichment_error);
        }
    };

    loop {
        envelope.attempt += 1;
        let result: Option<Result<(), BrokerError>> = {
            let record = BrokerRecord {
                topic: envelope.topic,
                key: &envelope.key,
                payload: &payload,
            };
            tokio::select! {
                biased;
                () = wait_abort(abort) => None,
                result = shared.broker.publish(record) => Some(result),
            }
        };

        let Some(result) = result else {
            return DeliveryOutcome::failed(
                envelope.topic,
                envelope.key,
                envelope.attempt - 1,
                PipelineError::Shutdown,
                event,
            )
            .with_enrichment_error(enrichment_error);
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    topic = envelope.topic,
                    key = %envelope.key,
                    attempts = envelope.attempt,
                    "event acked"
                );
                return DeliveryOutcome::acked(
                    envelope.topic,
                    envelope.key,
                    envelope.attempt,
                    event,
                )
                .with_enrichment_error(enrichment_error);
            }
            Err(err) if err.is_transient() && envelope.attempt < shared.retry.max_attempts => {
                shared.metrics.retries_total.fetch_add(1, Ordering::Relaxed);
                let delay = shared.retry.delay_for(envelope.attempt);
                tracing::warn!(
                    topic = envelope.topic,
                    key = %envelope.key,
                    attempt = envelope.attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient publish failure, backing off"
                );
                tokio::select! {
                    biased;
                    () = wait_abort(abort) => {
                        return DeliveryOutcome::failed(
                            envelope.topic,
                            envelope.key,
                            envelope.attempt,
                            PipelineError::Shutdown,
                            event,
                        )
                        .with_enrichment_error(enrichment_error);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                tracing::warn!(
                    topic = envelope.topic,
                    key = %envelope.key,
                    attempts = envelope.attempt,
                    error = %err,
                    "event delivery failed"
                );
                let error = PipelineError::Delivery {
                    attempts: envelope.attempt,
                    last: err.to_string(),
                };
                return DeliveryOutcome::failed(
                    envelope.topic,
                    envelope.key,
                    envelope.attempt,
                    error,
                    event,
                )
                .with_enrichment_error(enrichment_error);
            }
        }
    }
}
