//! WITNESS - the pure observer.
//!
//! Consumes events from the telemetry and ambient streams, classifies them
//! against the pattern store, and emits Signals when confidence and
//! min-evidence thresholds are met. Never acts on what it sees and never
//! blocks upstream producers: classification errors retry a bounded number
//! of times, then the event is dropped with a logged reason.

mod memory;

use parking_lot::Mutex;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trinity_models::error::Result;
use trinity_models::{Event, Signal, SignalCategory, SignalEvidence, queues};

use crate::bus::MessageBus;
use crate::patterns::PatternStore;

pub use memory::ShortTermMemory;

#[derive(Debug, Clone)]
pub struct WitnessConfig {
    /// Emitted signals need at least this combined confidence.
    pub confidence_floor: f64,
    /// Keyword overlap floor for a pattern to match at all.
    pub keyword_floor: f64,
    /// Semantic score floor for a pattern to match at all.
    pub semantic_floor: f64,
    /// Sliding window for recurring-topic evidence, milliseconds.
    pub memory_window_ms: i64,
    /// Bounded short-term memory capacity.
    pub memory_capacity: usize,
    /// Classification retries before an event is dropped.
    pub max_retries: u32,
    /// Candidate patterns considered per event.
    pub search_limit: usize,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.35,
            keyword_floor: 0.2,
            semantic_floor: 0.3,
            memory_window_ms: 3_600_000,
            memory_capacity: 512,
            max_retries: 2,
            search_limit: 8,
        }
    }
}

pub struct Witness {
    patterns: PatternStore,
    bus: MessageBus,
    memory: Mutex<ShortTermMemory>,
    config: WitnessConfig,
}

impl Witness {
    pub fn new(patterns: PatternStore, bus: MessageBus, config: WitnessConfig) -> Self {
        Self {
            patterns,
            bus,
            memory: Mutex::new(ShortTermMemory::new(config.memory_capacity)),
            config,
        }
    }

    fn tokens(content: &str) -> BTreeSet<String> {
        content
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_string)
            .collect()
    }

    fn parse_category(category: &str) -> Option<SignalCategory> {
        match category {
            "user_intent" => Some(SignalCategory::UserIntent),
            "opportunity" => Some(SignalCategory::Opportunity),
            "failure" => Some(SignalCategory::Failure),
            "recurring_topic" => Some(SignalCategory::RecurringTopic),
            _ => None,
        }
    }

    /// Classify one event into zero or more signals. Ambiguous matches emit
    /// one signal per pattern under a single correlation id.
    pub async fn classify(&self, event: &Event) -> Result<Vec<Signal>> {
        let candidates = self
            .patterns
            .search(&event.content, BTreeSet::new(), self.config.search_limit)
            .await?;
        let event_tokens = Self::tokens(&event.content);
        let correlation_id = trinity_models::new_id();
        let mut signals = Vec::new();

        for (pattern, semantic_score) in candidates {
            // Only records that describe signal categories participate;
            // plans, templates, and reasoning records never classify.
            let Some(category) = Self::parse_category(&pattern.category) else {
                continue;
            };

            let keywords: BTreeSet<String> = pattern
                .tags
                .iter()
                .map(|t| t.to_lowercase())
                .chain(Self::tokens(&pattern.description))
                .collect();
            let overlap = if keywords.is_empty() {
                0.0
            } else {
                keywords.intersection(&event_tokens).count() as f64 / keywords.len() as f64
            };

            if overlap < self.config.keyword_floor || semantic_score < self.config.semantic_floor {
                continue;
            }

            // Combined score is the emitted confidence, bounded by the
            // event's own confidence in what it observed.
            let confidence =
                (0.5 * semantic_score + 0.5 * overlap).min(1.0) * event.confidence;
            if confidence < self.config.confidence_floor {
                continue;
            }

            let (times_seen, window_start) = {
                let mut memory = self.memory.lock();
                memory.note(&pattern.id, event.timestamp);
                (
                    memory.count_within(&pattern.id, self.config.memory_window_ms, event.timestamp),
                    event.timestamp - self.config.memory_window_ms,
                )
            };
            if times_seen < category.min_evidence() {
                debug!(
                    pattern = %pattern.key,
                    times_seen,
                    needed = category.min_evidence(),
                    "Pattern below evidence threshold"
                );
                continue;
            }

            let matched: Vec<String> = keywords
                .intersection(&event_tokens)
                .cloned()
                .collect();
            signals.push(
                Signal::new(
                    pattern.key.clone(),
                    category,
                    confidence,
                    SignalEvidence {
                        times_seen,
                        keywords: matched,
                        window_start,
                        window_end: event.timestamp,
                    },
                    event.content.clone(),
                )
                .with_correlation_id(correlation_id.clone()),
            );
        }
        Ok(signals)
    }

    /// Classify and emit to `signal_queue`, retrying classification errors a
    /// bounded number of times, then dropping the event.
    pub async fn observe(&self, event: &Event) -> Result<Vec<Signal>> {
        let mut attempt = 0;
        let signals = loop {
            attempt += 1;
            match self.classify(event).await {
                Ok(signals) => break signals,
                Err(err) if attempt <= self.config.max_retries => {
                    warn!(event_id = %event.id, attempt, error = %err, "Classification failed, retrying");
                }
                Err(err) => {
                    warn!(event_id = %event.id, error = %err, "Classification failed, dropping event");
                    return Ok(Vec::new());
                }
            }
        };

        for signal in &signals {
            self.bus
                .publish(
                    queues::SIGNAL_QUEUE,
                    serde_json::to_value(signal).map_err(trinity_models::TrinityError::storage)?,
                    signal.category.priority(),
                    Some(signal.correlation_id.clone()),
                )
                .await?;
            info!(
                signal_id = %signal.id,
                pattern = %signal.pattern_name,
                confidence = signal.confidence,
                "Signal emitted"
            );
        }
        Ok(signals)
    }

    /// Consume both input streams until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let telemetry = self.bus.subscribe(queues::TELEMETRY_STREAM);
        let ambient = self.bus.subscribe(queues::AMBIENT_CONTEXT_STREAM);
        loop {
            let delivery = tokio::select! {
                delivery = telemetry.recv() => delivery,
                delivery = ambient.recv() => delivery,
                _ = cancel.cancelled() => return,
            };
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    warn!(error = %err, "Event stream receive failed");
                    continue;
                }
            };
            match delivery.message.decode::<Event>() {
                Ok(event) => {
                    let _ = self.observe(&event).await;
                    let _ = delivery.ack().await;
                }
                Err(err) => {
                    warn!(error = %err, "Undecodable event message");
                    let _ = delivery.nack(false).await;
                }
            }
        }
    }
}
