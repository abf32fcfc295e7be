use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Published onto the bus by `emit: event_name` hooks (§4.10).
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub source_module: String,
    pub source_action: String,
    pub data: Value,
    pub meta: Value,
    pub timestamp: DateTime<Utc>,
}

/// A topic subscriber (webhook dispatcher, reconciliation job, …). Must be
/// idempotent across retries (§4.10, §5).
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Event delivered to the dead-letter sink after exhausting retries.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: Event,
    pub subscriber: String,
    pub last_error: String,
    pub attempts: u32,
}

/// Topic → subscribers, at-least-once delivery with exponential backoff
/// retry and dead-lettering, dispatched off a `crossbeam-channel` queue.
pub struct EventBus {
    subscribers: Arc<DashMap<String, Vec<Arc<dyn EventSubscriber>>>>,
    sender: crossbeam_channel::Sender<Event>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

pub struct EventBusConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl EventBus {
    /// Spawns the dispatch loop onto `runtime`. Each event is fanned out to
    /// every subscriber of its topic concurrently.
    pub fn new(runtime: tokio::runtime::Handle, config: EventBusConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Event>();
        let subscribers: Arc<DashMap<String, Vec<Arc<dyn EventSubscriber>>>> = Arc::new(DashMap::new());
        let dead_letters: Arc<Mutex<Vec<DeadLetter>>> = Arc::new(Mutex::new(Vec::new()));

        let loop_subscribers = subscribers.clone();
        let loop_dead_letters = dead_letters.clone();
        let loop_runtime = runtime.clone();
        std::thread::spawn(move || {
            for event in receiver.iter() {
                let Some(topic_subscribers) = loop_subscribers.get(&event.name) else {
                    continue;
                };
                for subscriber in topic_subscribers.value().clone() {
                    let event = event.clone();
                    let dead_letters = loop_dead_letters.clone();
                    let max_attempts = config.max_attempts;
                    let base_backoff = config.base_backoff;
                    let max_backoff = config.max_backoff;
                    loop_runtime.spawn(async move {
                        deliver_with_retry(subscriber, event, max_attempts, base_backoff, max_backoff, dead_letters).await;
                    });
                }
            }
        });

        Self {
            subscribers,
            sender,
            dead_letters,
        }
    }

    pub fn subscribe(&self, topic: impl Into<String>, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.entry(topic.into()).or_default().push(subscriber);
    }

    /// Non-blocking publish; the unbounded queue means publishers are never
    /// stalled by slow subscribers (§5: hook handlers must not hold long locks
    /// across I/O).
    pub fn publish(&self, event: Event) {
        if self.sender.send(event).is_err() {
            error!("event bus dispatch thread is gone, event dropped");
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().clone()
    }
}

async fn deliver_with_retry(
    subscriber: Arc<dyn EventSubscriber>,
    event: Event,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match subscriber.handle(&event).await {
            Ok(()) => {
                return;
            }
            Err(err) => {
                if attempt >= max_attempts {
                    warn!(
                        subscriber = %subscriber.name(),
                        event = %event.name,
                        attempts = attempt,
                        error = %err,
                        "event delivery exhausted retries, dead-lettering"
                    );
                    dead_letters.lock().unwrap().push(DeadLetter {
                        event,
                        subscriber: subscriber.name().to_string(),
                        last_error: err.to_string(),
                        attempts: attempt,
                    });
                    return;
                }
                let backoff = (base_backoff * 2u32.saturating_pow(attempt - 1)).min(max_backoff);
                info!(
                    subscriber = %subscriber.name(),
                    event = %event.name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying event delivery"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
