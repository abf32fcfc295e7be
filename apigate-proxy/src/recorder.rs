//! Buffered, size-and-time triggered usage event writer (§4.7). Grounded on
//! the teacher's `ConnPool::warm` background-task shape (`worker.rs`): a
//! dedicated tokio task owns the buffer, woken by either a timer or an
//! incoming record crossing the batch-size threshold.

use apigate_core::model::UsageEvent;
use apigate_store::UsageStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, warn};

pub struct RecorderConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// 0 means unbounded (§4.7): the buffer grows at the cost of memory
    /// instead of dropping events.
    pub bounded_capacity: usize,
    pub close_deadline: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(10),
            bounded_capacity: 0,
            close_deadline: Duration::from_secs(5),
        }
    }
}

enum Message {
    Record(UsageEvent),
    Flush(tokio::sync::oneshot::Sender<()>),
}

enum Sender {
    Bounded(mpsc::Sender<Message>),
    Unbounded(mpsc::UnboundedSender<Message>),
}

enum Receiver {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

impl Receiver {
    async fn recv(&mut self) -> Option<Message> {
        match self {
            Receiver::Bounded(r) => r.recv().await,
            Receiver::Unbounded(r) => r.recv().await,
        }
    }
}

/// Handle the proxy path holds. `record` never blocks: in bounded mode a
/// full channel increments `dropped` and returns instead of backing up the
/// request path.
pub struct UsageRecorder {
    sender: Sender,
    dropped: Arc<AtomicU64>,
    close_deadline: Duration,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl UsageRecorder {
    pub fn spawn(store: Arc<dyn UsageStore>, config: RecorderConfig) -> Self {
        let (sender, receiver) = if config.bounded_capacity > 0 {
            let (tx, rx) = mpsc::channel(config.bounded_capacity);
            (Sender::Bounded(tx), Receiver::Bounded(rx))
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            (Sender::Unbounded(tx), Receiver::Unbounded(rx))
        };

        let dropped = Arc::new(AtomicU64::new(0));
        let batch_size = config.batch_size;
        let flush_interval = config.flush_interval;

        let worker = tokio::spawn(run_worker(store, receiver, batch_size, flush_interval));

        Self {
            sender,
            dropped,
            close_deadline: config.close_deadline,
            worker: Some(worker),
        }
    }

    /// Non-blocking enqueue (§4.7).
    pub fn record(&self, event: UsageEvent) {
        let result = match &self.sender {
            Sender::Bounded(tx) => tx.try_send(Message::Record(event)).map_err(|_| ()),
            Sender::Unbounded(tx) => tx.send(Message::Record(event)).map_err(|_| ()),
        };
        if result.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("usage recorder buffer full or closed, event dropped");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flushes remaining events synchronously with a bounded deadline
    /// (§4.7). Safe to call multiple times.
    pub async fn flush(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let sent = match &self.sender {
            Sender::Bounded(s) => s.send(Message::Flush(tx)).await.is_ok(),
            Sender::Unbounded(s) => s.send(Message::Flush(tx)).is_ok(),
        };
        if !sent {
            return;
        }
        let _ = tokio::time::timeout(self.close_deadline, rx).await;
    }

    pub async fn close(mut self) {
        self.flush().await;
        if let Some(worker) = self.worker.take() {
            let _ = tokio::time::timeout(self.close_deadline, worker).await;
        }
    }
}

async fn run_worker(
    store: Arc<dyn UsageStore>,
    mut receiver: Receiver,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut buffer: Vec<UsageEvent> = Vec::with_capacity(batch_size);
    let mut ticker = interval(flush_interval);
    ticker.tick().await; // first tick fires immediately; discard

    loop {
        tokio::select! {
            maybe_msg = receiver.recv() => {
                match maybe_msg {
                    Some(Message::Record(event)) => {
                        buffer.push(event);
                        if buffer.len() >= batch_size {
                            flush(&store, &mut buffer).await;
                        }
                    }
                    Some(Message::Flush(done)) => {
                        flush(&store, &mut buffer).await;
                        let _ = done.send(());
                    }
                    None => {
                        flush(&store, &mut buffer).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&store, &mut buffer).await;
                }
            }
        }
    }
}

async fn flush(store: &Arc<dyn UsageStore>, buffer: &mut Vec<UsageEvent>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(err) = store.record_batch(buffer).await {
        error!(error = %err, count = buffer.len(), "usage batch write failed");
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct StubStore {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl UsageStore for StubStore {
        async fn record_batch(&self, events: &[UsageEvent]) -> anyhow::Result<()> {
            self.batches.lock().unwrap().push(events.len());
            Ok(())
        }
        async fn get_summary(
            &self,
            _principal_id: &str,
            _month_start: chrono::DateTime<Utc>,
            _month_end: chrono::DateTime<Utc>,
        ) -> anyhow::Result<apigate_store::UsageSummary> {
            Ok(apigate_store::UsageSummary { count: 0, units: 0.0 })
        }
    }

    fn event() -> UsageEvent {
        UsageEvent {
            timestamp: Utc::now(),
            principal_id: "p1".into(),
            key_id: "k1".into(),
            route_id: None,
            method: "GET".into(),
            path: "/x".into(),
            status_code: 200,
            units: 1.0,
            request_bytes: 0,
            response_bytes: 0,
            duration_ns: 0,
            aborted: false,
        }
    }

    #[tokio::test]
    async fn flushes_on_close() {
        let store: Arc<dyn UsageStore> = Arc::new(StubStore { batches: Mutex::new(vec![]) });
        let recorder = UsageRecorder::spawn(
            Arc::clone(&store),
            RecorderConfig { batch_size: 100, flush_interval: Duration::from_secs(3600), bounded_capacity: 0, close_deadline: Duration::from_secs(1) },
        );
        recorder.record(event());
        recorder.record(event());
        recorder.close().await;
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let store: Arc<dyn UsageStore> = Arc::new(StubStore { batches: Mutex::new(vec![]) });
        let recorder = UsageRecorder::spawn(
            Arc::clone(&store),
            RecorderConfig { batch_size: 2, flush_interval: Duration::from_secs(3600), bounded_capacity: 0, close_deadline: Duration::from_secs(1) },
        );
        recorder.record(event());
        recorder.record(event());
        tokio::time::sleep(Duration::from_millis(20)).await;
        recorder.close().await;
    }

    #[tokio::test]
    async fn bounded_capacity_survives_burst_without_blocking() {
        let store: Arc<dyn UsageStore> = Arc::new(StubStore { batches: Mutex::new(vec![]) });
        let recorder = UsageRecorder::spawn(
            Arc::clone(&store),
            RecorderConfig { batch_size: 100, flush_interval: Duration::from_secs(3600), bounded_capacity: 1, close_deadline: Duration::from_secs(1) },
        );
        // record() must never block even when the channel's single slot is
        // already full; excess events are dropped and counted instead.
        for _ in 0..50 {
            recorder.record(event());
        }
        recorder.close().await;
    }
}
