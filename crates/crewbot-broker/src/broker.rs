//! Per-room message broker with FIFO+priority ordering and a crash-safe
//! write-ahead log.
//!
//! Each room has its own queue and processes independently of other
//! rooms, enabling parallelism across rooms while maintaining strict
//! ordering within a room. Every accepted message is appended to
//! `broker_queue/<safe_room>.jsonl` before the enqueue returns; a cursor
//! file records the last processed sequence so a restart replays exactly
//! the unprocessed tail.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crewbot_core::bus::types::MessageEnvelope;
use crewbot_core::utils::safe_filename;

/// Default bounded queue capacity per room.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;
/// Default seconds an enqueue waits on a full queue.
pub const DEFAULT_ENQUEUE_TIMEOUT_SECS: f64 = 1.0;
/// Extended wait for high-priority (≤ 1) messages.
pub const DEFAULT_HIGH_PRIORITY_TIMEOUT_SECS: f64 = 3.0;

/// Downstream consumer of dequeued messages — the agent loop behind an
/// injected seam so the broker never depends on it directly.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, envelope: MessageEnvelope) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────
// WAL records and queue entries
// ─────────────────────────────────────────────

/// One line of the per-room write-ahead log.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct WalRecord {
    seq: u64,
    priority: i64,
    received_at: DateTime<Utc>,
    message: MessageEnvelope,
}

/// Heap entry ordered by (priority, seq): lower values dequeue first.
struct QueueEntry(WalRecord);

impl QueueEntry {
    fn key(&self) -> (i64, u64) {
        (self.0.priority, self.0.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first.
        other.key().cmp(&self.key())
    }
}

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    seq_counter: u64,
}

// ─────────────────────────────────────────────
// Counters
// ─────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    replayed: AtomicU64,
}

/// Snapshot of a broker's state for status surfaces.
#[derive(Clone, Debug, Serialize)]
pub struct BrokerStats {
    pub queue_depth: usize,
    pub running: bool,
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub replayed: u64,
}

// ─────────────────────────────────────────────
// RoomBroker
// ─────────────────────────────────────────────

/// Per-room message broker with FIFO guarantees.
pub struct RoomBroker {
    room_id: String,
    max_queue_size: usize,
    enqueue_timeout: Duration,
    high_priority_timeout: Duration,

    log_path: PathBuf,
    cursor_path: PathBuf,

    state: Mutex<QueueState>,
    /// Signaled when the worker frees a slot.
    space_notify: Notify,
    /// Signaled when a message lands in the queue.
    item_notify: Notify,

    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    counters: Counters,
}

impl RoomBroker {
    /// Create a broker for a room, with its WAL under `queue_dir`.
    pub fn new(room_id: impl Into<String>, queue_dir: PathBuf) -> std::io::Result<Self> {
        Self::with_limits(
            room_id,
            queue_dir,
            DEFAULT_MAX_QUEUE_SIZE,
            Duration::from_secs_f64(DEFAULT_ENQUEUE_TIMEOUT_SECS),
            Duration::from_secs_f64(DEFAULT_HIGH_PRIORITY_TIMEOUT_SECS),
        )
    }

    /// Create a broker with explicit capacity and timeouts.
    pub fn with_limits(
        room_id: impl Into<String>,
        queue_dir: PathBuf,
        max_queue_size: usize,
        enqueue_timeout: Duration,
        high_priority_timeout: Duration,
    ) -> std::io::Result<Self> {
        let room_id = room_id.into();
        std::fs::create_dir_all(&queue_dir)?;
        let safe_room = safe_filename(&room_id);

        Ok(RoomBroker {
            log_path: queue_dir.join(format!("{safe_room}.jsonl")),
            cursor_path: queue_dir.join(format!("{safe_room}.cursor")),
            room_id,
            max_queue_size,
            enqueue_timeout,
            high_priority_timeout,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                seq_counter: 0,
            }),
            space_notify: Notify::new(),
            item_notify: Notify::new(),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
            counters: Counters::default(),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Add a message to the room queue.
    ///
    /// The message's effective priority (metadata override, envelope
    /// field, or role default) orders the queue; a fresh monotonic `seq`
    /// breaks ties so equal priorities stay FIFO. The WAL append happens
    /// before the enqueue reports success.
    ///
    /// Returns `false` when the queue stayed full past the timeout — the
    /// message is dropped and counted.
    pub async fn enqueue(&self, message: MessageEnvelope) -> bool {
        let priority = message.effective_priority();
        let timeout = if priority <= 1 {
            self.enqueue_timeout.max(self.high_priority_timeout)
        } else {
            self.enqueue_timeout
        };
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let accepted = {
                let mut state = self.state.lock().unwrap();
                if state.heap.len() < self.max_queue_size {
                    state.seq_counter += 1;
                    let record = WalRecord {
                        seq: state.seq_counter,
                        priority,
                        received_at: Utc::now(),
                        message: message.clone(),
                    };
                    state.heap.push(QueueEntry(record.clone()));
                    Some(record)
                } else {
                    None
                }
            };

            if let Some(record) = accepted {
                self.counters.received.fetch_add(1, AtomicOrdering::SeqCst);
                self.append_to_log(&record);
                self.item_notify.notify_one();
                debug!(room = %self.room_id, seq = record.seq, priority, "enqueued message");
                return true;
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                self.counters.dropped.fetch_add(1, AtomicOrdering::SeqCst);
                error!(room = %self.room_id, "queue full, dropping message");
                return false;
            }
            let _ = tokio::time::timeout(remaining, self.space_notify.notified()).await;
        }
    }

    /// Start the broker: replay pending WAL entries, then spawn the
    /// single processing worker.
    pub async fn start(self: &std::sync::Arc<Self>, processor: std::sync::Arc<dyn MessageProcessor>) {
        self.replay_pending();

        let broker = self.clone();
        let handle = tokio::spawn(async move {
            broker.process_loop(processor).await;
        });
        *self.task.lock().await = Some(handle);
        info!(room = %self.room_id, "room broker started");
    }

    /// Stop the broker cooperatively: the worker finishes its current
    /// message, then exits.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!(room = %self.room_id, "room broker stopped");
    }

    /// Current number of messages waiting.
    pub fn queue_depth(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    /// Whether the processing worker is active.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Snapshot counters for status surfaces.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            queue_depth: self.queue_depth(),
            running: self.is_running(),
            received: self.counters.received.load(AtomicOrdering::SeqCst),
            processed: self.counters.processed.load(AtomicOrdering::SeqCst),
            failed: self.counters.failed.load(AtomicOrdering::SeqCst),
            dropped: self.counters.dropped.load(AtomicOrdering::SeqCst),
            replayed: self.counters.replayed.load(AtomicOrdering::SeqCst),
        }
    }

    // ────────────── Worker ──────────────

    /// Main processing loop — one message at a time, FIFO under equal
    /// priority. Failures advance the cursor too, so a poison message
    /// never wedges the room.
    async fn process_loop(self: std::sync::Arc<Self>, processor: std::sync::Arc<dyn MessageProcessor>) {
        loop {
            let record = tokio::select! {
                _ = self.cancel.cancelled() => break,
                record = self.dequeue() => record,
            };

            debug!(
                room = %self.room_id,
                seq = record.seq,
                depth = self.queue_depth(),
                "processing message"
            );

            match processor.process(record.message).await {
                Ok(()) => {
                    self.counters.processed.fetch_add(1, AtomicOrdering::SeqCst);
                }
                Err(e) => {
                    error!(room = %self.room_id, seq = record.seq, error = %e, "message processing failed");
                    self.counters.failed.fetch_add(1, AtomicOrdering::SeqCst);
                }
            }

            self.write_cursor(record.seq);
            self.space_notify.notify_one();
        }
    }

    /// Wait for and pop the highest-priority, lowest-seq entry.
    async fn dequeue(&self) -> WalRecord {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(entry) = state.heap.pop() {
                    return entry.0;
                }
            }
            self.item_notify.notified().await;
        }
    }

    // ────────────── WAL & cursor ──────────────

    /// Append a queued message to the room log for crash-safe replay.
    fn append_to_log(&self, record: &WalRecord) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                warn!(room = %self.room_id, error = %e, "failed to serialize WAL record");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| {
                use std::io::Write;
                writeln!(f, "{line}")?;
                f.sync_data()
            });
        if let Err(e) = result {
            warn!(room = %self.room_id, error = %e, "failed to persist queue log");
        }
    }

    fn read_cursor(&self) -> u64 {
        std::fs::read_to_string(&self.cursor_path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    fn write_cursor(&self, seq: u64) {
        if let Err(e) = std::fs::write(&self.cursor_path, seq.to_string()) {
            warn!(room = %self.room_id, error = %e, "failed to update broker cursor");
        }
    }

    /// Replay queued messages from disk after a crash or restart.
    ///
    /// Every WAL entry with `seq > cursor` re-enters the queue in
    /// sequence order, and the WAL is rewritten to contain only those
    /// still-pending entries to bound growth.
    fn replay_pending(&self) {
        if !self.log_path.exists() {
            return;
        }

        let last_seq = self.read_cursor();
        let content = match std::fs::read_to_string(&self.log_path) {
            Ok(c) => c,
            Err(e) => {
                warn!(room = %self.room_id, error = %e, "failed to read queue log");
                return;
            }
        };

        let mut pending: Vec<WalRecord> = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(line) {
                Ok(record) if record.seq > last_seq => pending.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(room = %self.room_id, error = %e, "skipping unreadable WAL entry");
                }
            }
        }

        if pending.is_empty() {
            return;
        }

        pending.sort_by_key(|r| r.seq);
        let max_seq = pending.last().map(|r| r.seq).unwrap_or(last_seq);
        let count = pending.len() as u64;

        {
            let mut state = self.state.lock().unwrap();
            for record in &pending {
                state.heap.push(QueueEntry(record.clone()));
            }
            state.seq_counter = state.seq_counter.max(max_seq);
        }
        self.counters.replayed.fetch_add(count, AtomicOrdering::SeqCst);
        self.item_notify.notify_one();

        self.rewrite_log(&pending);
        info!(room = %self.room_id, replayed = count, "replayed queued messages");
    }

    fn rewrite_log(&self, pending: &[WalRecord]) {
        let mut content = String::new();
        for record in pending {
            match serde_json::to_string(record) {
                Ok(line) => {
                    content.push_str(&line);
                    content.push('\n');
                }
                Err(e) => warn!(room = %self.room_id, error = %e, "failed to serialize WAL entry"),
            }
        }
        if let Err(e) = std::fs::write(&self.log_path, content) {
            warn!(room = %self.room_id, error = %e, "failed to rewrite queue log");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
