//! Broker manager — one hot broker per room for the process lifetime.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info};

use crewbot_core::bus::types::MessageEnvelope;

use crate::broker::{
    BrokerStats, MessageProcessor, RoomBroker, DEFAULT_ENQUEUE_TIMEOUT_SECS,
    DEFAULT_HIGH_PRIORITY_TIMEOUT_SECS, DEFAULT_MAX_QUEUE_SIZE,
};

/// Routes messages to per-room brokers, creating them on first use.
/// Brokers are never destroyed while the process lives.
pub struct RoomBrokerManager {
    queue_dir: PathBuf,
    processor: Arc<dyn MessageProcessor>,
    max_queue_size: usize,
    enqueue_timeout: Duration,
    high_priority_timeout: Duration,
    brokers: tokio::sync::Mutex<HashMap<String, Arc<RoomBroker>>>,
}

impl RoomBrokerManager {
    /// Create a manager with default limits.
    pub fn new(queue_dir: PathBuf, processor: Arc<dyn MessageProcessor>) -> Self {
        RoomBrokerManager {
            queue_dir,
            processor,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            enqueue_timeout: Duration::from_secs_f64(DEFAULT_ENQUEUE_TIMEOUT_SECS),
            high_priority_timeout: Duration::from_secs_f64(DEFAULT_HIGH_PRIORITY_TIMEOUT_SECS),
            brokers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Override queue limits (used by tests and the gateway).
    pub fn with_limits(
        mut self,
        max_queue_size: usize,
        enqueue_timeout: Duration,
        high_priority_timeout: Duration,
    ) -> Self {
        self.max_queue_size = max_queue_size;
        self.enqueue_timeout = enqueue_timeout;
        self.high_priority_timeout = high_priority_timeout;
        self
    }

    /// Route a message to its room broker, creating and starting the
    /// broker on first use. The message must carry a `room_id`.
    ///
    /// Returns `Ok(true)` when enqueued, `Ok(false)` when the room's
    /// queue overflowed.
    pub async fn route_message(&self, message: MessageEnvelope) -> Result<bool> {
        let Some(room_id) = message.room_id.clone() else {
            error!("cannot route message without room_id");
            bail!("cannot route message without room_id");
        };

        let broker = {
            let mut brokers = self.brokers.lock().await;
            match brokers.get(&room_id) {
                Some(broker) => broker.clone(),
                None => {
                    let broker = Arc::new(RoomBroker::with_limits(
                        room_id.clone(),
                        self.queue_dir.clone(),
                        self.max_queue_size,
                        self.enqueue_timeout,
                        self.high_priority_timeout,
                    )?);
                    broker.start(self.processor.clone()).await;
                    brokers.insert(room_id.clone(), broker.clone());
                    info!(room = %room_id, "created broker for room");
                    broker
                }
            }
        };

        Ok(broker.enqueue(message).await)
    }

    /// Stop all room brokers.
    pub async fn stop_all(&self) {
        let mut brokers = self.brokers.lock().await;
        for broker in brokers.values() {
            broker.stop().await;
        }
        brokers.clear();
    }

    /// Per-room broker stats.
    pub async fn stats(&self) -> HashMap<String, BrokerStats> {
        let brokers = self.brokers.lock().await;
        brokers
            .iter()
            .map(|(room, broker)| (room.clone(), broker.stats()))
            .collect()
    }

    /// Get the broker for a room, if one exists.
    pub async fn get_broker(&self, room_id: &str) -> Option<Arc<RoomBroker>> {
        self.brokers.lock().await.get(room_id).cloned()
    }

    /// Number of live brokers.
    pub async fn broker_count(&self) -> usize {
        self.brokers.lock().await.len()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// Records (room, content, finished_at) with a configurable delay,
    /// notifying after every message.
    struct SlowRecorder {
        delay: Duration,
        log: StdMutex<Vec<(String, String, chrono::DateTime<Utc>)>>,
        notify: Notify,
    }

    impl SlowRecorder {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(SlowRecorder {
                delay,
                log: StdMutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }

        async fn wait_for(&self, count: usize) {
            loop {
                if self.log.lock().unwrap().len() >= count {
                    return;
                }
                let _ = tokio::time::timeout(Duration::from_millis(200), self.notify.notified()).await;
            }
        }
    }

    #[async_trait]
    impl MessageProcessor for SlowRecorder {
        async fn process(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push((
                envelope.room_id.clone().unwrap_or_default(),
                envelope.content.clone(),
                Utc::now(),
            ));
            self.notify.notify_waiters();
            Ok(())
        }
    }

    fn room_envelope(room: &str, content: &str) -> MessageEnvelope {
        let mut msg = MessageEnvelope::inbound("cli", "user", "default", content);
        msg.set_room(room);
        msg
    }

    #[tokio::test]
    async fn test_route_requires_room_id() {
        let dir = tempfile::tempdir().unwrap();
        let processor = SlowRecorder::new(Duration::ZERO);
        let manager = RoomBrokerManager::new(dir.path().to_path_buf(), processor);

        let msg = MessageEnvelope::inbound("cli", "user", "default", "no room");
        assert!(manager.route_message(msg).await.is_err());
    }

    #[tokio::test]
    async fn test_one_broker_per_room() {
        let dir = tempfile::tempdir().unwrap();
        let processor = SlowRecorder::new(Duration::ZERO);
        let manager = RoomBrokerManager::new(dir.path().to_path_buf(), processor);

        manager.route_message(room_envelope("a", "1")).await.unwrap();
        manager.route_message(room_envelope("a", "2")).await.unwrap();
        manager.route_message(room_envelope("b", "3")).await.unwrap();

        assert_eq!(manager.broker_count().await, 2);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_intra_room_order_inter_room_parallelism() {
        let dir = tempfile::tempdir().unwrap();
        let processor = SlowRecorder::new(Duration::from_millis(50));
        let manager =
            RoomBrokerManager::new(dir.path().to_path_buf(), processor.clone());

        // Room A gets three messages, room B one in between.
        manager.route_message(room_envelope("a", "a1")).await.unwrap();
        manager.route_message(room_envelope("b", "b1")).await.unwrap();
        manager.route_message(room_envelope("a", "a2")).await.unwrap();
        manager.route_message(room_envelope("a", "a3")).await.unwrap();

        processor.wait_for(4).await;

        let log = processor.log.lock().unwrap().clone();
        let a_order: Vec<&str> = log
            .iter()
            .filter(|(room, _, _)| room == "a")
            .map(|(_, content, _)| content.as_str())
            .collect();
        assert_eq!(a_order, vec!["a1", "a2", "a3"]);

        // b1 finished before room A drained all three: rooms overlap.
        let b1_done = log.iter().find(|(room, _, _)| room == "b").unwrap().2;
        let a3_done = log
            .iter()
            .find(|(_, content, _)| content == "a3")
            .unwrap()
            .2;
        assert!(b1_done < a3_done);

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stats_aggregated_by_room() {
        let dir = tempfile::tempdir().unwrap();
        let processor = SlowRecorder::new(Duration::ZERO);
        let manager = RoomBrokerManager::new(dir.path().to_path_buf(), processor.clone());

        manager.route_message(room_envelope("a", "1")).await.unwrap();
        manager.route_message(room_envelope("b", "2")).await.unwrap();
        processor.wait_for(2).await;

        let stats = manager.stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["a"].received, 1);
        assert_eq!(stats["b"].received, 1);

        manager.stop_all().await;
    }
}
