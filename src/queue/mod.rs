//! Order Queue Repository
//!
//! Per-library, per-order-type FIFO queues persisted in the key-value store:
//! `queue/<library>/<type>/<sequence>-<order id>`. A claimed order is removed
//! with [`KeyValueStore::take`], so only one caller ever gets it back.
//! Claimed orders leave a trace under `orders/<id>` that the worker completes
//! with the final OK/KO status.

pub mod order;

pub use self::order::{OrderOutcome, OrderStatus, OrderType, ReadOrder, ReadWriteOrder, WriteOrder};

use crate::error::{Result, TapeLibraryError};
use crate::store::KeyValueStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const QUEUE_PREFIX: &str = "queue/";
const OUTCOME_PREFIX: &str = "orders/";
const REJECTED_PREFIX: &str = "rejected/";

/// Source of orders for drive workers
pub trait OrderQueue: Send + Sync {
    /// Enqueue a pending order. `Ok(false)` when the order is not PENDING and
    /// was left out of the queue.
    fn add(&self, order: &ReadWriteOrder) -> Result<bool>;

    /// Claim the oldest order of `order_type` for `library`, without waiting
    fn receive(&self, library: &str, order_type: OrderType) -> Option<ReadWriteOrder>;

    /// Record the final OK/KO status of a claimed order
    fn complete(&self, order_id: Uuid, status: OrderStatus, message: Option<String>) -> Result<()>;
}

pub struct QueueRepository {
    store: Arc<dyn KeyValueStore>,
    add_lock: Mutex<u64>,
}

impl QueueRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            add_lock: Mutex::new(0),
        }
    }

    fn queue_prefix(library: &str, order_type: OrderType) -> String {
        format!("{}{}/{}/", QUEUE_PREFIX, library, order_type.as_str())
    }

    fn outcome_key(order_id: Uuid) -> String {
        format!("{}{}", OUTCOME_PREFIX, order_id)
    }

    fn sequence_of(key: &str) -> Option<u64> {
        key.rsplit('/').next()?.split('-').next()?.parse().ok()
    }

    fn try_receive(&self, library: &str, order_type: OrderType) -> Result<Option<ReadWriteOrder>> {
        for (key, _) in self.store.scan(&Self::queue_prefix(library, order_type))? {
            // Another worker may have claimed it between scan and take
            let Some(value) = self.store.take(&key)? else {
                debug!("Order {} already claimed", key);
                continue;
            };

            let mut order: ReadWriteOrder = match serde_json::from_value(value.clone()) {
                Ok(order) => order,
                Err(e) => {
                    // Kept under rejected/ for inspection
                    error!("Unreadable order {} moved to {}: {}", key, REJECTED_PREFIX, e);
                    self.store.put(&format!("{}{}", REJECTED_PREFIX, key), value)?;
                    continue;
                }
            };
            order.set_status(OrderStatus::InProgress);
            if let Err(e) = self.put_outcome(&order, OrderStatus::InProgress, None) {
                self.restore(&key, value);
                return Err(e);
            }
            return Ok(Some(order));
        }
        Ok(None)
    }

    /// Put a claimed order back under its original key
    fn restore(&self, key: &str, value: serde_json::Value) {
        match self.store.put(key, value.clone()) {
            Ok(()) => warn!("Order {} returned to the queue", key),
            Err(e) => error!("Order {} lost from the queue: {}: {}", key, e, value),
        }
    }

    fn put_outcome(
        &self,
        order: &ReadWriteOrder,
        status: OrderStatus,
        message: Option<String>,
    ) -> Result<()> {
        let outcome = OrderOutcome {
            order_id: order.id(),
            order_type: order.order_type(),
            library: order.library().to_string(),
            status,
            message,
            updated_at: Utc::now(),
        };
        self.store
            .put(&Self::outcome_key(order.id()), serde_json::to_value(&outcome)?)
    }

    pub fn outcome(&self, order_id: Uuid) -> Result<Option<OrderOutcome>> {
        match self.store.get(&Self::outcome_key(order_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn pending_count(&self, library: &str, order_type: OrderType) -> Result<usize> {
        Ok(self.store.scan(&Self::queue_prefix(library, order_type))?.len())
    }
}

impl OrderQueue for QueueRepository {
    fn add(&self, order: &ReadWriteOrder) -> Result<bool> {
        if order.status() != OrderStatus::Pending {
            warn!("Order {} is {}, not queued", order.id(), order.status());
            return Ok(false);
        }

        let prefix = Self::queue_prefix(order.library(), order.order_type());
        let mut last = self.add_lock.lock();
        // Other processes may share the store: continue after the highest queued sequence
        let queued_max = self
            .store
            .scan(&prefix)?
            .iter()
            .filter_map(|(key, _)| Self::sequence_of(key))
            .max()
            .unwrap_or(0);
        let sequence = (*last).max(queued_max) + 1;

        let key = format!("{}{:020}-{}", prefix, sequence, order.id());
        self.store.put(&key, serde_json::to_value(order)?)?;
        *last = sequence;

        info!(
            "Queued {} order {} for library {}",
            order.order_type(),
            order.id(),
            order.library()
        );
        Ok(true)
    }

    fn receive(&self, library: &str, order_type: OrderType) -> Option<ReadWriteOrder> {
        match self.try_receive(library, order_type) {
            Ok(order) => order,
            Err(e) => {
                error!("Cannot receive {} order for {}: {}", order_type, library, e);
                None
            }
        }
    }

    fn complete(&self, order_id: Uuid, status: OrderStatus, message: Option<String>) -> Result<()> {
        if !status.is_terminal() {
            return Err(TapeLibraryError::queue(format!(
                "Order {} cannot be completed with status {}",
                order_id, status
            )));
        }

        let mut outcome = self.outcome(order_id)?.ok_or_else(|| {
            TapeLibraryError::queue(format!("Order {} was never claimed", order_id))
        })?;
        if outcome.status.is_terminal() {
            return Err(TapeLibraryError::queue(format!(
                "Order {} is already {}",
                order_id, outcome.status
            )));
        }

        info!("Order {} completed: {}", order_id, status);
        outcome.status = status;
        outcome.message = message;
        outcome.updated_at = Utc::now();
        self.store
            .put(&Self::outcome_key(order_id), serde_json::to_value(&outcome)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn repository() -> QueueRepository {
        QueueRepository::new(Arc::new(MemoryStore::new()))
    }

    fn write(object: &str) -> ReadWriteOrder {
        WriteOrder::new("lib-a", "objects", object, object).into()
    }

    #[test]
    fn test_fifo_per_type() {
        let queue = repository();
        let first = write("a");
        let second = write("b");
        let read: ReadWriteOrder = ReadOrder::new("lib-a", "objects", vec!["a".into()]).into();

        assert!(queue.add(&first).unwrap());
        assert!(queue.add(&read).unwrap());
        assert!(queue.add(&second).unwrap());
        assert_eq!(queue.pending_count("lib-a", OrderType::Write).unwrap(), 2);

        let got = queue.receive("lib-a", OrderType::Write).unwrap();
        assert_eq!(got.id(), first.id());
        assert_eq!(got.status(), OrderStatus::InProgress);
        assert_eq!(queue.receive("lib-a", OrderType::Write).unwrap().id(), second.id());
        assert!(queue.receive("lib-a", OrderType::Write).is_none());
        assert_eq!(queue.receive("lib-a", OrderType::Read).unwrap().id(), read.id());
    }

    #[test]
    fn test_queues_are_per_library() {
        let queue = repository();
        queue.add(&write("a")).unwrap();
        assert!(queue.receive("lib-b", OrderType::Write).is_none());
        assert!(queue.receive("lib-a", OrderType::Write).is_some());
    }

    #[test]
    fn test_non_pending_order_is_not_queued() {
        let queue = repository();
        let mut order = write("a");
        order.set_status(OrderStatus::Ko);
        assert!(!queue.add(&order).unwrap());
        assert_eq!(queue.pending_count("lib-a", OrderType::Write).unwrap(), 0);
    }

    #[test]
    fn test_sequence_continues_after_existing_entries() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = write("a");
        QueueRepository::new(store.clone()).add(&first).unwrap();

        // A second repository on the same store, like a second process
        let second = write("b");
        QueueRepository::new(store.clone()).add(&second).unwrap();

        let queue = QueueRepository::new(store);
        assert_eq!(queue.receive("lib-a", OrderType::Write).unwrap().id(), first.id());
        assert_eq!(queue.receive("lib-a", OrderType::Write).unwrap().id(), second.id());
    }

    #[test]
    fn test_outcome_is_monotonic() {
        let queue = repository();
        let order = write("a");
        queue.add(&order).unwrap();

        assert!(queue.complete(order.id(), OrderStatus::Ok, None).is_err());

        queue.receive("lib-a", OrderType::Write).unwrap();
        assert_eq!(
            queue.outcome(order.id()).unwrap().unwrap().status,
            OrderStatus::InProgress
        );
        assert!(queue.complete(order.id(), OrderStatus::Pending, None).is_err());

        queue
            .complete(order.id(), OrderStatus::Ko, Some("dd: No medium found".into()))
            .unwrap();
        let outcome = queue.outcome(order.id()).unwrap().unwrap();
        assert_eq!(outcome.status, OrderStatus::Ko);
        assert_eq!(outcome.message.as_deref(), Some("dd: No medium found"));

        assert!(queue.complete(order.id(), OrderStatus::Ok, None).is_err());
    }

    /// Store whose every call fails
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _: &str) -> Result<Option<Value>> {
            Err(TapeLibraryError::store("unavailable"))
        }
        fn put(&self, _: &str, _: Value) -> Result<()> {
            Err(TapeLibraryError::store("unavailable"))
        }
        fn take(&self, _: &str) -> Result<Option<Value>> {
            Err(TapeLibraryError::store("unavailable"))
        }
        fn scan(&self, _: &str) -> Result<Vec<(String, Value)>> {
            Err(TapeLibraryError::store("unavailable"))
        }
    }

    #[test]
    fn test_store_failure() {
        let queue = QueueRepository::new(Arc::new(BrokenStore));
        assert!(queue.add(&write("a")).is_err());
        assert!(queue.receive("lib-a", OrderType::Write).is_none());
    }

    /// Store refusing outcome writes until healed
    struct FlakyOutcomeStore {
        inner: MemoryStore,
        broken: AtomicBool,
    }

    impl KeyValueStore for FlakyOutcomeStore {
        fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key)
        }
        fn put(&self, key: &str, value: Value) -> Result<()> {
            if key.starts_with(OUTCOME_PREFIX) && self.broken.load(Ordering::SeqCst) {
                return Err(TapeLibraryError::store("disk full"));
            }
            self.inner.put(key, value)
        }
        fn take(&self, key: &str) -> Result<Option<Value>> {
            self.inner.take(key)
        }
        fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
            self.inner.scan(prefix)
        }
    }

    #[test]
    fn test_failed_outcome_write_keeps_order_queued() {
        let store = Arc::new(FlakyOutcomeStore {
            inner: MemoryStore::new(),
            broken: AtomicBool::new(true),
        });
        let queue = QueueRepository::new(store.clone());
        let order = write("a");
        queue.add(&order).unwrap();

        assert!(queue.receive("lib-a", OrderType::Write).is_none());
        assert_eq!(queue.pending_count("lib-a", OrderType::Write).unwrap(), 1);
        assert!(queue.outcome(order.id()).unwrap().is_none());

        store.broken.store(false, Ordering::SeqCst);
        let got = queue.receive("lib-a", OrderType::Write).unwrap();
        assert_eq!(got.id(), order.id());
        assert_eq!(
            queue.outcome(order.id()).unwrap().unwrap().status,
            OrderStatus::InProgress
        );
        assert_eq!(queue.pending_count("lib-a", OrderType::Write).unwrap(), 0);
    }

    #[test]
    fn test_unreadable_order_is_parked() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = QueueRepository::new(store.clone());
        store
            .put("queue/lib-a/write/00000000000000000001-bad", serde_json::json!({"x": 1}))
            .unwrap();
        let order = write("a");
        queue.add(&order).unwrap();

        assert_eq!(queue.receive("lib-a", OrderType::Write).unwrap().id(), order.id());
        assert_eq!(store.scan(REJECTED_PREFIX).unwrap().len(), 1);
    }

    #[test]
    fn test_each_order_received_exactly_once() {
        let queue = Arc::new(repository());
        let mut submitted = HashSet::new();
        for i in 0..200 {
            let order = write(&format!("obj-{}", i));
            submitted.insert(order.id());
            queue.add(&order).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(order) = queue.receive("lib-a", OrderType::Write) {
                        got.push(order.id());
                    }
                    got
                })
            })
            .collect();

        let mut received = Vec::new();
        for handle in handles {
            received.extend(handle.join().unwrap());
        }

        assert_eq!(received.len(), submitted.len());
        let unique: HashSet<Uuid> = received.into_iter().collect();
        assert_eq!(unique, submitted);
    }
}
