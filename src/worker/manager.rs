//! Drive Worker Manager
//!
//! Arbitration point polled by idle workers: the worker's preferred order
//! type first, the other type as fallback.

use crate::config::ReadWritePriority;
use crate::error::Result;
use crate::queue::{OrderQueue, OrderStatus, OrderType, ReadWriteOrder};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// What the manager needs to know about a polling worker
pub trait DriveWorkerInfo {
    fn index(&self) -> u32;

    fn priority(&self) -> ReadWritePriority;
}

/// Queue polling order for a worker priority
pub fn arbitration_order(priority: ReadWritePriority) -> [OrderType; 2] {
    let first = match priority {
        ReadWritePriority::Write => OrderType::Write,
        ReadWritePriority::Read => OrderType::Read,
    };
    [first, first.other()]
}

pub struct DriveWorkerManager {
    library: String,
    queue: Arc<dyn OrderQueue>,
}

impl DriveWorkerManager {
    pub fn new(library: &str, queue: Arc<dyn OrderQueue>) -> Self {
        Self {
            library: library.to_string(),
            queue,
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    /// Next order for `worker`, or `None` when both queues are empty
    pub fn consume(&self, worker: &dyn DriveWorkerInfo) -> Option<ReadWriteOrder> {
        for order_type in arbitration_order(worker.priority()) {
            if let Some(order) = self.queue.receive(&self.library, order_type) {
                debug!(
                    "[{}] drive {} ({} priority) takes {} order {}",
                    self.library,
                    worker.index(),
                    worker.priority(),
                    order_type,
                    order.id()
                );
                return Some(order);
            }
        }
        None
    }

    pub fn enqueue(&self, order: &ReadWriteOrder) -> Result<bool> {
        self.queue.add(order)
    }

    pub fn complete(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        message: Option<String>,
    ) -> Result<()> {
        self.queue.complete(order_id, status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueRepository, ReadOrder, WriteOrder};
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    struct Worker(ReadWritePriority);

    impl DriveWorkerInfo for Worker {
        fn index(&self) -> u32 {
            0
        }

        fn priority(&self) -> ReadWritePriority {
            self.0
        }
    }

    /// Records which queues were polled
    #[derive(Default)]
    struct RecordingQueue {
        polled: Mutex<Vec<OrderType>>,
    }

    impl OrderQueue for RecordingQueue {
        fn add(&self, _: &ReadWriteOrder) -> Result<bool> {
            Ok(true)
        }

        fn receive(&self, _: &str, order_type: OrderType) -> Option<ReadWriteOrder> {
            self.polled.lock().push(order_type);
            None
        }

        fn complete(&self, _: Uuid, _: OrderStatus, _: Option<String>) -> Result<()> {
            Ok(())
        }
    }

    fn manager() -> DriveWorkerManager {
        let queue = QueueRepository::new(Arc::new(MemoryStore::new()));
        DriveWorkerManager::new("lib-a", Arc::new(queue))
    }

    fn write_order() -> ReadWriteOrder {
        WriteOrder::new("lib-a", "objects", "f", "f").into()
    }

    fn read_order() -> ReadWriteOrder {
        ReadOrder::new("lib-a", "objects", vec!["f".into()]).into()
    }

    #[test]
    fn test_arbitration_order() {
        assert_eq!(
            arbitration_order(ReadWritePriority::Write),
            [OrderType::Write, OrderType::Read]
        );
        assert_eq!(
            arbitration_order(ReadWritePriority::Read),
            [OrderType::Read, OrderType::Write]
        );
    }

    #[test]
    fn test_write_priority_drains_writes_first() {
        let manager = manager();
        let read = read_order();
        manager.enqueue(&read).unwrap();
        let writes: Vec<ReadWriteOrder> = (0..3).map(|_| write_order()).collect();
        for order in &writes {
            manager.enqueue(order).unwrap();
        }

        let worker = Worker(ReadWritePriority::Write);
        for expected in &writes {
            let got = manager.consume(&worker).unwrap();
            assert!(got.is_write_order());
            assert_eq!(got.id(), expected.id());
        }

        // Write queue empty: fall back to reads
        assert_eq!(manager.consume(&worker).unwrap().id(), read.id());
        assert!(manager.consume(&worker).is_none());
    }

    #[test]
    fn test_read_priority_falls_back_to_writes() {
        let manager = manager();
        let write = write_order();
        manager.enqueue(&write).unwrap();
        let read = read_order();
        manager.enqueue(&read).unwrap();

        let worker = Worker(ReadWritePriority::Read);
        assert_eq!(manager.consume(&worker).unwrap().id(), read.id());
        assert_eq!(manager.consume(&worker).unwrap().id(), write.id());
    }

    #[test]
    fn test_empty_queues_poll_both_types() {
        let queue = Arc::new(RecordingQueue::default());
        let manager = DriveWorkerManager::new("lib-a", queue.clone());

        assert!(manager.consume(&Worker(ReadWritePriority::Read)).is_none());
        assert_eq!(*queue.polled.lock(), vec![OrderType::Read, OrderType::Write]);
    }
}
