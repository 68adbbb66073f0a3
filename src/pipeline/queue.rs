//! 级间有界队列
//!
//! 满时丢弃新消息 (保证新鲜度而不是完整性), 空时立即返回。
//! 丢弃计数由调用方记入 `StatsCollector`。

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

pub struct StageQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for StageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> StageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// 非阻塞入队; 队列满时丢弃 `item`, 返回 false
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// 非阻塞出队
    pub fn pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let q = StageQueue::new(4);
        for i in 0..3 {
            assert!(q.push(i));
        }
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_drop_newest_when_full() {
        let q = StageQueue::new(2);
        assert!(q.push("a"));
        assert!(q.push("b"));
        assert!(!q.push("c"));
        assert!(!q.push("d"));
        // 队列里保留的是最早的两条
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_clones_share_one_channel() {
        let q = StageQueue::new(1);
        let producer = q.clone();
        assert!(producer.push(1));
        assert!(!producer.push(2));
        assert_eq!(q.pop(), Some(1));
        assert!(producer.push(3));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let q = StageQueue::new(0);
        assert!(q.push(()));
        assert!(!q.push(()));
    }
}
