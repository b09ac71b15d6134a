use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};

/// 最新値キャッシュ付きの型付きイベントチャネル
///
/// 購読者ごとに有界キューを持つ。キューが満杯なら、その購読者へのイベントは捨てる。
/// 後から購読した側には直近の値を最初に届ける。
pub struct Publisher<T: Clone> {
    latest: Mutex<Option<T>>,
    subscribers: Mutex<Vec<SyncSender<T>>>,
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Publisher<T> {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// 購読する。最新値があればすぐに受信できる
    pub fn subscribe(&self, capacity: usize) -> Receiver<T> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        if let Some(value) = self.latest() {
            let _ = tx.try_send(value);
        }
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, value: T) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());

        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 最新値を消す。購読は維持する
    pub fn clear(&self) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_subscriber_gets_latest() {
        let p = Publisher::new();
        p.publish(1);
        p.publish(2);
        let rx = p.subscribe(4);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_events() {
        let p = Publisher::new();
        let rx = p.subscribe(2);
        for i in 0..5 {
            p.publish(i);
        }
        assert_eq!(rx.try_recv().unwrap(), 0);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(p.latest(), Some(4));
    }

    #[test]
    fn test_disconnected_subscribers_are_removed() {
        let p = Publisher::new();
        let rx = p.subscribe(1);
        assert_eq!(p.subscriber_count(), 1);
        drop(rx);
        p.publish("x");
        assert_eq!(p.subscriber_count(), 0);
    }

    #[test]
    fn test_clear() {
        let p = Publisher::new();
        p.publish(1);
        p.clear();
        assert_eq!(p.latest(), None);
        let rx = p.subscribe(1);
        assert!(rx.try_recv().is_err());
    }
}
