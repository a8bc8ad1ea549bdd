//! Notifications published by the worker thread

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::types::{Action, CardApp};

/// Something observable happened to the set of cards or the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderStatusEvent {
    CardAdded(CardApp),
    CardChanged(CardApp),
    CardRemoved(CardApp),
    /// Serial number of the first card with a null PIN, empty if there is none
    FirstCardWithNullPinChanged(String),
    AnyCardCanLearnKeysChanged(bool),
    /// A full scan of all cards started
    UpdateCardsStarted,
    /// A single card application is being re-scanned
    UpdateCardStarted(CardApp),
    /// A full or single card scan finished
    UpdateFinished,
    CurrentActionChanged(Action),
    /// A queued transaction completed, its callback can be dispatched
    TransactionFinished,
}

/// Sender for reader status events
pub type EventSender = Sender<ReaderStatusEvent>;
/// Receiver for reader status events
pub type EventReceiver = Receiver<ReaderStatusEvent>;

/// Fans events out to every subscriber
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<EventSender>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> EventReceiver {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Send to all live subscribers, dropping those whose receiver is gone
    pub(crate) fn emit(&self, event: ReaderStatusEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast() {
        let bus = EventBus::default();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.emit(ReaderStatusEvent::UpdateCardsStarted);
        assert_eq!(first.try_recv(), Ok(ReaderStatusEvent::UpdateCardsStarted));
        assert_eq!(second.try_recv(), Ok(ReaderStatusEvent::UpdateCardsStarted));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.emit(ReaderStatusEvent::UpdateFinished);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(ReaderStatusEvent::UpdateFinished));
    }
}
