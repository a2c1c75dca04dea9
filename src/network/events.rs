// Tip notifications for the network layer. The core never does I/O itself;
// whoever rebroadcasts blocks subscribes here

use crate::core::Block;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// A block was appended on top of the previous tip
    BlockAppended { tip: Block },
    /// A longer chain replaced ours
    ChainReplaced { tip: Block, length: usize },
}

impl ChainEvent {
    pub fn tip(&self) -> &Block {
        match self {
            ChainEvent::BlockAppended { tip } | ChainEvent::ChainReplaced { tip, .. } => tip,
        }
    }
}

/// Fan-out of chain events to every live subscriber
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ChainEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        let (sender, receiver) = unbounded();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(sender),
            Err(e) => error!("Event bus lock poisoned, subscriber dropped: {e}"),
        }
        receiver
    }

    /// Deliver `event` to each subscriber; dropped receivers are forgotten
    pub fn publish(&self, event: ChainEvent) {
        match self.subscribers.lock() {
            Ok(mut subscribers) => {
                subscribers.retain(|sender| sender.send(event.clone()).is_ok());
                debug!(
                    "Published tip {} to {} subscribers",
                    event.tip().get_index(),
                    subscribers.len()
                );
            }
            Err(e) => error!("Event bus lock poisoned, event dropped: {e}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(subscribers) => subscribers.len(),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives_event() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        let event = ChainEvent::BlockAppended {
            tip: Block::genesis(),
        };
        bus.publish(event.clone());
        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(second.try_recv().unwrap(), event);
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(ChainEvent::ChainReplaced {
            tip: Block::genesis(),
            length: 1,
        });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap().tip(), &Block::genesis());
    }
}
