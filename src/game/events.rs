//! Broadcast Events
//!
//! Events the core publishes outward for fan-out to every connected
//! client. Delivery is best-effort, at most once: the bus drops events
//! when no subscriber is listening or a subscriber lags.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::game::types::RoundId;

/// A public game event, serialized as-is onto the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// A new round was created and betting is open.
    RoundOpened {
        /// Public round id (lets players verify fairness afterwards).
        round_id: RoundId,
        /// Hex SHA-256 of the server seed, committing to the crash point
        /// before any wager is taken.
        seed_hash: String,
        /// Unix millis when the running phase is scheduled to begin.
        start_time_ms: u64,
    },

    /// Live multiplier update while the round is running.
    MultiplierTick {
        /// Current multiplier, two decimals.
        multiplier: f64,
    },

    /// The round crashed. Always carries the pre-committed crash point,
    /// never an overshot tick value.
    RoundCrashed {
        /// Final multiplier.
        multiplier: f64,
    },

    /// A player cashed out (public notification).
    PlayerCashedOut {
        /// Display name.
        username: String,
        /// Multiplier the payout used.
        multiplier: f64,
        /// Fiat winnings credited.
        winnings_fiat: f64,
    },
}

/// Fan-out bus for [`GameEvent`]s, backed by a broadcast channel.
///
/// In a multi-instance deployment the subscriber on each instance relays
/// events arriving over the shared store's publish/subscribe channel; the
/// interface is identical either way.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Never fails; an empty
    /// audience just drops the event.
    pub fn publish(&self, event: GameEvent) {
        trace!(?event, "publishing game event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(GameEvent::MultiplierTick { multiplier: 1.5 });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                GameEvent::MultiplierTick { multiplier } => assert_eq!(multiplier, 1.5),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish(GameEvent::RoundCrashed { multiplier: 2.4 });
    }

    #[test]
    fn test_event_wire_format() {
        let event = GameEvent::PlayerCashedOut {
            username: "alice".into(),
            multiplier: 3.0,
            winnings_fiat: 300.0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"player_cashed_out\""));
        assert!(json.contains("\"username\":\"alice\""));
    }
}
