//! Auto-cashout registry view.
//!
//! A thin wrapper over the shared-state registry that answers the one
//! question the scheduler asks each tick: which registrations are due at
//! the current multiplier, in the order they were made.

use std::sync::Arc;

use crate::game::types::UserId;
use crate::store::shared::{AutoCashoutEntry, SharedState, StateError};

/// Scheduler-facing view of the per-round auto-cashout registrations.
pub struct AutoCashoutRegistry<S> {
    shared: Arc<S>,
}

impl<S: SharedState> AutoCashoutRegistry<S> {
    /// Wrap the shared store.
    pub fn new(shared: Arc<S>) -> Self {
        Self { shared }
    }

    /// Register a trigger for a user in the current round.
    pub async fn register(&self, user: &UserId, trigger: f64) -> Result<(), StateError> {
        self.shared.register_auto_cashout(user, trigger).await
    }

    /// Drop a user's registration (after a manual or automatic cashout).
    pub async fn remove(&self, user: &UserId) -> Result<(), StateError> {
        self.shared.remove_auto_cashout(user).await
    }

    /// Wipe all registrations at round end.
    pub async fn clear(&self) -> Result<(), StateError> {
        self.shared.clear_auto_cashouts().await
    }

    /// Registrations whose trigger the multiplier has reached, in
    /// registration order.
    pub async fn due(&self, multiplier: f64) -> Result<Vec<AutoCashoutEntry>, StateError> {
        let mut entries = self.shared.auto_cashout_entries().await?;
        entries.retain(|e| e.trigger <= multiplier);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::shared::MemorySharedState;

    #[tokio::test]
    async fn test_due_filters_and_keeps_registration_order() {
        let shared = Arc::new(MemorySharedState::new());
        let registry = AutoCashoutRegistry::new(shared);

        registry.register(&UserId::new("c"), 3.0).await.unwrap();
        registry.register(&UserId::new("a"), 1.5).await.unwrap();
        registry.register(&UserId::new("b"), 2.0).await.unwrap();

        let due = registry.due(2.0).await.unwrap();
        let users: Vec<&str> = due.iter().map(|e| e.user.as_str()).collect();
        assert_eq!(users, vec!["a", "b"]);

        let all = registry.due(10.0).await.unwrap();
        let users: Vec<&str> = all.iter().map(|e| e.user.as_str()).collect();
        assert_eq!(users, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let shared = Arc::new(MemorySharedState::new());
        let registry = AutoCashoutRegistry::new(shared);

        registry.register(&UserId::new("a"), 1.5).await.unwrap();
        registry.register(&UserId::new("b"), 1.5).await.unwrap();

        registry.remove(&UserId::new("a")).await.unwrap();
        let due = registry.due(2.0).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user.as_str(), "b");

        registry.clear().await.unwrap();
        assert!(registry.due(100.0).await.unwrap().is_empty());
    }
}
