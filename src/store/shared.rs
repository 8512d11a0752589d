//! Shared Round State Access Layer
//!
//! The cross-instance source of truth for "what phase is the game in right
//! now". Multiple server processes read and write the same replicated
//! record, so nothing here may be cached in process-local memory across
//! ticks. Records cross the boundary as string field maps (the lowest
//! common denominator of distributed hash stores) and are parsed into a
//! typed [`RoundSnapshot`] at this boundary, never ad hoc per read site.
//!
//! [`MemorySharedState`] is the single-instance substitute; a multi-instance
//! deployment plugs a distributed key/value implementation behind the same
//! trait without touching the scheduler or ledger.

use std::collections::BTreeMap;
use std::future::Future;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::game::types::{RoundId, RoundPhase, UserId};

/// Errors from the shared state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// The store could not be reached.
    #[error("shared state unavailable: {0}")]
    Unavailable(String),

    /// A required record field was absent.
    #[error("shared state record missing field `{0}`")]
    MissingField(&'static str),

    /// A field was present but failed to parse.
    #[error("shared state field `{field}` is malformed: {value:?}")]
    Malformed {
        /// Field name.
        field: &'static str,
        /// Raw value as stored.
        value: String,
    },
}

/// Ephemeral, replicated projection of the current round.
///
/// Distinct from the persisted [`crate::game::types::Round`] record: this is
/// the only state the scheduler and the cashout path trust for phase and
/// live multiplier.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSnapshot {
    /// Round the snapshot describes.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: RoundPhase,
    /// Pre-committed crash point.
    pub crash_multiplier: f64,
    /// Live multiplier, updated every tick while running.
    pub multiplier: f64,
    /// Unix millis when the running phase began.
    pub started_at_ms: Option<u64>,
}

impl RoundSnapshot {
    /// Snapshot for a freshly opened round with betting open.
    pub fn opened(round_id: RoundId, crash_multiplier: f64) -> Self {
        Self {
            round_id,
            phase: RoundPhase::Pending,
            crash_multiplier,
            multiplier: 1.0,
            started_at_ms: None,
        }
    }

    /// Encode as the string field map stored in the shared record.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("round_id".into(), self.round_id.to_string());
        fields.insert("phase".into(), self.phase.as_str().into());
        fields.insert("crash_multiplier".into(), self.crash_multiplier.to_string());
        fields.insert("multiplier".into(), self.multiplier.to_string());
        if let Some(ms) = self.started_at_ms {
            fields.insert("started_at".into(), ms.to_string());
        }
        fields
    }

    /// Parse the string field map read from the shared record.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, StateError> {
        Ok(Self {
            round_id: RoundId::parse(require(fields, "round_id")?).ok_or_else(|| {
                malformed("round_id", fields)
            })?,
            phase: RoundPhase::parse(require(fields, "phase")?)
                .ok_or_else(|| malformed("phase", fields))?,
            crash_multiplier: parse_f64(fields, "crash_multiplier")?,
            multiplier: parse_f64(fields, "multiplier")?,
            started_at_ms: match fields.get("started_at") {
                Some(raw) => Some(raw.parse().map_err(|_| StateError::Malformed {
                    field: "started_at",
                    value: raw.clone(),
                })?),
                None => None,
            },
        })
    }
}

fn require<'a>(
    fields: &'a BTreeMap<String, String>,
    field: &'static str,
) -> Result<&'a str, StateError> {
    fields
        .get(field)
        .map(String::as_str)
        .ok_or(StateError::MissingField(field))
}

fn parse_f64(fields: &BTreeMap<String, String>, field: &'static str) -> Result<f64, StateError> {
    let raw = require(fields, field)?;
    raw.parse().map_err(|_| StateError::Malformed {
        field,
        value: raw.to_string(),
    })
}

fn malformed(field: &'static str, fields: &BTreeMap<String, String>) -> StateError {
    StateError::Malformed {
        field,
        value: fields.get(field).cloned().unwrap_or_default(),
    }
}

/// One auto-cashout registration read back from the shared registry.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoCashoutEntry {
    /// Registered user.
    pub user: UserId,
    /// Trigger multiplier they asked for.
    pub trigger: f64,
    /// Registration sequence number; processing order within a tick.
    pub seq: u64,
}

/// Narrow read/modify interface over the replicated round record and the
/// auto-cashout registry. The scheduler is the only writer of phase and
/// multiplier; any instance may read, and any instance's cashout path may
/// add or remove registry entries.
pub trait SharedState: Send + Sync + 'static {
    /// Read the full round record, if one exists.
    fn read_round(&self)
        -> impl Future<Output = Result<Option<RoundSnapshot>, StateError>> + Send;

    /// Replace the full round record.
    fn write_round(
        &self,
        snapshot: &RoundSnapshot,
    ) -> impl Future<Output = Result<(), StateError>> + Send;

    /// Update only the phase field.
    fn set_phase(&self, phase: RoundPhase) -> impl Future<Output = Result<(), StateError>> + Send;

    /// Update only the live multiplier field.
    fn set_multiplier(&self, multiplier: f64)
        -> impl Future<Output = Result<(), StateError>> + Send;

    /// Register an auto-cashout trigger for a user in the current round.
    fn register_auto_cashout(
        &self,
        user: &UserId,
        trigger: f64,
    ) -> impl Future<Output = Result<(), StateError>> + Send;

    /// Remove a user's registration, if present.
    fn remove_auto_cashout(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<(), StateError>> + Send;

    /// All current registrations, ordered by registration sequence.
    fn auto_cashout_entries(
        &self,
    ) -> impl Future<Output = Result<Vec<AutoCashoutEntry>, StateError>> + Send;

    /// Drop every registration (round settlement).
    fn clear_auto_cashouts(&self) -> impl Future<Output = Result<(), StateError>> + Send;
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

#[derive(Default)]
struct SharedInner {
    round: BTreeMap<String, String>,
    // field = user id, value = "trigger:seq" (hash-map semantics)
    auto_cashouts: BTreeMap<String, String>,
    next_seq: u64,
}

/// In-process [`SharedState`] for single-instance deployments and tests.
///
/// Stores the same string field maps a distributed hash store would, so the
/// boundary parsing is exercised identically.
#[derive(Default)]
pub struct MemorySharedState {
    inner: RwLock<SharedInner>,
}

impl MemorySharedState {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_registry_value(user: &str, value: &str) -> Result<(f64, u64), StateError> {
    let malformed = || StateError::Malformed {
        field: "auto_cashout",
        value: format!("{user}={value}"),
    };
    let (trigger, seq) = value.split_once(':').ok_or_else(malformed)?;
    Ok((
        trigger.parse().map_err(|_| malformed())?,
        seq.parse().map_err(|_| malformed())?,
    ))
}

impl SharedState for MemorySharedState {
    async fn read_round(&self) -> Result<Option<RoundSnapshot>, StateError> {
        let inner = self.inner.read().await;
        if inner.round.is_empty() {
            return Ok(None);
        }
        RoundSnapshot::from_fields(&inner.round).map(Some)
    }

    async fn write_round(&self, snapshot: &RoundSnapshot) -> Result<(), StateError> {
        self.inner.write().await.round = snapshot.to_fields();
        Ok(())
    }

    async fn set_phase(&self, phase: RoundPhase) -> Result<(), StateError> {
        self.inner
            .write()
            .await
            .round
            .insert("phase".into(), phase.as_str().into());
        Ok(())
    }

    async fn set_multiplier(&self, multiplier: f64) -> Result<(), StateError> {
        self.inner
            .write()
            .await
            .round
            .insert("multiplier".into(), multiplier.to_string());
        Ok(())
    }

    async fn register_auto_cashout(&self, user: &UserId, trigger: f64) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .auto_cashouts
            .insert(user.to_string(), format!("{trigger}:{seq}"));
        Ok(())
    }

    async fn remove_auto_cashout(&self, user: &UserId) -> Result<(), StateError> {
        self.inner.write().await.auto_cashouts.remove(user.as_str());
        Ok(())
    }

    async fn auto_cashout_entries(&self) -> Result<Vec<AutoCashoutEntry>, StateError> {
        let inner = self.inner.read().await;
        let mut entries = Vec::with_capacity(inner.auto_cashouts.len());
        for (user, value) in &inner.auto_cashouts {
            let (trigger, seq) = parse_registry_value(user, value)?;
            entries.push(AutoCashoutEntry {
                user: UserId::new(user.clone()),
                trigger,
                seq,
            });
        }
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    async fn clear_auto_cashouts(&self) -> Result<(), StateError> {
        self.inner.write().await.auto_cashouts.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_field_roundtrip() {
        let snapshot = RoundSnapshot {
            round_id: RoundId::generate(),
            phase: RoundPhase::Running,
            crash_multiplier: 2.4,
            multiplier: 1.37,
            started_at_ms: Some(1_700_000_000_123),
        };
        let parsed = RoundSnapshot::from_fields(&snapshot.to_fields()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_snapshot_missing_field() {
        let mut fields = RoundSnapshot::opened(RoundId::generate(), 2.0).to_fields();
        fields.remove("phase");
        assert!(matches!(
            RoundSnapshot::from_fields(&fields),
            Err(StateError::MissingField("phase"))
        ));
    }

    #[test]
    fn test_snapshot_malformed_number() {
        let mut fields = RoundSnapshot::opened(RoundId::generate(), 2.0).to_fields();
        fields.insert("multiplier".into(), "not-a-number".into());
        assert!(matches!(
            RoundSnapshot::from_fields(&fields),
            Err(StateError::Malformed { field: "multiplier", .. })
        ));
    }

    #[tokio::test]
    async fn test_round_record_lifecycle() {
        let state = MemorySharedState::new();
        assert!(state.read_round().await.unwrap().is_none());

        let snapshot = RoundSnapshot::opened(RoundId::generate(), 3.5);
        state.write_round(&snapshot).await.unwrap();
        assert_eq!(state.read_round().await.unwrap(), Some(snapshot.clone()));

        state.set_phase(RoundPhase::Running).await.unwrap();
        state.set_multiplier(1.62).await.unwrap();
        let read = state.read_round().await.unwrap().unwrap();
        assert_eq!(read.phase, RoundPhase::Running);
        assert_eq!(read.multiplier, 1.62);
        assert_eq!(read.crash_multiplier, snapshot.crash_multiplier);
    }

    #[tokio::test]
    async fn test_registry_ordering_and_removal() {
        let state = MemorySharedState::new();
        // Registered out of trigger order; read-back follows registration order.
        state
            .register_auto_cashout(&UserId::new("carol"), 3.0)
            .await
            .unwrap();
        state
            .register_auto_cashout(&UserId::new("alice"), 1.5)
            .await
            .unwrap();

        let entries = state.auto_cashout_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].user, UserId::new("carol"));
        assert_eq!(entries[1].user, UserId::new("alice"));
        assert!(entries[0].seq < entries[1].seq);

        state
            .remove_auto_cashout(&UserId::new("carol"))
            .await
            .unwrap();
        let entries = state.auto_cashout_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trigger, 1.5);

        state.clear_auto_cashouts().await.unwrap();
        assert!(state.auto_cashout_entries().await.unwrap().is_empty());
    }
}
