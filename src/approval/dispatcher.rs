//! Arena of suspended invocations and the resume path.

use super::{ConfirmationLedger, ConfirmationRecord, GateState};
use crate::events::DecisionMessage;
use crate::error::{Result, TollgateError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long terminal states stay queryable by default.
pub const DEFAULT_RESOLVED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

struct Suspended<T> {
    continuation: T,
    suspended_at: DateTime<Utc>,
}

struct Settled {
    state: GateState,
    settled_at: DateTime<Utc>,
}

struct Arena<T> {
    pending: HashMap<String, Suspended<T>>,
    resolved: HashMap<String, Settled>,
}

/// A suspended invocation handed back for continuation.
#[derive(Debug)]
pub struct Resumed<T> {
    /// The invocation's own record, now carrying the decision.
    pub record: ConfirmationRecord,
    pub continuation: T,
    pub state: GateState,
}

/// Suspended invocations keyed by invocation id.
///
/// `T` is whatever the orchestrator needs to pick the execution back up. Each
/// entry can be resumed once; afterwards the invocation is remembered as
/// resolved and further decisions are refused.
pub struct SuspendedInvocations<T> {
    ledger: ConfirmationLedger,
    arena: Mutex<Arena<T>>,
    ttl: Option<Duration>,
    retention: Duration,
}

impl<T> SuspendedInvocations<T> {
    pub fn new() -> Self {
        Self {
            ledger: ConfirmationLedger::new(),
            arena: Mutex::new(Arena {
                pending: HashMap::new(),
                resolved: HashMap::new(),
            }),
            ttl: None,
            retention: DEFAULT_RESOLVED_RETENTION,
        }
    }

    /// Abandon pending entries older than `ttl`.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Keep terminal states for `retention` before [`purge_expired`](Self::purge_expired)
    /// forgets them.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Arena<T>>> {
        self.arena
            .lock()
            .map_err(|e| TollgateError::Agent(format!("Failed to acquire arena lock: {}", e)))
    }

    fn is_expired(&self, suspended_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| older_than(suspended_at, now, ttl))
    }

    /// Park an invocation that is waiting on `record`.
    pub fn suspend(&self, record: ConfirmationRecord, continuation: T) -> Result<()> {
        let mut arena = self.lock()?;
        let invocation_id = record.invocation_id.clone();

        if arena.pending.contains_key(&invocation_id) {
            warn!(invocation_id = %invocation_id, "Invocation is already suspended");
            return Err(TollgateError::DuplicateConfirmation(invocation_id));
        }

        self.ledger.insert_pending(record.clone())?;
        arena.resolved.remove(&invocation_id);
        arena.pending.insert(
            invocation_id.clone(),
            Suspended {
                continuation,
                suspended_at: Utc::now(),
            },
        );

        info!(
            invocation_id = %invocation_id,
            approval_id = %record.approval_id,
            "Invocation suspended pending confirmation"
        );
        Ok(())
    }

    /// Apply a decision and hand back the suspended execution.
    pub fn resume(&self, invocation_id: &str, decision: &DecisionMessage) -> Result<Resumed<T>> {
        self.resume_at(invocation_id, decision, Utc::now())
    }

    /// Like [`resume`](Self::resume) with an explicit clock.
    pub fn resume_at(
        &self,
        invocation_id: &str,
        decision: &DecisionMessage,
        now: DateTime<Utc>,
    ) -> Result<Resumed<T>> {
        let mut arena = self.lock()?;

        let suspended_at = arena
            .pending
            .get(invocation_id)
            .map(|s| s.suspended_at)
            .ok_or_else(|| TollgateError::NoPendingInvocation(invocation_id.to_string()))?;

        if self.is_expired(suspended_at, now) {
            warn!(invocation_id = %invocation_id, "Pending confirmation expired");
            arena.pending.remove(invocation_id);
            self.ledger.remove(invocation_id)?;
            return Err(TollgateError::NoPendingInvocation(invocation_id.to_string()));
        }

        let record = self
            .ledger
            .resolve(invocation_id, &decision.approval_id, decision.confirmed)?;

        let state = GateState::Pending.transition(GateState::resolved(decision.confirmed))?;
        let suspended = arena
            .pending
            .remove(invocation_id)
            .ok_or_else(|| TollgateError::NoPendingInvocation(invocation_id.to_string()))?;
        arena.resolved.insert(
            invocation_id.to_string(),
            Settled {
                state,
                settled_at: now,
            },
        );

        info!(
            invocation_id = %invocation_id,
            approval_id = %decision.approval_id,
            confirmed = decision.confirmed,
            "Resuming invocation"
        );

        Ok(Resumed {
            record,
            continuation: suspended.continuation,
            state,
        })
    }

    /// Remember a terminal state reached without suspending, such as an
    /// auto-approved action. Ignored while the invocation is pending or once
    /// it already has a terminal state.
    pub fn settle(&self, invocation_id: &str, state: GateState) -> Result<()> {
        let state = GateState::Initial.transition(state)?;
        if !state.is_terminal() {
            return Err(TollgateError::InvalidTransition {
                from: GateState::Initial.to_string(),
                to: state.to_string(),
            });
        }

        let mut arena = self.lock()?;
        if arena.pending.contains_key(invocation_id) {
            return Ok(());
        }
        if let Some(existing) = arena.resolved.get(invocation_id) {
            debug!(
                invocation_id = %invocation_id,
                kept = %existing.state,
                ignored = %state,
                "Invocation already settled"
            );
            return Ok(());
        }

        arena.resolved.insert(
            invocation_id.to_string(),
            Settled {
                state,
                settled_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Current gate state of an invocation.
    pub fn state(&self, invocation_id: &str) -> Result<GateState> {
        let arena = self.lock()?;
        if arena.pending.contains_key(invocation_id) {
            return Ok(GateState::Pending);
        }
        Ok(arena
            .resolved
            .get(invocation_id)
            .map(|s| s.state)
            .unwrap_or(GateState::Initial))
    }

    /// The confirmation record for an invocation, pending or decided.
    pub fn record(&self, invocation_id: &str) -> Result<Option<ConfirmationRecord>> {
        self.ledger.get(invocation_id)
    }

    /// Ids of all invocations still waiting on a decision.
    pub fn pending_ids(&self) -> Result<Vec<String>> {
        let arena = self.lock()?;
        let mut ids: Vec<String> = arena.pending.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Drop pending entries older than the configured TTL and terminal states
    /// older than the retention window. Returns how many entries went.
    ///
    /// A forgotten invocation reports [`GateState::Initial`]; decisions for it
    /// are still refused because nothing is pending.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut arena = self.lock()?;
        let expired: Vec<String> = arena
            .pending
            .iter()
            .filter(|(_, s)| self.is_expired(s.suspended_at, now))
            .map(|(id, _)| id.clone())
            .collect();
        let forgotten: Vec<String> = arena
            .resolved
            .iter()
            .filter(|(_, s)| older_than(s.settled_at, now, self.retention))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            arena.pending.remove(id);
            self.ledger.remove(id)?;
        }
        for id in &forgotten {
            arena.resolved.remove(id);
            self.ledger.remove(id)?;
        }

        if !expired.is_empty() {
            info!("Purged {} abandoned confirmations", expired.len());
        }
        if !forgotten.is_empty() {
            debug!("Forgot {} settled invocations", forgotten.len());
        }
        Ok(expired.len() + forgotten.len())
    }

    /// Number of terminal states currently remembered.
    pub fn settled_count(&self) -> Result<usize> {
        Ok(self.lock()?.resolved.len())
    }
}

fn older_than(since: DateTime<Utc>, now: DateTime<Utc>, age: Duration) -> bool {
    now.signed_duration_since(since)
        .to_std()
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}

impl<T> Default for SuspendedInvocations<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn suspend_one(
        arena: &SuspendedInvocations<&'static str>,
        invocation_id: &str,
    ) -> ConfirmationRecord {
        let record = ConfirmationRecord::pending(invocation_id, "Approve?", json!({"n": 10}));
        arena.suspend(record.clone(), "continuation").unwrap();
        record
    }

    fn decision(record: &ConfirmationRecord, confirmed: bool) -> DecisionMessage {
        DecisionMessage {
            approval_id: record.approval_id.clone(),
            confirmed,
        }
    }

    #[test]
    fn test_resume_returns_continuation_with_decision() {
        let arena = SuspendedInvocations::new();
        let record = suspend_one(&arena, "inv-1");
        assert_eq!(arena.state("inv-1").unwrap(), GateState::Pending);

        let resumed = arena.resume("inv-1", &decision(&record, true)).unwrap();
        assert_eq!(resumed.continuation, "continuation");
        assert_eq!(resumed.record.confirmed, Some(true));
        assert_eq!(resumed.record.approval_id, record.approval_id);
        assert_eq!(resumed.state, GateState::ResolvedApproved);
        assert_eq!(arena.state("inv-1").unwrap(), GateState::ResolvedApproved);
    }

    #[test]
    fn test_second_resume_fails_and_state_stays() {
        let arena = SuspendedInvocations::new();
        let record = suspend_one(&arena, "inv-1");

        arena.resume("inv-1", &decision(&record, false)).unwrap();
        let again = arena.resume("inv-1", &decision(&record, true));

        assert!(matches!(again, Err(TollgateError::NoPendingInvocation(_))));
        assert_eq!(arena.state("inv-1").unwrap(), GateState::ResolvedRejected);
        assert_eq!(arena.record("inv-1").unwrap().unwrap().confirmed, Some(false));
    }

    #[test]
    fn test_unknown_or_mismatched_targets_fail_without_mutation() {
        let arena = SuspendedInvocations::new();
        let record = suspend_one(&arena, "inv-1");

        assert!(arena.resume("inv-404", &decision(&record, true)).is_err());

        let wrong = DecisionMessage {
            approval_id: "not-it".to_string(),
            confirmed: true,
        };
        assert!(arena.resume("inv-1", &wrong).is_err());

        assert_eq!(arena.state("inv-1").unwrap(), GateState::Pending);
        assert!(arena.record("inv-1").unwrap().unwrap().is_pending());
        assert!(arena.resume("inv-1", &decision(&record, true)).is_ok());
    }

    #[test]
    fn test_invocations_are_independent() {
        let arena = SuspendedInvocations::new();
        let a = suspend_one(&arena, "inv-a");
        let b = suspend_one(&arena, "inv-b");

        assert!(arena.resume("inv-a", &decision(&b, true)).is_err());
        arena.resume("inv-b", &decision(&b, true)).unwrap();
        arena.resume("inv-a", &decision(&a, false)).unwrap();

        assert_eq!(arena.state("inv-a").unwrap(), GateState::ResolvedRejected);
        assert_eq!(arena.state("inv-b").unwrap(), GateState::ResolvedApproved);
    }

    #[test]
    fn test_duplicate_suspension_is_refused() {
        let arena = SuspendedInvocations::new();
        let first = suspend_one(&arena, "inv-1");
        let second = ConfirmationRecord::pending("inv-1", "Again?", json!({}));

        assert!(matches!(
            arena.suspend(second, "other"),
            Err(TollgateError::DuplicateConfirmation(_))
        ));
        assert_eq!(arena.record("inv-1").unwrap().unwrap().approval_id, first.approval_id);
    }

    #[test]
    fn test_expired_entries_are_stale() {
        let arena = SuspendedInvocations::new().with_ttl(Some(Duration::from_secs(60)));
        let record = suspend_one(&arena, "inv-1");

        let later = Utc::now() + chrono::Duration::seconds(120);
        let result = arena.resume_at("inv-1", &decision(&record, true), later);

        assert!(matches!(result, Err(TollgateError::NoPendingInvocation(_))));
        assert_eq!(arena.state("inv-1").unwrap(), GateState::Initial);
    }

    #[test]
    fn test_settle_records_terminal_states_only() {
        let arena: SuspendedInvocations<&'static str> = SuspendedInvocations::new();
        arena.settle("inv-auto", GateState::AutoApproved).unwrap();
        assert_eq!(arena.state("inv-auto").unwrap(), GateState::AutoApproved);
        assert!(arena.settle("inv-x", GateState::Pending).is_err());

        let record = suspend_one(&arena, "inv-1");
        arena.settle("inv-1", GateState::AutoApproved).unwrap();
        assert_eq!(arena.state("inv-1").unwrap(), GateState::Pending);
        assert!(arena.resume("inv-1", &decision(&record, true)).is_ok());
    }

    #[test]
    fn test_settle_keeps_human_decision() {
        let arena = SuspendedInvocations::new();
        let record = suspend_one(&arena, "inv-1");
        arena.resume("inv-1", &decision(&record, true)).unwrap();

        arena.settle("inv-1", GateState::AutoApproved).unwrap();
        assert_eq!(arena.state("inv-1").unwrap(), GateState::ResolvedApproved);
    }

    #[test]
    fn test_purge_forgets_old_settled_states() {
        let arena = SuspendedInvocations::new()
            .with_ttl(Some(Duration::from_secs(60)))
            .with_retention(Duration::from_secs(600));
        let record = suspend_one(&arena, "inv-1");
        arena.resume("inv-1", &decision(&record, false)).unwrap();
        arena.settle("inv-auto", GateState::AutoApproved).unwrap();
        assert_eq!(arena.settled_count().unwrap(), 2);

        // Inside the retention window a late decision is refused and the state kept.
        let soon = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(arena.purge_expired(soon).unwrap(), 0);
        assert!(arena.resume_at("inv-1", &decision(&record, true), soon).is_err());
        assert_eq!(arena.state("inv-1").unwrap(), GateState::ResolvedRejected);

        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(arena.purge_expired(later).unwrap(), 2);
        assert_eq!(arena.settled_count().unwrap(), 0);
        assert!(arena.record("inv-1").unwrap().is_none());
        assert!(matches!(
            arena.resume_at("inv-1", &decision(&record, true), later),
            Err(TollgateError::NoPendingInvocation(_))
        ));
    }

    #[test]
    fn test_purge_expired() {
        let arena = SuspendedInvocations::new().with_ttl(Some(Duration::from_secs(60)));
        suspend_one(&arena, "inv-1");
        suspend_one(&arena, "inv-2");

        assert_eq!(arena.purge_expired(Utc::now()).unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(61 * 2);
        assert_eq!(arena.purge_expired(later).unwrap(), 2);
        assert!(arena.pending_ids().unwrap().is_empty());
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let arena = SuspendedInvocations::new();
        let record = suspend_one(&arena, "inv-1");
        let much_later = Utc::now() + chrono::Duration::days(365);
        assert!(arena.resume_at("inv-1", &decision(&record, true), much_later).is_ok());
    }
}
