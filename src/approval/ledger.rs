//! Confirmation records and the per-call handle gated actions receive.

use super::ConfirmationRecord;
use crate::error::{Result, TollgateError};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Explicit invocation handle passed to a gated action.
///
/// On a first call it carries no confirmation and may record one request.
/// On the resume path it carries the action's own record with the decision set.
#[derive(Debug, Clone)]
pub struct ActionContext {
    invocation_id: String,
    function_call_id: String,
    confirmation: Option<ConfirmationRecord>,
    requested: Option<ConfirmationRecord>,
}

impl ActionContext {
    /// Context for the first run of a tool call.
    pub fn new(invocation_id: &str, function_call_id: &str) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            function_call_id: function_call_id.to_string(),
            confirmation: None,
            requested: None,
        }
    }

    /// Context for re-running a tool call after a decision arrived.
    pub fn resuming(record: ConfirmationRecord, function_call_id: &str) -> Self {
        Self {
            invocation_id: record.invocation_id.clone(),
            function_call_id: function_call_id.to_string(),
            confirmation: Some(record),
            requested: None,
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn function_call_id(&self) -> &str {
        &self.function_call_id
    }

    /// The decided record, when resuming.
    pub fn tool_confirmation(&self) -> Option<&ConfirmationRecord> {
        self.confirmation.as_ref()
    }

    /// Ask for human confirmation. Returns false if a request already exists;
    /// the earlier one stays authoritative.
    pub fn request_confirmation(&mut self, hint: &str, payload: serde_json::Value) -> bool {
        if self.confirmation.is_some() || self.requested.is_some() {
            warn!(
                invocation_id = %self.invocation_id,
                "Ignoring duplicate confirmation request: {}", hint
            );
            return false;
        }

        let record = ConfirmationRecord::pending(&self.invocation_id, hint, payload);
        debug!(
            approval_id = %record.approval_id,
            invocation_id = %self.invocation_id,
            "Confirmation requested"
        );
        self.requested = Some(record);
        true
    }

    /// The request made during this call, if any.
    pub fn requested(&self) -> Option<&ConfirmationRecord> {
        self.requested.as_ref()
    }

    pub fn take_request(&mut self) -> Option<ConfirmationRecord> {
        self.requested.take()
    }
}

/// Confirmation records keyed by invocation id.
///
/// Holds at most one record per invocation. A record is decided exactly once
/// and kept afterwards so repeated decisions can be refused.
pub struct ConfirmationLedger {
    records: Mutex<HashMap<String, ConfirmationRecord>>,
}

impl ConfirmationLedger {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ConfirmationRecord>>> {
        self.records
            .lock()
            .map_err(|e| TollgateError::Agent(format!("Failed to acquire ledger lock: {}", e)))
    }

    /// Record a pending confirmation. A second outstanding record for the same
    /// invocation is refused and the earliest is kept.
    pub fn insert_pending(&self, record: ConfirmationRecord) -> Result<()> {
        let mut records = self.lock()?;

        if let Some(existing) = records.get(&record.invocation_id) {
            if existing.is_pending() {
                warn!(
                    invocation_id = %record.invocation_id,
                    kept = %existing.approval_id,
                    ignored = %record.approval_id,
                    "Duplicate confirmation request"
                );
                return Err(TollgateError::DuplicateConfirmation(
                    record.invocation_id.clone(),
                ));
            }
        }

        records.insert(record.invocation_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, invocation_id: &str) -> Result<Option<ConfirmationRecord>> {
        Ok(self.lock()?.get(invocation_id).cloned())
    }

    /// Whether the invocation has an undecided record with this approval id.
    pub fn is_pending(&self, invocation_id: &str, approval_id: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .get(invocation_id)
            .is_some_and(|r| r.approval_id == approval_id && r.is_pending()))
    }

    /// Attach a decision. Fails without mutating anything if the record is
    /// missing, the approval id does not match, or it was already decided.
    pub fn resolve(
        &self,
        invocation_id: &str,
        approval_id: &str,
        confirmed: bool,
    ) -> Result<ConfirmationRecord> {
        let mut records = self.lock()?;

        let record = records
            .get_mut(invocation_id)
            .filter(|r| r.approval_id == approval_id && r.is_pending())
            .ok_or_else(|| TollgateError::NoPendingInvocation(invocation_id.to_string()))?;

        record.confirmed = Some(confirmed);
        Ok(record.clone())
    }

    /// Drop a record entirely (used when a pending entry is abandoned).
    pub fn remove(&self, invocation_id: &str) -> Result<Option<ConfirmationRecord>> {
        Ok(self.lock()?.remove(invocation_id))
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConfirmationLedger {
    fn default() -> Self {
        Self::new()
    }
}
