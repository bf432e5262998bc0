//! Applying remote operations to the local design store.
//!
//! Ordering is last-writer-wins on the sender timestamp: an operation whose
//! timestamp does not exceed the last applied one is discarded. There is no
//! field-level merge and no causal buffering; operations are applied in
//! receipt order.
//!
//! ```text
//! text frame ─► decode ─► own? ─► stale? ─► CURSOR_MOVE ─► presence
//!                 │ err                        │ else
//!                 ▼                            ▼
//!            Malformed                 apply_operation(store)
//!                                              │ ok
//!                                              ▼
//!                                  watermark = ts, log.push(op)
//! ```

use std::collections::VecDeque;

use forma_core::{DesignStore, StoreError};
use thiserror::Error;

use crate::presence::{PresenceChange, PresenceList};
use crate::protocol::{Operation, OperationType, ProtocolError};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A document operation was applied to the store.
    Applied(Operation),
    /// A cursor frame updated presence.
    Presence { user_id: String, change: PresenceChange },
    /// Timestamp not newer than the watermark; discarded.
    Stale { timestamp: u64, watermark: u64 },
    /// Our own operation relayed back to us; not re-applied.
    Echo,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    #[error("Malformed message: {0}")]
    Malformed(ProtocolError),
    #[error("Invalid {op} payload: {source}")]
    InvalidPayload { op: OperationType, source: ProtocolError },
    #[error("{op} failed: {source}")]
    Store { op: OperationType, source: StoreError },
}

impl ApplyError {
    /// True for frames that could not even be parsed.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Dispatch a document operation to the matching store mutation.
///
/// Used for both remote and locally originated operations so a single
/// code path enforces the store's invariants. `CURSOR_MOVE` is a no-op here.
pub fn apply_operation(op: &Operation, store: &mut DesignStore) -> Result<(), ApplyError> {
    let invalid = |source| ApplyError::InvalidPayload {
        op: op.op_type,
        source,
    };
    let failed = |source| ApplyError::Store {
        op: op.op_type,
        source,
    };

    match op.op_type {
        OperationType::AddComponent => {
            let component = op.require_component().map_err(invalid)?;
            store.add_component(component.clone()).map_err(failed)?;
        }
        OperationType::UpdateComponent => {
            let component = op.require_component().map_err(invalid)?;
            store.update_component(component.clone());
        }
        OperationType::DeleteComponent => {
            let id = op.require_component_id().map_err(invalid)?;
            store.delete_component(id);
        }
        OperationType::MoveComponent => {
            let id = op.require_component_id().map_err(invalid)?;
            let direction = op.require_direction().map_err(invalid)?;
            store.move_component(id, direction);
        }
        OperationType::SelectComponent => {
            store
                .select_component(op.payload.component_id.as_deref())
                .map_err(failed)?;
        }
        OperationType::ClearSelection => store.clear_selection(),
        OperationType::CursorMove => {}
    }
    Ok(())
}

/// Per-session synchronization state: watermark, operation log, presence.
#[derive(Debug)]
pub struct Synchronizer {
    local_user_id: String,
    last_applied: u64,
    log: VecDeque<Operation>,
    log_capacity: usize,
    presence: PresenceList,
}

impl Synchronizer {
    pub fn new(local_user_id: impl Into<String>, log_capacity: usize) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            last_applied: 0,
            log: VecDeque::new(),
            log_capacity,
            presence: PresenceList::new(),
        }
    }

    /// Decode and apply one inbound text frame.
    pub fn handle_message(
        &mut self,
        raw: &str,
        store: &mut DesignStore,
    ) -> Result<ApplyOutcome, ApplyError> {
        let op = Operation::decode(raw).map_err(|e| {
            log::warn!("Dropping malformed frame: {e}");
            ApplyError::Malformed(e)
        })?;
        self.apply(op, store)
    }

    /// Apply an already decoded remote operation.
    pub fn apply(
        &mut self,
        op: Operation,
        store: &mut DesignStore,
    ) -> Result<ApplyOutcome, ApplyError> {
        if op.user_id == self.local_user_id {
            if op.op_type.is_document_edit() {
                self.raise_watermark(op.timestamp);
            }
            return Ok(ApplyOutcome::Echo);
        }

        if op.timestamp <= self.last_applied {
            log::debug!(
                "Discarding stale {} from {} (ts {} <= {})",
                op.op_type,
                op.user_id,
                op.timestamp,
                self.last_applied
            );
            return Ok(ApplyOutcome::Stale {
                timestamp: op.timestamp,
                watermark: self.last_applied,
            });
        }

        if op.op_type == OperationType::CursorMove {
            let change = self.presence.upsert_cursor(
                &op.user_id,
                op.payload.cursor,
                op.payload.user.as_ref(),
            );
            return Ok(ApplyOutcome::Presence {
                user_id: op.user_id,
                change,
            });
        }

        if let Err(e) = apply_operation(&op, store) {
            log::warn!("Failed to apply {} from {}: {e}", op.op_type, op.user_id);
            return Err(e);
        }

        match op.op_type {
            OperationType::SelectComponent => {
                self.presence
                    .set_selection(&op.user_id, op.payload.component_id.clone());
            }
            OperationType::ClearSelection => {
                self.presence.set_selection(&op.user_id, None);
            }
            _ => {}
        }

        self.last_applied = op.timestamp;
        self.push_log(op.clone());
        Ok(ApplyOutcome::Applied(op))
    }

    /// Apply a locally originated operation. Document edits raise the
    /// watermark so older remote writes can no longer overwrite them.
    pub fn apply_local(
        &mut self,
        op: &Operation,
        store: &mut DesignStore,
    ) -> Result<(), ApplyError> {
        apply_operation(op, store)?;
        if op.op_type.is_document_edit() {
            self.raise_watermark(op.timestamp);
            self.push_log(op.clone());
        }
        Ok(())
    }

    fn raise_watermark(&mut self, timestamp: u64) {
        self.last_applied = self.last_applied.max(timestamp);
    }

    fn push_log(&mut self, op: Operation) {
        if self.log_capacity == 0 {
            return;
        }
        while self.log.len() >= self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(op);
    }

    /// Timestamp of the last applied document operation.
    pub fn watermark(&self) -> u64 {
        self.last_applied
    }

    /// Most recently applied operations, oldest first.
    pub fn operation_log(&self) -> &VecDeque<Operation> {
        &self.log
    }

    pub fn presence(&self) -> &PresenceList {
        &self.presence
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Forget presence, log and watermark.
    pub fn reset(&mut self) {
        self.last_applied = 0;
        self.log.clear();
        self.presence.clear();
    }
}
