//! # forma-collab: real-time collaboration for the design canvas
//!
//! Propagates local edits to a shared WebSocket channel and applies remote
//! edits to the local [`forma_core::DesignStore`], ordered by sender
//! timestamp, with bounded fixed-delay reconnection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON text frames   ┌──────────────┐
//! │ CollabSession│ ◄──────────────────► │ relay server │
//! │ (per design) │   /design/{id}       │ (external)   │
//! └──────┬───────┘                      └──────────────┘
//!        │ next_event(&mut store)
//!        ▼
//! ┌──────────────┐   apply_operation    ┌──────────────┐
//! │ Synchronizer │ ───────────────────► │ DesignStore  │
//! │ watermark,   │                      │ (forma-core) │
//! │ log, presence│                      └──────────────┘
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire format (`Operation`, `OnlineUser`)
//! - [`presence`]: who is online and where their cursor is
//! - [`sync`]: stale rejection, dispatch to the store, bounded op log
//! - [`reconnect`]: fixed-delay retry budget
//! - [`config`]: session configuration
//! - [`session`]: connection driver and application-facing session

pub mod config;
pub mod presence;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod sync;

pub use config::SessionConfig;
pub use presence::{PresenceChange, PresenceList};
pub use protocol::{
    now_millis, CursorPosition, OnlineUser, Operation, OperationPayload, OperationType,
    ProtocolError,
};
pub use reconnect::{ReconnectPolicy, RetryDecision, RetryState};
pub use session::{CollabSession, ConnectionState, SessionError, SessionEvent};
pub use sync::{apply_operation, ApplyError, ApplyOutcome, Synchronizer};
