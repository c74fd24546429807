//! Error taxonomy for the control loops
//!
//! Read paths never surface these: every `get_*` accessor degrades to a
//! documented neutral default. Errors exist for the write/ingest edge and
//! for upstream queries made during a loop's own cycle.

use thiserror::Error;

/// Errors produced at the control-core boundary.
#[derive(Debug, Error)]
pub enum ControlError {
    /// An upstream collaborator (attention provider, peer loop) failed.
    /// Callers treat this as a missing signal, never propagate it.
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// A fire-and-forget write was dropped because the actor mailbox is full.
    #[error("mailbox full for {component}")]
    MailboxFull { component: &'static str },

    /// An ingest payload could not be interpreted.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
