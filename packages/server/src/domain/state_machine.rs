//! Connection state graph.
//!
//! Pure functions that answer "is this transition allowed?". No I/O and no
//! failure modes: every function here is a predicate.
//!
//! ```text
//!   (no record) ──► CONNECTED ──► GRACEFULLY_DISCONNECTED
//!                     ▲   │
//!                     │   ▼
//!           TEMPORARILY_DISCONNECTED ──► DISCONNECTED
//! ```

use super::{ConnectionRecord, ConnectionStatus};

use ConnectionStatus::{Connected, Disconnected, GracefullyDisconnected, TemporarilyDisconnected};

/// Outgoing edges of the state graph. `None` stands for "no record yet".
pub fn allowed_transitions(from: Option<ConnectionStatus>) -> &'static [ConnectionStatus] {
    match from {
        None => &[Connected],
        Some(Connected) => &[TemporarilyDisconnected, GracefullyDisconnected],
        Some(TemporarilyDisconnected) => &[Connected, Disconnected],
        Some(Disconnected) | Some(GracefullyDisconnected) => &[],
    }
}

/// Check whether `from -> to` is an edge of the state graph.
pub fn validate_transition(from: ConnectionStatus, to: ConnectionStatus) -> bool {
    allowed_transitions(Some(from)).contains(&to)
}

/// Check whether the record (or the absence of one) may move to `to`.
pub fn validate_log_transition(record: Option<&ConnectionRecord>, to: ConnectionStatus) -> bool {
    allowed_transitions(record.map(|r| r.status)).contains(&to)
}

/// A reconnection is only meaningful without a record or from a provisional disconnect.
pub fn can_reconnect(record: Option<&ConnectionRecord>) -> bool {
    match record {
        None => true,
        Some(record) => record.status == TemporarilyDisconnected,
    }
}

/// Only a live connection can be disconnected.
pub fn can_disconnect(record: Option<&ConnectionRecord>) -> bool {
    matches!(record, Some(record) if record.status == Connected)
}

pub fn is_final_status(status: ConnectionStatus) -> bool {
    allowed_transitions(Some(status)).is_empty()
}
