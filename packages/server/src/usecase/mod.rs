//! UseCase layer: the presence lifecycle.
//!
//! - `connection_logger`: the only writer of connection records
//! - `disconnection_handler` / `reconnection_handler`: react to "gone" / "back" signals
//! - `connection_analyzer`: read-only stats, pattern detection and quality score
//! - `failure_containment`: logs failed operations and alerts on critical scopes
//! - `presence_coordinator`: the facade used by the transport layer

pub mod connection_analyzer;
pub mod connection_logger;
pub mod disconnection_handler;
pub mod error;
pub mod failure_containment;
pub mod presence_coordinator;
pub mod reconnection_handler;

pub use connection_analyzer::{
    ConnectionAnalyzer, ConnectionStats, PatternFinding, PatternReport, PatternType,
    QualityLevel, QualityScore, ScoreBreakdown, Severity, calculate_severity, get_quality_level,
};
pub use connection_logger::ConnectionLogger;
pub use disconnection_handler::DisconnectionHandler;
pub use error::PresenceError;
pub use failure_containment::FailureContainment;
pub use presence_coordinator::{LastSeenOutcome, PresenceCoordinator};
pub use reconnection_handler::{
    ReconnectionHandler, ReconnectionStats, has_unreconciled_disconnection, validate_reconnection,
};
