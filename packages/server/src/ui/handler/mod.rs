//! Request handlers.

mod http;
mod websocket;

pub use http::{
    get_presence_patterns, get_presence_quality, get_presence_state, get_presence_stats,
    get_reconnection_stats, health_check,
};
pub use websocket::websocket_handler;

use axum::http::StatusCode;

use crate::domain::{ConnectionContext, UserId};

/// Convert raw path/query strings into domain identifiers, or 400.
fn parse_target(
    user_id: String,
    context_type: &str,
    context_id: &str,
) -> Result<(UserId, ConnectionContext), StatusCode> {
    let user_id = UserId::new(user_id).map_err(|e| {
        tracing::warn!("Invalid user_id: {}", e);
        StatusCode::BAD_REQUEST
    })?;
    let context = ConnectionContext::parse(context_type, context_id).map_err(|e| {
        tracing::warn!("Invalid context '{}:{}': {}", context_type, context_id, e);
        StatusCode::BAD_REQUEST
    })?;
    Ok((user_id, context))
}
