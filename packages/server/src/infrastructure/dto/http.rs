//! HTTP API response DTOs.

use serde::{Deserialize, Serialize};

/// 現在のプレゼンス状態
///
/// 時刻は JST の RFC 3339 文字列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceStateDto {
    pub record_id: String,
    pub user_id: String,
    pub context_type: String,
    pub context_id: String,
    pub status: String,
    pub connected_at: Option<String>,
    pub disconnected_at: Option<String>,
    pub reconnected_at: Option<String>,
    pub last_heartbeat: Option<String>,
    pub updated_at: Option<String>,
}
