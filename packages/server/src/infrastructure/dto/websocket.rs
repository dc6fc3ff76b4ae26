//! WebSocket message DTOs.

use serde::{Deserialize, Serialize};

/// クライアントから受け取るメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// 定期的な生存通知
    Heartbeat,
    /// 明示的な退出
    Leave {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    PresenceUpdated,
}

/// サーバーから送る状態通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdatedMessage {
    pub r#type: MessageType,
    /// 実際に行われた処理（`connected` / `reconnected` / `heartbeat` / `ignored`）
    pub outcome: String,
    /// 現在の状態（レコードがなければ `None`）
    pub status: Option<String>,
    /// Unix タイムスタンプ（ミリ秒）
    pub timestamp: i64,
}
