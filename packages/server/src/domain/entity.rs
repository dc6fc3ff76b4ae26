//! Entity 定義
//!
//! `ConnectionRecord` は (ユーザー, スコープ) ごとの接続状態の唯一の真実。
//! 状態が変わるたびにその場で更新され、遷移履歴 (`metadata.transitions`) を保持するため、
//! 監査ログと現在状態のスナップショットを兼ねる。

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use super::{ConnectionContext, RecordId, Timestamp, UserId, state_machine};

/// 接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    TemporarilyDisconnected,
    Disconnected,
    GracefullyDisconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::TemporarilyDisconnected => "TEMPORARILY_DISCONNECTED",
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::GracefullyDisconnected => "GRACEFULLY_DISCONNECTED",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// メタデータに記録する接続種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Initial,
    Disconnection,
    Reconnection,
    GracefulDisconnection,
}

/// トランスポート層から渡されるクライアント情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// 状態遷移 1 件分の記録
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// 遷移元（`None` はレコード作成）
    pub from: Option<ConnectionStatus>,
    pub to: ConnectionStatus,
    pub at: Timestamp,
}

/// 再接続時に付与するメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionMetadata {
    pub reconnection_timestamp: Timestamp,
    /// 切断から再接続までの秒数
    pub disconnection_duration: f64,
    pub previous_status: ConnectionStatus,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ReconnectionMetadata {
    /// `now` に再接続したとみなしてメタデータを組み立てる（レコードは変更しない）
    pub fn build(
        record: &ConnectionRecord,
        now: Timestamp,
        extra: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let disconnection_duration = record
            .disconnected_at
            .map(|disconnected_at| now.seconds_since(disconnected_at))
            .unwrap_or(0.0);
        Self {
            reconnection_timestamp: now,
            disconnection_duration,
            previous_status: record.status,
            extra,
        }
    }
}

/// 接続レコードのメタデータ
///
/// よく使うフィールドは型付きで持ち、それ以外は `extensions` に格納する。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    pub connection_type: Option<ConnectionType>,
    /// User-Agent などのクライアント識別文字列
    pub client_info: Option<String>,
    pub ip_address: Option<String>,
    /// 切断シグナルを受け取った時刻
    pub timestamp: Option<Timestamp>,
    pub last_heartbeat: Option<Timestamp>,
    pub reconnection: Option<ReconnectionMetadata>,
    pub finalized_at: Option<Timestamp>,
    pub graceful_reason: Option<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionEvent>,
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl ConnectionMetadata {
    /// クライアント情報を上書き（渡された値のみ）
    pub fn stamp_client(&mut self, client: &ClientInfo) {
        if let Some(user_agent) = &client.user_agent {
            self.client_info = Some(user_agent.clone());
        }
        if let Some(ip_address) = &client.ip_address {
            self.ip_address = Some(ip_address.clone());
        }
    }

    pub fn merge_extensions(&mut self, extra: BTreeMap<String, serde_json::Value>) {
        self.extensions.extend(extra);
    }
}

/// 1 回の一時切断（TEMPORARILY_DISCONNECTED に入ってから出るまで）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionEpisode {
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    /// 終了時の遷移先（未終了なら `None`）
    pub outcome: Option<ConnectionStatus>,
}

impl DisconnectionEpisode {
    /// 切断時間（秒）。未終了のエピソードは `now` までの時間
    pub fn duration_secs(&self, now: Timestamp) -> f64 {
        self.ended_at.unwrap_or(now).seconds_since(self.started_at)
    }

    pub fn is_reconnection(&self) -> bool {
        self.outcome == Some(ConnectionStatus::Connected)
    }
}

/// 接続レコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub context: ConnectionContext,
    pub status: ConnectionStatus,
    pub connected_at: Option<Timestamp>,
    pub disconnected_at: Option<Timestamp>,
    pub reconnected_at: Option<Timestamp>,
    pub metadata: ConnectionMetadata,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ConnectionRecord {
    /// 新しいセッションのレコードを CONNECTED で作成
    pub fn open(
        user_id: UserId,
        context: ConnectionContext,
        now: Timestamp,
        connection_type: ConnectionType,
        client: &ClientInfo,
    ) -> Self {
        let mut metadata = ConnectionMetadata {
            connection_type: Some(connection_type),
            ..ConnectionMetadata::default()
        };
        metadata.stamp_client(client);
        metadata.transitions.push(TransitionEvent {
            from: None,
            to: ConnectionStatus::Connected,
            at: now,
        });

        Self {
            id: RecordId::generate(),
            user_id,
            context,
            status: ConnectionStatus::Connected,
            connected_at: Some(now),
            disconnected_at: None,
            reconnected_at: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// 状態遷移を適用する
    ///
    /// 遷移表にない遷移は何もせず `false` を返す。
    pub fn transition(&mut self, to: ConnectionStatus, at: Timestamp) -> bool {
        let from = self.status;
        if !state_machine::validate_transition(from, to) {
            return false;
        }

        match to {
            ConnectionStatus::TemporarilyDisconnected | ConnectionStatus::GracefullyDisconnected => {
                self.disconnected_at = Some(at);
            }
            ConnectionStatus::Disconnected => {
                // keeps the provisional disconnect time
                self.disconnected_at.get_or_insert(at);
            }
            ConnectionStatus::Connected => {
                self.reconnected_at = Some(at);
            }
        }

        self.status = to;
        self.updated_at = at;
        self.metadata.transitions.push(TransitionEvent {
            from: Some(from),
            to,
            at,
        });
        true
    }

    /// 遷移履歴から一時切断のエピソードを復元する
    pub fn disconnection_episodes(&self) -> Vec<DisconnectionEpisode> {
        let mut episodes = Vec::new();
        let mut open: Option<Timestamp> = None;

        for event in &self.metadata.transitions {
            if event.to == ConnectionStatus::TemporarilyDisconnected {
                open = Some(event.at);
            } else if event.from == Some(ConnectionStatus::TemporarilyDisconnected) {
                if let Some(started_at) = open.take() {
                    episodes.push(DisconnectionEpisode {
                        started_at,
                        ended_at: Some(event.at),
                        outcome: Some(event.to),
                    });
                }
            }
        }

        if let Some(started_at) = open {
            episodes.push(DisconnectionEpisode {
                started_at,
                ended_at: None,
                outcome: None,
            });
        }

        episodes
    }

    /// `since` 以降に `to` へ遷移した回数
    pub fn count_transitions_into(&self, to: ConnectionStatus, since: Timestamp) -> usize {
        self.metadata
            .transitions
            .iter()
            .filter(|event| event.to == to && event.at >= since)
            .count()
    }
}
