//! Value Object 定義
//!
//! 識別子やタイムスタンプなど、不変で自己検証する値を表現します。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ValueObjectError;

/// 識別子の最大長
const MAX_IDENTIFIER_LENGTH: usize = 64;

fn validate_identifier(
    value: &str,
    empty: ValueObjectError,
    kind: &'static str,
) -> Result<(), ValueObjectError> {
    if value.is_empty() {
        return Err(empty);
    }
    if value.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ValueObjectError::TooLong {
            kind,
            max: MAX_IDENTIFIER_LENGTH,
            actual: value.chars().count(),
        });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValueObjectError::InvalidCharacters {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// 参加者（ユーザー）の ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// 新しい UserId を作成（空文字、空白を含む値、長すぎる値は拒否）
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        validate_identifier(&value, ValueObjectError::EmptyUserId, "user_id")?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// プレゼンスを追跡するスコープの種類
///
/// `Room` は待合室、`Debate` は進行中のペアセッション。
/// 未知の種類は `Other` として保持し、設定上はデフォルト値にフォールバックする。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContextType {
    Room,
    Debate,
    Other(String),
}

impl ContextType {
    pub fn as_str(&self) -> &str {
        match self {
            ContextType::Room => "room",
            ContextType::Debate => "debate",
            ContextType::Other(name) => name,
        }
    }
}

impl TryFrom<String> for ContextType {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "room" => Ok(ContextType::Room),
            "debate" => Ok(ContextType::Debate),
            _ => {
                validate_identifier(
                    &normalized,
                    ValueObjectError::EmptyContextType,
                    "context_type",
                )?;
                Ok(ContextType::Other(normalized))
            }
        }
    }
}

impl From<ContextType> for String {
    fn from(value: ContextType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// スコープ（ルームやディベート）の ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContextId(String);

impl ContextId {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        validate_identifier(&value, ValueObjectError::EmptyContextId, "context_id")?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContextId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContextId> for String {
    fn from(value: ContextId) -> Self {
        value.0
    }
}

/// プレゼンスを追跡するスコープ
///
/// 1 ユーザーはスコープごとに独立した接続状態を持つ。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionContext {
    #[serde(rename = "type")]
    pub kind: ContextType,
    pub id: ContextId,
}

impl ConnectionContext {
    pub fn new(kind: ContextType, id: ContextId) -> Self {
        Self { kind, id }
    }

    /// 文字列からスコープを組み立てる（HTTP / WebSocket のクエリ用）
    pub fn parse(kind: &str, id: &str) -> Result<Self, ValueObjectError> {
        Ok(Self {
            kind: ContextType::try_from(kind.to_string())?,
            id: ContextId::new(id.to_string())?,
        })
    }
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id.as_str())
    }
}

/// 接続レコードの ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unix タイムスタンプ（ミリ秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// `earlier` からの経過秒数（小数点以下はミリ秒精度）
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        (self.0 - earlier.0) as f64 / 1000.0
    }

    /// 指定秒数だけ前の時刻
    pub fn minus_secs(&self, secs: u64) -> Timestamp {
        Timestamp(self.0.saturating_sub((secs as i64).saturating_mul(1000)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_rejects_invalid_values() {
        // テスト項目: 空文字、空白入り、長すぎる UserId は拒否される
        // given (前提条件):
        let too_long = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);

        // when (操作):
        let empty = UserId::new(String::new());
        let spaced = UserId::new("ali ce".to_string());
        let long = UserId::new(too_long);

        // then (期待する結果):
        assert_eq!(empty, Err(ValueObjectError::EmptyUserId));
        assert!(matches!(
            spaced,
            Err(ValueObjectError::InvalidCharacters { .. })
        ));
        assert!(matches!(long, Err(ValueObjectError::TooLong { .. })));
    }

    #[test]
    fn test_context_type_parses_known_and_unknown_kinds() {
        // テスト項目: 既知の種類は列挙子に、未知の種類は Other に変換される
        // given (前提条件):

        // when (操作):
        let room = ContextType::try_from("Room".to_string()).unwrap();
        let debate = ContextType::try_from("debate".to_string()).unwrap();
        let other = ContextType::try_from("tournament".to_string()).unwrap();

        // then (期待する結果):
        assert_eq!(room, ContextType::Room);
        assert_eq!(debate, ContextType::Debate);
        assert_eq!(other, ContextType::Other("tournament".to_string()));
        assert_eq!(other.as_str(), "tournament");
    }

    #[test]
    fn test_connection_context_serializes_with_type_field() {
        // テスト項目: ConnectionContext が {type, id} 形式で JSON 化される
        // given (前提条件):
        let context = ConnectionContext::parse("debate", "d-42").unwrap();

        // when (操作):
        let json = serde_json::to_value(&context).unwrap();

        // then (期待する結果):
        assert_eq!(json, serde_json::json!({"type": "debate", "id": "d-42"}));
        assert_eq!(context.to_string(), "debate:d-42");
    }

    #[test]
    fn test_timestamp_arithmetic() {
        // テスト項目: 経過秒数と過去時刻の計算が正しい
        // given (前提条件):
        let earlier = Timestamp::new(10_000);
        let later = Timestamp::new(12_500);

        // when (操作):
        let elapsed = later.seconds_since(earlier);
        let shifted = later.minus_secs(2);

        // then (期待する結果):
        assert_eq!(elapsed, 2.5);
        assert_eq!(shifted, Timestamp::new(10_500));
    }
}
