//! Conversion logic between DTOs and domain entities.

use kehai_shared::time::timestamp_to_jst_rfc3339;

use crate::{
    domain::{ConnectionRecord, Timestamp},
    infrastructure::dto::http as dto,
};

fn render(timestamp: Option<Timestamp>) -> Option<String> {
    timestamp.and_then(|timestamp| timestamp_to_jst_rfc3339(timestamp.value()))
}

// ========================================
// Domain Entity → DTO
// ========================================

impl From<&ConnectionRecord> for dto::PresenceStateDto {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            record_id: record.id.to_string(),
            user_id: record.user_id.as_str().to_string(),
            context_type: record.context.kind.as_str().to_string(),
            context_id: record.context.id.as_str().to_string(),
            status: record.status.as_str().to_string(),
            connected_at: render(record.connected_at),
            disconnected_at: render(record.disconnected_at),
            reconnected_at: render(record.reconnected_at),
            last_heartbeat: render(record.metadata.last_heartbeat),
            updated_at: render(Some(record.updated_at)),
        }
    }
}
