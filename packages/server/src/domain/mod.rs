//! Domain layer: connection records, the state graph and the collaborator
//! interfaces the use cases depend on.

pub mod alerter;
pub mod entity;
pub mod error;
pub mod repository;
pub mod scheduler;
pub mod state_machine;
pub mod value_object;

pub use alerter::{Alert, Alerter};
pub use entity::{
    ClientInfo, ConnectionMetadata, ConnectionRecord, ConnectionStatus, ConnectionType,
    DisconnectionEpisode, ReconnectionMetadata, TransitionEvent,
};
pub use error::{AlertError, RepositoryError, ValueObjectError};
pub use repository::{
    ConnectionRecordRepository, HistoryQuery, RecordChange, RecordTransaction, RecordUpdate,
    UserDirectory,
};
pub use scheduler::{ScheduledFuture, ScheduledJob, ScheduledTask, Scheduler};
pub use value_object::{ConnectionContext, ContextId, ContextType, RecordId, Timestamp, UserId};

#[cfg(test)]
pub use alerter::MockAlerter;
#[cfg(test)]
pub use repository::{MockConnectionRecordRepository, MockUserDirectory};
