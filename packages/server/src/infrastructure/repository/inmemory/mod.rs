//! インメモリ Repository 実装

pub mod connection_record;
pub mod user_directory;

pub use connection_record::InMemoryConnectionRecordRepository;
pub use user_directory::InMemoryUserDirectory;
