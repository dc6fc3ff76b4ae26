//! Shared utilities for the Kehai presence service.

pub mod logger;
pub mod time;
