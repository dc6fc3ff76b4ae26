//! Connection lifecycle and presence-quality service.
//!
//! Tracks whether each participant is present in each room or debate,
//! tolerates transient network drops with a grace period, and scores
//! connection quality from the recorded history.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
