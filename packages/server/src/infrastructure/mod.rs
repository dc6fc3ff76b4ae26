//! Infrastructure layer: concrete collaborators behind the domain traits.

pub mod alerter;
pub mod cache;
pub mod dto;
pub mod repository;
pub mod scheduler;
