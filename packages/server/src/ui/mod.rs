//! Transport adapter: Axum server exposing the presence coordinator over
//! WebSocket and HTTP.

mod handler;
mod server;
mod signal;
pub mod state;

pub use server::{Server, build_router};
