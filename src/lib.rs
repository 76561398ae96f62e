//! Collaborative document synchronization core.
//!
//! Presence tracking, last-writer-wins overwrite policy between concurrent
//! sessions, debounced persistence and share-token access control, plus the
//! axum service that hosts them.

pub mod auth;
pub mod clients;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
pub mod ws;

pub use error::SyncError;
pub use state::AppState;
