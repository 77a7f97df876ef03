// API module
//
// This module exposes the ledger over HTTP: chain queries, transaction
// submission, mining and address history

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use handlers::{AppData, AppState};
pub use routes::configure_routes;
