// Cake API Library
//
// HTTP surface of the audit relay: audited demo routes, live tail and metrics

pub mod http;
pub mod observability;

// Re-export commonly used types
pub use http::{create_router, AppState};
