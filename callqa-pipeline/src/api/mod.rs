//! HTTP API handlers for the pipeline service

pub mod calls;
pub mod health;
pub mod reviews;
pub mod sse;
pub mod stats;

pub use calls::call_routes;
pub use health::health_routes;
pub use reviews::review_routes;
pub use sse::event_stream;
pub use stats::stats_routes;
