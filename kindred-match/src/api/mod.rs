//! HTTP API handlers for kindred-match
//!
//! REST for submission and polling, WebSocket for per-user result push,
//! SSE for the operator lifecycle feed.

pub mod communities;
pub mod events;
pub mod health;
pub mod identity;
pub mod match_workflow;
pub mod realtime;

pub use communities::community_routes;
pub use events::match_event_stream;
pub use health::health_routes;
pub use identity::identity_routes;
pub use match_workflow::match_routes;
pub use realtime::realtime_routes;
