//! HTTP and WebSocket surface of the round engine.
//!
//! Read endpoints expose the current round and the archive, `POST /api/verify`
//! recomputes a round from its revealed seed, and `/ws/:game` carries live
//! play.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod routes;
pub mod server;
pub mod websocket;

pub use handlers::AppState;
pub use server::RoundhouseServer;
