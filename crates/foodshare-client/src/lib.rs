//! Remote implementation of the foodshare backend traits.
//!
//! Tables and RPCs go through the hosted service's REST interface,
//! change notifications through its realtime websocket.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod realtime;
pub mod rest;

pub use backend::RemoteBackend;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use realtime::RealtimeClient;
pub use rest::{Query, RestClient};
