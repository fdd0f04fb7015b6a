//! Twin Registry Clients
//!
//! The registry (Eclipse Ditto) is reached two ways, sharing credentials:
//!
//! - [`RegistryWsClient`]: the `/ws/2` event stream the bridge consumes
//! - [`RegistryHttpClient`]: API v2 CRUD on things, features and policies

mod auth;
mod error;
mod http;
mod models;
mod reconnect;
mod websocket;

pub use auth::RegistryAuth;
pub use error::RegistryClientError;
pub use http::{REQUEST_TIMEOUT, RegistryHttpClient, RetryConfig};
pub use models::{
    Feature, FeatureProperties, Policy, PolicyEntry, PolicyResource, PolicySubject,
    RegistryErrorBody, SearchResult, Thing,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::{
    ConnectionState, DEFAULT_PING_INTERVAL, HandlerKey, RegistryWsClient, RegistryWsConfig,
    SubscriptionSpec, websocket_url,
};
