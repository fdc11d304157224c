//! Core library for the SyncBoard client.
//!
//! - `auth`: the session store (credential + identity), its durable
//!   mirror, and the derived "is authenticated" signal
//! - `api`: the authenticated request client and typed auth endpoints
//! - `models`: record shapes returned by the server
//! - `config`: on-disk client configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, Response};
pub use auth::{Credential, Identity, Session, SessionStore};
pub use config::{Config, StorageBackend};
