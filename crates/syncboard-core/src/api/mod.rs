//! REST API client module for the SyncBoard server.
//!
//! This module provides the `ApiClient` for issuing authenticated JSON
//! requests, the `ApiError` taxonomy, and typed wrappers for the auth routes.
//!
//! The API uses JWT bearer token authentication; tokens are issued by the
//! server's `/api/auth` routes and held by the `SessionStore`.

pub mod auth;
pub mod client;
pub mod error;

pub use client::{ApiClient, Response};
pub use error::ApiError;
pub use reqwest::Method;
