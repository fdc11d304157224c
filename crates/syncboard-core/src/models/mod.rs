//! Record shapes exchanged with the SyncBoard server.

pub mod user;

pub use user::{LoginRequest, RegisterRequest, TokenResponse, UserProfile};
