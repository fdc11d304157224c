//! Authentication module for managing the client-side session.
//!
//! This module provides:
//! - `SessionStore`: the in-memory credential/identity pair, mirrored to a
//!   durable store and exposing a derived authentication signal
//! - `DurableStore`: best-effort key-value persistence (file, keychain, memory)
//!
//! The durable store is read once at startup; after that the in-memory
//! session is authoritative.

pub mod session;
pub mod store;

pub use session::{Credential, Identity, Session, SessionStore};
pub use store::{DurableStore, FileStore, KeyringStore, MemoryStore, TOKEN_KEY, USER_KEY};
