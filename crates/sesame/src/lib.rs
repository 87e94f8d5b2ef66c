//! Secret Service client for Sesame.
//!
//! Stores and retrieves secrets through an out-of-process secret-storage
//! service. Secrets travel over a negotiated transfer session, encrypted with
//! a Diffie-Hellman derived AES key when the service supports it. Operations
//! that need the user's consent complete through the prompt protocol. The
//! [`password`] module stores and looks up plain passwords by attributes.
//!
//! Every operation is asynchronous and has a `_sync` variant that blocks on
//! a private runtime.

pub mod collection;
pub mod crypto;
pub mod error;
pub mod interfaces;
pub mod item;
pub mod password;
pub mod prompt;
pub mod properties;
pub mod registry;
pub mod service;
pub mod session;
pub mod sync;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use collection::Collection;
pub use error::{Result, SecretError};
pub use item::Item;
pub use password::{AttributeType, Schema, SchemaFlags};
pub use prompt::{DefaultPromptHandler, Prompt, PromptHandler, PromptOutcome};
pub use properties::{ObjectProxy, PropertyChange};
pub use service::Service;
pub use session::{Algorithm, Session};
pub use types::{SecretValue, ServiceFlags, DEFAULT_CONTENT_TYPE};
