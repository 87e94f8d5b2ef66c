//! Secret values and object flags.

use sesame_core::SecretBytes;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Content type used when none is given.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// A secret payload together with its content type.
///
/// Cloning is cheap; clones share the same zeroizing buffer, which is wiped
/// when the last clone is dropped. Debug output never shows the bytes.
#[derive(Clone)]
pub struct SecretValue {
    inner: Arc<Inner>,
}

struct Inner {
    data: SecretBytes,
    content_type: String,
}

impl SecretValue {
    /// Create a value from raw bytes.
    pub fn new(data: impl Into<SecretBytes>, content_type: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: data.into(),
                content_type: content_type.into(),
            }),
        }
    }

    /// Create a `text/plain` value from a password string.
    pub fn text(password: &str) -> Self {
        Self::new(password, DEFAULT_CONTENT_TYPE)
    }

    /// The raw secret bytes.
    pub fn get(&self) -> &[u8] {
        self.inner.data.expose_secret()
    }

    /// The secret as text, if it is valid UTF-8.
    pub fn get_text(&self) -> Option<&str> {
        std::str::from_utf8(self.get()).ok()
    }

    pub fn content_type(&self) -> &str {
        &self.inner.content_type
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("data", &self.inner.data)
            .field("content_type", &self.inner.content_type)
            .finish()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.data == other.inner.data && self.inner.content_type == other.inner.content_type
    }
}

impl Eq for SecretValue {}

/// Which parts of a service connection to establish or report as ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ServiceFlags(u8);

impl ServiceFlags {
    pub const NONE: Self = Self(0);
    /// A transfer session is negotiated.
    pub const OPEN_SESSION: Self = Self(1 << 1);
    /// Collection proxies are loaded.
    pub const LOAD_COLLECTIONS: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ServiceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
