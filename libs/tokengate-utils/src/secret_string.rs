use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque wrapper around a credential such as an access or refresh token.
///
/// `Debug` and `Display` both print `[REDACTED]`, so a token never reaches a
/// log line by accident. Use [`expose`](Self::expose) when building a header
/// or a request body.
///
/// The backing buffer is zeroed on [`Drop`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a plain value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read-only access to the underlying value.
    ///
    /// Callers must not log or persist the returned slice outside of the
    /// token store.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `true` when the wrapped value is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

// Constant-time comparison is not needed here: the values are compared only
// to detect that a stored token was replaced.
impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
