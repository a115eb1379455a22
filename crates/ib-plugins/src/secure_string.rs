//! Credential wrapper that is redacted in logs and zeroized on drop.
//!
//! Every API key, token and password in a plugin configuration is held in a
//! [`SecureString`], so formatting a config with `{:?}` never leaks a secret.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// A credential string.
///
/// ```
/// use ib_plugins::SecureString;
///
/// let key = SecureString::from("misp-auth-key-1234");
/// assert_eq!(key.expose_secret(), "misp-auth-key-1234");
/// assert_eq!(format!("{key}"), "[REDACTED]");
/// assert_eq!(key.masked(), "mis***234");
/// ```
#[derive(Clone, Default)]
pub struct SecureString(Zeroizing<String>);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(Zeroizing::new(s))
    }

    /// Returns the secret. Copies of the returned value are not zeroized.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns the secret with surrounding whitespace removed.
    pub fn trimmed(&self) -> SecureString {
        SecureString::new(self.0.trim().to_string())
    }

    /// Partially masked form for display: first and last three characters.
    pub fn masked(&self) -> String {
        crate::redact::mask_value(&self.0)
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecureString {}

impl Serialize for SecureString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecureString::new)
    }
}
