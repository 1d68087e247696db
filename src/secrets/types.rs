//! Redacting holder for passwords, API keys, tokens and private keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string whose contents never reach logs, `Debug` output or serialized
/// responses by accident.
///
/// - `Debug` prints `SecretString([REDACTED])`, `Display` prints `[REDACTED]`
/// - `Serialize` writes `"[REDACTED]"`; persisted records opt into the real
///   value through [`crate::secrets::exposed`]
/// - the buffer is zeroed on drop
///
/// Reading the value requires an explicit [`SecretString::expose_secret`].
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the underlying value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Trimmed-empty check used when validating tokens returned by authorities.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// `#[serde(with = "...")]` helpers that write the real value of a
/// [`SecretString`]. Only records written to the backing store use these.
pub mod exposed {
    use super::SecretString;
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        secret.expose_secret().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde::Deserialize::deserialize(deserializer)
    }

    pub mod option {
        use super::SecretString;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            secret.as_ref().map(SecretString::expose_secret).serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::new))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_secret_string_redacts_debug_and_display() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_default_serialization_redacts() {
        let json = serde_json::to_string(&SecretString::new("api-key-123")).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn test_exposed_serialization_keeps_value() {
        #[derive(Serialize, Deserialize)]
        struct Record {
            #[serde(with = "exposed")]
            password: SecretString,
            #[serde(with = "exposed::option", default)]
            api_key: Option<SecretString>,
        }

        let record =
            Record { password: SecretString::new("p@ss"), api_key: Some("key-1".into()) };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("p@ss"));
        assert!(json.contains("key-1"));

        let back: Record = serde_json::from_str(r#"{"password":"p@ss"}"#).unwrap();
        assert_eq!(back.password.expose_secret(), "p@ss");
        assert!(back.api_key.is_none());
    }

    #[test]
    fn test_blank_detection() {
        assert!(SecretString::new("   ").is_blank());
        assert!(!SecretString::new("   ").is_empty());
        assert!(!SecretString::new("token").is_blank());
    }
}
