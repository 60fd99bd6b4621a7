//! Cache key composition.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// One component of a resource key.
///
/// Keys are ordered lists of primitive parts; a part may be absent (e.g. a
/// filter that is not applied) and still occupy its position in the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum KeyPart {
    /// A string part.
    Str(String),
    /// An integer part.
    Int(i64),
    /// An absent marker (holds the position, renders as an empty segment).
    Absent,
}

impl KeyPart {
    fn canonical(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(n) => n.to_string(),
            Self::Absent => String::new(),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        Self::Int(value as i64)
    }
}

impl<P: Into<KeyPart>> From<Option<P>> for KeyPart {
    fn from(value: Option<P>) -> Self {
        match value {
            Some(part) => part.into(),
            None => Self::Absent,
        }
    }
}

/// A key identifying one logical remote resource in the cache.
///
/// Two keys are equal iff their canonical serializations are equal; the
/// original parts are retained for debugging.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceKey {
    key: String,
    parts: Vec<KeyPart>,
}

impl ResourceKey {
    /// Compose a key from ordered parts.
    pub fn from_parts(parts: impl IntoIterator<Item = KeyPart>) -> Self {
        let parts: Vec<KeyPart> = parts.into_iter().collect();
        let key = parts
            .iter()
            .map(KeyPart::canonical)
            .collect::<Vec<_>>()
            .join("|");
        Self { key, parts }
    }

    /// Get the canonical key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Get the key parts (for debugging).
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Compose a [`ResourceKey`] from mixed part types.
///
/// # Example
///
/// ```rust,ignore
/// let key = resource_key!["attempts", role, Some(50)];
/// ```
#[macro_export]
macro_rules! resource_key {
    ($($part:expr),+ $(,)?) => {
        $crate::ResourceKey::from_parts([$($crate::KeyPart::from($part)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_parts_make_equal_keys() {
        let a = ResourceKey::from_parts([KeyPart::from("attempts"), KeyPart::from("frontend")]);
        let b = resource_key!["attempts", "frontend"];
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "attempts|frontend");
    }

    #[test]
    fn test_different_order_differs() {
        let a = resource_key!["attempts", "frontend"];
        let b = resource_key!["frontend", "attempts"];
        assert_ne!(a, b);
    }

    #[test]
    fn test_absent_part_holds_position() {
        let none: Option<&str> = None;
        let a = resource_key!["attempts", none, 50];
        assert_eq!(a.as_str(), "attempts||50");
        assert_eq!(a.parts()[1], KeyPart::Absent);
        let b = resource_key!["attempts", Some("frontend"), 50];
        assert_ne!(a, b);
    }

    #[test]
    fn test_int_parts_canonicalize() {
        let key = resource_key!["questions", 7i64];
        assert_eq!(key.as_str(), "questions|7");
    }

    #[test]
    fn test_display_matches_canonical() {
        let key = resource_key!["attempts", "dashboard"];
        assert_eq!(format!("{}", key), key.as_str());
    }
}
