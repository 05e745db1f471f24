//! Room identifiers

use serde::{Deserialize, Serialize};

/// Opaque room token (session token or invitation-derived id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room id without validation
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a room id, returning `None` for an empty or blank token
    pub fn parse(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == id.len() {
            Some(Self(id))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(RoomId::parse("R1"), Some(RoomId::new("R1")));
        assert_eq!(RoomId::parse("  R1 "), Some(RoomId::new("R1")));
        assert_eq!(RoomId::parse(""), None);
        assert_eq!(RoomId::parse("   "), None);
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&RoomId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
