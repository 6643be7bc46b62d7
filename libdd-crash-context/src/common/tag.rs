// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// A `key:value` tag attached to every crash report.
///
/// Backend tag rules are deliberately not enforced in full here: if the
/// tracer and the crash reporter disagree on what a valid tag is, the user
/// experience degrades, so most values are passed through and handled
/// server-side.  Only the colon placement rules are checked, since those are
/// almost certainly caller errors (such as an empty key or value).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag {
    value: String,
}

impl Tag {
    /// Builds a `key:value` tag.  The key must be non-empty; an empty value
    /// produces a bare `key` tag, which the backend accepts.
    pub fn new(key: impl AsRef<str>, value: impl AsRef<str>) -> anyhow::Result<Self> {
        let key = key.as_ref();
        let value = value.as_ref();
        anyhow::ensure!(!key.is_empty(), "tag key is empty");
        if value.is_empty() {
            Self::from_value(key)
        } else {
            Self::from_value(format!("{key}:{value}"))
        }
    }

    /// Validates a complete `key:value` (or bare `value`) chunk.
    pub fn from_value(chunk: impl Into<String>) -> anyhow::Result<Self> {
        let chunk = chunk.into();

        anyhow::ensure!(!chunk.is_empty(), "tag is empty");

        let mut chars = chunk.chars();
        anyhow::ensure!(
            chars.next() != Some(':'),
            "tag '{chunk}' begins with a colon"
        );
        anyhow::ensure!(chars.last() != Some(':'), "tag '{chunk}' ends with a colon");

        Ok(Tag { value: chunk })
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tag").field("value", &self.value).finish()
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_new() {
        let tag = Tag::new("service", "web-backend").unwrap();
        assert_eq!(tag.to_string(), "service:web-backend");

        // Bare tags are allowed.
        let tag = Tag::new("standalone", "").unwrap();
        assert_eq!(tag.to_string(), "standalone");

        assert!(Tag::new("", "value").is_err());
    }

    #[test]
    fn test_tag_colon_rules() {
        assert!(Tag::from_value("key:value").is_ok());
        assert!(Tag::from_value("key:value:with:colons").is_ok());
        assert!(Tag::from_value(":leading").is_err());
        assert!(Tag::from_value("trailing:").is_err());
        assert!(Tag::from_value("").is_err());
    }

    #[test]
    fn test_tag_serializes_as_string() {
        let tag = Tag::new("language", "rust").unwrap();
        assert_eq!(serde_json::to_string(&tag).unwrap(), "\"language:rust\"");
    }
}
