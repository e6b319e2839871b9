//! Stable identifiers used across the plug-in framework.

use core::fmt;
use std::sync::Arc;

/// Unique identifier of a plug-in, as declared in its descriptor.
///
/// Unlike an identifier known at compile time, a plug-in id is read from a
/// descriptor discovered at runtime, so it owns its string data. It is
/// reference-counted internally (`Arc<str>`) so cloning an id — which
/// happens constantly while walking dependency graphs — is cheap.
#[derive(Clone, Eq)]
pub struct PluginId(Arc<str>);

impl PluginId {
    /// Creates a `PluginId` from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for PluginId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl core::hash::Hash for PluginId {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<&str> for PluginId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PluginId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Global identifier of an extension point.
///
/// Unique across an [`crate::context::Environment`] — two declared extension
/// points can never share one.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExtPointId(Arc<str>);

impl ExtPointId {
    /// Creates an `ExtPointId` from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExtPointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ExtPointId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;

    #[test]
    fn plugin_id_equality_and_hashing() {
        let a = PluginId::new("example.plugin");
        let b = PluginId::new("example.plugin".to_string());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
    }

    #[test]
    fn plugin_id_display() {
        let id = PluginId::new("example.plugin");
        assert_eq!(id.to_string(), "example.plugin");
    }
}
