//! Permission scope attached to an API key

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What a key is allowed to do
///
/// `All` is the master-key scope. A `Subset` holds opaque permission
/// strings (e.g. `contacts:read`); an empty subset grants nothing.
///
/// Serializes as `null` for `All` and as a JSON array otherwise, which is
/// also how it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PermissionScope {
    #[default]
    All,
    Subset(BTreeSet<String>),
}

impl PermissionScope {
    /// Build a subset scope from any list of permission strings
    pub fn subset<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Subset(permissions.into_iter().map(Into::into).collect())
    }

    /// A scope granting nothing
    pub fn none() -> Self {
        Self::Subset(BTreeSet::new())
    }

    /// Map the optional list given at issue time: absent means master key
    pub fn from_optional<I, S>(permissions: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match permissions {
            Some(list) => Self::subset(list),
            None => Self::All,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Check whether the scope grants `permission`
    pub fn allows(&self, permission: &str) -> bool {
        match self {
            Self::All => true,
            Self::Subset(set) => set.contains(permission),
        }
    }

    /// Permission strings for a subset scope, `None` for the master scope
    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            Self::All => None,
            Self::Subset(set) => Some(set.iter().cloned().collect()),
        }
    }
}

impl Serialize for PermissionScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_none(),
            Self::Subset(set) => serializer.collect_seq(set),
        }
    }
}

impl<'de> Deserialize<'de> for PermissionScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let list = Option::<Vec<String>>::deserialize(deserializer)?;
        Ok(Self::from_optional(list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_scope_allows_everything() {
        let scope = PermissionScope::All;

        assert!(scope.is_master());
        assert!(scope.allows("contacts:read"));
        assert!(scope.allows("anything"));
    }

    #[test]
    fn test_subset_scope() {
        let scope = PermissionScope::subset(["contacts:read", "deals:write"]);

        assert!(!scope.is_master());
        assert!(scope.allows("contacts:read"));
        assert!(scope.allows("deals:write"));
        assert!(!scope.allows("contacts:write"));
    }

    #[test]
    fn test_empty_subset_grants_nothing() {
        let scope = PermissionScope::none();

        assert!(!scope.is_master());
        assert!(!scope.allows("contacts:read"));
    }

    #[test]
    fn test_from_optional() {
        assert!(PermissionScope::from_optional(None::<Vec<String>>).is_master());
        assert_eq!(
            PermissionScope::from_optional(Some(Vec::<String>::new())),
            PermissionScope::none()
        );
    }

    #[test]
    fn test_serde_representation() {
        assert_eq!(serde_json::to_string(&PermissionScope::All).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&PermissionScope::subset(["b", "a"])).unwrap(),
            r#"["a","b"]"#
        );

        let all: PermissionScope = serde_json::from_str("null").unwrap();
        assert!(all.is_master());

        let empty: PermissionScope = serde_json::from_str("[]").unwrap();
        assert_eq!(empty, PermissionScope::none());
    }
}
