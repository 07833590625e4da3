use crate::error::ResolveError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Well-known directive names.
pub const VIEW_MODEL_DIRECTIVE: &str = "viewModel";
pub const MASTER_PAGE_DIRECTIVE: &str = "masterPage";
pub const BASE_TYPE_DIRECTIVE: &str = "baseType";

/// Ordered directive map with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    entries: Vec<(String, String)>,
}

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key`, rejecting a key that differs from an existing one only by case.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResolveError> {
        let key = key.into();
        if let Some((previous, _)) = self.entry(&key) {
            return Err(ResolveError::DuplicateDirective {
                key,
                previous: previous.clone(),
            });
        }
        self.entries.push((key, value.into()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entry(key).map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in declaration order, with keys as written.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn entry(&self, key: &str) -> Option<&(String, String)> {
        self.entries.iter().find(|(k, _)| same_key(k, key))
    }
}

/// Case-insensitive comparison using full Unicode lowercasing.
fn same_key(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

impl Serialize for Directives {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn differing_case_is_a_duplicate() {
        let mut directives = Directives::new();
        directives.insert("Foo", "a").unwrap();
        let err = directives.insert("foo", "b").unwrap_err();
        assert_eq!(
            err,
            ResolveError::DuplicateDirective {
                key: "foo".into(),
                previous: "Foo".into()
            }
        );
        assert_eq!(directives.get("FOO"), Some("a"));
        assert_eq!(directives.len(), 1);
    }

    #[test]
    fn non_ascii_keys_compare_case_insensitively() {
        let mut directives = Directives::new();
        directives.insert("Ärger", "a").unwrap();
        assert!(directives.insert("äRGER", "b").is_err());
        assert_eq!(directives.get("ÄRGER"), Some("a"));
        directives.insert("Σίσυφος", "c").unwrap();
        assert!(directives.contains_key("σίσυφος"));
        assert!(!directives.contains_key("Arger"));
    }

    #[test]
    fn keeps_declaration_order() {
        let mut directives = Directives::new();
        directives.insert("viewModel", "App.Page").unwrap();
        directives.insert("masterPage", "site.dotmaster").unwrap();
        let keys: Vec<&str> = directives.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["viewModel", "masterPage"]);
        assert_eq!(
            serde_json::to_string(&directives).unwrap(),
            r#"{"viewModel":"App.Page","masterPage":"site.dotmaster"}"#
        );
    }

    proptest! {
        #[test]
        fn uniqueness_ignores_case(key in "[A-Za-zÀ-ÖØ-Þà-öø-þ]{1,12}", flips in proptest::collection::vec(any::<bool>(), 12)) {
            let variant: String = key
                .chars()
                .zip(flips.iter().cycle())
                .flat_map(|(c, flip)| {
                    if *flip {
                        c.to_uppercase().collect::<Vec<_>>()
                    } else {
                        c.to_lowercase().collect::<Vec<_>>()
                    }
                })
                .collect();
            let mut directives = Directives::new();
            directives.insert(key.clone(), "1").unwrap();
            prop_assert!(directives.insert(variant, "2").is_err());
            prop_assert_eq!(directives.len(), 1);
        }
    }
}
