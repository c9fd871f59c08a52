//! Ordered name/value attributes.
//!
//! Every configuration entity carries an [`AttributeBag`] for settings that
//! have no dedicated field (IP access lists, referer patterns, rate limits).
//! The bag keeps insertion order until [`AttributeBag::tidy`] normalizes it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AttributeError, AttributeResult};

/// A single name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: String,
}

impl Attribute {
    /// Creates a new attribute.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered collection of attributes.
///
/// Names are unique after [`tidy`](Self::tidy); before that, duplicates may
/// exist and lookups return the first match.
///
/// Serializes as a JSON array of `{"name": .., "value": ..}` objects.
///
/// # Example
///
/// ```
/// use turnstile_core::AttributeBag;
///
/// let mut bag = AttributeBag::new();
/// bag.set("qps", "10");
/// bag.set(" Referers ", " *.example.com ");
/// bag.tidy();
///
/// assert_eq!(bag.get("Referers").unwrap(), "*.example.com");
/// assert_eq!(bag.get_parsed::<u32>("qps", 0), 10);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeBag(Vec<Attribute>);

impl AttributeBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attributes, duplicates included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the bag holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates attributes in stored order.
    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.0.iter()
    }

    /// Returns the value of the first attribute named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::NotFound`] if no attribute has that name.
    pub fn get(&self, name: &str) -> AttributeResult<&str> {
        self.0
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
            .ok_or_else(|| AttributeError::not_found(name))
    }

    /// Returns the value of `name`, or `default` when absent.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Parses the value of `name`, falling back to `default` when the
    /// attribute is absent or does not parse.
    pub fn get_parsed<T: FromStr>(&self, name: &str, default: T) -> T {
        self.get(name)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Returns `true` if an attribute named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|a| a.name == name)
    }

    /// Sets `name` to `value`, overwriting the first existing attribute with
    /// that name or appending a new one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(Attribute { name, value }),
        }
    }

    /// Applies [`set`](Self::set) for every attribute of `other`, in order.
    pub fn set_multiple(&mut self, other: &AttributeBag) {
        for attribute in other.iter() {
            self.set(attribute.name.clone(), attribute.value.clone());
        }
    }

    /// Removes the first attribute named `name`, returning its old value.
    pub fn delete(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|a| a.name == name)?;
        Some(self.0.remove(index).value)
    }

    /// Normalizes the bag in place.
    ///
    /// Trims whitespace on names and values, drops later duplicates of a
    /// name (first seen wins), then sorts by name. Idempotent.
    pub fn tidy(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let mut tidied = Vec::with_capacity(self.0.len());

        for attribute in self.0.drain(..) {
            let name = attribute.name.trim().to_string();
            if seen.insert(name.clone()) {
                tidied.push(Attribute {
                    name,
                    value: attribute.value.trim().to_string(),
                });
            }
        }

        // Stable, so equal names (impossible after dedup) keep their order.
        tidied.sort_by(|a, b| a.name.cmp(&b.name));
        self.0 = tidied;
    }
}

impl FromIterator<Attribute> for AttributeBag {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for AttributeBag {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        iter.into_iter().map(|(n, v)| Attribute::new(n, v)).collect()
    }
}

impl<'a> IntoIterator for &'a AttributeBag {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bag(pairs: &[(&str, &str)]) -> AttributeBag {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_get_present_and_absent() {
        let b = bag(&[("a", "1"), ("b", "2")]);
        assert_eq!(b.get("b").unwrap(), "2");
        assert_eq!(b.get("c"), Err(AttributeError::not_found("c")));
    }

    #[test]
    fn test_get_returns_first_duplicate() {
        let b = bag(&[("a", "1"), ("a", "2")]);
        assert_eq!(b.get("a").unwrap(), "1");
    }

    #[test]
    fn test_get_or_and_parsed() {
        let b = bag(&[("qps", " 25 "), ("junk", "abc")]);
        assert_eq!(b.get_or("missing", "x"), "x");
        assert_eq!(b.get_parsed::<u32>("qps", 0), 25);
        assert_eq!(b.get_parsed::<u32>("junk", 7), 7);
        assert_eq!(b.get_parsed::<u32>("missing", 3), 3);
    }

    #[test]
    fn test_set_overwrites_or_appends() {
        let mut b = bag(&[("a", "1")]);
        b.set("a", "9");
        b.set("z", "0");
        assert_eq!(b, bag(&[("a", "9"), ("z", "0")]));
    }

    #[test]
    fn test_set_multiple() {
        let mut b = bag(&[("a", "1"), ("b", "2")]);
        b.set_multiple(&bag(&[("b", "3"), ("c", "4")]));
        assert_eq!(b, bag(&[("a", "1"), ("b", "3"), ("c", "4")]));
    }

    #[test]
    fn test_delete() {
        let mut b = bag(&[("a", "1"), ("b", "2")]);
        assert_eq!(b.delete("a"), Some("1".to_string()));
        assert_eq!(b.delete("a"), None);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_tidy_trims_dedupes_and_sorts() {
        let mut b = bag(&[(" b ", " 2 "), ("a", "1"), ("b", "3"), ("a ", "4")]);
        b.tidy();
        assert_eq!(b, bag(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn test_json_shape() {
        let b = bag(&[("IPAccessList", "10.0.0.0/8")]);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, r#"[{"name":"IPAccessList","value":"10.0.0.0/8"}]"#);

        let back: AttributeBag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    fn arb_bag() -> impl Strategy<Value = AttributeBag> {
        prop::collection::vec(("[ a-c]{0,3}", "[ x-z0-9]{0,3}"), 0..12)
            .prop_map(|pairs| pairs.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_tidy_is_idempotent(b in arb_bag()) {
            let mut once = b.clone();
            once.tidy();
            let mut twice = once.clone();
            twice.tidy();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_tidy_leaves_unique_names(b in arb_bag()) {
            let mut tidied = b;
            tidied.tidy();
            let mut names: Vec<_> = tidied.iter().map(|a| a.name.clone()).collect();
            let before = names.len();
            names.dedup();
            prop_assert_eq!(before, names.len());
        }
    }
}
