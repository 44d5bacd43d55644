//! Action type matching.
//!
//! A [`TypeMatcher`] decides whether a logic unit reacts to an action:
//!
//! ```text
//! "FOO"            → exact string
//! "*"              → any type
//! /^user\//        → regular expression
//! ["FOO", /BAR$/]  → any of the members
//! ```

use crate::{ActionCreator, TypesError};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// Wildcard type string.
pub const WILDCARD: &str = "*";

/// Matches action types.
#[derive(Debug, Clone)]
pub enum TypeMatcher {
    /// Matches every type.
    Any,
    /// Matches exactly the given type.
    Exact(String),
    /// Matches types accepted by the regular expression.
    Pattern(Regex),
    /// Matches if any member matches.
    OneOf(Vec<TypeMatcher>),
}

impl TypeMatcher {
    /// Creates an exact (or wildcard, for `"*"`) matcher.
    #[must_use]
    pub fn exact(action_type: impl Into<String>) -> Self {
        let action_type = action_type.into();
        if action_type == WILDCARD {
            Self::Any
        } else {
            Self::Exact(action_type)
        }
    }

    /// Compiles a regular expression matcher.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidPattern`] if `pattern` does not compile.
    pub fn pattern(pattern: &str) -> Result<Self, TypesError> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| TypesError::InvalidPattern(e.to_string()))
    }

    /// Creates a matcher accepting any of `members`.
    #[must_use]
    pub fn one_of<I, T>(members: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeMatcher>,
    {
        Self::OneOf(members.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if `action_type` is accepted.
    #[must_use]
    pub fn matches(&self, action_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(s) => s == action_type,
            Self::Pattern(re) => re.is_match(action_type),
            Self::OneOf(members) => members.iter().any(|m| m.matches(action_type)),
        }
    }

    /// Normalizes nested lists element-wise and collapses single-member lists.
    #[must_use]
    pub fn normalize(self) -> Self {
        match self {
            Self::OneOf(members) => {
                let mut members: Vec<_> = members.into_iter().map(Self::normalize).collect();
                if members.len() == 1 {
                    members.remove(0)
                } else {
                    Self::OneOf(members)
                }
            }
            Self::Exact(s) => Self::exact(s),
            other => other,
        }
    }

    /// Returns `true` if this matcher, or any member, is the exact string `value`.
    #[must_use]
    pub fn contains_exact(&self, value: &str) -> bool {
        match self {
            Self::Exact(s) => s == value,
            Self::OneOf(members) => members.iter().any(|m| m.contains_exact(value)),
            Self::Any | Self::Pattern(_) => false,
        }
    }

    /// Returns `true` for an empty member list, which can never match.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::OneOf(members) if members.is_empty())
    }
}

impl PartialEq for TypeMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, Self::Any) => true,
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            (Self::OneOf(a), Self::OneOf(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Exact(s) => f.write_str(s),
            Self::Pattern(re) => write!(f, "/{}/", re.as_str()),
            Self::OneOf(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for TypeMatcher {
    fn from(s: &str) -> Self {
        Self::exact(s)
    }
}

impl From<String> for TypeMatcher {
    fn from(s: String) -> Self {
        Self::exact(s)
    }
}

impl From<&ActionCreator> for TypeMatcher {
    fn from(creator: &ActionCreator) -> Self {
        Self::exact(creator.to_string())
    }
}

impl From<ActionCreator> for TypeMatcher {
    fn from(creator: ActionCreator) -> Self {
        Self::from(&creator)
    }
}

impl From<Regex> for TypeMatcher {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

impl<T: Into<TypeMatcher>> From<Vec<T>> for TypeMatcher {
    fn from(members: Vec<T>) -> Self {
        Self::one_of(members)
    }
}

impl<'de> Deserialize<'de> for TypeMatcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => Self::exact(s),
            Raw::Many(v) => Self::one_of(v),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_matches_only_itself() {
        let m = TypeMatcher::exact("FOO");
        assert!(m.matches("FOO"));
        assert!(!m.matches("FOO_BAR"));
    }

    #[test]
    fn wildcard_string_becomes_any() {
        assert_eq!(TypeMatcher::from("*"), TypeMatcher::Any);
        assert!(TypeMatcher::Any.matches("ANYTHING"));
    }

    #[test]
    fn pattern_matches() {
        let m = TypeMatcher::pattern("^user/").expect("valid regex");
        assert!(m.matches("user/fetch"));
        assert!(!m.matches("admin/fetch"));
    }

    #[test]
    fn invalid_pattern_is_error() {
        let err = TypeMatcher::pattern("(").unwrap_err();
        assert!(matches!(err, TypesError::InvalidPattern(_)));
    }

    #[test]
    fn one_of_is_or_combined() {
        let m = TypeMatcher::one_of(vec![
            TypeMatcher::exact("FOO"),
            TypeMatcher::pattern("_DONE$").expect("valid regex"),
        ]);
        assert!(m.matches("FOO"));
        assert!(m.matches("FETCH_DONE"));
        assert!(!m.matches("BAR"));
    }

    #[test]
    fn wildcard_inside_list_matches_everything() {
        let m = TypeMatcher::from(vec!["FOO", "*"]);
        assert!(m.matches("BAR"));
    }

    #[test]
    fn normalize_collapses_single_member() {
        let m = TypeMatcher::OneOf(vec![TypeMatcher::Exact("*".into())]).normalize();
        assert_eq!(m, TypeMatcher::Any);
    }

    #[test]
    fn creator_projects_to_exact() {
        let creator = ActionCreator::new("FETCH");
        assert_eq!(TypeMatcher::from(&creator), TypeMatcher::exact("FETCH"));
    }

    #[test]
    fn display_projection() {
        let m = TypeMatcher::one_of(vec![
            TypeMatcher::exact("FOO"),
            TypeMatcher::pattern("^BAR").expect("valid regex"),
            TypeMatcher::Any,
        ]);
        assert_eq!(m.to_string(), "FOO,/^BAR/,*");
    }

    #[test]
    fn contains_exact_searches_members() {
        let m = TypeMatcher::from(vec!["FOO", "undefined"]);
        assert!(m.contains_exact("undefined"));
        assert!(!TypeMatcher::Any.contains_exact("undefined"));
    }

    #[test]
    fn deserialize_string_and_list() {
        let one: TypeMatcher = serde_json::from_value(json!("FOO")).expect("string");
        assert_eq!(one, TypeMatcher::exact("FOO"));

        let many: TypeMatcher = serde_json::from_value(json!(["FOO", "BAR"])).expect("list");
        assert!(many.matches("BAR"));
    }

    #[test]
    fn empty_list_never_matches() {
        let m = TypeMatcher::OneOf(Vec::new());
        assert!(m.is_empty());
        assert!(!m.matches("FOO"));
    }
}
