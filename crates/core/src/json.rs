//! JSON paths and path operations
//!
//! This module defines the addressing layer shared by attribute stores and
//! query bags:
//! - JsonPath: Path into a JSON document (e.g., `user.name` or `items[0]`)
//! - PathSegment: Individual path component (Key or Index)
//! - get/set/delete/merge helpers operating on `serde_json::Value`
//!
//! # Document Limits
//!
//! | Limit | Value | Constant |
//! |-------|-------|----------|
//! | Max nesting depth | 100 levels | [`MAX_NESTING_DEPTH`] |
//! | Max path length | 256 segments | [`MAX_PATH_LENGTH`] |
//!
//! Values exceeding these limits are rejected by [`validate_limits`], which
//! is part of the JSON-safety check applied to model attributes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Limits
// =============================================================================

/// Maximum nesting depth in a JSON document (100 levels)
pub const MAX_NESTING_DEPTH: usize = 100;

/// Maximum path length in segments (256 segments)
pub const MAX_PATH_LENGTH: usize = 256;

/// Error type for document limit violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimitError {
    /// Document nesting exceeds maximum depth
    #[error("document nesting depth {depth} exceeds maximum of {max} levels")]
    NestingTooDeep {
        /// Actual nesting depth
        depth: usize,
        /// Maximum allowed depth
        max: usize,
    },

    /// Path exceeds maximum length
    #[error("path length {length} exceeds maximum of {max} segments")]
    PathTooLong {
        /// Actual path length
        length: usize,
        /// Maximum allowed length
        max: usize,
    },
}

/// Calculate the maximum nesting depth of a JSON value
///
/// Returns 0 for primitives (null, bool, number, string),
/// and counts nested objects/arrays.
pub fn nesting_depth(value: &JsonValue) -> usize {
    match value {
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_) => 0,
        JsonValue::Array(arr) => 1 + arr.iter().map(nesting_depth).max().unwrap_or(0),
        JsonValue::Object(obj) => 1 + obj.values().map(nesting_depth).max().unwrap_or(0),
    }
}

/// Validate document limits
pub fn validate_limits(value: &JsonValue) -> Result<(), LimitError> {
    let depth = nesting_depth(value);
    if depth > MAX_NESTING_DEPTH {
        return Err(LimitError::NestingTooDeep {
            depth,
            max: MAX_NESTING_DEPTH,
        });
    }
    Ok(())
}

// =============================================================================
// JsonPath and PathSegment
// =============================================================================

/// Error type for JSON path parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathParseError {
    /// Empty key in path
    #[error("empty key in path at position {0}")]
    EmptyKey(usize),
    /// Unclosed bracket
    #[error("unclosed bracket starting at position {0}")]
    UnclosedBracket(usize),
    /// Invalid array index
    #[error("invalid array index at position {0}: {1}")]
    InvalidIndex(usize, String),
    /// Unexpected character
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
}

/// A segment in a JSON path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object key: `.foo`
    Key(String),
    /// Array index: `[0]`
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, ".{}", k),
            PathSegment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// A path into a JSON document
///
/// # Path Syntax
///
/// | Syntax | Meaning | Example |
/// |--------|---------|---------|
/// | `key` | Object property | `user` |
/// | `[n]` | Array index | `[0]` |
/// | `key1.key2` | Nested property | `user.name` |
/// | `key[n]` | Property then index | `items[0]` |
/// | `.` or (empty) | Root | `.` |
///
/// Parsed keys are limited to alphanumerics, `_` and `-`. Paths built with
/// [`JsonPath::key`] accept any key, which is how query bags address
/// columns such as `author.name`.
///
/// # Examples
///
/// ```
/// use quarry_core::json::JsonPath;
///
/// let user_name = JsonPath::root().key("user").key("name");
/// let path: JsonPath = "user.name".parse().unwrap();
/// assert_eq!(path, user_name);
///
/// let user = JsonPath::root().key("user");
/// assert!(user.is_ancestor_of(&user_name));
/// assert!(user.overlaps(&user_name));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// Create the root path (empty path)
    pub fn root() -> Self {
        JsonPath {
            segments: Vec::new(),
        }
    }

    /// Create a path from a vector of segments
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        JsonPath { segments }
    }

    /// Get the path segments
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Get the number of segments in the path
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if this is the root path (empty)
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Check if this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a key segment (builder pattern)
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    /// Append an index segment (builder pattern)
    pub fn index(mut self, idx: usize) -> Self {
        self.segments.push(PathSegment::Index(idx));
        self
    }

    /// Get the parent path (None if root)
    pub fn parent(&self) -> Option<JsonPath> {
        if self.segments.is_empty() {
            None
        } else {
            let mut parent = self.clone();
            parent.segments.pop();
            Some(parent)
        }
    }

    /// First key segment, if the path starts with one
    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// Path with the first segment removed (root stays root)
    pub fn tail(&self) -> JsonPath {
        JsonPath {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Check if this path is an ancestor of another (or equal)
    ///
    /// The root path is an ancestor of all paths.
    pub fn is_ancestor_of(&self, other: &JsonPath) -> bool {
        if self.segments.len() > other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a == b)
    }

    /// Check if this path is a descendant of another (or equal)
    pub fn is_descendant_of(&self, other: &JsonPath) -> bool {
        other.is_ancestor_of(self)
    }

    /// Check if two paths overlap (one is ancestor/descendant of the other)
    ///
    /// A write at either path touches the value addressed by the other.
    pub fn overlaps(&self, other: &JsonPath) -> bool {
        self.is_ancestor_of(other) || self.is_descendant_of(other)
    }

    /// Validate path length limit
    pub fn validate(&self) -> Result<(), LimitError> {
        let length = self.segments.len();
        if length > MAX_PATH_LENGTH {
            Err(LimitError::PathTooLong {
                length,
                max: MAX_PATH_LENGTH,
            })
        } else {
            Ok(())
        }
    }

    /// Convert to a string representation (`.` for the root)
    pub fn to_path_string(&self) -> String {
        if self.segments.is_empty() {
            return ".".to_string();
        }
        let mut result = String::new();
        for seg in &self.segments {
            match seg {
                PathSegment::Key(k) => {
                    if !result.is_empty() {
                        result.push('.');
                    }
                    result.push_str(k);
                }
                PathSegment::Index(i) => {
                    result.push('[');
                    result.push_str(&i.to_string());
                    result.push(']');
                }
            }
        }
        result
    }
}

impl FromStr for JsonPath {
    type Err = PathParseError;

    /// Parse a path from a string
    ///
    /// Supported syntax:
    /// - `.` or empty - root
    /// - `foo` or `.foo` - object key
    /// - `[0]` - array index
    /// - `foo.bar` - nested keys
    /// - `foo[0].bar` - mixed
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "." {
            return Ok(JsonPath::root());
        }

        let mut segments = Vec::new();
        let chars: Vec<char> = s.chars().collect();
        let mut i = 0;

        // Skip leading dot if present
        if chars[i] == '.' {
            i += 1;
        }

        while i < chars.len() {
            if chars[i] == '.' {
                i += 1;
                if i >= chars.len() || chars[i] == '.' {
                    return Err(PathParseError::EmptyKey(i));
                }
            }

            if chars[i] == '[' {
                let start = i;
                i += 1;
                let idx_start = i;

                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }

                if i >= chars.len() {
                    return Err(PathParseError::UnclosedBracket(start));
                }

                let idx_str: String = chars[idx_start..i].iter().collect();
                let idx = idx_str
                    .parse::<usize>()
                    .map_err(|_| PathParseError::InvalidIndex(idx_start, idx_str))?;

                segments.push(PathSegment::Index(idx));
                i += 1;
            } else if is_key_char(chars[i]) {
                let key_start = i;
                while i < chars.len() && is_key_char(chars[i]) {
                    i += 1;
                }
                let key: String = chars[key_start..i].iter().collect();
                segments.push(PathSegment::Key(key));
            } else {
                return Err(PathParseError::UnexpectedChar(chars[i], i));
            }
        }

        Ok(JsonPath { segments })
    }
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path_string())
    }
}

// =============================================================================
// Path Operations
// =============================================================================

/// Error type for path operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonPathError {
    /// Type mismatch during path traversal
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type
        expected: &'static str,
        /// Actual type found
        found: &'static str,
    },

    /// Array index out of bounds
    #[error("index out of bounds: {index} >= {len}")]
    IndexOutOfBounds {
        /// The requested index
        index: usize,
        /// The array length
        len: usize,
    },
}

/// Get value at path within a JSON document
///
/// Returns `None` if the path doesn't exist or crosses a scalar.
pub fn get_at_path<'a>(value: &'a JsonValue, path: &JsonPath) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path.segments() {
        current = match (segment, current) {
            (PathSegment::Key(key), JsonValue::Object(obj)) => obj.get(key)?,
            (PathSegment::Index(idx), JsonValue::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set value at path within a JSON document
///
/// Creates intermediate objects and arrays as needed. The type of an
/// intermediate container is determined by the next segment in the path.
pub fn set_at_path(
    root: &mut JsonValue,
    path: &JsonPath,
    value: JsonValue,
) -> Result<(), JsonPathError> {
    let segments = path.segments();
    let Some((last_segment, parent_segments)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;

    for (i, segment) in parent_segments.iter().enumerate() {
        let next_segment = &segments[i + 1];
        current = match segment {
            PathSegment::Key(key) => {
                let found = value_type_name(current);
                let obj = current.as_object_mut().ok_or(JsonPathError::TypeMismatch {
                    expected: "object",
                    found,
                })?;
                obj.entry(key.clone()).or_insert_with(|| match next_segment {
                    PathSegment::Key(_) => JsonValue::Object(Map::new()),
                    PathSegment::Index(_) => JsonValue::Array(Vec::new()),
                })
            }
            PathSegment::Index(idx) => {
                let found = value_type_name(current);
                let arr = current.as_array_mut().ok_or(JsonPathError::TypeMismatch {
                    expected: "array",
                    found,
                })?;
                let len = arr.len();
                arr.get_mut(*idx)
                    .ok_or(JsonPathError::IndexOutOfBounds { index: *idx, len })?
            }
        };
    }

    match last_segment {
        PathSegment::Key(key) => {
            let found = value_type_name(current);
            let obj = current.as_object_mut().ok_or(JsonPathError::TypeMismatch {
                expected: "object",
                found,
            })?;
            obj.insert(key.clone(), value);
            Ok(())
        }
        PathSegment::Index(idx) => {
            let found = value_type_name(current);
            let arr = current.as_array_mut().ok_or(JsonPathError::TypeMismatch {
                expected: "array",
                found,
            })?;
            if *idx < arr.len() {
                arr[*idx] = value;
                Ok(())
            } else if *idx == arr.len() {
                arr.push(value);
                Ok(())
            } else {
                Err(JsonPathError::IndexOutOfBounds {
                    index: *idx,
                    len: arr.len(),
                })
            }
        }
    }
}

/// Delete value at path within a JSON document
///
/// Returns the removed value, or `None` if nothing was there. Deleting the
/// root replaces the document with null.
pub fn delete_at_path(
    root: &mut JsonValue,
    path: &JsonPath,
) -> Result<Option<JsonValue>, JsonPathError> {
    let Some(last_segment) = path.segments().last() else {
        return Ok(Some(std::mem::take(root)));
    };

    let mut parent = root;
    for segment in &path.segments()[..path.len() - 1] {
        parent = match (segment, parent) {
            (PathSegment::Key(key), JsonValue::Object(obj)) => match obj.get_mut(key) {
                Some(next) => next,
                None => return Ok(None),
            },
            (PathSegment::Index(idx), JsonValue::Array(arr)) => match arr.get_mut(*idx) {
                Some(next) => next,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
    }

    match (last_segment, parent) {
        (PathSegment::Key(key), JsonValue::Object(obj)) => Ok(obj.remove(key)),
        (PathSegment::Index(idx), JsonValue::Array(arr)) => {
            if *idx < arr.len() {
                Ok(Some(arr.remove(*idx)))
            } else {
                Ok(None)
            }
        }
        (PathSegment::Key(_), other) => Err(JsonPathError::TypeMismatch {
            expected: "object",
            found: value_type_name(other),
        }),
        (PathSegment::Index(_), other) => Err(JsonPathError::TypeMismatch {
            expected: "array",
            found: value_type_name(other),
        }),
    }
}

/// Recursively merge `patch` into `target`
///
/// Objects merge key by key; any other value replaces the target. Unlike
/// RFC 7396, a `null` in the patch is stored rather than deleting the key.
pub fn deep_merge(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (JsonValue::Object(target_obj), JsonValue::Object(patch_obj)) => {
            for (key, value) in patch_obj {
                match target_obj.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        target_obj.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Helper to get type name for error messages
pub fn value_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========================================
    // JsonPath Tests
    // ========================================

    #[test]
    fn test_path_root() {
        let root = JsonPath::root();
        assert!(root.is_root());
        assert!(root.is_empty());
        assert_eq!(root.len(), 0);
    }

    #[test]
    fn test_path_key_builder() {
        let path = JsonPath::root().key("user").key("name");
        assert_eq!(path.len(), 2);
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("user".to_string()),
                PathSegment::Key("name".to_string())
            ]
        );
    }

    #[test]
    fn test_path_parse_dot_is_root() {
        let path: JsonPath = ".".parse().unwrap();
        assert!(path.is_root());
        let path: JsonPath = "".parse().unwrap();
        assert!(path.is_root());
    }

    #[test]
    fn test_path_parse_dotted_keys() {
        let path: JsonPath = "user.name".parse().unwrap();
        assert_eq!(path, JsonPath::root().key("user").key("name"));
    }

    #[test]
    fn test_path_parse_leading_dot() {
        let path: JsonPath = ".filters.author_id".parse().unwrap();
        assert_eq!(path, JsonPath::root().key("filters").key("author_id"));
    }

    #[test]
    fn test_path_parse_complex() {
        let path: JsonPath = "users[0].profile.settings[2].value".parse().unwrap();
        assert_eq!(path.len(), 6);
        assert_eq!(path.segments()[1], PathSegment::Index(0));
    }

    #[test]
    fn test_path_parse_errors() {
        assert_eq!(
            "items[0".parse::<JsonPath>(),
            Err(PathParseError::UnclosedBracket(5))
        );
        assert!(matches!(
            "items[x]".parse::<JsonPath>(),
            Err(PathParseError::InvalidIndex(6, _))
        ));
        assert!(matches!(
            "a..b".parse::<JsonPath>(),
            Err(PathParseError::EmptyKey(_))
        ));
        assert!(matches!(
            "a b".parse::<JsonPath>(),
            Err(PathParseError::UnexpectedChar(' ', 1))
        ));
    }

    #[test]
    fn test_path_display_round_trip() {
        let path: JsonPath = "items[0].name".parse().unwrap();
        assert_eq!(path.to_string(), "items[0].name");
        assert_eq!(JsonPath::root().to_string(), ".");
    }

    #[test]
    fn test_path_parent_and_tail() {
        let path: JsonPath = "a.b.c".parse().unwrap();
        assert_eq!(path.parent().unwrap().to_string(), "a.b");
        assert_eq!(path.tail().to_string(), "b.c");
        assert_eq!(path.first_key(), Some("a"));
        assert!(JsonPath::root().parent().is_none());
    }

    #[test]
    fn test_path_overlaps() {
        let filters: JsonPath = "filters".parse().unwrap();
        let author: JsonPath = "filters.author_id".parse().unwrap();
        let author_eq: JsonPath = "filters.author_id.eq".parse().unwrap();
        let title: JsonPath = "filters.title".parse().unwrap();

        assert!(filters.overlaps(&author));
        assert!(author.overlaps(&filters));
        assert!(author.overlaps(&author_eq));
        assert!(author.overlaps(&author));
        assert!(!author.overlaps(&title));
        assert!(JsonPath::root().overlaps(&title));
    }

    #[test]
    fn test_path_validate_long_path() {
        let mut path = JsonPath::root();
        for i in 0..=MAX_PATH_LENGTH {
            path = path.key(format!("k{}", i));
        }
        assert!(matches!(
            path.validate(),
            Err(LimitError::PathTooLong { .. })
        ));
    }

    // ========================================
    // Path Operation Tests
    // ========================================

    #[test]
    fn test_get_at_path() {
        let doc = json!({"user": {"name": "Alice", "scores": [100, 95]}});
        let path: JsonPath = "user.scores[1]".parse().unwrap();
        assert_eq!(get_at_path(&doc, &path), Some(&json!(95)));
        assert_eq!(get_at_path(&doc, &JsonPath::root()), Some(&doc));
        assert!(get_at_path(&doc, &"user.name.first".parse().unwrap()).is_none());
    }

    #[test]
    fn test_set_at_path_creates_intermediate() {
        let mut doc = json!({});
        let path: JsonPath = "user.profile.name".parse().unwrap();
        set_at_path(&mut doc, &path, json!("Alice")).unwrap();
        assert_eq!(doc, json!({"user": {"profile": {"name": "Alice"}}}));
    }

    #[test]
    fn test_set_at_path_array_append_and_bounds() {
        let mut doc = json!({"items": [1]});
        set_at_path(&mut doc, &"items[1]".parse().unwrap(), json!(2)).unwrap();
        assert_eq!(doc, json!({"items": [1, 2]}));

        let err = set_at_path(&mut doc, &"items[5]".parse().unwrap(), json!(3)).unwrap_err();
        assert_eq!(err, JsonPathError::IndexOutOfBounds { index: 5, len: 2 });
    }

    #[test]
    fn test_set_at_path_type_mismatch() {
        let mut doc = json!({"name": "Alice"});
        let err = set_at_path(&mut doc, &"name.first".parse().unwrap(), json!("A")).unwrap_err();
        assert_eq!(
            err,
            JsonPathError::TypeMismatch {
                expected: "object",
                found: "string"
            }
        );
    }

    #[test]
    fn test_delete_at_path() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        let removed = delete_at_path(&mut doc, &"a.b".parse().unwrap()).unwrap();
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(doc, json!({"a": {"c": 2}}));

        let missing = delete_at_path(&mut doc, &"x.y".parse().unwrap()).unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_delete_at_path_root() {
        let mut doc = json!({"a": 1});
        let removed = delete_at_path(&mut doc, &JsonPath::root()).unwrap();
        assert_eq!(removed, Some(json!({"a": 1})));
        assert!(doc.is_null());
    }

    #[test]
    fn test_deep_merge_keeps_siblings_and_nulls() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "d": 3});
        deep_merge(&mut doc, &json!({"a": {"b": 10}, "d": null}));
        assert_eq!(doc, json!({"a": {"b": 10, "c": 2}, "d": null}));
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut doc = json!(1);
        for _ in 0..=MAX_NESTING_DEPTH {
            doc = json!([doc]);
        }
        assert!(matches!(
            validate_limits(&doc),
            Err(LimitError::NestingTooDeep { .. })
        ));
        assert!(validate_limits(&json!({"a": [1, 2]})).is_ok());
    }
}
