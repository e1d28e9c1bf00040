//! Named route resolution
//!
//! Routes are declared as `name -> { uri, methods }` where `uri` may contain
//! `{param}` (required) and `{param?}` (optional) placeholders:
//!
//! ```
//! use quarry_http::{Method, Route, RouteTable};
//! use std::collections::BTreeMap;
//!
//! let mut routes = RouteTable::new("https://api.test");
//! routes.insert("api.posts.show", Route::new("posts/{post}", [Method::Get]));
//!
//! let params = BTreeMap::from([("post".to_string(), "7".to_string())]);
//! assert_eq!(routes.url("api.posts.show", &params).unwrap(), "https://api.test/posts/7");
//! ```

use crate::client::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Route lookup and substitution failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No route registered under this name
    #[error("route '{0}' is not defined")]
    RouteNotFound(String),

    /// Placeholders left without a value
    #[error("route '{route}' is missing required parameters: {}", .missing.join(", "))]
    MissingParameters {
        /// Route name
        route: String,
        /// Placeholders without a value
        missing: Vec<String>,
    },

    /// Values given for placeholders the uri does not have
    #[error("route '{route}' does not accept parameters: {}", .extra.join(", "))]
    UnexpectedParameters {
        /// Route name
        route: String,
        /// Parameters with no placeholder
        extra: Vec<String>,
    },

    /// Unbalanced braces or an empty placeholder
    #[error("route '{route}' has a malformed uri: {uri}")]
    MalformedUri {
        /// Route name
        route: String,
        /// Template as declared
        uri: String,
    },
}

/// One declared route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Path template, e.g. `api/posts/{post}`
    pub uri: String,
    /// Accepted verbs, `GET` and `HEAD` when omitted
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
}

fn default_methods() -> Vec<Method> {
    vec![Method::Get, Method::Head]
}

#[derive(Debug, PartialEq, Eq)]
enum Part<'a> {
    Literal(&'a str),
    Param { name: &'a str, optional: bool },
}

impl Route {
    /// Route at `uri` accepting `methods`
    pub fn new(uri: impl Into<String>, methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            uri: uri.into(),
            methods: methods.into_iter().collect(),
        }
    }

    /// The verb used to call this route: the first declared verb that is not HEAD
    pub fn method(&self) -> Method {
        self.methods
            .iter()
            .copied()
            .find(|m| *m != Method::Head)
            .unwrap_or(Method::Get)
    }

    /// Names of every placeholder, in order
    pub fn parameters(&self) -> Vec<(String, bool)> {
        parse_uri(&self.uri)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| match part {
                Part::Param { name, optional } => Some((name.to_string(), optional)),
                Part::Literal(_) => None,
            })
            .collect()
    }
}

fn parse_uri(uri: &str) -> Option<Vec<Part<'_>>> {
    let mut parts = Vec::new();
    let mut rest = uri;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(Part::Literal(&rest[..open]));
        }
        let close = rest[open..].find('}')? + open;
        let inner = &rest[open + 1..close];
        let (name, optional) = match inner.strip_suffix('?') {
            Some(name) => (name, true),
            None => (inner, false),
        };
        if name.is_empty() {
            return None;
        }
        parts.push(Part::Param { name, optional });
        rest = &rest[close + 1..];
    }
    if rest.contains('}') {
        return None;
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest));
    }
    Some(parts)
}

/// Named routes plus the base URL they resolve against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    base_url: String,
    routes: BTreeMap<String, Route>,
}

impl RouteTable {
    /// Empty table resolving against `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            routes: BTreeMap::new(),
        }
    }

    /// Base URL every route is joined to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Declare or replace a route
    pub fn insert(&mut self, name: impl Into<String>, route: Route) {
        self.routes.insert(name.into(), route);
    }

    /// Whether `name` is registered
    pub fn has(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Look up a route by name
    pub fn route(&self, name: &str) -> Result<&Route, RouteError> {
        self.routes
            .get(name)
            .ok_or_else(|| RouteError::RouteNotFound(name.to_string()))
    }

    /// Registered route names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Resolve a route name to a URL.
    ///
    /// Every required placeholder must have a parameter and every parameter
    /// must name a placeholder. An omitted optional placeholder is removed
    /// together with the `/` in front of it.
    pub fn url(&self, name: &str, params: &BTreeMap<String, String>) -> Result<String, RouteError> {
        let route = self.route(name)?;
        let parts = parse_uri(&route.uri).ok_or_else(|| RouteError::MalformedUri {
            route: name.to_string(),
            uri: route.uri.clone(),
        })?;

        let declared: BTreeSet<&str> = parts
            .iter()
            .filter_map(|p| match p {
                Part::Param { name, .. } => Some(*name),
                Part::Literal(_) => None,
            })
            .collect();
        let extra: Vec<String> = params
            .keys()
            .filter(|k| !declared.contains(k.as_str()))
            .cloned()
            .collect();
        if !extra.is_empty() {
            return Err(RouteError::UnexpectedParameters {
                route: name.to_string(),
                extra,
            });
        }
        let missing: Vec<String> = parts
            .iter()
            .filter_map(|p| match p {
                Part::Param { name, optional: false } if !params.contains_key(*name) => {
                    Some(name.to_string())
                }
                _ => None,
            })
            .collect();
        if !missing.is_empty() {
            return Err(RouteError::MissingParameters {
                route: name.to_string(),
                missing,
            });
        }

        let mut path = String::new();
        for part in parts {
            match part {
                Part::Literal(text) => path.push_str(text),
                Part::Param { name, .. } => match params.get(name) {
                    Some(value) => path.push_str(value),
                    None => {
                        if path.ends_with('/') {
                            path.pop();
                        }
                    }
                },
            }
        }
        Ok(join_url(&self.base_url, &path))
    }
}

fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        return if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
