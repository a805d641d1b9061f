//! Route entries and longest-prefix path matching

use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::RouteConfig;
use crate::registry::instance::normalize_app_name;

/// Where a route entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOrigin {
    Configured,
    /// Derived from a registered application name
    Discovered,
}

/// Mapping of a path pattern to an application
///
/// Patterns are either `/prefix/**`, matching the prefix and everything
/// below it, or an exact path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteEntry {
    pub id: String,
    pub path: String,
    pub service_id: String,
    pub strip_prefix: bool,
    pub origin: RouteOrigin,
    #[serde(skip)]
    prefix: String,
    #[serde(skip)]
    wildcard: bool,
}

/// A request path matched to an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub route_id: String,
    /// Normalised application name
    pub service_id: String,
    /// Path the upstream receives
    pub forward_path: String,
    /// Matched prefix, reported as `X-Forwarded-Prefix`
    pub matched_prefix: String,
}

impl RouteEntry {
    pub fn new(id: impl Into<String>, path: &str, service_id: &str, strip_prefix: bool, origin: RouteOrigin) -> Self {
        let (prefix, wildcard) = match path.strip_suffix("/**") {
            Some(prefix) => (prefix.to_string(), true),
            None => (path.trim_end_matches('/').to_string(), false),
        };

        Self {
            id: id.into(),
            path: path.to_string(),
            service_id: service_id.to_string(),
            strip_prefix,
            origin,
            prefix,
            wildcard,
        }
    }

    pub fn from_config(config: &RouteConfig) -> Self {
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| config.service_id.to_lowercase());
        Self::new(id, &config.path, &config.service_id, config.strip_prefix, RouteOrigin::Configured)
    }

    /// Convention route `/{app}/** -> app`
    pub fn discovered(app_name: &str) -> Self {
        let lower = app_name.to_lowercase();
        Self::new(
            lower.clone(),
            &format!("/{}/**", lower),
            app_name,
            true,
            RouteOrigin::Discovered,
        )
    }

    /// Remainder of `path` after the matched prefix
    fn matches<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.wildcard {
            if self.prefix.is_empty() {
                return Some(path);
            }
            let rest = path.strip_prefix(self.prefix.as_str())?;
            if rest.is_empty() || rest.starts_with('/') {
                return Some(rest);
            }
            return None;
        }

        let exact = if self.prefix.is_empty() { "/" } else { self.prefix.as_str() };
        let candidate = if path.len() > 1 { path.trim_end_matches('/') } else { path };
        (candidate == exact).then_some("")
    }
}

/// Ordered set of route entries; the longest matching prefix wins
#[derive(Debug, Clone, Default)]
pub struct RouteSet {
    entries: Vec<RouteEntry>,
}

impl RouteSet {
    /// Build a set from configured and discovered entries; configured entries
    /// shadow discovered ones with the same pattern and win ties.
    pub fn new(configured: Vec<RouteEntry>, discovered: Vec<RouteEntry>) -> Self {
        let mut entries = configured;
        for entry in discovered {
            if !entries.iter().any(|e| e.path == entry.path) {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| origin_rank(a.origin).cmp(&origin_rank(b.origin)))
                .then_with(|| a.wildcard.cmp(&b.wildcard))
        });
        Self { entries }
    }

    pub fn from_config(routes: &[RouteConfig]) -> Self {
        Self::new(routes.iter().map(RouteEntry::from_config).collect(), vec![])
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn configured(&self) -> Vec<RouteEntry> {
        self.entries
            .iter()
            .filter(|e| e.origin == RouteOrigin::Configured)
            .cloned()
            .collect()
    }

    /// Normalised names of every application a route points to
    pub fn service_ids(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .map(|e| normalize_app_name(&e.service_id))
            .collect()
    }

    /// Match a request path against the routes
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute> {
        self.entries.iter().find_map(|entry| {
            let rest = entry.matches(path)?;
            let forward_path = if entry.strip_prefix {
                if rest.is_empty() { "/".to_string() } else { rest.to_string() }
            } else {
                path.to_string()
            };

            Some(ResolvedRoute {
                route_id: entry.id.clone(),
                service_id: normalize_app_name(&entry.service_id),
                forward_path,
                matched_prefix: entry.prefix.clone(),
            })
        })
    }
}

fn origin_rank(origin: RouteOrigin) -> u8 {
    match origin {
        RouteOrigin::Configured => 0,
        RouteOrigin::Discovered => 1,
    }
}
