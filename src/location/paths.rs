// ABOUTME: Storage path helpers: namespace split, segment reduction, prefix checks
// ABOUTME: A namespace is the scheme plus authority of a URL, e.g. hdfs://ns1

use regex::Regex;
use std::sync::LazyLock;

static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z][a-zA-Z0-9+.\-]*://[^/]*)").expect("namespace pattern compiles")
});

/// `hdfs://ns1/data/x` -> `Some("hdfs://ns1")`. Plain paths have no namespace.
pub fn namespace_of(location: &str) -> Option<&str> {
    NAMESPACE
        .captures(location)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// `hdfs://ns1/data/x` -> `Some("hdfs")`.
pub fn protocol_of(location: &str) -> Option<&str> {
    namespace_of(location).and_then(|ns| ns.split("://").next())
}

pub fn strip_namespace(location: &str) -> &str {
    match namespace_of(location) {
        Some(ns) => &location[ns.len()..],
        None => location,
    }
}

pub fn replace_namespace(location: &str, namespace: &str) -> String {
    format!("{}{}", namespace.trim_end_matches('/'), strip_namespace(location))
}

/// Drops `levels` trailing segments. Never cuts into the namespace.
pub fn reduce_url_by(location: &str, levels: usize) -> String {
    let namespace = namespace_of(location).unwrap_or("");
    let path = strip_namespace(location).trim_end_matches('/');
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let keep = segments.len().saturating_sub(levels);
    segments.truncate(keep);
    if segments.is_empty() {
        return format!("{}/", namespace);
    }
    format!("{}/{}", namespace, segments.join("/"))
}

pub fn parent_directory(location: &str) -> String {
    reduce_url_by(location, 1)
}

pub fn last_directory(location: &str) -> Option<&str> {
    strip_namespace(location)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}

/// Segment-aware prefix test: `/data/sales` covers `/data/sales/x` but not `/data/salesforce`.
pub fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Number of `/`-separated segments in a partition spec (`a=1/b=2` -> 2).
pub fn partition_depth(spec: &str) -> usize {
    spec.split('/').filter(|s| !s.is_empty()).count()
}

pub fn join(base: &str, child: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        child.trim_start_matches('/')
    )
}
