//! The result envelope `QueryExecutor::execute` returns, and the
//! `QueryRunner` trait a consumer implements to execute generated SQL
//! against a concrete database connection.
//!
//! This crate has no SQL driver dependency of its own: `generateSQL` hands a
//! consumer a dialect-rendered string and its bound parameters, and
//! `execute` asks a `QueryRunner` to run them, so the engine stays agnostic
//! to whatever pool or client the embedding application already has.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;

/// One row of a query result, keyed by member name (`Cube.member`, or the
/// `__period`/`__periodIndex`/`__periodDayIndex` tags a comparison query adds).
pub type DataRow = HashMap<String, Value>;

/// Executes generated SQL against a concrete database connection.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run(&self, sql: &str, params: &[String]) -> Result<Vec<DataRow>, ExecutionError>;
}

/// Metadata the executor attaches to a single measure/dimension/time
/// dimension in the result's `annotation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAnnotation {
    pub title: String,
    pub short_title: String,
    #[serde(rename = "type")]
    pub member_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
}

impl MemberAnnotation {
    pub fn new(name: &str, member_type: impl Into<String>) -> Self {
        let title = humanize(member_name(name));
        Self {
            short_title: title.clone(),
            title,
            member_type: member_type.into(),
            format: None,
            granularity: None,
        }
    }

    pub fn with_granularity(mut self, granularity: impl Into<String>) -> Self {
        self.granularity = Some(granularity.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// The period-comparison metadata attached to `annotation.periods` when a
/// query's time dimension carried a `compareDateRange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodsAnnotation {
    pub ranges: Vec<(String, String)>,
    pub labels: Vec<String>,
    pub time_dimension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
}

/// The `annotation` block of a result envelope: per-member metadata plus
/// optional period-comparison and specialized-query descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub measures: HashMap<String, MemberAnnotation>,
    pub dimensions: HashMap<String, MemberAnnotation>,
    pub time_dimensions: HashMap<String, MemberAnnotation>,
    pub segments: HashMap<String, MemberAnnotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periods: Option<PeriodsAnnotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<Value>,
}

/// Cache-hit metadata attached when `execute` consulted an external result
/// cache, per §7: a cache miss or write-back failure never fails the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_remaining_ms: Option<u64>,
}

/// `{ data, annotation, cache? }`, the shape every `QueryExecutor::execute`
/// call returns regardless of which dispatch path produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub data: Vec<DataRow>,
    pub annotation: Annotation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheInfo>,
}

/// Strip a `Cube.member` reference down to the member for humanization;
/// left as-is if unqualified (e.g. a `__period*` tag).
fn member_name(reference: &str) -> &str {
    reference.split('.').next_back().unwrap_or(reference)
}

/// `created_at` / `createdAt` -> `"Created At"`, the convention Cube-style
/// annotation titles follow absent an explicit `title` on the member.
fn humanize(name: &str) -> String {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .into_iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
