//! `QueryExecutor`: validates a `SemanticQuery`, routes it to the standard
//! or a specialized builder, runs the generated SQL through a
//! consumer-supplied `QueryRunner`, and post-processes the result into the
//! `{ data, annotation, cache? }` envelope.
//!
//! Dispatch order: validate, consult the optional result cache, route
//! (period-comparison expansion, funnel, flow, retention, or standard),
//! execute, post-process, optionally write back to cache. A cache failure
//! at either end is logged and never fails the request.

pub mod annotate;
pub mod cache;
pub mod gap_fill;
pub mod result;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use futures::future::try_join_all;
use tracing::Instrument;

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, ValidationError};
use crate::config::EngineConfig;
use crate::filter::{DateTimeBuilder, FilterCacheManager};
use crate::model::query::{FlowQuery, FunnelQuery, RetentionQuery, SemanticQuery, SpecializedQuery};
use crate::model::registry::split_member_ref;
use crate::model::{CubeRegistry, SecurityContext};
use crate::planner::QueryPlanner;
use crate::builder::QueryBuilder;
use crate::specialized::comparison::{expand_period_comparisons, merge_period_results, tag_period_rows, PeriodExpansion};
use crate::specialized::{FlowBuilder, FunnelBuilder, RetentionBuilder};
use crate::sql::params::ParamBinder;
use crate::sql::query::Query;

pub use cache::{CacheError, ResultCacheProvider};
pub use result::{Annotation, CacheInfo, DataRow, MemberAnnotation, QueryResult, QueryRunner};

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Bypass the cache read; a write-back still happens afterward.
    pub skip_cache: bool,
}

/// The `{ sql, params }` pair `generateSQL`/`dryRunFunnel`/`dryRunFlow`/
/// `dryRunRetention` return for dry-run inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub params: Vec<String>,
}

pub struct QueryExecutor<'a> {
    adapter: &'a dyn DatabaseAdapter,
    runner: &'a dyn QueryRunner,
    cache: Option<&'a dyn ResultCacheProvider>,
    config: EngineConfig,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(adapter: &'a dyn DatabaseAdapter, runner: &'a dyn QueryRunner, config: EngineConfig) -> Self {
        Self {
            adapter,
            runner,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: &'a dyn ResultCacheProvider) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validated, dialect-rendered SQL for the standard query path, without
    /// executing it.
    pub fn generate_sql(
        &self,
        registry: &CubeRegistry,
        query: &SemanticQuery,
        security: &SecurityContext,
    ) -> Result<GeneratedSql, EngineError> {
        let _span = tracing::info_span!("generate_sql", cube_count = registry.cubes().count()).entered();
        let (built, params) = self.build_standard(registry, query, security)?;
        Ok(GeneratedSql {
            sql: built.to_sql(self.adapter.dialect()),
            params,
        })
    }

    pub fn dry_run_funnel(
        &self,
        registry: &CubeRegistry,
        funnel: &FunnelQuery,
        security: &SecurityContext,
    ) -> Result<GeneratedSql, EngineError> {
        let _span = tracing::info_span!("dry_run_funnel").entered();
        let datetime = DateTimeBuilder::now();
        let mut filter_cache = FilterCacheManager::new();
        let mut binder = ParamBinder::new();
        let builder = FunnelBuilder::new(registry, self.adapter, security, self.config.limits.max_funnel_depth);
        let built = builder.build(funnel, &datetime, &mut filter_cache, &mut binder)?;
        Ok(GeneratedSql {
            sql: built.to_sql(self.adapter.dialect()),
            params: binder.into_values(),
        })
    }

    pub fn dry_run_flow(
        &self,
        registry: &CubeRegistry,
        flow: &FlowQuery,
        security: &SecurityContext,
    ) -> Result<GeneratedSql, EngineError> {
        let _span = tracing::info_span!("dry_run_flow").entered();
        let builder = FlowBuilder::new(registry, self.adapter, security);
        let built = builder.build(flow)?;
        Ok(GeneratedSql {
            sql: built.to_sql(self.adapter.dialect()),
            params: Vec::new(),
        })
    }

    pub fn dry_run_retention(
        &self,
        registry: &CubeRegistry,
        retention: &RetentionQuery,
        security: &SecurityContext,
    ) -> Result<GeneratedSql, EngineError> {
        let _span = tracing::info_span!("dry_run_retention").entered();
        let datetime = DateTimeBuilder::now();
        let mut filter_cache = FilterCacheManager::new();
        let mut binder = ParamBinder::new();
        let builder = RetentionBuilder::new(
            registry,
            self.adapter,
            security,
            self.config.limits.max_retention_periods,
        );
        let built = builder.build(retention, &datetime, &mut filter_cache, &mut binder)?;
        Ok(GeneratedSql {
            sql: built.to_sql(self.adapter.dialect()),
            params: binder.into_values(),
        })
    }

    /// Delegates to the adapter: this crate has no query-plan introspection
    /// of its own beyond the `sql::Query` AST, so `EXPLAIN` is left to
    /// whatever the target dialect's planner produces.
    pub fn explain_query(
        &self,
        registry: &CubeRegistry,
        query: &SemanticQuery,
        security: &SecurityContext,
    ) -> Result<GeneratedSql, EngineError> {
        let generated = self.generate_sql(registry, query, security)?;
        Ok(GeneratedSql {
            sql: format!("EXPLAIN {}", generated.sql),
            params: generated.params,
        })
    }

    pub async fn execute(
        &self,
        registry: &CubeRegistry,
        query: &SemanticQuery,
        security: &SecurityContext,
        options: ExecuteOptions,
    ) -> Result<QueryResult, EngineError> {
        let hash = query_hash(query);
        let span = tracing::info_span!("execute", cube_count = registry.cubes().count(), query_hash = %hash);
        self.execute_inner(registry, query, security, options)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        registry: &CubeRegistry,
        query: &SemanticQuery,
        security: &SecurityContext,
        options: ExecuteOptions,
    ) -> Result<QueryResult, EngineError> {
        self.validate(registry, query)?;

        let key = cache::cache_key(query, security);
        if !options.skip_cache {
            if let Some(result) = self.cache_lookup(&key).await {
                return Ok(result);
            }
        }

        let mut result = if let Some(specialized) = &query.specialized {
            match specialized {
                SpecializedQuery::Funnel(funnel) => self.execute_funnel(registry, funnel, security).await?,
                SpecializedQuery::Flow(flow) => self.execute_flow(registry, flow, security).await?,
                SpecializedQuery::Retention(retention) => {
                    self.execute_retention(registry, retention, security).await?
                }
            }
        } else if query.time_dimensions.iter().any(|td| td.compare_date_range.is_some()) {
            self.execute_comparison(registry, query, security).await?
        } else {
            self.execute_standard(registry, query, security).await?
        };

        result.cache = None;
        self.write_back(&key, &mut result).await;
        Ok(result)
    }

    fn validate(&self, registry: &CubeRegistry, query: &SemanticQuery) -> Result<(), EngineError> {
        if let Some(specialized) = &query.specialized {
            return match specialized {
                SpecializedQuery::Funnel(f) => {
                    FunnelBuilder::new(registry, self.adapter, &SecurityContext::new(), self.config.limits.max_funnel_depth)
                        .validate(f)
                }
                SpecializedQuery::Flow(fl) => FlowBuilder::new(registry, self.adapter, &SecurityContext::new()).validate(fl),
                SpecializedQuery::Retention(r) => RetentionBuilder::new(
                    registry,
                    self.adapter,
                    &SecurityContext::new(),
                    self.config.limits.max_retention_periods,
                )
                .validate(r),
            };
        }

        for reference in query.all_member_refs() {
            let r = split_member_ref(reference)
                .ok_or_else(|| ValidationError::IllegalFilterTarget(reference.to_string()))?;
            if !registry.contains(r.cube) {
                return Err(ValidationError::UnknownCube(r.cube.to_string()).into());
            }
            if registry.resolve_member(reference).is_none() && !registry.cube(r.cube).unwrap().segments.contains_key(r.member) {
                return Err(ValidationError::UnknownMember {
                    cube: r.cube.to_string(),
                    member: r.member.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn cache_lookup(&self, key: &str) -> Option<QueryResult> {
        let cache = self.cache?;
        match cache.get(key).await {
            Ok(Some(mut result)) => {
                result.cache = Some(CacheInfo {
                    hit: true,
                    cached_at: None,
                    ttl_ms: Some(self.config.cache.default_ttl_seconds * 1000),
                    ttl_remaining_ms: None,
                });
                Some(result)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "result cache lookup failed");
                None
            }
        }
    }

    async fn write_back(&self, key: &str, result: &mut QueryResult) {
        let Some(cache) = self.cache else { return };
        let ttl_ms = self.config.cache.default_ttl_seconds * 1000;
        if let Err(err) = cache.set(key, result, ttl_ms).await {
            tracing::warn!(error = %err, "result cache write-back failed");
            return;
        }
        result.cache = Some(CacheInfo {
            hit: false,
            cached_at: None,
            ttl_ms: Some(ttl_ms),
            ttl_remaining_ms: Some(ttl_ms),
        });
    }

    fn build_standard(
        &self,
        registry: &CubeRegistry,
        query: &SemanticQuery,
        security: &SecurityContext,
    ) -> Result<(Query, Vec<String>), EngineError> {
        let datetime = DateTimeBuilder::now();
        let mut filter_cache = FilterCacheManager::new();
        let mut binder = ParamBinder::new();
        let planner = QueryPlanner::new(registry);
        let plan = planner.plan(query)?;

        for jc in &plan.join_cubes {
            let cube = registry
                .cube(&jc.cube)
                .expect("planner only references registered cubes");
            if !cube.is_public && cube.sql(security).where_clause.is_none() {
                tracing::warn!(cube = %jc.cube, "non-public cube queried without a security predicate");
            }
        }
        let primary = registry
            .cube(&plan.primary_cube)
            .expect("planner only references registered cubes");
        if !primary.is_public && primary.sql(security).where_clause.is_none() {
            tracing::warn!(cube = %plan.primary_cube, "non-public cube queried without a security predicate");
        }

        let builder = QueryBuilder::new(registry, self.adapter, security);
        let built = builder.build(query, &plan, &datetime, &mut filter_cache, &mut binder)?;
        Ok((built, binder.into_values()))
    }

    async fn execute_standard(
        &self,
        registry: &CubeRegistry,
        query: &SemanticQuery,
        security: &SecurityContext,
    ) -> Result<QueryResult, EngineError> {
        let (built, params) = self.build_standard(registry, query, security)?;
        let sql = built.to_sql(self.adapter.dialect());
        let mut data = self.runner.run(&sql, &params).await?;
        self.convert_time_values(registry, query, &mut data);

        if self.config.gap_filling.enabled {
            if let Some(td) = query.time_dimensions.first() {
                if let Some(range) = &td.date_range {
                    let datetime = DateTimeBuilder::now();
                    let (from, to) = datetime.resolve(range)?;
                    let granularity = td.granularity.unwrap_or(self.config.gap_filling.default_granularity);
                    data = gap_fill::fill_gaps(data, &td.dimension, &query.measures, granularity, from, to);
                }
            }
        }

        Ok(QueryResult {
            data,
            annotation: annotate::build_annotation(registry, query),
            cache: None,
        })
    }

    fn convert_time_values(&self, registry: &CubeRegistry, query: &SemanticQuery, data: &mut [DataRow]) {
        let time_members: Vec<&str> = query
            .time_dimensions
            .iter()
            .map(|td| td.dimension.as_str())
            .chain(query.dimensions.iter().filter_map(|name| {
                split_member_ref(name)
                    .filter(|r| registry.dimension(r.cube, r.member).is_some_and(|d| d.is_time()))
                    .map(|_| name.as_str())
            }))
            .collect();

        for row in data.iter_mut() {
            for member in &time_members {
                let converted = match row.get(*member) {
                    Some(serde_json::Value::String(s)) => Some(self.adapter.convert_time_dimension_result(s)),
                    _ => None,
                };
                if let Some(converted) = converted {
                    row.insert((*member).to_string(), serde_json::Value::String(converted));
                }
            }
        }
    }

    async fn execute_funnel(
        &self,
        registry: &CubeRegistry,
        funnel: &FunnelQuery,
        security: &SecurityContext,
    ) -> Result<QueryResult, EngineError> {
        let generated = self.dry_run_funnel(registry, funnel, security)?;
        let data = self.runner.run(&generated.sql, &generated.params).await?;
        let mut annotation = Annotation::default();
        annotation.funnel = Some(serde_json::json!({ "steps": funnel.steps.iter().map(|s| &s.name).collect::<Vec<_>>() }));
        Ok(QueryResult {
            data,
            annotation,
            cache: None,
        })
    }

    async fn execute_flow(
        &self,
        registry: &CubeRegistry,
        flow: &FlowQuery,
        security: &SecurityContext,
    ) -> Result<QueryResult, EngineError> {
        let generated = self.dry_run_flow(registry, flow, security)?;
        let data = self.runner.run(&generated.sql, &generated.params).await?;
        let mut annotation = Annotation::default();
        annotation.flow = Some(serde_json::json!({ "stepDimension": flow.step_dimension }));
        Ok(QueryResult {
            data,
            annotation,
            cache: None,
        })
    }

    async fn execute_retention(
        &self,
        registry: &CubeRegistry,
        retention: &RetentionQuery,
        security: &SecurityContext,
    ) -> Result<QueryResult, EngineError> {
        let generated = self.dry_run_retention(registry, retention, security)?;
        let data = self.runner.run(&generated.sql, &generated.params).await?;
        let mut annotation = Annotation::default();
        annotation.retention = Some(serde_json::json!({
            "mode": match retention.mode {
                crate::model::RetentionMode::Classic => "classic",
                crate::model::RetentionMode::Rolling => "rolling",
            },
            "periods": retention.periods,
        }));
        Ok(QueryResult {
            data,
            annotation,
            cache: None,
        })
    }

    async fn execute_comparison(
        &self,
        registry: &CubeRegistry,
        query: &SemanticQuery,
        security: &SecurityContext,
    ) -> Result<QueryResult, EngineError> {
        let expansions = expand_period_comparisons(query);
        let time_dimension = expansions
            .first()
            .map(|e| e.time_dimension.clone())
            .unwrap_or_default();

        let futures = expansions
            .iter()
            .map(|expansion| self.run_period(registry, security, expansion.clone()));
        let per_period = try_join_all(futures).await?;

        let data = merge_period_results(per_period, &time_dimension);
        Ok(QueryResult {
            data,
            annotation: annotate::build_annotation(registry, query),
            cache: None,
        })
    }

    async fn run_period(
        &self,
        registry: &CubeRegistry,
        security: &SecurityContext,
        expansion: PeriodExpansion,
    ) -> Result<Vec<DataRow>, EngineError> {
        let (built, params) = self.build_standard(registry, &expansion.query, security)?;
        let sql = built.to_sql(self.adapter.dialect());
        let mut rows = self.runner.run(&sql, &params).await?;
        self.convert_time_values(registry, &expansion.query, &mut rows);
        let datetime = DateTimeBuilder::now();
        tag_period_rows(&mut rows, &expansion, &datetime)?;
        Ok(rows)
    }
}

fn query_hash(query: &SemanticQuery) -> String {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(query).unwrap_or_default().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
