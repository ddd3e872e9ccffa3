use serde_json::Value;
use tracing::{debug, info};

use super::descriptor::QueryDescriptor;
use super::populate;
use super::structured::build_filter;
use super::{Page, QueryError};
use crate::config::{QueryConfig, CONFIG};
use crate::context::RequestContext;
use crate::database::repository::EntityRepository;
use crate::database::store::Document;
use crate::entity::{EntityRegistry, CREATED_BY};
use crate::filter::FilterData;
use crate::ownership::augment_records;

/// Runs query descriptors against entity repositories. Borrows the registry
/// so relation expansion can reach other entity types under the same context.
pub struct QueryEngine<'r> {
    registry: &'r EntityRegistry,
    config: QueryConfig,
}

impl<'r> QueryEngine<'r> {
    pub fn new(registry: &'r EntityRegistry) -> Self {
        Self::with_config(registry, CONFIG.query.clone())
    }

    pub fn with_config(registry: &'r EntityRegistry, config: QueryConfig) -> Self {
        Self { registry, config }
    }

    /// Filtered, sorted, paginated and expanded page of `repository`'s
    /// records, with `can_edit` set for ownership-enabled types. The total
    /// comes from a separate count over the same filter.
    pub async fn paginate(
        &self,
        repository: &EntityRepository,
        descriptor: &QueryDescriptor,
    ) -> Result<Page, QueryError> {
        let schema = repository.schema();
        let where_clause = build_filter(schema, descriptor.filter.as_ref(), &descriptor.overrides);
        let page = descriptor.effective_page();
        let limit = descriptor.effective_limit(&self.config);
        let skip = (page as usize - 1) * limit as usize;

        if self.config.debug_logging {
            debug!("Query on {}: filter={} page={} limit={}", repository.target(), where_clause, page, limit);
        }

        let query = FilterData {
            select: self.projection(repository, descriptor),
            where_clause: Some(where_clause.clone()),
            order: descriptor.sort.clone().map(Value::String),
            limit: Some(limit as usize),
            offset: Some(skip),
        };
        let (mut results, total) = futures::try_join!(
            repository.find_many(query),
            repository.count(Some(where_clause))
        )?;

        self.finish(repository, descriptor, &mut results).await?;
        info!(
            "Query on {} returned {} of {} (page {}, limit {})",
            repository.target(), results.len(), total, page, limit
        );
        Ok(Page::new(results, page, limit, total))
    }

    /// Like [`paginate`](Self::paginate) without paging: every matching record.
    pub async fn find_all(
        &self,
        repository: &EntityRepository,
        descriptor: &QueryDescriptor,
    ) -> Result<Vec<Document>, QueryError> {
        let where_clause = build_filter(repository.schema(), descriptor.filter.as_ref(), &descriptor.overrides);
        let query = FilterData {
            select: self.projection(repository, descriptor),
            where_clause: Some(where_clause),
            order: descriptor.sort.clone().map(Value::String),
            ..Default::default()
        };
        let mut results = repository.find_many(query).await?;
        self.finish(repository, descriptor, &mut results).await?;
        Ok(results)
    }

    /// Resolves the repository for `entity` under `ctx` and paginates it.
    pub async fn paginate_entity(
        &self,
        ctx: &RequestContext,
        entity: &str,
        descriptor: &QueryDescriptor,
    ) -> Result<Page, QueryError> {
        let repository = self.registry.repository(ctx, entity).await?;
        self.paginate(&repository, descriptor).await
    }

    /// Requested fields, plus the creator field the ownership flag depends on.
    fn projection(&self, repository: &EntityRepository, descriptor: &QueryDescriptor) -> Option<Vec<String>> {
        let mut fields = descriptor.select.clone().filter(|f| !f.is_empty())?;
        if repository.schema().has_ownership() && !fields.iter().any(|f| f == CREATED_BY) {
            fields.push(CREATED_BY.to_string());
        }
        Some(fields)
    }

    async fn finish(
        &self,
        repository: &EntityRepository,
        descriptor: &QueryDescriptor,
        results: &mut [Document],
    ) -> Result<(), QueryError> {
        let ctx = repository.context();
        if let Some(populate) = &descriptor.populate {
            populate::expand(
                self.registry,
                ctx,
                repository.schema(),
                results,
                populate,
                0,
                self.config.max_populate_depth,
            )
            .await?;
        }
        augment_records(results, repository.schema(), ctx.user(), repository.directory()).await?;
        Ok(())
    }
}
