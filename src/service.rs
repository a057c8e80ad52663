//! Query engine
//!
//! [`Engine`] ties the schema registry to a store. Every operation on an
//! [`EntityService`] validates its whole request before the store is touched;
//! store failures come back classified as [`QueryError`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{QueryError, ValidationError};
use crate::query::{
    AggregateArgs, AggregatePlan, Aggregates, BatchResult, CreateInput, Filter, FilterEvaluator,
    FindManyArgs, GroupPlan, GroupRow, GroupSpec, ResolvedKey, RetrievalPlan, RetrievalPlanner,
    Rows, UniqueSelector, UpdateInput,
};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::store::{StoreClient, StoreError};
use crate::value::Record;

pub type Result<T> = std::result::Result<T, QueryError>;

/// Entry point: a schema registry bound to a store client.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn StoreClient>,
}

impl Engine {
    pub fn new(registry: SchemaRegistry, store: Arc<dyn StoreClient>) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Create or extend the table of every registered entity.
    pub async fn sync(&self) -> Result<()> {
        for schema in self.registry.iter() {
            self.store
                .sync_schema(schema)
                .await
                .map_err(|e| QueryError::from_store(schema.name(), e))?;
        }
        info!(entities = self.registry.len(), "Schema sync complete");
        Ok(())
    }

    /// Registered entity names, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        self.registry
            .iter()
            .map(|schema| schema.name().to_string())
            .collect()
    }

    /// Operations on one entity.
    pub fn entity(&self, name: &str) -> Result<EntityService> {
        Ok(EntityService {
            schema: self.registry.get(name)?,
            store: self.store.clone(),
        })
    }
}

/// The query and mutation contract of a single entity.
#[derive(Clone)]
pub struct EntityService {
    schema: Arc<EntitySchema>,
    store: Arc<dyn StoreClient>,
}

impl EntityService {
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn name(&self) -> &str {
        self.schema.name()
    }

    fn invalid(&self, err: ValidationError) -> QueryError {
        QueryError::Validation(err.with_entity(self.name()))
    }

    fn store_err(&self, err: StoreError) -> QueryError {
        QueryError::from_store(self.name(), err)
    }

    fn resolve(&self, selector: &UniqueSelector) -> Result<ResolvedKey> {
        selector.resolve(&self.schema).map_err(|e| self.invalid(e))
    }

    fn not_found(&self, key: &ResolvedKey) -> QueryError {
        QueryError::NotFound {
            entity: self.name().to_string(),
            key: key.to_string(),
        }
    }

    fn plan(&self, args: &FindManyArgs) -> Result<RetrievalPlan> {
        RetrievalPlanner::new(&self.schema)
            .plan(args)
            .map_err(|e| self.invalid(e))
    }

    async fn run(&self, plan: &RetrievalPlan) -> Result<Rows> {
        let candidates = self
            .store
            .fetch(&self.schema, plan.filter())
            .await
            .map_err(|e| self.store_err(e))?;
        Ok(plan.execute(candidates))
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn find_unique(&self, selector: &UniqueSelector) -> Result<Option<Record>> {
        let key = self.resolve(selector)?;
        debug!(entity = %self.name(), operation = "findUnique", key = %key, "Executing");
        let rows = self
            .store
            .fetch(&self.schema, &key.to_filter())
            .await
            .map_err(|e| self.store_err(e))?;
        Ok(rows.into_iter().find(|r| key.matches(r)))
    }

    pub async fn find_unique_or_throw(&self, selector: &UniqueSelector) -> Result<Record> {
        let key = self.resolve(selector)?;
        debug!(entity = %self.name(), operation = "findUniqueOrThrow", key = %key, "Executing");
        let rows = self
            .store
            .fetch(&self.schema, &key.to_filter())
            .await
            .map_err(|e| self.store_err(e))?;
        rows.into_iter()
            .find(|r| key.matches(r))
            .ok_or_else(|| self.not_found(&key))
    }

    /// First row of the equivalent find-many. A negative take reads from the
    /// end, a zero take returns nothing.
    pub async fn find_first(&self, args: &FindManyArgs) -> Result<Option<Record>> {
        let take = match args.page.take {
            None => 1,
            Some(n) => n.signum(),
        };
        let plan = self.plan(args)?.with_take(Some(take));
        debug!(entity = %self.name(), operation = "findFirst", "Executing");
        Ok(self.run(&plan).await?.next())
    }

    pub async fn find_many(&self, args: &FindManyArgs) -> Result<Rows> {
        let plan = self.plan(args)?;
        debug!(entity = %self.name(), operation = "findMany", take = ?plan.take(), "Executing");
        self.run(&plan).await
    }

    /// Number of rows the equivalent find-many returns.
    pub async fn count(&self, args: &FindManyArgs) -> Result<u64> {
        let plan = self.plan(args)?;
        debug!(entity = %self.name(), operation = "count", "Executing");
        Ok(self.run(&plan).await?.count() as u64)
    }

    pub async fn aggregate(&self, args: &AggregateArgs) -> Result<Aggregates> {
        let plan = AggregatePlan::new(&self.schema, args).map_err(|e| self.invalid(e))?;
        debug!(entity = %self.name(), operation = "aggregate", "Executing");
        let candidates = self
            .store
            .fetch(&self.schema, plan.filter())
            .await
            .map_err(|e| self.store_err(e))?;
        plan.execute(&self.schema, candidates)
            .map_err(|e| self.invalid(e))
    }

    pub async fn group_by(&self, spec: &GroupSpec) -> Result<Vec<GroupRow>> {
        let plan = GroupPlan::new(&self.schema, spec).map_err(|e| self.invalid(e))?;
        debug!(entity = %self.name(), operation = "groupBy", by = ?spec.by, "Executing");
        let candidates = self
            .store
            .fetch(&self.schema, plan.filter())
            .await
            .map_err(|e| self.store_err(e))?;
        plan.execute(&self.schema, candidates)
            .map_err(|e| self.invalid(e))
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    pub async fn create(&self, data: &CreateInput) -> Result<Record> {
        let record = data.validate(&self.schema).map_err(|e| self.invalid(e))?;
        debug!(entity = %self.name(), operation = "create", "Executing");
        self.store
            .create(&self.schema, record)
            .await
            .map_err(|e| self.store_err(e))
    }

    pub async fn create_many(
        &self,
        data: &[CreateInput],
        skip_duplicates: bool,
    ) -> Result<BatchResult> {
        let records = data
            .iter()
            .map(|input| input.validate(&self.schema))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.invalid(e))?;
        debug!(
            entity = %self.name(),
            operation = "createMany",
            records = records.len(),
            skip_duplicates,
            "Executing"
        );
        let count = self
            .store
            .create_many(&self.schema, records, skip_duplicates)
            .await
            .map_err(|e| self.store_err(e))?;
        Ok(BatchResult { count })
    }

    pub async fn update(&self, selector: &UniqueSelector, data: &UpdateInput) -> Result<Record> {
        let key = self.resolve(selector)?;
        let update = data.validate(&self.schema).map_err(|e| self.invalid(e))?;
        debug!(entity = %self.name(), operation = "update", key = %key, "Executing");
        self.store
            .update(&self.schema, &key, &update)
            .await
            .map_err(|e| self.store_err(e))?
            .ok_or_else(|| self.not_found(&key))
    }

    pub async fn update_many(
        &self,
        filter: &Filter,
        data: &UpdateInput,
    ) -> Result<BatchResult> {
        let filter = FilterEvaluator::new(&self.schema)
            .prepare(filter)
            .map_err(|e| self.invalid(e))?;
        let update = data.validate(&self.schema).map_err(|e| self.invalid(e))?;
        debug!(entity = %self.name(), operation = "updateMany", "Executing");
        let count = self
            .store
            .update_many(&self.schema, &filter, &update)
            .await
            .map_err(|e| self.store_err(e))?;
        Ok(BatchResult { count })
    }

    /// Update the row at `selector`, or create one from `create`.
    pub async fn upsert(
        &self,
        selector: &UniqueSelector,
        create: &CreateInput,
        update: &UpdateInput,
    ) -> Result<Record> {
        let key = self.resolve(selector)?;
        let record = create.validate(&self.schema).map_err(|e| self.invalid(e))?;
        let update = update.validate(&self.schema).map_err(|e| self.invalid(e))?;
        debug!(entity = %self.name(), operation = "upsert", key = %key, "Executing");
        self.store
            .upsert(&self.schema, &key, record, &update)
            .await
            .map_err(|e| self.store_err(e))
    }

    pub async fn delete(&self, selector: &UniqueSelector) -> Result<Record> {
        let key = self.resolve(selector)?;
        debug!(entity = %self.name(), operation = "delete", key = %key, "Executing");
        self.store
            .delete(&self.schema, &key)
            .await
            .map_err(|e| self.store_err(e))?
            .ok_or_else(|| self.not_found(&key))
    }

    pub async fn delete_many(&self, filter: &Filter) -> Result<BatchResult> {
        let filter = FilterEvaluator::new(&self.schema)
            .prepare(filter)
            .map_err(|e| self.invalid(e))?;
        debug!(entity = %self.name(), operation = "deleteMany", "Executing");
        let count = self
            .store
            .delete_many(&self.schema, &filter)
            .await
            .map_err(|e| self.store_err(e))?;
        Ok(BatchResult { count })
    }
}
