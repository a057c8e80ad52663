//! entity-query
//!
//! Schema-driven query contract over relational entities: boolean filters,
//! unique selectors, sorting with cursor pagination, aggregation with
//! grouping, and the create/update/upsert/delete family of mutations.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use entity_query::query::{CreateInput, UniqueSelector};
//! use entity_query::schema::SchemaRegistry;
//! use entity_query::service::Engine;
//! use entity_query::store::MemoryStore;
//!
//! let engine = Engine::new(SchemaRegistry::load("schema.yaml")?, Arc::new(MemoryStore::new()));
//! engine.sync().await?;
//! let zones = engine.entity("Zone")?;
//! zones.create(&CreateInput::new().set("Name", "Driveway")).await?;
//! let found = zones.find_unique(&UniqueSelector::field("Name", "Driveway")).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod graphql;
pub mod query;
pub mod schema;
pub mod service;
pub mod store;
pub mod value;
pub mod wire;

pub use error::{QueryError, ValidationError, ValidationKind};
pub use service::{Engine, EntityService};
