//! In-memory store
//!
//! Tables of records behind one `tokio::sync::RwLock`. Every mutation runs
//! under a single write guard and computes its full result before touching
//! the table, so a failing bulk mutation leaves nothing behind.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{StoreClient, StoreError, find_conflict, generated_default};
use crate::error::ValidationError;
use crate::query::filter::matches;
use crate::query::{Filter, ResolvedKey, UpdateInput};
use crate::schema::{EntitySchema, FieldDefault};
use crate::value::{Record, Value};

#[derive(Debug, Default, Clone)]
struct Table {
    rows: Vec<Record>,
    /// Last value handed out per autoincrement field.
    sequences: HashMap<String, i64>,
}

impl Table {
    /// Fill omitted fields from their defaults.
    fn materialize(&mut self, schema: &EntitySchema, data: Record) -> Result<Record, StoreError> {
        let mut row = Record::new();
        for field in schema.fields() {
            let value = if data.contains(&field.name) {
                let value = data.get(&field.name).clone();
                if let (Some(FieldDefault::Autoincrement), Value::Int(n) | Value::BigInt(n)) =
                    (&field.default, &value)
                {
                    let last = self.sequences.entry(field.name.clone()).or_default();
                    *last = (*last).max(*n);
                }
                value
            } else {
                match &field.default {
                    Some(FieldDefault::Autoincrement) => {
                        let last = self.sequences.entry(field.name.clone()).or_default();
                        *last += 1;
                        field.accept(Value::Int(*last))?
                    }
                    Some(default) => generated_default(default).unwrap_or(Value::Null),
                    None if field.nullable => Value::Null,
                    None => return Err(ValidationError::missing_field(&field.name).into()),
                }
            };
            row.set(field.name.clone(), value);
        }
        Ok(row)
    }

    fn position(&self, key: &ResolvedKey) -> Option<usize> {
        self.rows.iter().position(|r| key.matches(r))
    }

    fn insert(&mut self, schema: &EntitySchema, data: Record) -> Result<Record, StoreError> {
        let row = self.materialize(schema, data)?;
        if let Some(key) = find_conflict(schema, self.rows.iter(), &row) {
            return Err(StoreError::conflict(key, &row));
        }
        self.rows.push(row.clone());
        Ok(row)
    }

    fn update_at(
        &mut self,
        schema: &EntitySchema,
        index: usize,
        update: &UpdateInput,
    ) -> Result<Record, StoreError> {
        let next = update.apply(schema, &self.rows[index])?;
        let others = self
            .rows
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, r)| r);
        if let Some(key) = find_conflict(schema, others, &next) {
            return Err(StoreError::conflict(key, &next));
        }
        self.rows[index] = next.clone();
        Ok(next)
    }
}

/// Store keeping every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn sync_schema(&self, schema: &EntitySchema) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.contains_key(schema.table()) {
            debug!(table = schema.table(), "Creating in-memory table");
            tables.insert(schema.table().to_string(), Table::default());
        }
        Ok(())
    }

    async fn fetch(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(schema.table())
            .map(|t| t.rows.iter().filter(|r| matches(filter, r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, schema: &EntitySchema, data: Record) -> Result<Record, StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .entry(schema.table().to_string())
            .or_default()
            .insert(schema, data)
    }

    async fn create_many(
        &self,
        schema: &EntitySchema,
        data: Vec<Record>,
        skip_duplicates: bool,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(schema.table().to_string()).or_default();

        // Work on a copy; commit only when every record went in.
        let mut staged = table.clone();
        let mut created = 0;
        for record in data {
            match staged.insert(schema, record) {
                Ok(_) => created += 1,
                Err(StoreError::Conflict { .. }) if skip_duplicates => {}
                Err(err) => return Err(err),
            }
        }
        *table = staged;
        Ok(created)
    }

    async fn update(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
        update: &UpdateInput,
    ) -> Result<Option<Record>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(schema.table()) else {
            return Ok(None);
        };
        match table.position(key) {
            Some(index) => table.update_at(schema, index, update).map(Some),
            None => Ok(None),
        }
    }

    async fn update_many(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
        update: &UpdateInput,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(schema.table()) else {
            return Ok(0);
        };

        let mut next = table.rows.clone();
        let mut touched = Vec::new();
        for (index, row) in next.iter_mut().enumerate() {
            if matches(filter, row) {
                *row = update.apply(schema, row)?;
                touched.push(index);
            }
        }
        for &index in &touched {
            let others = next
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, r)| r);
            if let Some(key) = find_conflict(schema, others, &next[index]) {
                return Err(StoreError::conflict(key, &next[index]));
            }
        }
        table.rows = next;
        Ok(touched.len() as u64)
    }

    async fn upsert(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
        create: Record,
        update: &UpdateInput,
    ) -> Result<Record, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(schema.table().to_string()).or_default();
        match table.position(key) {
            Some(index) => table.update_at(schema, index, update),
            None => table.insert(schema, create),
        }
    }

    async fn delete(
        &self,
        schema: &EntitySchema,
        key: &ResolvedKey,
    ) -> Result<Option<Record>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(schema.table()) else {
            return Ok(None);
        };
        Ok(table.position(key).map(|index| table.rows.remove(index)))
    }

    async fn delete_many(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(schema.table()) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|r| !matches(filter, r));
        Ok((before - table.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::UniqueSelector;
    use crate::schema::{FieldDef, FieldKind};
    use assert_matches::assert_matches;

    fn schema() -> EntitySchema {
        EntitySchema::builder("Zone")
            .field(FieldDef::new("Id", FieldKind::Int).with_default(FieldDefault::Autoincrement))
            .field(FieldDef::new("Name", FieldKind::Text))
            .field(FieldDef::new("Created", FieldKind::Timestamp).with_default(FieldDefault::Now))
            .field(
                FieldDef::new("Active", FieldKind::Boolean)
                    .with_default(FieldDefault::Literal(Value::Bool(true))),
            )
            .field(FieldDef::new("Notes", FieldKind::Text).nullable())
            .primary_key(["Id"])
            .unique(["Name"])
            .build()
            .unwrap()
    }

    fn named(name: &str) -> Record {
        Record::new().with("Name", name)
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let store = MemoryStore::new();
        let schema = schema();
        let first = store.create(&schema, named("Door")).await.unwrap();
        let second = store.create(&schema, named("Yard")).await.unwrap();
        assert_eq!(first.get("Id"), &Value::Int(1));
        assert_eq!(second.get("Id"), &Value::Int(2));
        assert_eq!(first.get("Active"), &Value::Bool(true));
        assert_matches!(first.get("Created"), Value::Timestamp(_));
        assert!(first.get("Notes").is_null());
    }

    #[tokio::test]
    async fn test_explicit_ids_advance_the_sequence() {
        let store = MemoryStore::new();
        let schema = schema();
        store
            .create(&schema, named("Door").with("Id", 10))
            .await
            .unwrap();
        let next = store.create(&schema, named("Yard")).await.unwrap();
        assert_eq!(next.get("Id"), &Value::Int(11));
    }

    #[tokio::test]
    async fn test_unique_keys_are_enforced() {
        let store = MemoryStore::new();
        let schema = schema();
        store.create(&schema, named("Door")).await.unwrap();
        let err = store.create(&schema, named("Door")).await.unwrap_err();
        assert_matches!(err, StoreError::Conflict { ref target, .. } if target == "Name");
    }

    #[tokio::test]
    async fn test_create_many_is_atomic() {
        let store = MemoryStore::new();
        let schema = schema();
        store.create(&schema, named("Door")).await.unwrap();

        let batch = vec![named("A"), named("Door"), named("B")];
        let err = store.create_many(&schema, batch.clone(), false).await;
        assert_matches!(err, Err(StoreError::Conflict { .. }));
        assert_eq!(store.fetch(&schema, &Filter::all()).await.unwrap().len(), 1);

        let created = store.create_many(&schema, batch, true).await.unwrap();
        assert_eq!(created, 2);
        assert_eq!(store.fetch(&schema, &Filter::all()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_many_rolls_back_on_conflict() {
        let store = MemoryStore::new();
        let schema = schema();
        store.create(&schema, named("A")).await.unwrap();
        store.create(&schema, named("B")).await.unwrap();

        let update = UpdateInput::new().set("Name", "Same");
        let err = store.update_many(&schema, &Filter::all(), &update).await;
        assert_matches!(err, Err(StoreError::Conflict { .. }));

        let names: Vec<Value> = store
            .fetch(&schema, &Filter::all())
            .await
            .unwrap()
            .iter()
            .map(|r| r.get("Name").clone())
            .collect();
        assert_eq!(names, vec![Value::from("A"), Value::from("B")]);
    }

    #[tokio::test]
    async fn test_delete_returns_removed_row() {
        let store = MemoryStore::new();
        let schema = schema();
        store.create(&schema, named("Door")).await.unwrap();
        let key = UniqueSelector::field("Name", "Door").resolve(&schema).unwrap();
        let removed = store.delete(&schema, &key).await.unwrap().unwrap();
        assert_eq!(removed.get("Name"), &Value::from("Door"));
        assert_eq!(store.delete(&schema, &key).await.unwrap(), None);
    }
}
