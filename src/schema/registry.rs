//! Schema registry and the YAML schema file format
//!
//! The registry is the runtime schema table the engine looks entities up in.
//! It is built once at startup, either programmatically or from a YAML file:
//!
//! ```yaml
//! entities:
//!   - name: ControlPreset
//!     table: ControlPresets
//!     fields:
//!       - { name: MonitorId, kind: { type: int } }
//!       - { name: Preset, kind: { type: int } }
//!       - { name: Label, kind: { type: text }, nullable: true }
//!     primary_key: [MonitorId, Preset]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{EntitySchema, FieldDef, FieldDefault, FieldKind, SchemaError};
use crate::error::ValidationError;
use crate::value::Value;

/// Lookup table of every entity the engine serves.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity; names must be unique.
    pub fn register(&mut self, schema: EntitySchema) -> Result<(), SchemaError> {
        if self.entities.contains_key(schema.name()) {
            return Err(SchemaError::DuplicateEntity(schema.name().to_string()));
        }
        self.entities
            .insert(schema.name().to_string(), Arc::new(schema));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, schema: EntitySchema) -> Result<Self, SchemaError> {
        self.register(schema)?;
        Ok(self)
    }

    /// Resolve an entity by name.
    pub fn get(&self, name: &str) -> Result<Arc<EntitySchema>, ValidationError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::unknown_entity(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Parse a YAML schema document.
    pub fn from_yaml_str(text: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_yaml::from_str(text)?;
        let mut registry = Self::new();
        for entity in file.entities {
            registry.register(entity.into_schema()?)?;
        }
        Ok(registry)
    }

    /// Read and parse a YAML schema file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), entities = registry.len(), "Loaded schema file");
        Ok(registry)
    }
}

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize)]
struct SchemaFile {
    entities: Vec<EntityEntry>,
}

#[derive(Debug, Deserialize)]
struct EntityEntry {
    name: String,
    table: Option<String>,
    fields: Vec<FieldEntry>,
    primary_key: Vec<String>,
    #[serde(default)]
    unique: Vec<UniqueEntry>,
}

#[derive(Debug, Deserialize)]
struct FieldEntry {
    name: String,
    column: Option<String>,
    kind: FieldKind,
    #[serde(default)]
    nullable: bool,
    default: Option<DefaultEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DefaultEntry {
    Autoincrement,
    Now,
    Uuid,
    Literal { value: serde_json::Value },
}

#[derive(Debug, Deserialize)]
struct UniqueEntry {
    name: Option<String>,
    fields: Vec<String>,
}

impl EntityEntry {
    fn into_schema(self) -> Result<EntitySchema, SchemaError> {
        let mut builder = EntitySchema::builder(&self.name);
        if let Some(table) = self.table {
            builder = builder.table(table);
        }
        for entry in self.fields {
            let mut field = FieldDef::new(entry.name, entry.kind);
            if let Some(column) = entry.column {
                field = field.with_column(column);
            }
            if entry.nullable {
                field = field.nullable();
            }
            if let Some(default) = entry.default {
                let default = match default {
                    DefaultEntry::Autoincrement => FieldDefault::Autoincrement,
                    DefaultEntry::Now => FieldDefault::Now,
                    DefaultEntry::Uuid => FieldDefault::Uuid,
                    DefaultEntry::Literal { value } => {
                        let value = Value::from_json(&value).map_err(|e| SchemaError::Invalid {
                            entity: self.name.clone(),
                            message: format!("default of `{}`: {e}", field.name),
                        })?;
                        // Resolve boundary text (decimals, timestamps, enums) now.
                        let value = field.accept_nullable(value).map_err(|e| {
                            SchemaError::Invalid {
                                entity: self.name.clone(),
                                message: format!("default of `{}`: {e}", field.name),
                            }
                        })?;
                        FieldDefault::Literal(value)
                    }
                };
                field = field.with_default(default);
            }
            builder = builder.field(field);
        }
        builder = builder.primary_key(self.primary_key);
        for unique in self.unique {
            builder = match unique.name {
                Some(name) => builder.unique_named(name, unique.fields),
                None => builder.unique(unique.fields),
            };
        }
        builder.build()
    }
}
