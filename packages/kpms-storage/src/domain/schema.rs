//! Schema registry
//!
//! Table definitions are registered explicitly at start-up, in dependency
//! order. Registration checks that every parent is already known and that the
//! table's primary key contains each parent's primary key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StorageError};

/// Table tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableTier {
    /// Static reference data, seeded once
    Lookup,
    /// Inserted by operators
    Manual,
    /// Written by the pipeline from files outside the store
    Imported,
    /// Written by the pipeline from other tables
    Computed,
    /// Child rows owned by a master table
    Part,
}

impl TableTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableTier::Lookup => "lookup",
            TableTier::Manual => "manual",
            TableTier::Imported => "imported",
            TableTier::Computed => "computed",
            TableTier::Part => "part",
        }
    }

    /// Tiers whose rows are only ever written by the pipeline
    pub fn is_derived(&self) -> bool {
        matches!(self, TableTier::Imported | TableTier::Computed)
    }
}

impl fmt::Display for TableTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Table definition
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: &'static str,
    pub tier: TableTier,
    pub primary_key: &'static [&'static str],
    /// Key-containing dependencies (primary key ⊇ parent primary key)
    pub parents: &'static [&'static str],
    /// Secondary (non-key) references
    pub references: &'static [&'static str],
    /// Statements creating the table and its indexes
    pub ddl: &'static str,
}

/// Ordered registry of table definitions
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    name: String,
    tables: Vec<TableDef>,
}

impl SchemaRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a table definition
    ///
    /// # Errors
    ///
    /// Returns a config error if the name is taken, if a parent or reference
    /// is not registered yet, or if the primary key does not contain a
    /// parent's primary key.
    pub fn register(&mut self, def: TableDef) -> Result<()> {
        if self.get(def.name).is_some() {
            return Err(StorageError::config(format!(
                "Table {} registered twice in schema {}",
                def.name, self.name
            )));
        }

        for parent_name in def.parents {
            let parent = self.get(parent_name).ok_or_else(|| {
                StorageError::config(format!(
                    "Table {} depends on unregistered table {}",
                    def.name, parent_name
                ))
            })?;

            if let Some(missing) = parent
                .primary_key
                .iter()
                .find(|attr| !def.primary_key.contains(attr))
            {
                return Err(StorageError::config(format!(
                    "Table {} primary key does not contain {}.{}",
                    def.name, parent_name, missing
                )));
            }
        }

        for reference in def.references {
            if self.get(reference).is_none() {
                return Err(StorageError::config(format!(
                    "Table {} references unregistered table {}",
                    def.name, reference
                )));
            }
        }

        if def.tier == TableTier::Part && def.parents.len() != 1 {
            return Err(StorageError::config(format!(
                "Part table {} must have exactly one master",
                def.name
            )));
        }

        self.tables.push(def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables in registration (dependency) order
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Tables that list `name` as a parent
    pub fn children_of(&self, name: &str) -> Vec<&TableDef> {
        self.tables
            .iter()
            .filter(|t| t.parents.contains(&name))
            .collect()
    }
}
