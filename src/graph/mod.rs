//! The typed graph: schema (type DAG + statistics) and data (instance
//! vertices and edges over the byte-key store).

mod data;
mod schema;

pub use data::{DataGraph, WriterRegistry};
pub use schema::{SchemaGraph, SchemaStats};

use std::fmt;

/// A type label, optionally scoped by its owning relation (role types only).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Label {
    name: String,
    scope: Option<String>,
}

impl Label {
    pub fn of(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn index_key(&self) -> Vec<u8> {
        crate::encoding::label_index_key(&self.name, self.scope())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", scope, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::of(name)
    }
}
