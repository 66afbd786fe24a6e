#![forbid(unsafe_code)]

//! motif: the query-execution core of a schema-aware knowledge-graph store.
//! Typed entities, relations, and attributes over an ordered byte-key store;
//! a MIP-based traversal planner; a streaming procedure executor; and a rule
//! reasoner that materialises conclusions to fixpoint.

pub mod answer;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod logic;
pub mod pattern;
pub mod query;
pub mod storage;
pub mod traversal;

pub use crate::answer::{Concept, ConceptMap};
pub use crate::encoding::{ThingIid, TypeIid, Value, ValueType};
pub use crate::error::{MotifError, Result};
pub use crate::graph::{DataGraph, Label, SchemaGraph};
pub use crate::logic::{Rule, RuleHead};
pub use crate::pattern::{Conjunction, Predicate, RolePlayer};
pub use crate::query::{
    Aggregate, Database, DeleteQuery, Definition, InsertQuery, Numeric, Options, SessionType,
    Transaction, TransactionType, UpdateQuery,
};
pub use crate::storage::{MemStore, Store};
