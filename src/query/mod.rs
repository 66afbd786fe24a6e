//! Query dispatcher: the entry points for match, aggregate, group, insert,
//! delete, update, define, and undefine, with session/transaction-kind
//! violations rejected before execution.

mod write;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::answer::{Concept, ConceptMap};
use crate::encoding::{Value, ValueType};
use crate::error::{MotifError, Result};
use crate::graph::{DataGraph, Label, SchemaGraph, WriterRegistry};
use crate::logic::{LogicManager, Reasoner, RuleHead, DEFAULT_REASONING_BUDGET};
use crate::pattern::Conjunction;
use crate::storage::{MemStore, Store};
use crate::traversal::{AnswerStream, TraversalEngine};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SessionType {
    Schema,
    Data,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TransactionType {
    Read,
    Write,
}

/// Per-query options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    pub infer: bool,
    pub explain: bool,
    pub parallel: bool,
    pub batch_size: usize,
    pub trace_enabled: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            infer: false,
            explain: false,
            parallel: false,
            batch_size: 50,
            trace_enabled: false,
        }
    }
}

impl Options {
    pub fn infer(mut self, infer: bool) -> Self {
        self.infer = infer;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

/// Aggregation over a match stream.
#[derive(Clone, Debug)]
pub enum Aggregate {
    Count,
    Sum(String),
    Min(String),
    Max(String),
    Mean(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Numeric {
    Long(i64),
    Double(f64),
}

/// A schema mutation for `define`.
#[derive(Clone, Debug)]
pub enum Definition {
    EntityType {
        label: Label,
    },
    AttributeType {
        label: Label,
        value_type: ValueType,
    },
    RelationType {
        label: Label,
        relates: Vec<String>,
    },
    Sub {
        child: Label,
        parent: Label,
    },
    Owns {
        owner: Label,
        attribute: Label,
        is_key: bool,
    },
    Plays {
        player: Label,
        role: Label,
    },
    Rule {
        label: String,
        when: Conjunction,
        head: RuleHead,
    },
}

#[derive(Clone, Debug)]
pub struct InsertQuery {
    pub when: Option<Conjunction>,
    pub insert: Conjunction,
}

#[derive(Clone, Debug)]
pub struct DeleteQuery {
    pub when: Conjunction,
    pub concepts: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct UpdateQuery {
    pub when: Conjunction,
    pub delete: Vec<String>,
    pub insert: Conjunction,
}

/// A single-node knowledge-graph database: schema, data, rules, and the
/// traversal engine with its plan cache.
pub struct Database {
    schema: Arc<SchemaGraph>,
    store: Arc<dyn Store>,
    registry: Arc<WriterRegistry>,
    engine: Arc<TraversalEngine>,
    logic: Arc<LogicManager>,
    reasoning_budget: usize,
}

impl Database {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemStore::new()))
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            schema: Arc::new(SchemaGraph::new()),
            store,
            registry: Arc::new(WriterRegistry::default()),
            engine: Arc::new(TraversalEngine::new()),
            logic: Arc::new(LogicManager::new()),
            reasoning_budget: DEFAULT_REASONING_BUDGET,
        }
    }

    pub fn schema(&self) -> &Arc<SchemaGraph> {
        &self.schema
    }

    pub fn logic(&self) -> &Arc<LogicManager> {
        &self.logic
    }

    pub fn transaction(&self, session: SessionType, kind: TransactionType) -> Transaction<'_> {
        Transaction {
            db: self,
            session,
            kind,
            data: DataGraph::new(self.schema.clone(), self.store.clone(), self.registry.clone()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of isolation: a snapshot of the data graph and a pinned view of
/// the schema.
pub struct Transaction<'db> {
    db: &'db Database,
    session: SessionType,
    kind: TransactionType,
    data: DataGraph,
    cancelled: Arc<AtomicBool>,
}

impl<'db> Transaction<'db> {
    pub fn data(&self) -> &DataGraph {
        &self.data
    }

    /// Handle for cooperative cancellation of this transaction's queries.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn check_data_write(&self) -> Result<()> {
        if self.session == SessionType::Schema {
            return Err(MotifError::SessionSchemaViolation);
        }
        if self.kind == TransactionType::Read {
            return Err(MotifError::TransactionReadViolation);
        }
        Ok(())
    }

    fn check_schema_write(&self) -> Result<()> {
        if self.session == SessionType::Data {
            return Err(MotifError::SessionDataViolation);
        }
        if self.kind == TransactionType::Read {
            return Err(MotifError::TransactionSchemaReadViolation);
        }
        Ok(())
    }

    fn prepare(&self, pattern: &Conjunction) -> Result<Conjunction> {
        let mut prepared = pattern.clone();
        prepared.infer_hints(&self.db.schema)?;
        Ok(prepared)
    }

    /// Match: a lazy answer stream, routed through the reasoner when
    /// inference is on.
    pub fn match_(&self, pattern: &Conjunction, options: &Options) -> Result<AnswerStream<'_>> {
        let prepared = self.prepare(pattern)?;
        if options.trace_enabled {
            debug!(vars = prepared.variables().len(), "dispatching match");
        }
        if options.infer {
            let reasoner = Reasoner::new(
                &self.db.engine,
                self.db.logic.rules(),
                self.db.reasoning_budget,
            );
            let answers =
                reasoner.resolve(&self.data, &prepared, self.cancelled.clone(), options.parallel)?;
            return Ok(AnswerStream::Eager(answers.into_iter()));
        }
        self.db
            .engine
            .execute(&self.data, &prepared, self.cancelled.clone(), options.parallel)
    }

    pub fn match_aggregate(
        &self,
        pattern: &Conjunction,
        options: &Options,
        aggregate: &Aggregate,
    ) -> Result<Numeric> {
        let answers: Vec<ConceptMap> = self.match_(pattern, options)?.collect::<Result<_>>()?;
        match aggregate {
            Aggregate::Count => Ok(Numeric::Long(answers.len() as i64)),
            Aggregate::Sum(var) => fold_values(&answers, var, |values| {
                if values.iter().all(|value| matches!(value, Value::Long(_))) {
                    Numeric::Long(values.iter().map(|value| long_of(value)).sum())
                } else {
                    Numeric::Double(values.iter().map(double_of).sum())
                }
            }),
            Aggregate::Min(var) => fold_values(&answers, var, |values| {
                pick(values, |a, b| double_of(a) <= double_of(b))
            }),
            Aggregate::Max(var) => fold_values(&answers, var, |values| {
                pick(values, |a, b| double_of(a) >= double_of(b))
            }),
            Aggregate::Mean(var) => fold_values(&answers, var, |values| {
                Numeric::Double(values.iter().map(double_of).sum::<f64>() / values.len() as f64)
            }),
        }
    }

    pub fn match_group(
        &self,
        pattern: &Conjunction,
        options: &Options,
        by: &str,
    ) -> Result<Vec<(Concept, Vec<ConceptMap>)>> {
        let answers: Vec<ConceptMap> = self.match_(pattern, options)?.collect::<Result<_>>()?;
        let mut groups: Vec<(Concept, Vec<ConceptMap>)> = Vec::new();
        for answer in answers {
            let Some(owner) = answer.get(by).cloned() else {
                return Err(MotifError::IllegalState("group variable is unbound"));
            };
            match groups.iter_mut().find(|(concept, _)| *concept == owner) {
                Some((_, members)) => members.push(answer),
                None => groups.push((owner, vec![answer])),
            }
        }
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(groups)
    }

    /// The planned traversal for a pattern, for `explain`.
    pub fn explain(&self, pattern: &Conjunction) -> Result<String> {
        let prepared = self.prepare(pattern)?;
        let procedure = self
            .db
            .engine
            .procedure_for(&prepared, &self.db.schema, false)?;
        Ok(procedure.summary())
    }

    pub fn insert(&mut self, query: &InsertQuery, options: &Options) -> Result<Vec<ConceptMap>> {
        self.check_data_write()?;
        let mut prepared_insert = query.insert.clone();
        prepared_insert.infer_hints(&self.db.schema)?;

        let matched: Vec<ConceptMap> = match &query.when {
            Some(when) => self.match_(when, options)?.collect::<Result<_>>()?,
            None => vec![ConceptMap::new()],
        };
        let mut out = Vec::with_capacity(matched.len());
        for bound in matched {
            out.push(write::insert_answer(&mut self.data, &prepared_insert, &bound)?);
        }
        Ok(out)
    }

    pub fn delete(&mut self, query: &DeleteQuery, options: &Options) -> Result<()> {
        self.check_data_write()?;
        let matched: Vec<ConceptMap> = self.match_(&query.when, options)?.collect::<Result<_>>()?;
        for answer in matched {
            write::delete_answer(&mut self.data, &query.concepts, &answer)?;
        }
        Ok(())
    }

    /// Update is delete-then-insert over each matched answer.
    pub fn update(&mut self, query: &UpdateQuery, options: &Options) -> Result<Vec<ConceptMap>> {
        self.check_data_write()?;
        let matched: Vec<ConceptMap> = self.match_(&query.when, options)?.collect::<Result<_>>()?;
        let mut prepared_insert = query.insert.clone();
        prepared_insert.infer_hints(&self.db.schema)?;

        let mut out = Vec::with_capacity(matched.len());
        for answer in matched {
            write::delete_answer(&mut self.data, &query.delete, &answer)?;
            let remaining: ConceptMap = answer
                .iter()
                .filter(|(name, _)| !query.delete.iter().any(|deleted| deleted == name))
                .map(|(name, concept)| (name.to_owned(), concept.clone()))
                .collect();
            out.push(write::insert_answer(&mut self.data, &prepared_insert, &remaining)?);
        }
        Ok(out)
    }

    pub fn define(&mut self, definitions: &[Definition]) -> Result<()> {
        self.check_schema_write()?;
        let schema = &self.db.schema;
        for definition in definitions {
            match definition {
                Definition::EntityType { label } => {
                    schema.put_entity_type(label.clone())?;
                }
                Definition::AttributeType { label, value_type } => {
                    schema.put_attribute_type(label.clone(), *value_type)?;
                }
                Definition::RelationType { label, relates } => {
                    let relation = schema.put_relation_type(label.clone())?;
                    for role in relates {
                        schema.put_relates(relation, role)?;
                    }
                }
                Definition::Sub { child, parent } => {
                    let child = schema.resolve(child)?;
                    let parent = schema.resolve(parent)?;
                    schema.put_sub(child, parent)?;
                }
                Definition::Owns {
                    owner,
                    attribute,
                    is_key,
                } => {
                    let owner = schema.resolve(owner)?;
                    let attribute = schema.resolve(attribute)?;
                    schema.put_owns(owner, attribute, *is_key)?;
                }
                Definition::Plays { player, role } => {
                    let player = schema.resolve(player)?;
                    let role = schema.resolve(role)?;
                    schema.put_plays(player, role)?;
                }
                Definition::Rule { label, when, head } => {
                    self.put_rule(label.clone(), when.clone(), head.clone())?;
                }
            }
        }
        Ok(())
    }

    pub fn undefine(&mut self, labels: &[Label]) -> Result<()> {
        self.check_schema_write()?;
        for label in labels {
            if self.db.logic.delete_rule(&label.to_string()).is_ok() {
                continue;
            }
            self.db.schema.undefine(label)?;
        }
        Ok(())
    }

    /// Define a rule: `when` body plus a single-constraint head.
    pub fn put_rule(
        &mut self,
        label: impl Into<String>,
        mut when: Conjunction,
        head: RuleHead,
    ) -> Result<()> {
        self.check_schema_write()?;
        when.infer_hints(&self.db.schema)?;
        self.db.logic.put_rule(label, when, head)
    }

    pub fn commit(self) -> Result<()> {
        if self.kind == TransactionType::Read && self.data.has_writes() {
            return Err(MotifError::TransactionReadViolation);
        }
        self.data.commit()
    }
}

fn fold_values(
    answers: &[ConceptMap],
    var: &str,
    fold: impl FnOnce(&[Value]) -> Numeric,
) -> Result<Numeric> {
    let mut values = Vec::with_capacity(answers.len());
    for answer in answers {
        let Some(Concept::Thing(iid)) = answer.get(var) else {
            return Err(MotifError::IllegalState("aggregate variable is unbound"));
        };
        values.push(iid.value()?);
    }
    if values.is_empty() {
        return Ok(Numeric::Long(0));
    }
    Ok(fold(&values))
}

fn long_of(value: &Value) -> i64 {
    match value {
        Value::Long(v) => *v,
        Value::DateTime(v) => *v,
        _ => 0,
    }
}

fn double_of(value: &Value) -> f64 {
    match value {
        Value::Long(v) => *v as f64,
        Value::Double(v) => *v,
        Value::DateTime(v) => *v as f64,
        Value::Bool(v) => f64::from(*v),
        Value::String(_) => f64::NAN,
    }
}

fn pick(values: &[Value], better: impl Fn(&Value, &Value) -> bool) -> Numeric {
    let mut best = &values[0];
    for value in &values[1..] {
        if better(value, best) {
            best = value;
        }
    }
    match best {
        Value::Long(v) => Numeric::Long(*v),
        Value::Double(v) => Numeric::Double(*v),
        Value::DateTime(v) => Numeric::Long(*v),
        _ => Numeric::Double(f64::NAN),
    }
}
