//! Traversal engine: projects patterns to structures, plans them (with a
//! per-structure planner cache), and streams answers from the executor.

pub mod planner;
pub mod procedure;
pub mod structure;

use std::num::NonZeroUsize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;

use crate::answer::ConceptMap;
use crate::error::{MotifError, Result};
use crate::graph::{DataGraph, SchemaGraph};
use crate::pattern::{Conjunction, Reference};
use crate::traversal::planner::GraphPlanner;
use crate::traversal::procedure::{GraphProcedure, ProcedureVertex, TraversalIterator};
use crate::traversal::structure::project;

const PLANNER_CACHE_CAPACITY: usize = 256;

/// Streaming answers; serial traversals stay lazy, parallel and
/// negation-filtered ones are merged eagerly.
pub enum AnswerStream<'a> {
    Lazy(Box<TraversalIterator<'a>>),
    Eager(std::vec::IntoIter<ConceptMap>),
}

impl std::fmt::Debug for AnswerStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerStream::Lazy(_) => f.write_str("AnswerStream::Lazy(..)"),
            AnswerStream::Eager(_) => f.write_str("AnswerStream::Eager(..)"),
        }
    }
}

impl Iterator for AnswerStream<'_> {
    type Item = Result<ConceptMap>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            AnswerStream::Lazy(inner) => inner.next(),
            AnswerStream::Eager(inner) => inner.next().map(Ok),
        }
    }
}

/// Per-database traversal engine; planners are singletons per structure
/// fingerprint so repeated queries reuse their solved plans.
pub struct TraversalEngine {
    planners: Mutex<LruCache<u64, Arc<GraphPlanner>>>,
}

impl TraversalEngine {
    pub fn new() -> Self {
        Self {
            planners: Mutex::new(LruCache::new(
                NonZeroUsize::new(PLANNER_CACHE_CAPACITY).expect("non-zero capacity"),
            )),
        }
    }

    /// Plan a conjunction, reusing the cached planner when the structure was
    /// seen before.
    pub fn procedure_for(
        &self,
        conjunction: &Conjunction,
        schema: &SchemaGraph,
        extra_time: bool,
    ) -> Result<Arc<GraphProcedure>> {
        let structure = project(conjunction, schema);
        if structure.vertices().is_empty() {
            return Err(MotifError::IllegalState("cannot traverse an empty pattern"));
        }
        if !structure.is_connected() {
            return Err(MotifError::DisconnectedPattern);
        }
        if structure.vertices().len() == 1 {
            let vertex = &structure.vertices()[0];
            return Ok(Arc::new(GraphProcedure::vertex_only(ProcedureVertex {
                id: vertex.id,
                var: vertex.var,
                reference: vertex.reference.clone(),
                is_thing: vertex.kind == structure::VertexKind::Thing,
                is_start: true,
                props: vertex.props.clone(),
            })));
        }

        let fingerprint = structure.fingerprint();
        let planner = {
            let mut cache = self.planners.lock();
            match cache.get(&fingerprint) {
                Some(planner) => planner.clone(),
                None => {
                    debug!(fingerprint, "creating planner for new structure");
                    let planner = Arc::new(GraphPlanner::create(structure));
                    cache.put(fingerprint, planner.clone());
                    planner
                }
            }
        };
        planner.optimise(schema, extra_time)?;
        Ok(planner.procedure())
    }

    /// Stream answers for a conjunction against one transaction's data.
    pub fn execute<'a>(
        &self,
        data: &'a DataGraph,
        conjunction: &Conjunction,
        cancelled: Arc<AtomicBool>,
        parallel: bool,
    ) -> Result<AnswerStream<'a>> {
        let schema = data.schema();
        let procedure = self.procedure_for(conjunction, schema, false)?;

        let has_nested =
            !conjunction.negations().is_empty() || !conjunction.disjunctions().is_empty();
        if !has_nested && !parallel {
            return Ok(AnswerStream::Lazy(Box::new(TraversalIterator::new(
                data,
                procedure,
                cancelled,
            ))));
        }

        let mut answers = if parallel {
            self.collect_parallel(data, procedure, cancelled.clone())?
        } else {
            TraversalIterator::new(data, procedure, cancelled.clone())
                .collect::<Result<Vec<_>>>()?
        };

        for negation in conjunction.negations() {
            answers = self.filter_negation(data, negation, answers, cancelled.clone())?;
        }
        for branches in conjunction.disjunctions() {
            answers = self.join_disjunction(data, branches, answers, cancelled.clone())?;
        }
        Ok(AnswerStream::Eager(answers.into_iter()))
    }

    /// Fan out over disjoint start partitions and merge, order unspecified.
    fn collect_parallel(
        &self,
        data: &DataGraph,
        procedure: Arc<GraphProcedure>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Vec<ConceptMap>> {
        let probe = TraversalIterator::new(data, procedure.clone(), cancelled.clone());
        let starts = probe.start_candidates()?;
        if starts.is_empty() {
            return Ok(Vec::new());
        }
        let partitions = rayon::current_num_threads().max(1);
        let chunk_size = starts.len().div_ceil(partitions);
        let chunks: Vec<Vec<_>> = starts
            .chunks(chunk_size)
            .map(<[_]>::to_vec)
            .collect();

        let results: Vec<Result<Vec<ConceptMap>>> = chunks
            .into_par_iter()
            .map(|chunk| {
                TraversalIterator::with_start_candidates(
                    data,
                    procedure.clone(),
                    cancelled.clone(),
                    chunk,
                )
                .collect()
            })
            .collect();

        let mut merged = Vec::new();
        for result in results {
            merged.extend(result?);
        }
        Ok(merged)
    }

    /// Remove answers for which the negated pattern has a compatible answer.
    fn filter_negation(
        &self,
        data: &DataGraph,
        negation: &Conjunction,
        answers: Vec<ConceptMap>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Vec<ConceptMap>> {
        let negative: Vec<ConceptMap> =
            self.execute(data, negation, cancelled, false)?.collect::<Result<_>>()?;
        let shared: Vec<String> = shared_names(negation);
        Ok(answers
            .into_iter()
            .filter(|answer| {
                !negative
                    .iter()
                    .any(|blocked| compatible_on(answer, blocked, &shared))
            })
            .collect())
    }

    /// Keep answers compatible with at least one branch, extending them with
    /// the branch's bindings.
    fn join_disjunction(
        &self,
        data: &DataGraph,
        branches: &[Conjunction],
        answers: Vec<ConceptMap>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Vec<ConceptMap>> {
        let mut joined = Vec::new();
        for branch in branches {
            let branch_answers: Vec<ConceptMap> = self
                .execute(data, branch, cancelled.clone(), false)?
                .collect::<Result<_>>()?;
            let shared = shared_names(branch);
            for answer in &answers {
                for branch_answer in &branch_answers {
                    if compatible_on(answer, branch_answer, &shared) {
                        let mut merged = answer.clone();
                        for (name, concept) in branch_answer.iter() {
                            merged.bind(name, concept.clone());
                        }
                        joined.push(merged);
                    }
                }
            }
        }
        joined.sort();
        joined.dedup();
        Ok(joined)
    }
}

impl Default for TraversalEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn shared_names(conjunction: &Conjunction) -> Vec<String> {
    conjunction
        .variables()
        .iter()
        .filter_map(|variable| match variable.reference() {
            Reference::Name(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// Two answers agree on every shared name they both bind.
fn compatible_on(a: &ConceptMap, b: &ConceptMap, names: &[String]) -> bool {
    names.iter().all(|name| match (a.get(name), b.get(name)) {
        (Some(left), Some(right)) => left == right,
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Value, ValueType};
    use crate::graph::Label;
    use crate::graph::{DataGraph, SchemaGraph};
    use crate::storage::{MemStore, Store};

    fn fixture() -> (Arc<SchemaGraph>, Arc<MemStore>, Arc<crate::graph::WriterRegistry>) {
        (
            Arc::new(SchemaGraph::new()),
            Arc::new(MemStore::new()),
            Arc::new(crate::graph::WriterRegistry::default()),
        )
    }

    fn people_with_names(
        schema: &Arc<SchemaGraph>,
        store: &Arc<MemStore>,
        registry: &Arc<crate::graph::WriterRegistry>,
        names: &[&str],
    ) {
        let person = schema.put_entity_type("person").unwrap();
        let name = schema
            .put_attribute_type("name", ValueType::String)
            .unwrap();
        schema.put_owns(person, name, false).unwrap();
        let mut txn = DataGraph::new(
            schema.clone(),
            store.clone() as Arc<dyn Store>,
            registry.clone(),
        );
        for value in names {
            let thing = txn.insert_entity(person).unwrap();
            let attribute = txn
                .put_attribute(name, &Value::String((*value).into()))
                .unwrap();
            txn.put_has(&thing, &attribute).unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn single_vertex_pattern_streams_instances() {
        let (schema, store, registry) = fixture();
        people_with_names(&schema, &store, &registry, &["alice", "bob"]);

        // a bare `$y` is a one-vertex pattern: every stored thing matches
        let mut bare = Conjunction::new();
        bare.named_thing("y");

        let engine = TraversalEngine::new();
        let data = DataGraph::new(schema.clone(), store.clone() as Arc<dyn Store>, registry);
        let answers: Vec<_> = engine
            .execute(&data, &bare, Arc::new(AtomicBool::new(false)), false)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        // two people and two name attributes
        assert_eq!(answers.len(), 4);
    }

    #[test]
    fn has_pattern_joins_owner_and_attribute() {
        let (schema, store, registry) = fixture();
        people_with_names(&schema, &store, &registry, &["alice", "bob"]);

        let mut conj = Conjunction::new();
        let x = conj.named_thing("x");
        conj.isa_label(x, Label::of("person"));
        let n = conj.named_thing("n");
        conj.isa_label(n, Label::of("name"));
        conj.has(x, n);

        let engine = TraversalEngine::new();
        let data = DataGraph::new(schema.clone(), store.clone() as Arc<dyn Store>, registry);
        let answers: Vec<_> = engine
            .execute(&data, &conj, Arc::new(AtomicBool::new(false)), false)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(answers.len(), 2);
        for answer in &answers {
            assert!(answer.get("x").is_some());
            assert!(answer.get("n").is_some());
        }
    }

    #[test]
    fn parallel_execution_finds_the_same_answers() {
        let (schema, store, registry) = fixture();
        people_with_names(&schema, &store, &registry, &["a", "b", "c", "d", "e"]);

        let mut conj = Conjunction::new();
        let x = conj.named_thing("x");
        conj.isa_label(x, Label::of("person"));
        let n = conj.named_thing("n");
        conj.isa_label(n, Label::of("name"));
        conj.has(x, n);

        let engine = TraversalEngine::new();
        let data = DataGraph::new(schema.clone(), store.clone() as Arc<dyn Store>, registry);
        let mut serial: Vec<_> = engine
            .execute(&data, &conj, Arc::new(AtomicBool::new(false)), false)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let mut parallel: Vec<_> = engine
            .execute(&data, &conj, Arc::new(AtomicBool::new(false)), true)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        serial.sort();
        parallel.sort();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn cancellation_stops_the_stream() {
        let (schema, store, registry) = fixture();
        people_with_names(&schema, &store, &registry, &["alice", "bob"]);

        let mut conj = Conjunction::new();
        let y = conj.named_thing("y");
        conj.isa_label(y, Label::of("person"));

        let engine = TraversalEngine::new();
        let data = DataGraph::new(schema.clone(), store.clone() as Arc<dyn Store>, registry);
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut stream = engine
            .execute(&data, &conj, cancelled.clone(), false)
            .unwrap();
        assert!(stream.next().is_some());
        cancelled.store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(stream.next().is_none());
    }

    #[test]
    fn value_type_property_filters_type_candidates() {
        let (schema, store, registry) = fixture();
        people_with_names(&schema, &store, &registry, &["alice"]);

        let mut conj = Conjunction::new();
        let t = conj.named_type("t");
        conj.value_type(t, ValueType::String);

        let engine = TraversalEngine::new();
        let data = DataGraph::new(schema.clone(), store.clone() as Arc<dyn Store>, registry);
        let answers: Vec<_> = engine
            .execute(&data, &conj, Arc::new(AtomicBool::new(false)), false)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        // only the name attribute type declares a string value kind
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn disconnected_pattern_is_rejected() {
        let (schema, store, registry) = fixture();
        people_with_names(&schema, &store, &registry, &["alice"]);

        let mut conj = Conjunction::new();
        let x = conj.named_thing("x");
        conj.isa_label(x, Label::of("person"));
        let y = conj.named_thing("y");
        conj.isa_label(y, Label::of("person"));

        let engine = TraversalEngine::new();
        let data = DataGraph::new(schema.clone(), store.clone() as Arc<dyn Store>, registry);
        let err = engine
            .execute(&data, &conj, Arc::new(AtomicBool::new(false)), false)
            .unwrap_err();
        assert_eq!(err, MotifError::DisconnectedPattern);
    }
}
