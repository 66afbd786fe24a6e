//! Ordered traversal procedures and their depth-first streaming executor.
//! Answers are produced lazily: the caller pulls, and dropping the iterator
//! releases everything. Cancellation is cooperative via a shared flag checked
//! at every yield.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::answer::{Concept, ConceptMap};
use crate::encoding::{Infix, ThingIid, TypeIid, TypeKind};
use crate::error::{MotifError, Result};
use crate::graph::{DataGraph, Label, SchemaGraph};
use crate::pattern::{Reference, VarId};
use crate::traversal::structure::{EdgeKind, VertexId, VertexProps};

#[derive(Clone, Debug)]
pub struct ProcedureVertex {
    pub id: VertexId,
    pub var: VarId,
    pub reference: Reference,
    pub is_thing: bool,
    pub is_start: bool,
    pub props: VertexProps,
}

#[derive(Clone, Debug)]
pub struct ProcedureEdge {
    pub order: usize,
    pub kind: EdgeKind,
    pub from: VertexId,
    pub to: VertexId,
    pub is_forward: bool,
}

impl ProcedureEdge {
    /// The pattern-level relation vertex of a role-player edge: its source
    /// when walked forward, its target when walked backward.
    fn relation_vertex(&self) -> Option<VertexId> {
        match self.kind {
            EdgeKind::RolePlayer { .. } => Some(if self.is_forward { self.from } else { self.to }),
            _ => None,
        }
    }
}

/// An ordered edge-walk plan over a structure. Derived, discardable, and
/// recomputable when statistics drift.
#[derive(Clone, Debug)]
pub struct GraphProcedure {
    vertices: Vec<ProcedureVertex>,
    edges: Vec<ProcedureEdge>,
}

impl GraphProcedure {
    pub fn new(vertices: Vec<ProcedureVertex>, edges: Vec<ProcedureEdge>) -> Self {
        Self { vertices, edges }
    }

    /// Degenerate procedure for a single-variable pattern.
    pub fn vertex_only(vertex: ProcedureVertex) -> Self {
        Self {
            vertices: vec![vertex],
            edges: Vec::new(),
        }
    }

    pub fn vertices(&self) -> &[ProcedureVertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[ProcedureEdge] {
        &self.edges
    }

    pub fn start_vertex(&self) -> &ProcedureVertex {
        self.vertices
            .iter()
            .find(|vertex| vertex.is_start)
            .expect("procedure has a starting vertex")
    }

    fn vertex(&self, id: VertexId) -> &ProcedureVertex {
        self.vertices
            .iter()
            .find(|vertex| vertex.id == id)
            .expect("edge endpoints are procedure vertices")
    }

    /// True when more than one role-player edge hangs off `relation`; those
    /// edges must then consume distinct role instances.
    fn needs_role_distinctness(&self, relation: VertexId) -> bool {
        self.edges
            .iter()
            .filter(|edge| edge.relation_vertex() == Some(relation))
            .count()
            > 1
    }

    /// Check the traversal-order invariant: exactly one start, and every
    /// edge's source is the start or the target of an earlier edge.
    pub fn validate(&self) -> Result<()> {
        let starts = self.vertices.iter().filter(|vertex| vertex.is_start).count();
        if starts != 1 {
            return Err(MotifError::IllegalState("procedure must have one start"));
        }
        let mut visited = vec![self.start_vertex().id];
        for edge in &self.edges {
            if !visited.contains(&edge.from) {
                return Err(MotifError::IllegalState("edge source not yet visited"));
            }
            if !visited.contains(&edge.to) {
                visited.push(edge.to);
            }
        }
        if visited.len() != self.vertices.len() {
            return Err(MotifError::IllegalState("procedure does not span pattern"));
        }
        Ok(())
    }

    /// Deterministic one-line rendering, used by plan comparisons and logs.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("start={}", self.start_vertex().id.0)];
        for edge in &self.edges {
            parts.push(format!(
                "{}:{}{}→{}",
                edge.order,
                edge.kind.name(),
                edge.from.0,
                edge.to.0
            ));
        }
        parts.join(" ")
    }
}

/// One binding candidate; role-player candidates remember which role
/// instance carried them so sibling edges can stay disjoint.
#[derive(Clone, Debug)]
struct Candidate {
    concept: Concept,
    role_instance: Option<ThingIid>,
}

impl Candidate {
    fn plain(concept: Concept) -> Self {
        Self {
            concept,
            role_instance: None,
        }
    }
}

struct Frame {
    target: VertexId,
    relation_vertex: Option<VertexId>,
    candidates: Vec<Candidate>,
    next: usize,
    owns_binding: bool,
}

impl Frame {
    fn current_role_instance(&self) -> Option<&ThingIid> {
        self.next
            .checked_sub(1)
            .and_then(|index| self.candidates.get(index))
            .and_then(|candidate| candidate.role_instance.as_ref())
    }
}

/// Lazy depth-first evaluation of a procedure against one transaction's
/// data graph.
pub struct TraversalIterator<'a> {
    data: &'a DataGraph,
    procedure: Arc<GraphProcedure>,
    cancelled: Arc<AtomicBool>,
    stack: Vec<Frame>,
    bindings: FxHashMap<VertexId, Concept>,
    started: bool,
    start_override: Option<Vec<Concept>>,
    done: bool,
}

impl<'a> TraversalIterator<'a> {
    pub fn new(
        data: &'a DataGraph,
        procedure: Arc<GraphProcedure>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            data,
            procedure,
            cancelled,
            stack: Vec::new(),
            bindings: FxHashMap::default(),
            started: false,
            start_override: None,
            done: false,
        }
    }

    /// Evaluate with a fixed start-candidate partition; the parallel producer
    /// fans out over disjoint partitions.
    pub fn with_start_candidates(
        data: &'a DataGraph,
        procedure: Arc<GraphProcedure>,
        cancelled: Arc<AtomicBool>,
        candidates: Vec<Concept>,
    ) -> Self {
        let mut iterator = Self::new(data, procedure, cancelled);
        iterator.start_override = Some(candidates);
        iterator
    }

    fn schema(&self) -> &SchemaGraph {
        self.data.schema()
    }

    pub fn start_candidates(&self) -> Result<Vec<Concept>> {
        let start = self.procedure.start_vertex();
        self.vertex_candidates(start)
    }

    fn vertex_candidates(&self, vertex: &ProcedureVertex) -> Result<Vec<Concept>> {
        let schema = self.schema();
        let mut candidates = if vertex.is_thing {
            if let Some(iid) = &vertex.props.iid {
                if self.data.contains_vertex(iid) {
                    vec![Concept::Thing(iid.clone())]
                } else {
                    Vec::new()
                }
            } else if !vertex.props.types.is_empty() {
                let mut out = Vec::new();
                for label in &vertex.props.types {
                    let type_iid = schema.resolve(label)?;
                    for thing in self.data.instances_of(type_iid, false)? {
                        out.push(Concept::Thing(thing));
                    }
                }
                out
            } else {
                let mut out = Vec::new();
                for root in [
                    schema.root_entity(),
                    schema.root_attribute(),
                    schema.root_relation(),
                ] {
                    for thing in self.data.instances_of(root, true)? {
                        out.push(Concept::Thing(thing));
                    }
                }
                out
            }
        } else if !vertex.props.labels.is_empty() {
            vertex
                .props
                .labels
                .iter()
                .filter_map(|label| schema.resolve(label).ok())
                .map(Concept::Type)
                .collect()
        } else {
            let mut types = schema.thing_types();
            types.extend(schema.subtypes_transitive(schema.root_role()));
            types.into_iter().map(Concept::Type).collect()
        };
        candidates.retain(|concept| self.passes_props(vertex, concept));
        Ok(candidates)
    }

    fn passes_props(&self, vertex: &ProcedureVertex, concept: &Concept) -> bool {
        let schema = self.schema();
        match concept {
            Concept::Thing(thing) => {
                if let Some(iid) = &vertex.props.iid {
                    if iid != thing {
                        return false;
                    }
                }
                if !vertex.props.types.is_empty() {
                    let matched = vertex.props.types.iter().any(|label| {
                        schema
                            .resolve(label)
                            .map(|type_iid| type_iid == thing.type_iid())
                            .unwrap_or(false)
                    });
                    if !matched {
                        return false;
                    }
                }
                if !vertex.props.predicates.is_empty() {
                    let Ok(value) = thing.value() else {
                        return false;
                    };
                    for (predicate, operand) in &vertex.props.predicates {
                        match value.compare(operand) {
                            Some(ordering) if predicate.test(ordering) => {}
                            _ => return false,
                        }
                    }
                }
                true
            }
            Concept::Type(type_iid) => {
                if !vertex.props.labels.is_empty() {
                    let matched = vertex.props.labels.iter().any(|label| {
                        schema
                            .resolve(label)
                            .map(|resolved| resolved == *type_iid)
                            .unwrap_or(false)
                    });
                    if !matched {
                        return false;
                    }
                }
                if let Some(value_type) = vertex.props.value_type {
                    if schema.value_type_of(*type_iid).ok().flatten() != Some(value_type) {
                        return false;
                    }
                }
                if let Some(regex) = &vertex.props.regex {
                    // matches the declaration, not the value space
                    if schema.regex_of(*type_iid).ok().flatten().as_deref() != Some(regex) {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Role instances already consumed by active sibling role-player frames
    /// of the same relation variable.
    fn used_role_instances(&self, relation: VertexId) -> Vec<ThingIid> {
        self.stack
            .iter()
            .filter(|frame| frame.relation_vertex == Some(relation))
            .filter_map(Frame::current_role_instance)
            .cloned()
            .collect()
    }

    fn eval_role_player(
        &self,
        edge: &ProcedureEdge,
        source: &ThingIid,
        role_types: &[Label],
    ) -> Result<Vec<Candidate>> {
        let resolved = self.resolve_role_types(role_types);
        let relation = edge
            .relation_vertex()
            .expect("role-player edges have a relation side");

        if !self.procedure.needs_role_distinctness(relation) {
            // single role-player edge: the optimised edge scan suffices
            let infix = if edge.is_forward {
                Infix::RolePlayerForward
            } else {
                Infix::RolePlayerBackward
            };
            return Ok(self
                .data
                .role_player_neighbors(source, infix, &resolved)?
                .into_iter()
                .map(|(_, neighbor)| Candidate::plain(Concept::Thing(neighbor)))
                .collect());
        }

        // sibling edges on the same relation: walk through the role
        // instances so each edge consumes a different one
        let used = self.used_role_instances(relation);
        let mut out = Vec::new();
        if edge.is_forward {
            for role in self.data.neighbors(source, Infix::RelatingForward)? {
                if used.contains(&role) {
                    continue;
                }
                if !resolved.is_empty() && !resolved.contains(&role.type_iid()) {
                    continue;
                }
                for player in self.data.neighbors(&role, Infix::PlayingBackward)? {
                    out.push(Candidate {
                        concept: Concept::Thing(player),
                        role_instance: Some(role.clone()),
                    });
                }
            }
        } else {
            for role in self.data.neighbors(source, Infix::PlayingForward)? {
                if used.contains(&role) {
                    continue;
                }
                if !resolved.is_empty() && !resolved.contains(&role.type_iid()) {
                    continue;
                }
                for relation_thing in self.data.neighbors(&role, Infix::RelatingBackward)? {
                    out.push(Candidate {
                        concept: Concept::Thing(relation_thing),
                        role_instance: Some(role.clone()),
                    });
                }
            }
        }
        Ok(out)
    }

    fn eval_edge(&self, edge: &ProcedureEdge, source: &Concept) -> Result<Vec<Candidate>> {
        let schema = self.schema();
        let target_vertex = self.procedure.vertex(edge.to);
        let mut candidates: Vec<Candidate> = match (&edge.kind, edge.is_forward) {
            (EdgeKind::Equal, _) => vec![Candidate::plain(source.clone())],

            (EdgeKind::Predicate(predicate), is_forward) => {
                let source_thing = source
                    .as_thing()
                    .ok_or(MotifError::IllegalState("predicate over a type"))?;
                let source_value = source_thing.value()?;
                let effective = if is_forward {
                    *predicate
                } else {
                    predicate.reflected()
                };
                let target_types: Vec<TypeIid> = if target_vertex.props.types.is_empty() {
                    schema.attribute_types()
                } else {
                    target_vertex
                        .props
                        .types
                        .iter()
                        .filter_map(|label| schema.resolve(label).ok())
                        .collect()
                };
                let mut out = Vec::new();
                for type_iid in target_types {
                    if type_iid.kind() != TypeKind::Attribute {
                        continue;
                    }
                    for thing in self.data.instances_of(type_iid, false)? {
                        let value = thing.value()?;
                        if let Some(ordering) = source_value.compare(&value) {
                            if effective.test(ordering) {
                                out.push(Candidate::plain(Concept::Thing(thing)));
                            }
                        }
                    }
                }
                out
            }

            (EdgeKind::Isa { transitive }, true) => {
                let thing = source
                    .as_thing()
                    .ok_or(MotifError::IllegalState("isa from a non-thing"))?;
                let mut types = vec![thing.type_iid()];
                if *transitive {
                    let mut current = schema.parent_of(thing.type_iid())?;
                    while let Some(parent) = current {
                        types.push(parent);
                        current = schema.parent_of(parent)?;
                    }
                }
                types
                    .into_iter()
                    .map(|iid| Candidate::plain(Concept::Type(iid)))
                    .collect()
            }
            (EdgeKind::Isa { transitive }, false) => {
                let type_iid = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("isa into a non-type"))?;
                self.data
                    .instances_of(type_iid, *transitive)?
                    .into_iter()
                    .map(|thing| Candidate::plain(Concept::Thing(thing)))
                    .collect()
            }

            (EdgeKind::Sub { transitive }, true) => {
                let type_iid = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("sub from a non-type"))?;
                if *transitive {
                    let mut out = vec![type_iid];
                    let mut current = schema.parent_of(type_iid)?;
                    while let Some(parent) = current {
                        out.push(parent);
                        current = schema.parent_of(parent)?;
                    }
                    out.into_iter()
                        .map(|iid| Candidate::plain(Concept::Type(iid)))
                        .collect()
                } else {
                    schema
                        .parent_of(type_iid)?
                        .into_iter()
                        .map(|iid| Candidate::plain(Concept::Type(iid)))
                        .collect()
                }
            }
            (EdgeKind::Sub { transitive }, false) => {
                let type_iid = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("sub into a non-type"))?;
                let subtypes = if *transitive {
                    schema.subtypes_transitive(type_iid)
                } else {
                    schema.subtypes_direct(type_iid)
                };
                subtypes
                    .into_iter()
                    .map(|iid| Candidate::plain(Concept::Type(iid)))
                    .collect()
            }

            (EdgeKind::Owns { is_key }, true) => {
                let owner = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("owns from a non-type"))?;
                self.owns_closure(owner, *is_key)?
                    .into_iter()
                    .map(|iid| Candidate::plain(Concept::Type(iid)))
                    .collect()
            }
            (EdgeKind::Owns { is_key }, false) => {
                let attribute = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("owns into a non-type"))?;
                let mut out = Vec::new();
                for owner in schema.owners_of_attribute(attribute) {
                    if !is_key || self.owns_closure(owner, true)?.contains(&attribute) {
                        out.push(Candidate::plain(Concept::Type(owner)));
                    }
                }
                out
            }

            (EdgeKind::Plays, true) => {
                let player = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("plays from a non-type"))?;
                self.plays_closure(player)?
                    .into_iter()
                    .map(|iid| Candidate::plain(Concept::Type(iid)))
                    .collect()
            }
            (EdgeKind::Plays, false) => {
                let role = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("plays into a non-type"))?;
                let mut out = Vec::new();
                for candidate in schema.thing_types() {
                    if self.plays_closure(candidate)?.contains(&role) {
                        out.push(Candidate::plain(Concept::Type(candidate)));
                    }
                }
                out
            }

            (EdgeKind::Relates, true) => {
                let relation = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("relates from a non-type"))?;
                schema
                    .relates_of(relation)?
                    .into_iter()
                    .map(|iid| Candidate::plain(Concept::Type(iid)))
                    .collect()
            }
            (EdgeKind::Relates, false) => {
                let role = source
                    .as_type()
                    .ok_or(MotifError::IllegalState("relates into a non-type"))?;
                vec![Candidate::plain(Concept::Type(schema.relation_of_role(role)?))]
            }

            (EdgeKind::Has, is_forward) => {
                let thing = source
                    .as_thing()
                    .ok_or(MotifError::IllegalState("has over a type"))?;
                let infix = if is_forward {
                    Infix::HasForward
                } else {
                    Infix::HasBackward
                };
                self.data
                    .neighbors(thing, infix)?
                    .into_iter()
                    .map(|neighbor| Candidate::plain(Concept::Thing(neighbor)))
                    .collect()
            }

            (EdgeKind::Playing, is_forward) => {
                let thing = source
                    .as_thing()
                    .ok_or(MotifError::IllegalState("playing over a type"))?;
                let infix = if is_forward {
                    Infix::PlayingForward
                } else {
                    Infix::PlayingBackward
                };
                self.data
                    .neighbors(thing, infix)?
                    .into_iter()
                    .map(|neighbor| Candidate::plain(Concept::Thing(neighbor)))
                    .collect()
            }

            (EdgeKind::Relating, is_forward) => {
                let thing = source
                    .as_thing()
                    .ok_or(MotifError::IllegalState("relating over a type"))?;
                let infix = if is_forward {
                    Infix::RelatingForward
                } else {
                    Infix::RelatingBackward
                };
                self.data
                    .neighbors(thing, infix)?
                    .into_iter()
                    .map(|neighbor| Candidate::plain(Concept::Thing(neighbor)))
                    .collect()
            }

            (EdgeKind::RolePlayer { role_types }, _) => {
                let thing = source
                    .as_thing()
                    .ok_or(MotifError::IllegalState("role-player over a type"))?;
                self.eval_role_player(edge, thing, role_types)?
            }
        };
        candidates.retain(|candidate| self.passes_props(target_vertex, &candidate.concept));
        candidates.sort_by(|a, b| {
            a.concept
                .cmp(&b.concept)
                .then_with(|| a.role_instance.cmp(&b.role_instance))
        });
        candidates.dedup_by(|a, b| a.concept == b.concept && a.role_instance == b.role_instance);
        Ok(candidates)
    }

    fn resolve_role_types(&self, role_types: &[Label]) -> Vec<TypeIid> {
        role_types
            .iter()
            .filter_map(|label| self.schema().resolve(label).ok())
            .collect()
    }

    fn owns_closure(&self, owner: TypeIid, key_only: bool) -> Result<Vec<TypeIid>> {
        let schema = self.schema();
        let mut out = Vec::new();
        let mut current = Some(owner);
        while let Some(iid) = current {
            for (attribute, is_key) in schema.owns_of(iid)? {
                if (!key_only || is_key) && !out.contains(&attribute) {
                    out.push(attribute);
                }
            }
            current = schema.parent_of(iid)?;
        }
        Ok(out)
    }

    fn plays_closure(&self, player: TypeIid) -> Result<Vec<TypeIid>> {
        let schema = self.schema();
        let mut out = Vec::new();
        let mut current = Some(player);
        while let Some(iid) = current {
            for role in schema.plays_of(iid)? {
                if !out.contains(&role) {
                    out.push(role);
                }
            }
            current = schema.parent_of(iid)?;
        }
        Ok(out)
    }

    fn push_frame(
        &mut self,
        target: VertexId,
        relation_vertex: Option<VertexId>,
        mut candidates: Vec<Candidate>,
    ) {
        let owns_binding = !self.bindings.contains_key(&target);
        if !owns_binding {
            // closure edge: only re-confirm the existing binding
            let bound = self.bindings[&target].clone();
            candidates.retain(|candidate| candidate.concept == bound);
        }
        self.stack.push(Frame {
            target,
            relation_vertex,
            candidates,
            next: 0,
            owns_binding,
        });
    }

    fn answer(&self) -> ConceptMap {
        let mut map = ConceptMap::new();
        for vertex in self.procedure.vertices() {
            if let Reference::Name(name) = &vertex.reference {
                if let Some(concept) = self.bindings.get(&vertex.id) {
                    map.bind(name.clone(), concept.clone());
                }
            }
        }
        map
    }

    fn advance(&mut self) -> Result<Option<ConceptMap>> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            let start = self.procedure.start_vertex().clone();
            let candidates = match self.start_override.take() {
                Some(candidates) => candidates,
                None => self.vertex_candidates(&start)?,
            };
            self.push_frame(
                start.id,
                None,
                candidates.into_iter().map(Candidate::plain).collect(),
            );
        }
        let total_edges = self.procedure.edges().len();

        while let Some(frame_index) = self.stack.len().checked_sub(1) {
            if self.cancelled.load(Ordering::Relaxed) {
                self.done = true;
                return Ok(None);
            }
            let frame = &mut self.stack[frame_index];
            if frame.next >= frame.candidates.len() {
                let frame = self.stack.pop().expect("checked non-empty");
                if frame.owns_binding {
                    self.bindings.remove(&frame.target);
                }
                continue;
            }
            let concept = frame.candidates[frame.next].concept.clone();
            frame.next += 1;
            let target = frame.target;
            if frame.owns_binding {
                self.bindings.insert(target, concept);
            }

            if self.stack.len() == total_edges + 1 {
                return Ok(Some(self.answer()));
            }
            let edge = self.procedure.edges()[self.stack.len() - 1].clone();
            let source = self
                .bindings
                .get(&edge.from)
                .cloned()
                .ok_or(MotifError::IllegalState("edge source unbound"))?;
            let candidates = self.eval_edge(&edge, &source)?;
            self.push_frame(edge.to, edge.relation_vertex(), candidates);
        }
        self.done = true;
        Ok(None)
    }
}

impl Iterator for TraversalIterator<'_> {
    type Item = Result<ConceptMap>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(answer)) => Some(Ok(answer)),
            Ok(None) => None,
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
