//! Graph projection of a pattern: one vertex per planned variable, one edge
//! per inter-variable constraint. The planner and executor work exclusively
//! on this form; the pattern itself stays immutable per query.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::encoding::{ThingIid, Value};
use crate::graph::{Label, SchemaGraph};
use crate::pattern::{
    Conjunction, Predicate, Reference, ThingConstraint, TypeConstraint, ValueOperand, VarId,
    Variable,
};

/// Index of a vertex inside its structure.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct VertexId(pub u32);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VertexKind {
    Thing,
    Type,
}

/// Vertex-local lookup properties, intersected with edge candidates when the
/// vertex is first bound.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexProps {
    /// Declared labels of a type vertex.
    pub labels: Vec<Label>,
    /// Resolved type-hint labels of a thing vertex.
    pub types: Vec<Label>,
    pub iid: Option<ThingIid>,
    /// Constant value predicates of a thing vertex.
    pub predicates: Vec<(Predicate, Value)>,
    /// Declared value kind of a type vertex.
    pub value_type: Option<crate::encoding::ValueType>,
    /// Declared value pattern of a type vertex.
    pub regex: Option<String>,
}

impl VertexProps {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.types.is_empty()
            && self.iid.is_none()
            && self.predicates.is_empty()
            && self.value_type.is_none()
            && self.regex.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct StructureVertex {
    pub id: VertexId,
    pub var: VarId,
    pub reference: Reference,
    pub kind: VertexKind,
    pub props: VertexProps,
}

/// Edge categories over the structure. `Equal` joins identical bindings,
/// `Predicate` compares two attribute variables, the rest are native graph
/// edges.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeKind {
    Equal,
    Predicate(Predicate),
    Isa { transitive: bool },
    Sub { transitive: bool },
    Owns { is_key: bool },
    Plays,
    Relates,
    Has,
    Playing,
    Relating,
    RolePlayer { role_types: Vec<Label> },
}

impl EdgeKind {
    pub fn name(&self) -> &'static str {
        match self {
            EdgeKind::Equal => "equal",
            EdgeKind::Predicate(_) => "predicate",
            EdgeKind::Isa { .. } => "isa",
            EdgeKind::Sub { .. } => "sub",
            EdgeKind::Owns { .. } => "owns",
            EdgeKind::Plays => "plays",
            EdgeKind::Relates => "relates",
            EdgeKind::Has => "has",
            EdgeKind::Playing => "playing",
            EdgeKind::Relating => "relating",
            EdgeKind::RolePlayer { .. } => "role-player",
        }
    }
}

#[derive(Clone, Debug)]
pub struct StructureEdge {
    pub index: usize,
    pub kind: EdgeKind,
    pub from: VertexId,
    pub to: VertexId,
}

/// The planner's input graph.
#[derive(Clone, Debug, Default)]
pub struct Structure {
    vertices: Vec<StructureVertex>,
    edges: Vec<StructureEdge>,
    by_var: FxHashMap<VarId, VertexId>,
}

impl Structure {
    pub fn vertices(&self) -> &[StructureVertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[StructureEdge] {
        &self.edges
    }

    pub fn vertex(&self, id: VertexId) -> &StructureVertex {
        &self.vertices[id.0 as usize]
    }

    pub fn vertex_of_var(&self, var: VarId) -> Option<VertexId> {
        self.by_var.get(&var).copied()
    }

    fn add_vertex(&mut self, var: VarId, reference: Reference, kind: VertexKind) -> VertexId {
        if let Some(existing) = self.by_var.get(&var) {
            return *existing;
        }
        let id = VertexId(self.vertices.len() as u32);
        self.vertices.push(StructureVertex {
            id,
            var,
            reference,
            kind,
            props: VertexProps::default(),
        });
        self.by_var.insert(var, id);
        id
    }

    fn add_edge(&mut self, kind: EdgeKind, from: VertexId, to: VertexId) {
        let index = self.edges.len();
        self.edges.push(StructureEdge {
            index,
            kind,
            from,
            to,
        });
    }

    /// Edges touching `vertex`.
    pub fn edges_of(&self, vertex: VertexId) -> impl Iterator<Item = &StructureEdge> {
        self.edges
            .iter()
            .filter(move |edge| edge.from == vertex || edge.to == vertex)
    }

    /// True when every vertex is reachable from the first over edges.
    pub fn is_connected(&self) -> bool {
        if self.vertices.len() <= 1 {
            return true;
        }
        if self.edges.is_empty() {
            return false;
        }
        let mut seen: FxHashSet<VertexId> = FxHashSet::default();
        let mut stack = vec![self.vertices[0].id];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for edge in self.edges_of(id) {
                stack.push(edge.from);
                stack.push(edge.to);
            }
        }
        seen.len() == self.vertices.len()
    }

    /// Stable fingerprint over the structure's shape; the traversal engine
    /// keys its planner cache with this.
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for vertex in &self.vertices {
            vertex.var.hash(&mut hasher);
            (vertex.kind == VertexKind::Thing).hash(&mut hasher);
            vertex.props.labels.hash(&mut hasher);
            vertex.props.types.hash(&mut hasher);
            vertex
                .props
                .iid
                .as_ref()
                .map(|iid| iid.bytes().to_vec())
                .hash(&mut hasher);
        }
        for edge in &self.edges {
            edge.kind.name().hash(&mut hasher);
            if let EdgeKind::RolePlayer { role_types } = &edge.kind {
                role_types.hash(&mut hasher);
            }
            edge.from.hash(&mut hasher);
            edge.to.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Project a conjunction to its structure. Type variables that only name a
/// role inside a relation constraint are folded into role hints on the
/// role-player edge rather than planned as vertices.
pub fn project(conjunction: &Conjunction, schema: &SchemaGraph) -> Structure {
    let mut structure = Structure::default();
    let role_only = role_only_vars(conjunction);

    for var in conjunction.var_ids() {
        if role_only.contains(&var) {
            continue;
        }
        let variable = conjunction.variable(var);
        let kind = if variable.is_thing() {
            VertexKind::Thing
        } else {
            VertexKind::Type
        };
        let id = structure.add_vertex(var, variable.reference().clone(), kind);
        structure.vertices[id.0 as usize].props = vertex_props(conjunction, var, schema);
    }

    for var in conjunction.var_ids() {
        if role_only.contains(&var) {
            continue;
        }
        let Some(from) = structure.vertex_of_var(var) else {
            continue;
        };
        match conjunction.variable(var) {
            Variable::Thing { constraints, .. } => {
                for constraint in constraints {
                    project_thing_constraint(
                        &mut structure,
                        conjunction,
                        schema,
                        from,
                        constraint,
                    );
                }
            }
            Variable::Type { constraints, .. } => {
                for constraint in constraints {
                    project_type_constraint(&mut structure, from, constraint);
                }
            }
        }
    }
    structure
}

fn project_thing_constraint(
    structure: &mut Structure,
    conjunction: &Conjunction,
    schema: &SchemaGraph,
    from: VertexId,
    constraint: &ThingConstraint,
) {
    match constraint {
        ThingConstraint::Isa { type_var, explicit, .. } => {
            if let Some(to) = structure.vertex_of_var(*type_var) {
                structure.add_edge(EdgeKind::Isa { transitive: !explicit }, from, to);
            }
        }
        ThingConstraint::Has { attribute } => {
            if let Some(to) = structure.vertex_of_var(*attribute) {
                structure.add_edge(EdgeKind::Has, from, to);
            }
        }
        ThingConstraint::Relation { role_players } => {
            for role_player in role_players {
                let Some(to) = structure.vertex_of_var(role_player.player) else {
                    continue;
                };
                let role_types = if !role_player.role_hints.is_empty() {
                    role_player.role_hints.clone()
                } else {
                    role_player
                        .role_type
                        .and_then(|role_var| conjunction.label_of(role_var))
                        .map(|label| resolve_role_labels(schema, label))
                        .unwrap_or_default()
                };
                structure.add_edge(EdgeKind::RolePlayer { role_types }, from, to);
            }
        }
        ThingConstraint::Value {
            predicate,
            operand: ValueOperand::Variable(other),
        } => {
            if let Some(to) = structure.vertex_of_var(*other) {
                structure.add_edge(EdgeKind::Predicate(*predicate), from, to);
            }
        }
        ThingConstraint::Is { other } => {
            if let Some(to) = structure.vertex_of_var(*other) {
                structure.add_edge(EdgeKind::Equal, from, to);
            }
        }
        // iid and constant values are vertex-local properties
        _ => {}
    }
}

fn project_type_constraint(structure: &mut Structure, from: VertexId, constraint: &TypeConstraint) {
    match constraint {
        TypeConstraint::Sub { supertype, explicit, .. } => {
            if let Some(to) = structure.vertex_of_var(*supertype) {
                structure.add_edge(EdgeKind::Sub { transitive: !explicit }, from, to);
            }
        }
        TypeConstraint::Owns { attribute, is_key } => {
            if let Some(to) = structure.vertex_of_var(*attribute) {
                structure.add_edge(EdgeKind::Owns { is_key: *is_key }, from, to);
            }
        }
        TypeConstraint::Plays { role } => {
            if let Some(to) = structure.vertex_of_var(*role) {
                structure.add_edge(EdgeKind::Plays, from, to);
            }
        }
        TypeConstraint::Relates { role } => {
            if let Some(to) = structure.vertex_of_var(*role) {
                structure.add_edge(EdgeKind::Relates, from, to);
            }
        }
        _ => {}
    }
}

fn vertex_props(conjunction: &Conjunction, var: VarId, schema: &SchemaGraph) -> VertexProps {
    let mut props = VertexProps::default();
    match conjunction.variable(var) {
        Variable::Thing { constraints, .. } => {
            props.types = conjunction.type_hints(var, schema);
            for constraint in constraints {
                match constraint {
                    ThingConstraint::Iid { iid } => props.iid = Some(iid.clone()),
                    ThingConstraint::Value {
                        predicate,
                        operand: ValueOperand::Constant(value),
                    } => props.predicates.push((*predicate, value.clone())),
                    _ => {}
                }
            }
        }
        Variable::Type { constraints, .. } => {
            for constraint in constraints {
                match constraint {
                    TypeConstraint::Label(label) => props.labels.push(label.clone()),
                    TypeConstraint::ValueType(value_type) => props.value_type = Some(*value_type),
                    TypeConstraint::Regex(pattern) => props.regex = Some(pattern.clone()),
                    _ => {}
                }
            }
        }
    }
    props
}

/// Type variables whose only purpose is naming a role inside a relation
/// constraint.
fn role_only_vars(conjunction: &Conjunction) -> FxHashSet<VarId> {
    let mut role_vars: FxHashSet<VarId> = FxHashSet::default();
    let mut otherwise_used: FxHashSet<VarId> = FxHashSet::default();

    for var in conjunction.var_ids() {
        match conjunction.variable(var) {
            Variable::Thing { constraints, .. } => {
                for constraint in constraints {
                    match constraint {
                        ThingConstraint::Relation { role_players } => {
                            for role_player in role_players {
                                if let Some(role) = role_player.role_type {
                                    role_vars.insert(role);
                                }
                            }
                        }
                        ThingConstraint::Isa { type_var, .. } => {
                            otherwise_used.insert(*type_var);
                        }
                        _ => {}
                    }
                }
            }
            Variable::Type { constraints, .. } => {
                for constraint in constraints {
                    match constraint {
                        TypeConstraint::Sub { supertype, .. } => {
                            otherwise_used.insert(*supertype);
                        }
                        TypeConstraint::Owns { attribute, .. } => {
                            otherwise_used.insert(*attribute);
                        }
                        TypeConstraint::Plays { role } | TypeConstraint::Relates { role } => {
                            otherwise_used.insert(*role);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    role_vars
        .into_iter()
        .filter(|var| {
            !otherwise_used.contains(var)
                && !matches!(conjunction.variable(*var).reference(), Reference::Name(_))
        })
        .collect()
}

fn resolve_role_labels(schema: &SchemaGraph, label: &Label) -> Vec<Label> {
    match schema.resolve(label) {
        Ok(iid) => schema
            .subtypes_transitive(iid)
            .into_iter()
            .filter_map(|sub| schema.label_of(sub).ok())
            .collect(),
        Err(_) => vec![label.clone()],
    }
}
