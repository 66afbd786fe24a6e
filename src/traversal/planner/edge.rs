//! Planner-side edges: each structural edge becomes a forward/backward
//! directional pair, each carrying its solver variables and its estimated
//! retrieval cost. Cost formulas read the schema statistics only.

use crate::encoding::TypeIid;
use crate::graph::{Label, SchemaGraph};
use crate::traversal::planner::solver::SolverVar;
use crate::traversal::structure::{EdgeKind, VertexId, VertexProps};

/// Solver variables of one directional edge.
#[derive(Clone, Debug)]
pub struct DirectionalVars {
    pub is_selected: SolverVar,
    pub order_number: SolverVar,
    pub order_assignment: Vec<SolverVar>,
}

#[derive(Clone, Debug)]
pub struct Directional {
    pub from: VertexId,
    pub to: VertexId,
    pub kind: EdgeKind,
    pub is_forward: bool,
    pub vars: Option<DirectionalVars>,
    /// Non-zero floor keeps the change-ratio division safe.
    pub cost_previous: f64,
    pub cost_next: f64,
    pub initial_order: Option<usize>,
    pub selected: bool,
    pub order: usize,
}

impl Directional {
    fn new(from: VertexId, to: VertexId, kind: EdgeKind, is_forward: bool) -> Self {
        Self {
            from,
            to,
            kind,
            is_forward,
            vars: None,
            cost_previous: 0.01,
            cost_next: 0.01,
            initial_order: None,
            selected: false,
            order: 0,
        }
    }

    pub fn record_cost(&mut self) {
        // floored so the next change-ratio division stays finite
        self.cost_previous = self.cost_next.max(0.01);
    }

    /// True for the backward direction of an edge both of whose endpoints are
    /// the same vertex; the warm-start seed skips these.
    pub fn is_self_closure(&self) -> bool {
        self.from == self.to && !self.is_forward
    }
}

/// A structural edge in the planner: both traversal directions.
#[derive(Clone, Debug)]
pub struct PlannerEdge {
    pub index: usize,
    pub forward: Directional,
    pub backward: Directional,
}

impl PlannerEdge {
    pub fn new(index: usize, from: VertexId, to: VertexId, kind: EdgeKind) -> Self {
        Self {
            index,
            forward: Directional::new(from, to, kind.clone(), true),
            backward: Directional::new(to, from, kind, false),
        }
    }

    pub fn directionals(&self) -> [&Directional; 2] {
        [&self.forward, &self.backward]
    }

    pub fn directionals_mut(&mut self) -> [&mut Directional; 2] {
        [&mut self.forward, &mut self.backward]
    }
}

fn resolve_labels(schema: &SchemaGraph, labels: &[Label]) -> Vec<TypeIid> {
    labels
        .iter()
        .filter_map(|label| schema.resolve(label).ok())
        .collect()
}

fn non_zero(value: f64) -> f64 {
    if value <= 0.0 {
        1.0
    } else {
        value
    }
}

fn root_thing_depth(schema: &SchemaGraph) -> u64 {
    let stats = schema.stats();
    stats
        .sub_types_depth(&[
            schema.root_entity(),
            schema.root_attribute(),
            schema.root_relation(),
        ])
}

pub(super) fn thing_instances_transitive(schema: &SchemaGraph) -> u64 {
    let stats = schema.stats();
    stats.instances_transitive(schema.root_entity())
        + stats.instances_transitive(schema.root_attribute())
        + stats.instances_transitive(schema.root_relation())
}

/// Estimated cost of walking this directional given current statistics.
/// `from`/`to` are the props of the walk-direction endpoints.
pub fn directional_cost(
    directional: &Directional,
    from: &VertexProps,
    to: &VertexProps,
    schema: &SchemaGraph,
) -> f64 {
    let stats = schema.stats();
    match (&directional.kind, directional.is_forward) {
        (EdgeKind::Equal, _) => 0.0,

        (EdgeKind::Predicate(predicate), _) => {
            if predicate.is_equality() {
                if !to.types.is_empty() {
                    to.types.len() as f64
                } else if !from.types.is_empty() {
                    stats.att_types_comparable_to(&resolve_labels(schema, &from.types)) as f64
                } else {
                    stats.attribute_type_count() as f64
                }
            } else if !to.types.is_empty() {
                stats.instances_sum(&resolve_labels(schema, &to.types)) as f64
            } else if !from.types.is_empty() {
                stats.instances_sum(&resolve_labels(schema, &from.types)) as f64
            } else {
                stats.instances_transitive(schema.root_attribute()) as f64
            }
        }

        (EdgeKind::Isa { transitive }, true) => {
            if !transitive {
                1.0
            } else if !to.labels.is_empty() {
                stats.sub_types_depth(&resolve_labels(schema, &to.labels)) as f64
            } else {
                root_thing_depth(schema) as f64
            }
        }
        (EdgeKind::Isa { transitive }, false) => {
            let labels = if !to.types.is_empty() {
                resolve_labels(schema, &to.types)
            } else if !from.labels.is_empty() {
                resolve_labels(schema, &from.labels)
            } else {
                Vec::new()
            };
            if labels.is_empty() {
                if *transitive {
                    thing_instances_transitive(schema) as f64
                } else {
                    stats.instances_max(&schema.thing_types()) as f64
                }
            } else if *transitive {
                stats.instances_transitive_max(&labels) as f64
            } else {
                stats.instances_max(&labels) as f64
            }
        }

        (EdgeKind::Sub { transitive }, true) => {
            if !transitive {
                1.0
            } else if !to.labels.is_empty() {
                stats.sub_types_depth(&resolve_labels(schema, &to.labels)) as f64
            } else {
                root_thing_depth(schema) as f64
            }
        }
        (EdgeKind::Sub { transitive }, false) => {
            if !to.labels.is_empty() {
                to.labels.len() as f64
            } else if !from.labels.is_empty() {
                stats.sub_types_mean(&resolve_labels(schema, &from.labels), *transitive)
            } else {
                stats.sub_types_mean(&schema.thing_types(), *transitive)
            }
        }

        (EdgeKind::Owns { is_key }, true) => {
            if !to.labels.is_empty() {
                to.labels.len() as f64
            } else if !from.labels.is_empty() {
                stats.out_owns_mean(&resolve_labels(schema, &from.labels), *is_key)
            } else {
                stats.out_owns_mean(&schema.entity_types(), *is_key)
            }
        }
        (EdgeKind::Owns { is_key }, false) => {
            if !to.labels.is_empty() {
                stats.sub_types_sum(&resolve_labels(schema, &to.labels), true) as f64
            } else if !from.labels.is_empty() {
                stats.in_owns_mean(&resolve_labels(schema, &from.labels), *is_key)
                    * stats.sub_types_mean(&schema.entity_types(), true)
            } else {
                stats.in_owns_mean(&schema.attribute_types(), *is_key)
                    * stats.sub_types_mean(&schema.entity_types(), true)
            }
        }

        (EdgeKind::Plays, true) => {
            if !to.labels.is_empty() {
                to.labels.len() as f64
            } else if !from.labels.is_empty() {
                stats.out_plays_mean(&resolve_labels(schema, &from.labels))
            } else {
                stats.out_plays_mean(&schema.entity_types())
            }
        }
        (EdgeKind::Plays, false) => {
            if !to.labels.is_empty() {
                stats.sub_types_sum(&resolve_labels(schema, &to.labels), true) as f64
            } else if !from.labels.is_empty() {
                stats.in_plays_mean(&resolve_labels(schema, &from.labels))
                    * stats.sub_types_mean(&schema.entity_types(), true)
            } else {
                stats.in_plays_mean(&schema.attribute_types())
                    * stats.sub_types_mean(&schema.entity_types(), true)
            }
        }

        (EdgeKind::Relates, true) => {
            if !to.labels.is_empty() {
                to.labels.len() as f64
            } else if !from.labels.is_empty() {
                stats.out_relates_mean(&resolve_labels(schema, &from.labels))
            } else {
                stats.out_relates_mean(&schema.relation_types())
            }
        }
        (EdgeKind::Relates, false) => {
            if !to.labels.is_empty() {
                stats.sub_types_mean(&resolve_labels(schema, &to.labels), true)
            } else if !from.labels.is_empty() {
                let relations: Vec<TypeIid> = from
                    .labels
                    .iter()
                    .filter_map(|label| label.scope().map(Label::of))
                    .filter_map(|scope| schema.resolve(&scope).ok())
                    .collect();
                stats.sub_types_mean(&relations, true)
            } else {
                stats.sub_types_mean(&schema.relation_types(), true)
            }
        }

        (EdgeKind::Has, true) => {
            has_cost(schema, &from.types, &to.types, true)
        }
        (EdgeKind::Has, false) => {
            has_cost(schema, &to.types, &from.types, false)
        }

        (EdgeKind::Playing, true) => {
            if !to.types.is_empty() && !from.types.is_empty() {
                stats.instances_sum(&resolve_labels(schema, &to.types)) as f64
                    / non_zero(stats.instances_sum(&resolve_labels(schema, &from.types)) as f64)
            } else {
                stats.instances_transitive(schema.root_role()) as f64
                    / non_zero(stats.instances_transitive(schema.root_entity()) as f64)
            }
        }
        (EdgeKind::Playing, false) => 1.0,

        (EdgeKind::Relating, true) => role_ratio(schema, &to.types),
        (EdgeKind::Relating, false) => 1.0,

        (EdgeKind::RolePlayer { role_types }, true) => role_ratio(schema, role_types),
        (EdgeKind::RolePlayer { role_types }, false) => {
            if !role_types.is_empty() && !from.types.is_empty() {
                stats.instances_sum(&resolve_labels(schema, role_types)) as f64
                    / non_zero(stats.instances_sum(&resolve_labels(schema, &from.types)) as f64)
            } else {
                stats.instances_transitive(schema.root_role()) as f64
                    / non_zero(stats.instances_transitive(schema.root_entity()) as f64)
            }
        }
    }
}

/// Mean has-edges per owner instance over the relevant owner/attribute map.
/// `owner_types`/`attribute_types` are the hint sets on the pattern's owner
/// and attribute sides; `per_owner` averages per owner type, otherwise per
/// attribute type.
fn has_cost(schema: &SchemaGraph, owner_types: &[Label], attribute_types: &[Label], per_owner: bool) -> f64 {
    let stats = schema.stats();
    let owners = resolve_labels(schema, owner_types);
    let attributes = resolve_labels(schema, attribute_types);

    let pairs: Vec<(TypeIid, Vec<TypeIid>)> = if !owners.is_empty() && !attributes.is_empty() {
        if per_owner {
            owners.iter().map(|o| (*o, attributes.clone())).collect()
        } else {
            attributes.iter().map(|a| (*a, owners.clone())).collect()
        }
    } else if per_owner && !owners.is_empty() {
        owners
            .iter()
            .map(|o| (*o, schema.owned_attribute_types(*o)))
            .collect()
    } else if per_owner && !attributes.is_empty() {
        // group owners of each attribute type
        let mut grouped: Vec<(TypeIid, Vec<TypeIid>)> = Vec::new();
        for attribute in &attributes {
            for owner in schema.owners_of_attribute(*attribute) {
                match grouped.iter_mut().find(|(o, _)| *o == owner) {
                    Some((_, atts)) => atts.push(*attribute),
                    None => grouped.push((owner, vec![*attribute])),
                }
            }
        }
        grouped
    } else if !per_owner && !attributes.is_empty() {
        attributes
            .iter()
            .map(|a| (*a, schema.owners_of_attribute(*a)))
            .collect()
    } else if !per_owner && !owners.is_empty() {
        let mut grouped: Vec<(TypeIid, Vec<TypeIid>)> = Vec::new();
        for owner in &owners {
            for attribute in schema.owned_attribute_types(*owner) {
                match grouped.iter_mut().find(|(a, _)| *a == attribute) {
                    Some((_, os)) => os.push(*owner),
                    None => grouped.push((attribute, vec![*owner])),
                }
            }
        }
        grouped
    } else if per_owner {
        vec![(schema.root_entity(), vec![schema.root_attribute()])]
    } else {
        vec![(schema.root_attribute(), vec![schema.root_entity()])]
    };

    if pairs.is_empty() {
        return 1.0;
    }
    let mut cost = 0.0;
    for (keyed, others) in &pairs {
        let edges = if per_owner {
            stats.count_has_edges(&[*keyed], others)
        } else {
            stats.count_has_edges(others, &[*keyed])
        };
        cost += edges as f64 / non_zero(stats.instances_transitive(*keyed) as f64);
    }
    cost / pairs.len() as f64
}

/// Mean role instances per scoping relation instance over a role label set.
fn role_ratio(schema: &SchemaGraph, role_types: &[Label]) -> f64 {
    let stats = schema.stats();
    let resolved = resolve_labels(schema, role_types);
    if resolved.is_empty() {
        return stats.instances_transitive(schema.root_role()) as f64
            / non_zero(stats.instances_transitive(schema.root_relation()) as f64);
    }
    let mut cost = 0.0;
    for role in &resolved {
        let relation = match schema.relation_of_role(*role) {
            Ok(relation) => relation,
            Err(_) => continue,
        };
        cost += stats.instances_count(*role) as f64
            / non_zero(stats.instances_count(relation) as f64);
    }
    cost / resolved.len() as f64
}
