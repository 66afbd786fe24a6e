//! Concludables: pattern fragments a rule head could produce. Conjunction
//! concludables identify where rule expansion can contribute answers; head
//! concludables describe what a rule's `then` generates.

use crate::graph::{Label, SchemaGraph};
use crate::pattern::{Conjunction, ThingConstraint, VarId, Variable};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ConcludableKind {
    Isa,
    Has,
    Relation,
    Value,
}

/// A pattern fragment candidate for rule expansion, with the type hints that
/// gate unification.
#[derive(Clone, Debug)]
pub struct Concludable {
    pub kind: ConcludableKind,
    pub owner: VarId,
    pub type_hints: Vec<Label>,
    /// Relation concludables: per-player allowed role labels.
    pub role_hints: Vec<Vec<Label>>,
}

impl Concludable {
    pub fn is_isa(&self) -> bool {
        self.kind == ConcludableKind::Isa
    }

    pub fn is_has(&self) -> bool {
        self.kind == ConcludableKind::Has
    }

    pub fn is_relation(&self) -> bool {
        self.kind == ConcludableKind::Relation
    }

    pub fn is_value(&self) -> bool {
        self.kind == ConcludableKind::Value
    }
}

/// How a conjunction is read when deriving concludables. In a rule body a
/// relation constraint absorbs its owner's isa; in a head both surface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DerivationMode {
    Conjunction,
    Head,
}

pub fn concludables_of(
    conjunction: &Conjunction,
    schema: &SchemaGraph,
    mode: DerivationMode,
) -> Vec<Concludable> {
    let mut out = Vec::new();
    for var in conjunction.var_ids() {
        let Variable::Thing { constraints, .. } = conjunction.variable(var) else {
            continue;
        };
        let hints = hints_of(conjunction, var, schema);
        let has_isa = constraints.iter().any(ThingConstraint::is_isa);
        let has_relation = constraints.iter().any(ThingConstraint::is_relation);

        let isa_counts = has_isa
            && (mode == DerivationMode::Head || !has_relation);
        if isa_counts {
            out.push(Concludable {
                kind: ConcludableKind::Isa,
                owner: var,
                type_hints: hints.clone(),
                role_hints: Vec::new(),
            });
        }
        for constraint in constraints {
            match constraint {
                ThingConstraint::Has { .. } => out.push(Concludable {
                    kind: ConcludableKind::Has,
                    owner: var,
                    type_hints: hints.clone(),
                    role_hints: Vec::new(),
                }),
                ThingConstraint::Relation { role_players } => {
                    let role_hints = role_players
                        .iter()
                        .map(|role_player| {
                            if !role_player.role_hints.is_empty() {
                                role_player.role_hints.clone()
                            } else {
                                role_player
                                    .role_type
                                    .and_then(|role_var| conjunction.label_of(role_var))
                                    .map(|label| resolve_closure(schema, label))
                                    .unwrap_or_default()
                            }
                        })
                        .collect();
                    out.push(Concludable {
                        kind: ConcludableKind::Relation,
                        owner: var,
                        type_hints: hints.clone(),
                        role_hints,
                    });
                }
                ThingConstraint::Value { .. } if !has_isa => out.push(Concludable {
                    kind: ConcludableKind::Value,
                    owner: var,
                    type_hints: hints.clone(),
                    role_hints: Vec::new(),
                }),
                _ => {}
            }
        }
    }
    out
}

fn hints_of(conjunction: &Conjunction, var: VarId, schema: &SchemaGraph) -> Vec<Label> {
    let computed = conjunction.type_hints(var, schema);
    if !computed.is_empty() {
        return computed;
    }
    // fall back to the declared label when the schema cannot resolve it yet
    conjunction
        .isa_of(var)
        .and_then(|type_var| conjunction.label_of(type_var))
        .map(|label| vec![label.clone()])
        .unwrap_or_default()
}

fn resolve_closure(schema: &SchemaGraph, label: &Label) -> Vec<Label> {
    match schema.resolve(label) {
        Ok(iid) => schema
            .subtypes_transitive(iid)
            .into_iter()
            .filter_map(|sub| schema.label_of(sub).ok())
            .collect(),
        Err(_) => vec![label.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::RolePlayer;

    fn schema() -> SchemaGraph {
        let schema = SchemaGraph::new();
        let person = schema.put_entity_type("person").unwrap();
        let marriage = schema.put_relation_type("marriage").unwrap();
        let spouse = schema.put_relates(marriage, "spouse").unwrap();
        schema.put_plays(person, spouse).unwrap();
        schema
    }

    #[test]
    fn relation_absorbs_owner_isa_in_conjunction_mode() {
        let schema = schema();
        let mut conj = Conjunction::new();
        let x = conj.named_thing("x");
        let y = conj.named_thing("y");
        conj.isa_label(x, Label::of("person"));
        conj.isa_label(y, Label::of("person"));
        let rel = conj.anon_thing();
        let role_a = conj.labelled_type(Label::scoped("spouse", "marriage"));
        let role_b = conj.labelled_type(Label::scoped("spouse", "marriage"));
        conj.relation(
            rel,
            vec![RolePlayer::new(Some(role_a), x), RolePlayer::new(Some(role_b), y)],
        );
        conj.isa_label(rel, Label::of("marriage"));

        let body = concludables_of(&conj, &schema, DerivationMode::Conjunction);
        assert_eq!(body.iter().filter(|c| c.is_isa()).count(), 2);
        assert_eq!(body.iter().filter(|c| c.is_has()).count(), 0);
        assert_eq!(body.iter().filter(|c| c.is_relation()).count(), 1);
        assert_eq!(body.iter().filter(|c| c.is_value()).count(), 0);

        let head = concludables_of(&conj, &schema, DerivationMode::Head);
        assert_eq!(head.iter().filter(|c| c.is_isa()).count(), 3);
    }

    #[test]
    fn value_only_counts_without_isa() {
        let schema = schema();
        let mut conj = Conjunction::new();
        let a = conj.named_thing("a");
        conj.value(a, crate::pattern::Predicate::Eq, crate::encoding::Value::Long(10));
        let body = concludables_of(&conj, &schema, DerivationMode::Conjunction);
        assert_eq!(body.iter().filter(|c| c.is_value()).count(), 1);

        conj.isa_label(a, Label::of("person"));
        let body = concludables_of(&conj, &schema, DerivationMode::Conjunction);
        assert_eq!(body.iter().filter(|c| c.is_value()).count(), 0);
        assert_eq!(body.iter().filter(|c| c.is_isa()).count(), 1);
    }
}
