//! Write-query materialisation: turning insert/delete patterns plus matched
//! answers into data-graph mutations, with the write-violation checks applied
//! before anything is buffered.

use crate::answer::{Concept, ConceptMap};
use crate::encoding::{ThingIid, TypeKind, Value};
use crate::error::{MotifError, Result};
use crate::graph::{DataGraph, Label};
use crate::pattern::{
    Conjunction, Predicate, Reference, ThingConstraint, ValueOperand, VarId, Variable,
};

/// Materialise one insert pattern under a (possibly empty) matched answer.
/// Returns the combined bindings for the answer stream.
pub fn insert_answer(
    data: &mut DataGraph,
    insert: &Conjunction,
    bound: &ConceptMap,
) -> Result<ConceptMap> {
    let mut concepts: Vec<Option<ThingIid>> = vec![None; insert.variables().len()];

    // first pass: create or adopt every thing variable
    for var in insert.var_ids() {
        let variable = insert.variable(var);
        if !variable.is_thing() {
            continue;
        }
        if let Reference::Name(name) = variable.reference() {
            if let Some(Concept::Thing(iid)) = bound.get(name) {
                concepts[var.0 as usize] = Some(iid.clone());
                continue;
            }
        }
        concepts[var.0 as usize] = Some(create_thing(data, insert, var)?);
    }

    // second pass: connect has edges and role players
    for var in insert.var_ids() {
        let Variable::Thing { constraints, .. } = insert.variable(var) else {
            continue;
        };
        for constraint in constraints {
            match constraint {
                ThingConstraint::Has { attribute } => {
                    let owner = concept_of(&concepts, var)?;
                    let attr = concept_of(&concepts, *attribute)?;
                    data.put_has(&owner, &attr)?;
                }
                ThingConstraint::Relation { role_players } => {
                    let relation = concept_of(&concepts, var)?;
                    let relation_label = data.schema().label_of(relation.type_iid())?;
                    for role_player in role_players {
                        let role = resolve_role(insert, data, role_player.role_type, &relation_label)?;
                        let player = concept_of(&concepts, role_player.player)?;
                        data.put_role_player(&relation, role, &player)?;
                    }
                }
                _ => {}
            }
        }
    }

    let mut answer = bound.clone();
    for var in insert.var_ids() {
        if let Reference::Name(name) = insert.variable(var).reference() {
            if let Some(iid) = &concepts[var.0 as usize] {
                answer.bind(name.clone(), Concept::Thing(iid.clone()));
            }
        }
    }
    Ok(answer)
}

fn concept_of(concepts: &[Option<ThingIid>], var: VarId) -> Result<ThingIid> {
    concepts[var.0 as usize]
        .clone()
        .ok_or(MotifError::IllegalState("insert variable not materialised"))
}

fn var_name(conjunction: &Conjunction, var: VarId) -> String {
    match conjunction.variable(var).reference() {
        Reference::Name(name) => format!("${name}"),
        Reference::Label(label) => label.clone(),
        Reference::Anonymous(n) => format!("$_{n}"),
    }
}

fn create_thing(data: &mut DataGraph, insert: &Conjunction, var: VarId) -> Result<ThingIid> {
    let constraints = insert.variable(var).thing_constraints();

    if constraints
        .iter()
        .any(|c| matches!(c, ThingConstraint::Iid { .. }))
    {
        return Err(MotifError::IllegalIidOnInsert(var_name(insert, var)));
    }
    let isa_targets: Vec<VarId> = constraints
        .iter()
        .filter_map(|c| match c {
            ThingConstraint::Isa { type_var, .. } => Some(*type_var),
            _ => None,
        })
        .collect();
    match isa_targets.len() {
        0 => return Err(MotifError::MissingIsa(var_name(insert, var))),
        1 => {}
        _ => return Err(MotifError::MultipleIsa(var_name(insert, var))),
    }
    let type_label = insert
        .label_of(isa_targets[0])
        .ok_or(MotifError::MissingIsa(var_name(insert, var)))?;
    let type_iid = data.schema().resolve(type_label)?;

    match type_iid.kind() {
        TypeKind::Entity => data.insert_entity(type_iid),
        TypeKind::Relation => {
            let has_players = constraints.iter().any(|c| {
                matches!(c, ThingConstraint::Relation { role_players } if !role_players.is_empty())
            });
            if !has_players {
                return Err(MotifError::RelationMissingPlayers(var_name(insert, var)));
            }
            data.insert_relation(type_iid)
        }
        TypeKind::Attribute => {
            let values: Vec<&Value> = constraints
                .iter()
                .filter_map(|c| match c {
                    ThingConstraint::Value {
                        predicate: Predicate::Eq,
                        operand: ValueOperand::Constant(value),
                    } => Some(value),
                    _ => None,
                })
                .collect();
            if values.len() != 1 {
                return Err(MotifError::AttributeValueCount(var_name(insert, var)));
            }
            data.put_attribute(type_iid, values[0])
        }
        TypeKind::Role => Err(MotifError::IllegalState("role instances are not inserted directly")),
    }
}

fn resolve_role(
    insert: &Conjunction,
    data: &DataGraph,
    role_var: Option<VarId>,
    relation_label: &Label,
) -> Result<crate::encoding::TypeIid> {
    let role_var = role_var.ok_or(MotifError::IllegalState("role player requires a role type"))?;
    let role_label = insert
        .label_of(role_var)
        .ok_or(MotifError::IllegalState("role type variable has no label"))?;
    let scoped = match role_label.scope() {
        Some(_) => role_label.clone(),
        None => Label::scoped(role_label.name(), relation_label.name()),
    };
    data.schema().resolve(&scoped)
}

/// Remove the things bound to the given names, taking their has edges and
/// role-player structures with them.
pub fn delete_answer(data: &mut DataGraph, names: &[String], answer: &ConceptMap) -> Result<()> {
    for name in names {
        let Some(Concept::Thing(iid)) = answer.get(name) else {
            return Err(MotifError::IllegalState("delete variable is not a bound thing"));
        };
        if iid.kind() == crate::encoding::ThingKind::Relation {
            data.delete_role_players(iid)?;
        }
        for attribute in data.neighbors(iid, crate::encoding::Infix::HasForward)? {
            data.delete_has(iid, &attribute)?;
        }
        for owner in data.neighbors(iid, crate::encoding::Infix::HasBackward)? {
            data.delete_has(&owner, iid)?;
        }
        data.delete_thing(iid)?;
    }
    Ok(())
}
