//! Rule resolution by iterative materialisation. Rule conclusions are
//! written into an inference overlay of the transaction's data graph and the
//! rules re-run until a full pass adds nothing new; the query then streams
//! from the augmented overlay. Applications are memoised per (rule, bound
//! head arguments), which doubles as the completeness cache: a binding whose
//! conclusion is already materialised short-circuits.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::answer::{Concept, ConceptMap};
use crate::error::{MotifError, Result};
use crate::graph::{DataGraph, Label, SchemaGraph};
use crate::logic::rule::{Rule, RuleHead};
use crate::logic::unify::unify;
use crate::logic::concludable::{concludables_of, DerivationMode};
use crate::pattern::Conjunction;
use crate::traversal::TraversalEngine;

pub const DEFAULT_REASONING_BUDGET: usize = 64;

pub struct Reasoner<'a> {
    engine: &'a TraversalEngine,
    rules: Vec<Rule>,
    budget: usize,
}

impl<'a> Reasoner<'a> {
    pub fn new(engine: &'a TraversalEngine, rules: Vec<Rule>, budget: usize) -> Self {
        Self {
            engine,
            rules,
            budget,
        }
    }

    /// Rules whose head could contribute to the pattern: their then
    /// concludables unify with some conjunction concludable of the query.
    fn applicable_rules(&self, pattern: &Conjunction, schema: &SchemaGraph) -> Vec<&Rule> {
        let targets = concludables_of(pattern, schema, DerivationMode::Conjunction);
        self.rules
            .iter()
            .filter(|rule| {
                let heads = rule.then_concludables(schema);
                targets
                    .iter()
                    .any(|target| heads.iter().any(|head| unify(target, head).is_some()))
            })
            .collect()
    }

    /// Answer the pattern with inference: materialise to fixpoint, then
    /// traverse the augmented overlay.
    pub fn resolve(
        &self,
        data: &DataGraph,
        pattern: &Conjunction,
        cancelled: Arc<AtomicBool>,
        parallel: bool,
    ) -> Result<Vec<ConceptMap>> {
        let schema = data.schema();
        if self.applicable_rules(pattern, schema).is_empty() {
            return self
                .engine
                .execute(data, pattern, cancelled, parallel)?
                .collect();
        }

        let mut overlay = data.fork_for_inference();
        let mut applied: FxHashSet<(String, ConceptMap)> = FxHashSet::default();
        let mut iterations = 0usize;
        loop {
            // fixpoint over ALL rules: a rule's body may match conclusions of
            // another, so the pass repeats until a full sweep is silent
            let mut changed = false;
            for rule in &self.rules {
                changed |= self.apply_rule(&mut overlay, rule, &mut applied, &cancelled)?;
            }
            if !changed {
                break;
            }
            iterations += 1;
            if iterations > self.budget {
                return Err(MotifError::ReasoningBudgetExceeded(self.budget));
            }
        }
        debug!(iterations, conclusions = applied.len(), "reasoning reached fixpoint");

        let mut answers: Vec<ConceptMap> = self
            .engine
            .execute(&overlay, pattern, cancelled, parallel)?
            .collect::<Result<_>>()?;
        answers.sort();
        answers.dedup();
        Ok(answers)
    }

    fn apply_rule(
        &self,
        overlay: &mut DataGraph,
        rule: &Rule,
        applied: &mut FxHashSet<(String, ConceptMap)>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<bool> {
        let body_answers: Vec<ConceptMap> = self
            .engine
            .execute(overlay, rule.when(), cancelled.clone(), false)?
            .collect::<Result<_>>()?;

        let mut changed = false;
        for answer in body_answers {
            let key = (rule.label().to_owned(), project_head_args(rule, &answer));
            if applied.contains(&key) {
                continue;
            }
            if self.apply_head(overlay, rule, &answer)? {
                changed = true;
            }
            applied.insert(key);
        }
        Ok(changed)
    }

    /// Materialise one conclusion. Returns whether the overlay changed.
    fn apply_head(&self, overlay: &mut DataGraph, rule: &Rule, answer: &ConceptMap) -> Result<bool> {
        match rule.head() {
            RuleHead::Isa { var, type_label } => {
                if answer.contains(var) {
                    // the instance exists; its typing is fixed by its IID
                    return Ok(false);
                }
                let type_iid = overlay.schema().resolve(type_label)?;
                match type_iid.kind() {
                    crate::encoding::TypeKind::Entity => {
                        overlay.insert_entity(type_iid)?;
                    }
                    crate::encoding::TypeKind::Relation => {
                        overlay.insert_relation(type_iid)?;
                    }
                    _ => {
                        return Err(MotifError::IllegalRuleHead(
                            "isa head must conclude an entity or relation type",
                        ))
                    }
                }
                Ok(true)
            }
            RuleHead::HasVariable { owner, attribute } => {
                let owner_iid = bound_thing(answer, owner)?;
                let attribute_iid = bound_thing(answer, attribute)?;
                if overlay.has_edge(&owner_iid, &attribute_iid) {
                    return Ok(false);
                }
                overlay.put_has(&owner_iid, &attribute_iid)?;
                Ok(true)
            }
            RuleHead::HasConcrete {
                owner,
                attribute_type,
                value,
            } => {
                let owner_iid = bound_thing(answer, owner)?;
                let type_iid = overlay.schema().resolve(attribute_type)?;
                let attribute_iid = overlay.put_attribute(type_iid, value)?;
                if overlay.has_edge(&owner_iid, &attribute_iid) {
                    return Ok(false);
                }
                overlay.put_has(&owner_iid, &attribute_iid)?;
                Ok(true)
            }
            RuleHead::Relation {
                relation_type,
                role_players,
            } => {
                let relation_type_iid = overlay.schema().resolve(relation_type)?;
                let mut players = Vec::with_capacity(role_players.len());
                for (role, player) in role_players {
                    let role_iid = overlay
                        .schema()
                        .resolve(&Label::scoped(role.clone(), relation_type.name()))?;
                    players.push((role_iid, bound_thing(answer, player)?));
                }
                let relation = overlay.insert_relation(relation_type_iid)?;
                for (role_iid, player_iid) in players {
                    overlay.put_role_player(&relation, role_iid, &player_iid)?;
                }
                Ok(true)
            }
            RuleHead::Value { .. } => Err(MotifError::IllegalRuleHead(
                "value assertion heads are not supported",
            )),
        }
    }
}

/// The memo key: the body answer projected onto the variables the head reads.
fn project_head_args(rule: &Rule, answer: &ConceptMap) -> ConceptMap {
    let names: Vec<&str> = match rule.head() {
        RuleHead::Isa { var, .. } => vec![var.as_str()],
        RuleHead::HasVariable { owner, attribute } => vec![owner.as_str(), attribute.as_str()],
        RuleHead::HasConcrete { owner, .. } => vec![owner.as_str()],
        RuleHead::Relation { role_players, .. } => role_players
            .iter()
            .map(|(_, player)| player.as_str())
            .collect(),
        RuleHead::Value { var, .. } => vec![var.as_str()],
    };
    answer.project(&names)
}

fn bound_thing(answer: &ConceptMap, name: &str) -> Result<crate::encoding::ThingIid> {
    match answer.get(name) {
        Some(Concept::Thing(iid)) => Ok(iid.clone()),
        _ => Err(MotifError::UnificationFailure(
            "rule head variable is not bound to a thing",
        )),
    }
}
