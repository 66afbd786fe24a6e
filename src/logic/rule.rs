//! Rule definitions. A rule pairs a `when` conjunction with a single-variable
//! head; the head is normalised into a small `then` conjunction so the
//! reasoner and the concludable derivation work on one representation.

use crate::encoding::Value;
use crate::error::{MotifError, Result};
use crate::graph::{Label, SchemaGraph};
use crate::logic::concludable::{concludables_of, Concludable, DerivationMode};
use crate::pattern::{Conjunction, Predicate, RolePlayer};

/// The admissible head shapes. A value assertion head (`$_n = 5`) is not
/// admitted; its semantics are unsettled upstream.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleHead {
    /// `$x isa <type>` — concludes a new instance bound to `$x`.
    Isa { var: String, type_label: Label },
    /// `$x has $a` — both sides bound by the body.
    HasVariable { owner: String, attribute: String },
    /// `$x has <attr-type> <value>` — a concrete attribute assertion.
    HasConcrete {
        owner: String,
        attribute_type: Label,
        value: Value,
    },
    /// `(<role>: $x, ...) isa <relation>` — a relation with role players.
    Relation {
        relation_type: Label,
        role_players: Vec<(String, String)>,
    },
    /// Rejected by `put_rule`; kept so callers get the dedicated error.
    Value {
        var: String,
        predicate: Predicate,
        value: Value,
    },
}

#[derive(Clone, Debug)]
pub struct Rule {
    label: String,
    when: Conjunction,
    then: Conjunction,
    head: RuleHead,
}

impl Rule {
    /// Validate and normalise. Every variable the head names must be bound by
    /// the body, and the head must be one of the admitted shapes.
    pub fn new(label: impl Into<String>, when: Conjunction, head: RuleHead) -> Result<Self> {
        let bound = |name: &str| when.find_named(name).is_some();
        match &head {
            RuleHead::Isa { .. } => {}
            RuleHead::HasVariable { owner, attribute } => {
                if !bound(owner) || !bound(attribute) {
                    return Err(MotifError::IllegalRuleHead(
                        "has head references a variable the body does not bind",
                    ));
                }
            }
            RuleHead::HasConcrete { owner, .. } => {
                if !bound(owner) {
                    return Err(MotifError::IllegalRuleHead(
                        "has head references a variable the body does not bind",
                    ));
                }
            }
            RuleHead::Relation { role_players, .. } => {
                if role_players.is_empty() {
                    return Err(MotifError::IllegalRuleHead(
                        "relation head requires at least one role player",
                    ));
                }
                for (_, player) in role_players {
                    if !bound(player) {
                        return Err(MotifError::IllegalRuleHead(
                            "relation head references a player the body does not bind",
                        ));
                    }
                }
            }
            RuleHead::Value { .. } => {
                return Err(MotifError::IllegalRuleHead(
                    "value assertion heads are not supported",
                ));
            }
        }
        let then = expand_head(&head);
        Ok(Self {
            label: label.into(),
            when,
            then,
            head,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn when(&self) -> &Conjunction {
        &self.when
    }

    /// The head normalised into a conjunction.
    pub fn then(&self) -> &Conjunction {
        &self.then
    }

    pub fn head(&self) -> &RuleHead {
        &self.head
    }

    /// What parts of the body other rules could satisfy.
    pub fn when_concludables(&self, schema: &SchemaGraph) -> Vec<Concludable> {
        concludables_of(&self.when, schema, DerivationMode::Conjunction)
    }

    /// What the head can produce.
    pub fn then_concludables(&self, schema: &SchemaGraph) -> Vec<Concludable> {
        concludables_of(&self.then, schema, DerivationMode::Head)
    }
}

/// Normalise a head into its `then` conjunction. Concrete attribute heads
/// expand into an anonymous attribute with an isa and an equality to an
/// anonymous value variable; relation heads expand into an anonymous relation
/// with scoped role labels.
fn expand_head(head: &RuleHead) -> Conjunction {
    let mut conj = Conjunction::new();
    match head {
        RuleHead::Isa { var, type_label } => {
            let thing = conj.named_thing(var.clone());
            conj.isa_label(thing, type_label.clone());
        }
        RuleHead::HasVariable { owner, attribute } => {
            let owner_var = conj.named_thing(owner.clone());
            let attribute_var = conj.named_thing(attribute.clone());
            conj.has(owner_var, attribute_var);
        }
        RuleHead::HasConcrete {
            owner,
            attribute_type,
            value,
        } => {
            let owner_var = conj.named_thing(owner.clone());
            let attribute_var = conj.anon_thing();
            let attribute_type_var = conj.labelled_type(attribute_type.clone());
            let value_var = conj.anon_thing();
            conj.value(value_var, Predicate::Eq, value.clone());
            conj.value_variable(attribute_var, Predicate::Eq, value_var);
            conj.isa(attribute_var, attribute_type_var);
            conj.has(owner_var, attribute_var);
        }
        RuleHead::Relation {
            relation_type,
            role_players,
        } => {
            let relation_var = conj.anon_thing();
            let relation_type_var = conj.labelled_type(relation_type.clone());
            let mut players = Vec::with_capacity(role_players.len());
            for (role, player) in role_players {
                let role_var =
                    conj.labelled_type(Label::scoped(role.clone(), relation_type.name()));
                let player_var = conj
                    .find_named(player)
                    .unwrap_or_else(|| conj.named_thing(player.clone()));
                players.push(RolePlayer::new(Some(role_var), player_var));
            }
            conj.relation(relation_var, players);
            conj.isa(relation_var, relation_type_var);
        }
        RuleHead::Value { var, predicate, value } => {
            // unreachable through `Rule::new`; kept total for completeness
            let thing = conj.named_thing(var.clone());
            conj.value(thing, *predicate, value.clone());
        }
    }
    conj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Reference, ThingConstraint, ValueOperand, Variable};

    fn when_x_isa_person() -> Conjunction {
        let mut when = Conjunction::new();
        let x = when.named_thing("x");
        when.isa_label(x, Label::of("person"));
        when
    }

    #[test]
    fn value_heads_are_rejected() {
        let err = Rule::new(
            "bad",
            when_x_isa_person(),
            RuleHead::Value {
                var: "n".into(),
                predicate: Predicate::Eq,
                value: Value::Long(5),
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), 105);
    }

    #[test]
    fn unbound_head_variables_are_rejected() {
        let err = Rule::new(
            "bad",
            when_x_isa_person(),
            RuleHead::HasVariable {
                owner: "x".into(),
                attribute: "a".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, MotifError::IllegalRuleHead(_)));
    }

    #[test]
    fn has_variable_head_expands_to_two_variables() {
        let mut when = when_x_isa_person();
        let a = when.named_thing("a");
        when.value(a, Predicate::Eq, Value::Long(10));
        when.isa_label(a, Label::of("age-in-days"));

        let rule = Rule::new(
            "old-milk-is-not-good",
            when,
            RuleHead::HasVariable {
                owner: "x".into(),
                attribute: "a".into(),
            },
        )
        .unwrap();
        let then = rule.then();
        assert_eq!(then.variables().len(), 2);
        let owner = then.find_named("x").unwrap();
        assert!(then.variable(owner).thing_constraints().iter().any(|c| c.is_has()));
    }

    #[test]
    fn concrete_has_head_expands_attribute_isa_and_value() {
        let rule = Rule::new(
            "old-milk-is-not-good",
            when_x_isa_person(),
            RuleHead::HasConcrete {
                owner: "x".into(),
                attribute_type: Label::of("is-still-good"),
                value: Value::Bool(false),
            },
        )
        .unwrap();
        let then = rule.then();
        // owner, anonymous attribute, attribute type, anonymous value
        assert_eq!(then.variables().len(), 4);

        let attribute = then
            .var_ids()
            .find(|id| {
                matches!(then.variable(*id).reference(), Reference::Anonymous(_))
                    && then.variable(*id).thing_constraints().iter().any(|c| c.is_isa())
            })
            .expect("anonymous attribute variable");
        let isa_target = then.isa_of(attribute).unwrap();
        assert_eq!(then.label_of(isa_target), Some(&Label::of("is-still-good")));

        let has_value_eq = then
            .variable(attribute)
            .thing_constraints()
            .iter()
            .any(|c| matches!(
                c,
                ThingConstraint::Value { predicate: Predicate::Eq, operand: ValueOperand::Variable(_) }
            ));
        assert!(has_value_eq);

        let value_var = then
            .var_ids()
            .find(|id| {
                then.variable(*id).thing_constraints().iter().any(|c| matches!(
                    c,
                    ThingConstraint::Value { operand: ValueOperand::Constant(Value::Bool(false)), .. }
                ))
            })
            .expect("anonymous value variable");
        assert!(matches!(
            then.variable(value_var).reference(),
            Reference::Anonymous(_)
        ));

        let owner = then.find_named("x").unwrap();
        let owns_attribute = then
            .variable(owner)
            .thing_constraints()
            .iter()
            .any(|c| matches!(c, ThingConstraint::Has { attribute: a } if *a == attribute));
        assert!(owns_attribute);
    }

    #[test]
    fn single_player_relation_head_expands_scoped_role() {
        let mut when = when_x_isa_person();
        let name = when.named_thing("n");
        when.has(when.find_named("x").unwrap(), name);

        let rule = Rule::new(
            "bob-is-employed",
            when,
            RuleHead::Relation {
                relation_type: Label::of("employment"),
                role_players: vec![("employee".into(), "x".into())],
            },
        )
        .unwrap();
        let then = rule.then();
        // anonymous relation, relation type, role type, player
        assert_eq!(then.variables().len(), 4);

        let relation = then
            .var_ids()
            .find(|id| {
                then.variable(*id)
                    .thing_constraints()
                    .iter()
                    .any(ThingConstraint::is_relation)
            })
            .expect("anonymous relation variable");
        assert!(matches!(
            then.variable(relation).reference(),
            Reference::Anonymous(_)
        ));
        let isa_target = then.isa_of(relation).unwrap();
        assert_eq!(then.label_of(isa_target), Some(&Label::of("employment")));

        let role_player = then
            .variable(relation)
            .thing_constraints()
            .iter()
            .find_map(|c| match c {
                ThingConstraint::Relation { role_players } => Some(role_players[0].clone()),
                _ => None,
            })
            .unwrap();
        let role_label = then.label_of(role_player.role_type.unwrap()).unwrap();
        assert_eq!(role_label, &Label::scoped("employee", "employment"));
        assert_eq!(role_player.player, then.find_named("x").unwrap());
    }
}
