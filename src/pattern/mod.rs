//! Normalised query patterns: a conjunction owns an arena of typed variables,
//! each carrying constraints that reference other variables by arena index.
//! This is the input normal form the traversal engine consumes; the surface
//! language parser is an external collaborator.

mod constraint;

pub use constraint::{Predicate, RolePlayer, ThingConstraint, TypeConstraint, ValueOperand};

use rustc_hash::FxHashSet;

use crate::encoding::{ThingIid, Value, ValueType};
use crate::error::Result;
use crate::graph::{Label, SchemaGraph};

/// Arena index of a variable inside its conjunction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// How a variable is referred to in the source pattern.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Reference {
    /// Named by the user (`$x`).
    Name(String),
    /// An anonymous variable standing for a label mention (`person`).
    Label(String),
    /// System-generated during normalisation or head expansion.
    Anonymous(u32),
}

impl Reference {
    pub fn is_name(&self) -> bool {
        matches!(self, Reference::Name(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Variable {
    Thing {
        reference: Reference,
        constraints: Vec<ThingConstraint>,
    },
    Type {
        reference: Reference,
        constraints: Vec<TypeConstraint>,
    },
}

impl Variable {
    pub fn reference(&self) -> &Reference {
        match self {
            Variable::Thing { reference, .. } | Variable::Type { reference, .. } => reference,
        }
    }

    pub fn is_thing(&self) -> bool {
        matches!(self, Variable::Thing { .. })
    }

    pub fn thing_constraints(&self) -> &[ThingConstraint] {
        match self {
            Variable::Thing { constraints, .. } => constraints,
            Variable::Type { .. } => &[],
        }
    }

    pub fn type_constraints(&self) -> &[TypeConstraint] {
        match self {
            Variable::Type { constraints, .. } => constraints,
            Variable::Thing { .. } => &[],
        }
    }
}

/// A conjunction of constraints over an arena of variables, with nested
/// negations and disjunctions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conjunction {
    variables: Vec<Variable>,
    negations: Vec<Conjunction>,
    disjunctions: Vec<Vec<Conjunction>>,
    next_anon: u32,
}

impl Conjunction {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- variable introduction ----

    fn push(&mut self, variable: Variable) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables.push(variable);
        id
    }

    pub fn named_thing(&mut self, name: impl Into<String>) -> VarId {
        self.push(Variable::Thing {
            reference: Reference::Name(name.into()),
            constraints: Vec::new(),
        })
    }

    pub fn named_type(&mut self, name: impl Into<String>) -> VarId {
        self.push(Variable::Type {
            reference: Reference::Name(name.into()),
            constraints: Vec::new(),
        })
    }

    pub fn anon_thing(&mut self) -> VarId {
        let n = self.next_anon;
        self.next_anon += 1;
        self.push(Variable::Thing {
            reference: Reference::Anonymous(n),
            constraints: Vec::new(),
        })
    }

    pub fn anon_type(&mut self) -> VarId {
        let n = self.next_anon;
        self.next_anon += 1;
        self.push(Variable::Type {
            reference: Reference::Anonymous(n),
            constraints: Vec::new(),
        })
    }

    /// A type variable standing for a bare label mention, already carrying
    /// its label constraint.
    pub fn labelled_type(&mut self, label: Label) -> VarId {
        let id = self.push(Variable::Type {
            reference: Reference::Label(label.to_string()),
            constraints: Vec::new(),
        });
        self.add_type_constraint(id, TypeConstraint::Label(label));
        id
    }

    // ---- constraint attachment ----

    fn thing_constraints_mut(&mut self, id: VarId) -> &mut Vec<ThingConstraint> {
        match &mut self.variables[id.0 as usize] {
            Variable::Thing { constraints, .. } => constraints,
            Variable::Type { .. } => panic!("thing constraint on a type variable"),
        }
    }

    fn type_constraints_mut(&mut self, id: VarId) -> &mut Vec<TypeConstraint> {
        match &mut self.variables[id.0 as usize] {
            Variable::Type { constraints, .. } => constraints,
            Variable::Thing { .. } => panic!("type constraint on a thing variable"),
        }
    }

    pub fn add_type_constraint(&mut self, id: VarId, constraint: TypeConstraint) {
        self.type_constraints_mut(id).push(constraint);
    }

    pub fn isa(&mut self, thing: VarId, type_var: VarId) {
        self.thing_constraints_mut(thing).push(ThingConstraint::Isa {
            type_var,
            explicit: false,
            hints: Vec::new(),
        });
    }

    pub fn isa_explicit(&mut self, thing: VarId, type_var: VarId) {
        self.thing_constraints_mut(thing).push(ThingConstraint::Isa {
            type_var,
            explicit: true,
            hints: Vec::new(),
        });
    }

    /// Convenience: `$thing isa <label>` with a fresh labelled type variable.
    pub fn isa_label(&mut self, thing: VarId, label: Label) -> VarId {
        let type_var = self.labelled_type(label);
        self.isa(thing, type_var);
        type_var
    }

    pub fn has(&mut self, owner: VarId, attribute: VarId) {
        self.thing_constraints_mut(owner)
            .push(ThingConstraint::Has { attribute });
    }

    pub fn relation(&mut self, owner: VarId, role_players: Vec<RolePlayer>) {
        self.thing_constraints_mut(owner)
            .push(ThingConstraint::Relation {
                role_players: role_players.into_iter().collect(),
            });
    }

    pub fn value(&mut self, owner: VarId, predicate: Predicate, value: Value) {
        self.thing_constraints_mut(owner).push(ThingConstraint::Value {
            predicate,
            operand: ValueOperand::Constant(value),
        });
    }

    pub fn value_variable(&mut self, owner: VarId, predicate: Predicate, other: VarId) {
        self.thing_constraints_mut(owner).push(ThingConstraint::Value {
            predicate,
            operand: ValueOperand::Variable(other),
        });
    }

    pub fn iid(&mut self, owner: VarId, iid: ThingIid) {
        self.thing_constraints_mut(owner)
            .push(ThingConstraint::Iid { iid });
    }

    pub fn is(&mut self, a: VarId, b: VarId) {
        self.thing_constraints_mut(a).push(ThingConstraint::Is { other: b });
    }

    pub fn sub(&mut self, subtype: VarId, supertype: VarId) {
        self.type_constraints_mut(subtype).push(TypeConstraint::Sub {
            supertype,
            explicit: false,
            hints: Vec::new(),
        });
    }

    pub fn owns(&mut self, owner: VarId, attribute: VarId, is_key: bool) {
        self.type_constraints_mut(owner)
            .push(TypeConstraint::Owns { attribute, is_key });
    }

    pub fn plays(&mut self, player: VarId, role: VarId) {
        self.type_constraints_mut(player)
            .push(TypeConstraint::Plays { role });
    }

    pub fn relates(&mut self, relation: VarId, role: VarId) {
        self.type_constraints_mut(relation)
            .push(TypeConstraint::Relates { role });
    }

    pub fn value_type(&mut self, owner: VarId, value_type: ValueType) {
        self.type_constraints_mut(owner)
            .push(TypeConstraint::ValueType(value_type));
    }

    pub fn regex(&mut self, owner: VarId, pattern: impl Into<String>) {
        self.type_constraints_mut(owner)
            .push(TypeConstraint::Regex(pattern.into()));
    }

    pub fn add_negation(&mut self, negation: Conjunction) {
        self.negations.push(negation);
    }

    pub fn add_disjunction(&mut self, branches: Vec<Conjunction>) {
        self.disjunctions.push(branches);
    }

    // ---- access ----

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    pub fn var_ids(&self) -> impl Iterator<Item = VarId> + '_ {
        (0..self.variables.len() as u32).map(VarId)
    }

    pub fn negations(&self) -> &[Conjunction] {
        &self.negations
    }

    pub fn disjunctions(&self) -> &[Vec<Conjunction>] {
        &self.disjunctions
    }

    pub fn find_named(&self, name: &str) -> Option<VarId> {
        self.var_ids().find(|id| {
            matches!(self.variable(*id).reference(), Reference::Name(n) if n == name)
        })
    }

    /// The label constraint of a type variable, if it has one.
    pub fn label_of(&self, id: VarId) -> Option<&Label> {
        self.variable(id).type_constraints().iter().find_map(|c| {
            if let TypeConstraint::Label(label) = c {
                Some(label)
            } else {
                None
            }
        })
    }

    /// The isa target of a thing variable, if it has one.
    pub fn isa_of(&self, id: VarId) -> Option<VarId> {
        self.variable(id).thing_constraints().iter().find_map(|c| {
            if let ThingConstraint::Isa { type_var, .. } = c {
                Some(*type_var)
            } else {
                None
            }
        })
    }

    /// Resolved type labels a thing variable may take, through its isa
    /// constraint's label and the schema's subtype closure. Empty means
    /// unconstrained.
    pub fn type_hints(&self, id: VarId, schema: &SchemaGraph) -> Vec<Label> {
        let Some(type_var) = self.isa_of(id) else {
            return Vec::new();
        };
        let Some(label) = self.label_of(type_var) else {
            return Vec::new();
        };
        let Ok(iid) = schema.resolve(label) else {
            return Vec::new();
        };
        schema
            .subtypes_transitive(iid)
            .into_iter()
            .filter_map(|sub| schema.label_of(sub).ok())
            .collect()
    }

    /// Populate isa hint sets and role-player role hints from the schema.
    /// Call once per query after the pattern is assembled.
    pub fn infer_hints(&mut self, schema: &SchemaGraph) -> Result<()> {
        let hints_per_var: Vec<Vec<Label>> = self
            .var_ids()
            .map(|id| self.type_hints(id, schema))
            .collect();
        let labels_per_var: Vec<Option<Label>> = self
            .var_ids()
            .map(|id| self.label_of(id).cloned())
            .collect();

        for variable in &mut self.variables {
            let Variable::Thing { constraints, .. } = variable else {
                continue;
            };
            for constraint in constraints.iter_mut() {
                let ThingConstraint::Relation { role_players } = constraint else {
                    continue;
                };
                for role_player in role_players.iter_mut() {
                    let Some(role_var) = role_player.role_type else {
                        continue;
                    };
                    let Some(label) = &labels_per_var[role_var.0 as usize] else {
                        continue;
                    };
                    if let Ok(role_iid) = schema.resolve(label) {
                        role_player.role_hints = schema
                            .subtypes_transitive(role_iid)
                            .into_iter()
                            .filter_map(|sub| schema.label_of(sub).ok())
                            .collect();
                    }
                }
            }
        }
        for (index, hints) in hints_per_var.into_iter().enumerate() {
            if hints.is_empty() {
                continue;
            }
            if let Variable::Thing { constraints, .. } = &mut self.variables[index] {
                for constraint in constraints.iter_mut() {
                    if let ThingConstraint::Isa { hints: slot, .. } = constraint {
                        *slot = hints.clone();
                    }
                }
            }
        }
        for negation in &mut self.negations {
            negation.infer_hints(schema)?;
        }
        for branches in &mut self.disjunctions {
            for branch in branches {
                branch.infer_hints(schema)?;
            }
        }
        Ok(())
    }

    /// Variables reachable from `start` over constraint edges; used to check
    /// pattern connectedness before planning.
    pub fn is_connected(&self) -> bool {
        if self.variables.len() <= 1 {
            return true;
        }
        let mut seen: FxHashSet<VarId> = FxHashSet::default();
        let mut stack = vec![VarId(0)];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for other in self.adjacency(id) {
                if !seen.contains(&other) {
                    stack.push(other);
                }
            }
        }
        seen.len() == self.variables.len()
    }

    fn adjacency(&self, id: VarId) -> Vec<VarId> {
        let mut out = Vec::new();
        for var_id in self.var_ids() {
            for neighbor in self.neighbors_of(var_id) {
                if var_id == id {
                    out.push(neighbor);
                }
                if neighbor == id {
                    out.push(var_id);
                }
            }
        }
        out
    }

    fn neighbors_of(&self, id: VarId) -> Vec<VarId> {
        let mut out = Vec::new();
        match self.variable(id) {
            Variable::Thing { constraints, .. } => {
                for constraint in constraints {
                    match constraint {
                        ThingConstraint::Isa { type_var, .. } => out.push(*type_var),
                        ThingConstraint::Has { attribute } => out.push(*attribute),
                        ThingConstraint::Relation { role_players } => {
                            for role_player in role_players {
                                out.push(role_player.player);
                                if let Some(role) = role_player.role_type {
                                    out.push(role);
                                }
                            }
                        }
                        ThingConstraint::Value {
                            operand: ValueOperand::Variable(other),
                            ..
                        } => out.push(*other),
                        ThingConstraint::Is { other } => out.push(*other),
                        _ => {}
                    }
                }
            }
            Variable::Type { constraints, .. } => {
                for constraint in constraints {
                    match constraint {
                        TypeConstraint::Sub { supertype, .. } => out.push(*supertype),
                        TypeConstraint::Owns { attribute, .. } => out.push(*attribute),
                        TypeConstraint::Plays { role } => out.push(*role),
                        TypeConstraint::Relates { role } => out.push(*role),
                        _ => {}
                    }
                }
            }
        }
        out
    }
}
