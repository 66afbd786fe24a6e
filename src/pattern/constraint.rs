//! Constraint variants, one closed enumeration per owner partition. Each
//! constraint holds arena indices back into the owning conjunction, so
//! pattern graphs stay cyclic-safe without pointer cycles.

use smallvec::SmallVec;

use crate::encoding::{ThingIid, Value, ValueType};
use crate::graph::Label;
use crate::pattern::VarId;

/// Comparison operator of a value constraint or predicate edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Predicate {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Predicate {
    pub fn is_equality(self) -> bool {
        self == Predicate::Eq
    }

    /// The operator seen from the other operand's side.
    pub fn reflected(self) -> Self {
        match self {
            Predicate::Eq => Predicate::Eq,
            Predicate::Neq => Predicate::Neq,
            Predicate::Gt => Predicate::Lt,
            Predicate::Gte => Predicate::Lte,
            Predicate::Lt => Predicate::Gt,
            Predicate::Lte => Predicate::Gte,
        }
    }

    pub fn test(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Predicate::Eq => ordering == Equal,
            Predicate::Neq => ordering != Equal,
            Predicate::Gt => ordering == Greater,
            Predicate::Gte => ordering != Less,
            Predicate::Lt => ordering == Less,
            Predicate::Lte => ordering != Greater,
        }
    }
}

/// Right-hand side of a value constraint.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueOperand {
    Constant(Value),
    Variable(VarId),
}

/// One player slot of a relation constraint. The role type is optional in
/// the surface pattern; `role_hints` carries the resolved scoped labels.
#[derive(Clone, Debug, PartialEq)]
pub struct RolePlayer {
    pub role_type: Option<VarId>,
    pub player: VarId,
    pub role_hints: Vec<Label>,
}

impl RolePlayer {
    pub fn new(role_type: Option<VarId>, player: VarId) -> Self {
        Self {
            role_type,
            player,
            role_hints: Vec::new(),
        }
    }
}

/// Constraints a thing variable may carry.
#[derive(Clone, Debug, PartialEq)]
pub enum ThingConstraint {
    Isa {
        type_var: VarId,
        explicit: bool,
        hints: Vec<Label>,
    },
    Has {
        attribute: VarId,
    },
    Relation {
        role_players: SmallVec<[RolePlayer; 4]>,
    },
    Value {
        predicate: Predicate,
        operand: ValueOperand,
    },
    Iid {
        iid: ThingIid,
    },
    Is {
        other: VarId,
    },
}

impl ThingConstraint {
    pub fn is_isa(&self) -> bool {
        matches!(self, ThingConstraint::Isa { .. })
    }

    pub fn is_has(&self) -> bool {
        matches!(self, ThingConstraint::Has { .. })
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, ThingConstraint::Relation { .. })
    }

    pub fn is_value(&self) -> bool {
        matches!(self, ThingConstraint::Value { .. })
    }
}

/// Constraints a type variable may carry.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeConstraint {
    Label(Label),
    Sub {
        supertype: VarId,
        explicit: bool,
        hints: Vec<Label>,
    },
    Owns {
        attribute: VarId,
        is_key: bool,
    },
    Plays {
        role: VarId,
    },
    Relates {
        role: VarId,
    },
    ValueType(ValueType),
    Regex(String),
}
