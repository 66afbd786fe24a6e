use thiserror::Error;

pub type Result<T> = std::result::Result<T, MotifError>;

/// Crate-level error taxonomy. Every variant carries a stable numeric code
/// (`code()`) because failures are persisted across a wire boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MotifError {
    // Schema
    #[error("unknown type label: {0}")]
    UnknownLabel(String),
    #[error("cycle in sub hierarchy at: {0}")]
    SchemaCycle(String),
    #[error("type {owner} may not own {attribute}")]
    IncompatibleOwns { owner: String, attribute: String },
    #[error("type {player} may not play {role}")]
    IncompatiblePlays { player: String, role: String },
    #[error("illegal rule head: {0}")]
    IllegalRuleHead(&'static str),
    #[error("abstract type {0} cannot be written")]
    AbstractWrite(String),

    // Write
    #[error("insert variable {0} has no isa constraint")]
    MissingIsa(String),
    #[error("insert variable {0} has multiple isa constraints")]
    MultipleIsa(String),
    #[error("attribute insert requires exactly one value: {0}")]
    AttributeValueCount(String),
    #[error("iid constraints are not allowed on insert: {0}")]
    IllegalIidOnInsert(String),
    #[error("relation insert requires at least one role player: {0}")]
    RelationMissingPlayers(String),
    #[error("string value exceeds {max} bytes")]
    ValueTooLong { max: usize },
    #[error("vertex still has live edges: {0}")]
    VertexHasEdges(String),

    // Transaction
    #[error("data writes are not allowed in a schema session")]
    SessionSchemaViolation,
    #[error("schema writes are not allowed in a data session")]
    SessionDataViolation,
    #[error("write queries are not allowed in a read transaction")]
    TransactionReadViolation,
    #[error("schema queries are not allowed in a read transaction")]
    TransactionSchemaReadViolation,

    // Planning
    #[error("traversal planning failed ({status}); model:\n{model}")]
    UnexpectedPlanningError { status: &'static str, model: String },
    #[error("query pattern is disconnected; cannot plan traversal")]
    DisconnectedPattern,

    // Reasoning
    #[error("reasoning budget of {0} iterations exceeded")]
    ReasoningBudgetExceeded(usize),
    #[error("could not construct unifier: {0}")]
    UnificationFailure(&'static str),

    // Internal
    #[error("encoding invariant violated: {0}")]
    EncodingViolation(&'static str),
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

impl MotifError {
    /// Stable numeric code, grouped by kind in the hundreds.
    pub fn code(&self) -> u16 {
        use MotifError::*;
        match self {
            UnknownLabel(_) => 101,
            SchemaCycle(_) => 102,
            IncompatibleOwns { .. } => 103,
            IncompatiblePlays { .. } => 104,
            IllegalRuleHead(_) => 105,
            AbstractWrite(_) => 106,
            MissingIsa(_) => 201,
            MultipleIsa(_) => 202,
            AttributeValueCount(_) => 203,
            IllegalIidOnInsert(_) => 204,
            RelationMissingPlayers(_) => 205,
            ValueTooLong { .. } => 206,
            VertexHasEdges(_) => 207,
            SessionSchemaViolation => 301,
            SessionDataViolation => 302,
            TransactionReadViolation => 303,
            TransactionSchemaReadViolation => 304,
            UnexpectedPlanningError { .. } => 401,
            DisconnectedPattern => 402,
            ReasoningBudgetExceeded(_) => 501,
            UnificationFailure(_) => 502,
            EncodingViolation(_) => 901,
            IllegalState(_) => 902,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.code() >= 900
    }
}

#[cfg(test)]
mod tests {
    use super::MotifError;

    #[test]
    fn codes_are_grouped_by_kind() {
        assert_eq!(MotifError::UnknownLabel("person".into()).code(), 101);
        assert_eq!(MotifError::SessionSchemaViolation.code(), 301);
        assert_eq!(MotifError::DisconnectedPattern.code(), 402);
        assert!(MotifError::IllegalState("x").is_fatal());
        assert!(!MotifError::DisconnectedPattern.is_fatal());
    }
}
