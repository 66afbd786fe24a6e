//! Unification between a query concludable and a rule-head concludable:
//! a variable renaming plus a compatibility check over type hints. A rule
//! only applies where its head's hint set intersects the target's.

use crate::logic::concludable::Concludable;
use crate::pattern::VarId;

/// A successful unification. There is no empty sentinel: either a unifier is
/// found or `unify` returns `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct Unification {
    pub variable_mapping: Vec<(VarId, VarId)>,
}

/// Hint sets intersect; an absent hint set unifies with anything.
fn hints_intersect<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.is_empty() || b.is_empty() || a.iter().any(|hint| b.contains(hint))
}

pub fn unify(query: &Concludable, head: &Concludable) -> Option<Unification> {
    if query.kind != head.kind {
        return None;
    }
    if !hints_intersect(&query.type_hints, &head.type_hints) {
        return None;
    }
    if query.kind == crate::logic::concludable::ConcludableKind::Relation {
        // every query player must find a head player with overlapping roles
        for query_roles in &query.role_hints {
            let compatible = head
                .role_hints
                .iter()
                .any(|head_roles| hints_intersect(query_roles, head_roles));
            if !compatible {
                return None;
            }
        }
    }
    Some(Unification {
        variable_mapping: vec![(query.owner, head.owner)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Label;
    use crate::logic::concludable::ConcludableKind;

    fn concludable(kind: ConcludableKind, hints: &[&str]) -> Concludable {
        Concludable {
            kind,
            owner: VarId(0),
            type_hints: hints.iter().map(|h| Label::of(*h)).collect(),
            role_hints: Vec::new(),
        }
    }

    #[test]
    fn kinds_must_match() {
        let query = concludable(ConcludableKind::Has, &[]);
        let head = concludable(ConcludableKind::Relation, &[]);
        assert!(unify(&query, &head).is_none());
    }

    #[test]
    fn hint_sets_gate_unification() {
        let query = concludable(ConcludableKind::Isa, &["friendship"]);
        let matching = concludable(ConcludableKind::Isa, &["friendship", "bond"]);
        let disjoint = concludable(ConcludableKind::Isa, &["employment"]);
        assert!(unify(&query, &matching).is_some());
        assert!(unify(&query, &disjoint).is_none());
    }

    #[test]
    fn empty_hints_unify_with_anything() {
        let query = concludable(ConcludableKind::Isa, &[]);
        let head = concludable(ConcludableKind::Isa, &["employment"]);
        assert!(unify(&query, &head).is_some());
    }

    #[test]
    fn relation_roles_must_overlap() {
        let mut query = concludable(ConcludableKind::Relation, &["marriage"]);
        query.role_hints = vec![vec![Label::scoped("spouse", "marriage")]];
        let mut head = concludable(ConcludableKind::Relation, &["marriage"]);
        head.role_hints = vec![vec![Label::scoped("spouse", "marriage")]];
        assert!(unify(&query, &head).is_some());

        head.role_hints = vec![vec![Label::scoped("employee", "employment")]];
        assert!(unify(&query, &head).is_none());
    }
}
