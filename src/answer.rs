//! Query answers: mappings from named variables to concept handles.

use std::collections::BTreeMap;

use crate::encoding::{ThingIid, TypeIid};

/// Handle to a stored concept: a thing instance or a type.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Concept {
    Thing(ThingIid),
    Type(TypeIid),
}

impl Concept {
    pub fn as_thing(&self) -> Option<&ThingIid> {
        match self {
            Concept::Thing(iid) => Some(iid),
            Concept::Type(_) => None,
        }
    }

    pub fn as_type(&self) -> Option<TypeIid> {
        match self {
            Concept::Type(iid) => Some(*iid),
            Concept::Thing(_) => None,
        }
    }
}

/// One answer: named variables only; anonymous variables are elided.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConceptMap {
    bindings: BTreeMap<String, Concept>,
}

impl ConceptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, concept: Concept) {
        self.bindings.insert(name.into(), concept);
    }

    pub fn get(&self, name: &str) -> Option<&Concept> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Concept)> {
        self.bindings.iter().map(|(name, concept)| (name.as_str(), concept))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Restrict to the given names; used for memo keys during resolution.
    pub fn project(&self, names: &[&str]) -> ConceptMap {
        let mut out = ConceptMap::new();
        for name in names {
            if let Some(concept) = self.bindings.get(*name) {
                out.bind(*name, concept.clone());
            }
        }
        out
    }
}

impl FromIterator<(String, Concept)> for ConceptMap {
    fn from_iter<I: IntoIterator<Item = (String, Concept)>>(iter: I) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}
