//! Rules, concludables, unification, and the reasoner.

mod concludable;
mod reasoner;
mod rule;
mod unify;

pub use concludable::{concludables_of, Concludable, ConcludableKind, DerivationMode};
pub use reasoner::{Reasoner, DEFAULT_REASONING_BUDGET};
pub use rule::{Rule, RuleHead};
pub use unify::{unify, Unification};

use parking_lot::RwLock;

use crate::error::{MotifError, Result};
use crate::pattern::Conjunction;

/// Registry of defined rules; mutated only under schema transactions.
#[derive(Default)]
pub struct LogicManager {
    rules: RwLock<Vec<Rule>>,
}

impl LogicManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_rule(
        &self,
        label: impl Into<String>,
        when: Conjunction,
        head: RuleHead,
    ) -> Result<()> {
        let rule = Rule::new(label, when, head)?;
        let mut rules = self.rules.write();
        rules.retain(|existing| existing.label() != rule.label());
        rules.push(rule);
        Ok(())
    }

    pub fn get_rule(&self, label: &str) -> Result<Rule> {
        self.rules
            .read()
            .iter()
            .find(|rule| rule.label() == label)
            .cloned()
            .ok_or_else(|| MotifError::UnknownLabel(label.to_owned()))
    }

    pub fn delete_rule(&self, label: &str) -> Result<()> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|rule| rule.label() != label);
        if rules.len() == before {
            return Err(MotifError::UnknownLabel(label.to_owned()));
        }
        Ok(())
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.rules.read().clone()
    }
}
