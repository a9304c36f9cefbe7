//! Rule registry.
//!
//! Holds the rule set as a copy-on-write snapshot. Matching clones the
//! current `Arc` and releases the lock before walking the rules, so
//! administrative changes never block the request path for longer than a
//! pointer swap.

use crate::domain::rule::{Method, Rule, RuleError, RulePatch};
use std::sync::{Arc, PoisonError, RwLock};

/// Whether a registration added a new rule or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
}

type Snapshot = Arc<Vec<Arc<Rule>>>;

/// Ordered collection of rules.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: RwLock<Snapshot>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of the rule set.
    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn modify<R>(&self, f: impl FnOnce(&mut Vec<Arc<Rule>>) -> R) -> R {
        let mut guard = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Arc<Rule>> = guard.as_ref().clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Add a rule, or replace the rule with the same id in place.
    ///
    /// # Errors
    /// Returns the validation error if the rule is malformed.
    pub fn register(&self, rule: Rule) -> Result<Registration, RuleError> {
        rule.validate()?;
        let rule = Arc::new(rule);
        Ok(self.modify(|rules| {
            match rules.iter_mut().find(|existing| existing.id == rule.id) {
                Some(slot) => {
                    *slot = rule;
                    Registration::Replaced
                }
                None => {
                    rules.push(rule);
                    Registration::Added
                }
            }
        }))
    }

    /// Apply a partial update to the rule with `id`.
    ///
    /// Returns the updated rule, or `None` if no rule has that id.
    ///
    /// # Errors
    /// Returns the validation error if the patched rule is malformed; the
    /// stored rule is left unchanged.
    pub fn update(&self, id: &str, patch: &RulePatch) -> Result<Option<Arc<Rule>>, RuleError> {
        self.modify(|rules| {
            let Some(slot) = rules.iter_mut().find(|rule| rule.id == id) else {
                return Ok(None);
            };
            let updated = patch.apply_to(slot.as_ref());
            updated.validate()?;
            let updated = Arc::new(updated);
            *slot = Arc::clone(&updated);
            Ok(Some(updated))
        })
    }

    /// Remove the rule with `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<Rule>> {
        self.modify(|rules| {
            let index = rules.iter().position(|rule| rule.id == id)?;
            Some(rules.remove(index))
        })
    }

    /// First enabled rule, in registration order, matching `method` and `path`.
    pub fn find(&self, path: &str, method: Method) -> Option<Arc<Rule>> {
        self.snapshot()
            .iter()
            .find(|rule| rule.enabled && rule.method == method && rule.path.matches(path))
            .cloned()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Rule>> {
        self.snapshot().iter().find(|rule| rule.id == id).cloned()
    }

    /// All rules in registration order, enabled or not.
    pub fn list(&self) -> Vec<Arc<Rule>> {
        self.snapshot().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
