//! The interface rule actions use to talk to the engine.

use kestrel_foundation::{Result, Value};
use kestrel_storage::FactType;

use super::types::ActionTrigger;

/// Engine services available to a firing rule.
///
/// Mutations made through the context propagate before the call returns,
/// except for the `queue_*` methods which are held until the session
/// propagates linked facts.
pub trait RuleContext {
    /// Name of the firing rule.
    fn rule_name(&self) -> &str;

    /// Transition that caused this firing.
    fn trigger(&self) -> ActionTrigger;

    /// Value matched under a declaration name.
    fn get(&self, declaration: &str) -> Option<&Value>;

    /// Inserts a fact.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFact` if a fact with the same identity exists.
    fn insert(&mut self, fact_type: FactType, value: Value) -> Result<()>;

    /// Updates the fact with the same identity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if no such fact exists.
    fn update(&mut self, fact_type: FactType, value: Value) -> Result<()>;

    /// Retracts the fact with the same identity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if no such fact exists.
    fn retract(&mut self, fact_type: FactType, value: Value) -> Result<()>;

    /// Retracts the fact if present. Returns whether anything was retracted.
    ///
    /// # Errors
    ///
    /// Propagation failures only.
    fn try_retract(&mut self, fact_type: FactType, value: Value) -> Result<bool>;

    /// Inserts or updates the fact this rule owns under `key`.
    ///
    /// The firing activation becomes a source of the fact. The engine
    /// retracts it once no source activation remains.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFact` if a fact not owned by this key has the same identity.
    fn insert_linked(&mut self, key: Value, fact_type: FactType, value: Value) -> Result<()>;

    /// Updates the fact this rule owns under `key`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if the rule owns no fact under the key.
    fn update_linked(&mut self, key: Value, value: Value) -> Result<()>;

    /// Retracts the fact this rule owns under `key`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if the rule owns no fact under the key.
    fn retract_linked(&mut self, key: Value) -> Result<()>;

    /// Queues an upsert of a linked fact.
    fn queue_insert_linked(&mut self, key: Value, fact_type: FactType, value: Value);

    /// Queues an update of a linked fact.
    fn queue_update_linked(&mut self, key: Value, value: Value);

    /// Queues a retraction of a linked fact.
    fn queue_retract_linked(&mut self, key: Value);

    /// Current value of the fact this rule owns under `key`.
    fn linked(&self, key: &Value) -> Option<Value>;

    /// Stops firing after the current action completes.
    fn halt(&mut self);
}
