//! Rule repository and session factory.

use std::sync::Arc;

use kestrel_foundation::{Error, Result};
use kestrel_language::RuleDefinition;
use kestrel_storage::{FactSchema, TypeRegistry};
use tracing::debug;

use crate::aggregate::{Aggregator, AggregatorRegistry};
use crate::config::{CompilerOptions, SessionConfig};
use crate::network::{Network, NetworkBuilder, NetworkSchema};
use crate::session::Session;

/// Collects rules, fact schemas, and aggregators for compilation.
#[derive(Clone, Default)]
pub struct RuleRepository {
    rules: Vec<RuleDefinition>,
    registry: TypeRegistry,
    aggregators: AggregatorRegistry,
    options: CompilerOptions,
}

impl RuleRepository {
    /// Creates an empty repository with the built-in aggregators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set compiler options.
    #[must_use]
    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a rule.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a rule with the same name exists.
    pub fn add_rule(&mut self, rule: RuleDefinition) -> Result<()> {
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(Error::invalid_argument(format!(
                "rule {} is already defined",
                rule.name
            )));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Adds several rules.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate name; earlier rules stay added.
    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = RuleDefinition>) -> Result<()> {
        for rule in rules {
            self.add_rule(rule)?;
        }
        Ok(())
    }

    /// Registers a fact schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the type already has a schema.
    pub fn register_schema(&mut self, schema: FactSchema) -> Result<()> {
        self.registry.register(schema)
    }

    /// Registers (or replaces) an aggregator factory.
    pub fn register_aggregator(
        &mut self,
        name: impl Into<Arc<str>>,
        factory: impl Fn(&[Arc<str>]) -> Result<Box<dyn Aggregator>> + Send + Sync + 'static,
    ) {
        self.aggregators.register(name, factory);
    }

    /// The rules added so far.
    #[must_use]
    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    /// Compiles the rules into a shared network.
    ///
    /// # Errors
    ///
    /// Returns the first rule that fails to compile, with the rule name in
    /// the error context.
    pub fn compile(&self) -> Result<SessionFactory> {
        let mut builder = NetworkBuilder::new(
            self.options,
            self.registry.clone(),
            self.aggregators.clone(),
        );
        for rule in &self.rules {
            builder.add_rule(rule.clone())?;
        }
        let network = builder.build();
        debug!(rules = self.rules.len(), nodes = network.len(), "repository compiled");
        Ok(SessionFactory {
            network: Arc::new(network),
        })
    }
}

/// Creates sessions over one compiled network.
#[derive(Clone, Debug)]
pub struct SessionFactory {
    network: Arc<Network>,
}

impl SessionFactory {
    /// Creates a session with the default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if a rule that matches an empty working memory cannot be
    /// activated (a failing filter or priority expression).
    pub fn create_session(&self) -> Result<Session> {
        self.create_session_with(SessionConfig::default())
    }

    /// Creates a session with the given configuration.
    ///
    /// # Errors
    ///
    /// See [`create_session`](Self::create_session).
    pub fn create_session_with(&self, config: SessionConfig) -> Result<Session> {
        Session::new(Arc::clone(&self.network), config)
    }

    /// Describes the compiled network.
    #[must_use]
    pub fn schema(&self) -> NetworkSchema {
        self.network.schema()
    }

    /// The compiled network.
    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NodeKind;
    use kestrel_foundation::ErrorKind;
    use kestrel_language::{AggregateElement, PatternElement};

    #[test]
    fn duplicate_rule_names_are_rejected() {
        let mut repository = RuleRepository::new();
        repository.add_rule(RuleDefinition::new("A")).unwrap();
        let err = repository.add_rule(RuleDefinition::new("A")).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
        assert_eq!(repository.rules().len(), 1);
    }

    #[test]
    fn compile_reports_the_failing_rule() {
        let mut repository = RuleRepository::new();
        repository
            .add_rule(RuleDefinition::new("Broken").when(
                PatternElement::new("r", "Result")
                    .from_aggregate(AggregateElement::new("Missing", PatternElement::new("f", "Fact"))),
            ))
            .unwrap();
        let err = repository.compile().unwrap_err();
        assert_eq!(
            err.context.and_then(|c| c.rule).as_deref(),
            Some("Broken")
        );
    }

    #[test]
    fn custom_aggregators_compile() {
        let mut repository = RuleRepository::new();
        repository.register_aggregator("Latest", |_| Ok(Box::new(crate::aggregate::First::default())));
        repository
            .add_rule(RuleDefinition::new("UsesLatest").when(
                PatternElement::new("r", "Latest")
                    .from_aggregate(AggregateElement::new("Latest", PatternElement::new("f", "Reading"))),
            ))
            .unwrap();
        let factory = repository.compile().unwrap();
        assert_eq!(factory.schema().count(NodeKind::Aggregate), 1);
    }

    #[test]
    fn factories_share_one_network() {
        let mut repository = RuleRepository::new();
        repository
            .add_rule(RuleDefinition::new("Any").when(PatternElement::new("c", "Customer")))
            .unwrap();
        let factory = repository.compile().unwrap();
        let a = factory.create_session().unwrap();
        let b = factory.clone().create_session().unwrap();
        assert_eq!(a.schema(), b.schema());
        assert_eq!(factory.network().rule_names().len(), 1);
    }
}
