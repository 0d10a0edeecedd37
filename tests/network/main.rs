//! Integration tests for network compilation and inspection.

mod render;
mod sharing;

use kestrel_engine::{CompilerOptions, RuleRepository, SessionFactory};
use kestrel_language::{Expr, PatternElement, RuleDefinition};

/// Compiles the rules with the given options.
pub fn compile(rules: Vec<RuleDefinition>, options: CompilerOptions) -> SessionFactory {
    let mut repository = RuleRepository::new().with_options(options);
    repository.add_rules(rules).unwrap();
    repository.compile().unwrap()
}

/// A rule matching customers whose name starts with "Valid".
pub fn valid_customers(name: &str) -> RuleDefinition {
    RuleDefinition::new(name).when(
        PatternElement::new("c", "Customer")
            .with_condition(Expr::path("c", "name").starts_with("Valid")),
    )
}
