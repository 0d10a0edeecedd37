//! Error types for the Kestrel rule engine.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::types::Type;

/// The main error type for Kestrel operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates a duplicate fact error.
    #[must_use]
    pub fn duplicate_fact(fact_type: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateFact {
            fact_type: fact_type.into(),
            identity: identity.into(),
        })
    }

    /// Creates an unknown fact error.
    #[must_use]
    pub fn unknown_fact(fact_type: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownFact {
            fact_type: fact_type.into(),
            identity: identity.into(),
        })
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument(message.into()))
    }

    /// Creates an undefined variable error.
    #[must_use]
    pub fn undefined_variable(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UndefinedVariable(name.into()))
    }

    /// Creates an attribute not found error.
    #[must_use]
    pub fn attribute_not_found(attribute: impl Into<String>, on: impl Into<String>) -> Self {
        Self::new(ErrorKind::AttributeNotFound {
            attribute: attribute.into(),
            on: on.into(),
        })
    }

    /// Creates an error raised by a rule action.
    #[must_use]
    pub fn action(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Action(message.into()))
    }

    /// Creates an error raised by a native function.
    #[must_use]
    pub fn native(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Native {
            function: function.into(),
            message: message.into(),
        })
    }

    /// Wraps a condition, binding, or aggregate expression failure.
    #[must_use]
    pub fn lhs_evaluation(rule: impl Into<String>, expression: impl Into<String>, source: Error) -> Self {
        Self::new(ErrorKind::LhsEvaluation {
            rule: rule.into(),
            expression: expression.into(),
            source: Box::new(source),
        })
    }

    /// Wraps a filter or dynamic priority expression failure.
    #[must_use]
    pub fn agenda_evaluation(
        rule: impl Into<String>,
        expression: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::new(ErrorKind::AgendaEvaluation {
            rule: rule.into(),
            expression: expression.into(),
            source: Box::new(source),
        })
    }

    /// Wraps a rule action failure.
    #[must_use]
    pub fn rhs_evaluation(rule: impl Into<String>, source: Error) -> Self {
        Self::new(ErrorKind::RhsEvaluation {
            rule: rule.into(),
            source: Box::new(source),
        })
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns the innermost error, looking through evaluation wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match &self.kind {
            ErrorKind::LhsEvaluation { source, .. }
            | ErrorKind::AgendaEvaluation { source, .. }
            | ErrorKind::RhsEvaluation { source, .. } => source.root_cause(),
            _ => self,
        }
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A fact with the same identity is already in working memory.
    #[error("duplicate fact: {fact_type} {identity}")]
    DuplicateFact {
        /// The fact type.
        fact_type: String,
        /// Rendered identity of the rejected fact.
        identity: String,
    },

    /// No fact with the given identity is in working memory.
    #[error("unknown fact: {fact_type} {identity}")]
    UnknownFact {
        /// The fact type.
        fact_type: String,
        /// Rendered identity of the missing fact.
        identity: String,
    },

    /// Caller supplied an argument the engine cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A condition, binding, or aggregate expression failed.
    #[error("failed to evaluate condition in rule {rule}: {expression}")]
    LhsEvaluation {
        /// Rule that owns the expression.
        rule: String,
        /// Rendered expression.
        expression: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A filter or dynamic priority expression failed.
    #[error("failed to evaluate agenda expression in rule {rule}: {expression}")]
    AgendaEvaluation {
        /// Rule that owns the expression.
        rule: String,
        /// Rendered expression.
        expression: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A rule action failed.
    #[error("failed to execute action of rule {rule}")]
    RhsEvaluation {
        /// Rule whose action failed.
        rule: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Type mismatch during expression evaluation or schema validation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Field not present on a value.
    #[error("attribute not found: {attribute} on {on}")]
    AttributeNotFound {
        /// The field name that was not found.
        attribute: String,
        /// Rendered value (or type) that was queried.
        on: String,
    },

    /// Expression referenced a name no declaration provides.
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    /// A native function reported a failure.
    #[error("native function {function} failed: {message}")]
    Native {
        /// Function name.
        function: String,
        /// Failure description.
        message: String,
    },

    /// Error raised explicitly by a rule action.
    #[error("action error: {0}")]
    Action(String),

    /// Index out of bounds.
    #[error("index out of bounds: {index} (length {length})")]
    IndexOutOfBounds {
        /// The index that was accessed.
        index: usize,
        /// The actual length of the collection.
        length: usize,
    },

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticLimit {
    /// Maximum rule firings in one `fire` call exceeded.
    MaxFirings {
        /// The configured limit.
        limit: usize,
        /// Rule that was about to fire when the limit hit.
        context: Option<String>,
    },
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxFirings { limit, context } => {
                write!(f, "max firings ({limit}) exceeded")?;
                if let Some(ctx) = context {
                    write!(f, ": {ctx}")?;
                }
                Ok(())
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Rule that was executing, if any.
    pub rule: Option<String>,
    /// Facts involved, rendered.
    pub facts: Vec<String>,
    /// Stack of nested operations (outermost first).
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule name.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Adds a rendered fact.
    #[must_use]
    pub fn with_fact(mut self, fact: impl Into<String>) -> Self {
        self.facts.push(fact.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "in rule {rule}")?;
        }
        if !self.facts.is_empty() {
            write!(f, " with facts [{}]", self.facts.join(", "))?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
