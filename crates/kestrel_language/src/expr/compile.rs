//! Compilation of bound expressions into closures.

use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{Error, Result, Value};

use super::ast::{BinaryOp, Expr};
use super::binder::{BoundExpr, Scope, Slot, bind};
use super::ops;

/// Source of slot values during evaluation.
pub trait Bindings {
    /// The fact under test, if any.
    fn subject(&self) -> Option<&Value>;
    /// The value at a tuple slot.
    fn slot(&self, index: usize) -> Option<&Value>;
}

/// Simple [`Bindings`] over borrowed values.
#[derive(Clone, Copy, Debug, Default)]
pub struct Env<'a> {
    /// Subject value.
    pub subject: Option<&'a Value>,
    /// Tuple slot values.
    pub slots: &'a [Value],
}

impl<'a> Env<'a> {
    /// Environment with only tuple slots.
    #[must_use]
    pub fn tuple(slots: &'a [Value]) -> Self {
        Self {
            subject: None,
            slots,
        }
    }

    /// Environment with only a subject.
    #[must_use]
    pub fn for_subject(subject: &'a Value) -> Self {
        Self {
            subject: Some(subject),
            slots: &[],
        }
    }
}

impl Bindings for Env<'_> {
    fn subject(&self) -> Option<&Value> {
        self.subject
    }

    fn slot(&self, index: usize) -> Option<&Value> {
        self.slots.get(index)
    }
}

type Eval = Arc<dyn Fn(&dyn Bindings) -> Result<Value> + Send + Sync>;

/// An expression compiled to a native closure.
///
/// Cloning is cheap. The original expression text is kept for diagnostics.
#[derive(Clone)]
pub struct CompiledExpr {
    label: Arc<str>,
    bound: Arc<BoundExpr>,
    eval: Eval,
}

impl CompiledExpr {
    /// Binds and compiles an expression in one step.
    ///
    /// # Errors
    ///
    /// Returns `UndefinedVariable` if the expression references a name the
    /// scope does not declare.
    pub fn new(expr: &Expr, scope: &Scope) -> Result<Self> {
        let bound = bind(expr, scope)?;
        Ok(Self::from_bound(expr.to_string(), bound))
    }

    /// Compiles an already bound expression.
    #[must_use]
    pub fn from_bound(label: impl Into<Arc<str>>, bound: BoundExpr) -> Self {
        let eval = compile(&bound);
        Self {
            label: label.into(),
            bound: Arc::new(bound),
            eval,
        }
    }

    /// Evaluates the expression.
    ///
    /// # Errors
    ///
    /// Returns the evaluation failure (type mismatch, missing field, ...).
    pub fn eval(&self, env: &dyn Bindings) -> Result<Value> {
        (self.eval)(env)
    }

    /// Evaluates the expression as a condition.
    ///
    /// # Errors
    ///
    /// Returns the evaluation failure.
    pub fn test(&self, env: &dyn Bindings) -> Result<bool> {
        Ok(self.eval(env)?.is_truthy())
    }

    /// The bound form, used as a structural sharing key.
    #[must_use]
    pub fn bound(&self) -> &BoundExpr {
        &self.bound
    }

    /// Source text of the expression.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompiledExpr({})", self.label)
    }
}

impl fmt::Display for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl PartialEq for CompiledExpr {
    fn eq(&self, other: &Self) -> bool {
        self.bound == other.bound
    }
}

impl Eq for CompiledExpr {}

impl std::hash::Hash for CompiledExpr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bound.hash(state);
    }
}

fn compile(expr: &BoundExpr) -> Eval {
    match expr {
        BoundExpr::Literal(v) => {
            let v = v.clone();
            Arc::new(move |_: &dyn Bindings| Ok(v.clone()))
        }
        BoundExpr::Slot(Slot::Subject) => Arc::new(|env: &dyn Bindings| {
            env.subject()
                .cloned()
                .ok_or_else(|| Error::internal("expression has no subject fact"))
        }),
        BoundExpr::Slot(Slot::Tuple(i)) => {
            let i = *i;
            Arc::new(move |env: &dyn Bindings| {
                env.slot(i)
                    .cloned()
                    .ok_or_else(|| Error::internal(format!("tuple slot {i} out of range")))
            })
        }
        BoundExpr::Field(inner, field) => {
            let inner = compile(inner);
            let field = Arc::clone(field);
            Arc::new(move |env: &dyn Bindings| {
                let value = inner(env)?;
                value
                    .get(&field)
                    .cloned()
                    .ok_or_else(|| Error::attribute_not_found(&*field, value.kind_name()))
            })
        }
        BoundExpr::Unary(op, inner) => {
            let op = *op;
            let inner = compile(inner);
            Arc::new(move |env: &dyn Bindings| ops::unary(op, &inner(env)?))
        }
        BoundExpr::Binary(BinaryOp::And, lhs, rhs) => {
            let (lhs, rhs) = (compile(lhs), compile(rhs));
            Arc::new(move |env: &dyn Bindings| {
                Ok(Value::Bool(lhs(env)?.is_truthy() && rhs(env)?.is_truthy()))
            })
        }
        BoundExpr::Binary(BinaryOp::Or, lhs, rhs) => {
            let (lhs, rhs) = (compile(lhs), compile(rhs));
            Arc::new(move |env: &dyn Bindings| {
                Ok(Value::Bool(lhs(env)?.is_truthy() || rhs(env)?.is_truthy()))
            })
        }
        BoundExpr::Binary(op, lhs, rhs) => {
            let op = *op;
            let (lhs, rhs) = (compile(lhs), compile(rhs));
            Arc::new(move |env: &dyn Bindings| ops::binary(op, &lhs(env)?, &rhs(env)?))
        }
        BoundExpr::If(c, t, e) => {
            let (c, t, e) = (compile(c), compile(t), compile(e));
            Arc::new(move |env: &dyn Bindings| if c(env)?.is_truthy() { t(env) } else { e(env) })
        }
        BoundExpr::List(items) => {
            let items: Vec<Eval> = items.iter().map(compile).collect();
            Arc::new(move |env: &dyn Bindings| {
                items
                    .iter()
                    .map(|item| item(env))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::from)
            })
        }
        BoundExpr::Call(func, args) => {
            let func = func.clone();
            let args: Vec<Eval> = args.iter().map(compile).collect();
            Arc::new(move |env: &dyn Bindings| {
                let values = args
                    .iter()
                    .map(|arg| arg(env))
                    .collect::<Result<Vec<_>>>()?;
                func.call(&values)
            })
        }
    }
}
