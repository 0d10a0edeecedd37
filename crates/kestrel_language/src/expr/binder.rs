//! Resolution of declaration names to tuple slots.
//!
//! Binding turns an [`Expr`] into a [`BoundExpr`] in which every variable is
//! a [`Slot`]. Two bound expressions are equal exactly when they compute the
//! same thing over the same slots, which is what node sharing keys on: the
//! name a rule gave its pattern disappears, while references to different
//! outer slots stay distinct.

use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{Error, Result, Value};

use super::ast::{BinaryOp, Expr, NativeFn, UnaryOp};

/// Where a bound variable reads its value from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// The fact under test (the pattern's own declaration, or an aggregate result).
    Subject,
    /// The fact at the given position of the incoming tuple.
    Tuple(usize),
}

/// An expression with all names resolved to slots.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BoundExpr {
    /// Constant value.
    Literal(Value),
    /// Slot reference.
    Slot(Slot),
    /// Field of a record value.
    Field(Box<BoundExpr>, Arc<str>),
    /// Unary operation.
    Unary(UnaryOp, Box<BoundExpr>),
    /// Binary operation.
    Binary(BinaryOp, Box<BoundExpr>, Box<BoundExpr>),
    /// Conditional on truthiness.
    If(Box<BoundExpr>, Box<BoundExpr>, Box<BoundExpr>),
    /// Vector of values.
    List(Vec<BoundExpr>),
    /// Host function call.
    Call(NativeFn, Vec<BoundExpr>),
}

impl BoundExpr {
    /// Returns true if the expression reads any tuple slot.
    #[must_use]
    pub fn uses_tuple(&self) -> bool {
        self.max_tuple_slot().is_some()
    }

    /// Returns true if the expression reads the subject.
    #[must_use]
    pub fn uses_subject(&self) -> bool {
        self.any_slot(&|s| s == Slot::Subject)
    }

    /// Highest tuple slot referenced, if any.
    #[must_use]
    pub fn max_tuple_slot(&self) -> Option<usize> {
        let mut max = None;
        self.visit_slots(&mut |s| {
            if let Slot::Tuple(i) = s {
                max = Some(max.map_or(i, |m: usize| m.max(i)));
            }
        });
        max
    }

    fn any_slot(&self, pred: &dyn Fn(Slot) -> bool) -> bool {
        let mut found = false;
        self.visit_slots(&mut |s| found |= pred(s));
        found
    }

    fn visit_slots(&self, f: &mut dyn FnMut(Slot)) {
        match self {
            Self::Literal(_) => {}
            Self::Slot(s) => f(*s),
            Self::Field(inner, _) | Self::Unary(_, inner) => inner.visit_slots(f),
            Self::Binary(_, lhs, rhs) => {
                lhs.visit_slots(f);
                rhs.visit_slots(f);
            }
            Self::If(c, t, e) => {
                c.visit_slots(f);
                t.visit_slots(f);
                e.visit_slots(f);
            }
            Self::List(items) | Self::Call(_, items) => {
                for item in items {
                    item.visit_slots(f);
                }
            }
        }
    }
}

impl fmt::Display for BoundExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v:?}"),
            Self::Slot(Slot::Subject) => f.write_str("$it"),
            Self::Slot(Slot::Tuple(i)) => write!(f, "${i}"),
            Self::Field(inner, field) => write!(f, "{inner}.{field}"),
            Self::Unary(op, inner) => write!(f, "{op:?}({inner})"),
            Self::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::If(c, t, e) => write!(f, "if {c} then {t} else {e}"),
            Self::List(items) => write!(f, "[{} items]", items.len()),
            Self::Call(func, args) => write!(f, "{}/{}", func.name(), args.len()),
        }
    }
}

/// Names visible to an expression and the slots they live in.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    subject: Option<Arc<str>>,
    tuple: Vec<Arc<str>>,
}

impl Scope {
    /// Creates a scope over the given tuple declarations (slot order).
    #[must_use]
    pub fn new(tuple: Vec<Arc<str>>) -> Self {
        Self {
            subject: None,
            tuple,
        }
    }

    /// Names the subject fact.
    #[must_use]
    pub fn with_subject(mut self, name: impl Into<Arc<str>>) -> Self {
        self.subject = Some(name.into());
        self
    }

    /// Declarations in slot order.
    #[must_use]
    pub fn tuple(&self) -> &[Arc<str>] {
        &self.tuple
    }

    /// Resolves a name. The subject shadows tuple declarations, and later
    /// tuple declarations shadow earlier ones.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Slot> {
        if self.subject.as_deref() == Some(name) {
            return Some(Slot::Subject);
        }
        self.tuple
            .iter()
            .rposition(|d| &**d == name)
            .map(Slot::Tuple)
    }
}

/// Binds an expression against a scope.
///
/// # Errors
///
/// Returns `UndefinedVariable` for names the scope does not declare.
pub fn bind(expr: &Expr, scope: &Scope) -> Result<BoundExpr> {
    let b = |e: &Expr| bind(e, scope).map(Box::new);
    Ok(match expr {
        Expr::Literal(v) => BoundExpr::Literal(v.clone()),
        Expr::Var(name) => BoundExpr::Slot(
            scope
                .resolve(name)
                .ok_or_else(|| Error::undefined_variable(&**name))?,
        ),
        Expr::Field(inner, field) => BoundExpr::Field(b(inner)?, Arc::clone(field)),
        Expr::Unary(op, inner) => BoundExpr::Unary(*op, b(inner)?),
        Expr::Binary(op, lhs, rhs) => BoundExpr::Binary(*op, b(lhs)?, b(rhs)?),
        Expr::If(c, t, e) => BoundExpr::If(b(c)?, b(t)?, b(e)?),
        Expr::List(items) => BoundExpr::List(
            items
                .iter()
                .map(|e| bind(e, scope))
                .collect::<Result<_>>()?,
        ),
        Expr::Call(func, args) => BoundExpr::Call(
            func.clone(),
            args.iter()
                .map(|e| bind(e, scope))
                .collect::<Result<_>>()?,
        ),
    })
}
