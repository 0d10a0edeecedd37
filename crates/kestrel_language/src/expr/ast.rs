//! Expression syntax tree.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use kestrel_foundation::{Result, Value};

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical negation of truthiness.
    Not,
    /// Arithmetic negation.
    Neg,
    /// Length of a string or collection.
    Len,
    /// True if the operand is nil.
    IsNil,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Equality (ints and floats compare numerically).
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Short-circuit logical and.
    And,
    /// Short-circuit logical or.
    Or,
    /// Addition (or string concatenation).
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Rem,
    /// String prefix test.
    StartsWith,
    /// String suffix test.
    EndsWith,
    /// Substring, element, or key membership test.
    Contains,
}

impl BinaryOp {
    /// Operator symbol used when rendering expressions.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Contains => "contains",
        }
    }
}

type NativeImpl = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A named host function callable from expressions.
///
/// Two native functions are equal only if they are the same closure
/// allocation under the same name.
#[derive(Clone)]
pub struct NativeFn {
    name: Arc<str>,
    func: Arc<NativeImpl>,
}

impl NativeFn {
    /// Wraps a host closure.
    pub fn new(
        name: impl Into<Arc<str>>,
        func: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the function.
    ///
    /// # Errors
    ///
    /// Returns whatever error the host closure reports.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.func).cast::<()>() as usize
    }
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr() && self.name == other.name
    }
}

impl Eq for NativeFn {}

impl Hash for NativeFn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.addr().hash(state);
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

/// An expression over named declarations.
///
/// Expressions are plain data. They are bound to tuple slots by the
/// [`binder`](super::binder) and compiled to closures once per network node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Constant value.
    Literal(Value),
    /// Reference to a declaration (pattern, binding, or aggregate name).
    Var(Arc<str>),
    /// Field of a record value.
    Field(Box<Expr>, Arc<str>),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Conditional on truthiness.
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Vector of values.
    List(Vec<Expr>),
    /// Host function call.
    Call(NativeFn, Vec<Expr>),
}

impl Expr {
    /// Constant expression.
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Declaration reference.
    #[must_use]
    pub fn var(name: impl Into<Arc<str>>) -> Self {
        Self::Var(name.into())
    }

    /// Shorthand for `var(declaration).field(field)`.
    #[must_use]
    pub fn path(declaration: impl Into<Arc<str>>, field: impl Into<Arc<str>>) -> Self {
        Self::var(declaration).field(field)
    }

    /// Conditional expression.
    #[must_use]
    pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::If(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    /// List expression.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Expr>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Host function call.
    #[must_use]
    pub fn call(func: NativeFn, args: impl IntoIterator<Item = Expr>) -> Self {
        Self::Call(func, args.into_iter().collect())
    }

    /// Field access.
    #[must_use]
    pub fn field(self, name: impl Into<Arc<str>>) -> Self {
        Self::Field(Box::new(self), name.into())
    }

    fn unary(self, op: UnaryOp) -> Self {
        Self::Unary(op, Box::new(self))
    }

    fn binary(self, op: BinaryOp, rhs: Expr) -> Self {
        Self::Binary(op, Box::new(self), Box::new(rhs))
    }

    /// Logical negation.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        self.unary(UnaryOp::Not)
    }

    /// Arithmetic negation.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn neg(self) -> Self {
        self.unary(UnaryOp::Neg)
    }

    /// Length of a string or collection.
    #[must_use]
    pub fn len(self) -> Self {
        self.unary(UnaryOp::Len)
    }

    /// Nil test.
    #[must_use]
    pub fn is_nil(self) -> Self {
        self.unary(UnaryOp::IsNil)
    }

    /// `self == rhs`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn eq(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, rhs.into())
    }

    /// `self != rhs`
    #[must_use]
    pub fn ne(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, rhs.into())
    }

    /// `self < rhs`
    #[must_use]
    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, rhs.into())
    }

    /// `self <= rhs`
    #[must_use]
    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, rhs.into())
    }

    /// `self > rhs`
    #[must_use]
    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, rhs.into())
    }

    /// `self >= rhs`
    #[must_use]
    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, rhs.into())
    }

    /// `self && rhs`
    #[must_use]
    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, rhs.into())
    }

    /// `self || rhs`
    #[must_use]
    pub fn or(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, rhs.into())
    }

    /// `self + rhs`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn add(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, rhs.into())
    }

    /// `self - rhs`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, rhs.into())
    }

    /// `self * rhs`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, rhs.into())
    }

    /// `self / rhs`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn div(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Div, rhs.into())
    }

    /// `self % rhs`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn rem(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Rem, rhs.into())
    }

    /// String prefix test.
    #[must_use]
    pub fn starts_with(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::StartsWith, rhs.into())
    }

    /// String suffix test.
    #[must_use]
    pub fn ends_with(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::EndsWith, rhs.into())
    }

    /// Membership test.
    #[must_use]
    pub fn contains(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Contains, rhs.into())
    }

    /// Names of all declarations this expression references.
    #[must_use]
    pub fn free_vars(&self) -> BTreeSet<Arc<str>> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<Arc<str>>) {
        match self {
            Self::Literal(_) => {}
            Self::Var(name) => {
                out.insert(Arc::clone(name));
            }
            Self::Field(inner, _) | Self::Unary(_, inner) => inner.collect_vars(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Self::If(c, t, e) => {
                c.collect_vars(out);
                t.collect_vars(out);
                e.collect_vars(out);
            }
            Self::List(items) | Self::Call(_, items) => {
                for item in items {
                    item.collect_vars(out);
                }
            }
        }
    }

    /// Returns a copy with every reference to `from` renamed to `to`.
    #[must_use]
    pub fn rename(&self, from: &str, to: &Arc<str>) -> Self {
        let r = |e: &Expr| Box::new(e.rename(from, to));
        match self {
            Self::Literal(v) => Self::Literal(v.clone()),
            Self::Var(name) if &**name == from => Self::Var(Arc::clone(to)),
            Self::Var(name) => Self::Var(Arc::clone(name)),
            Self::Field(inner, field) => Self::Field(r(inner), Arc::clone(field)),
            Self::Unary(op, inner) => Self::Unary(*op, r(inner)),
            Self::Binary(op, lhs, rhs) => Self::Binary(*op, r(lhs), r(rhs)),
            Self::If(c, t, e) => Self::If(r(c), r(t), r(e)),
            Self::List(items) => Self::List(items.iter().map(|e| e.rename(from, to)).collect()),
            Self::Call(f, args) => {
                Self::Call(f.clone(), args.iter().map(|e| e.rename(from, to)).collect())
            }
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Self::Literal(Value::Int(n))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Self::Literal(Value::from(n))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Self::Literal(Value::Float(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Self::Literal(Value::from(s))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v:?}"),
            Self::Var(name) => f.write_str(name),
            Self::Field(inner, field) => write!(f, "{inner}.{field}"),
            Self::Unary(UnaryOp::Not, inner) => write!(f, "!{inner}"),
            Self::Unary(UnaryOp::Neg, inner) => write!(f, "-{inner}"),
            Self::Unary(UnaryOp::Len, inner) => write!(f, "len({inner})"),
            Self::Unary(UnaryOp::IsNil, inner) => write!(f, "is_nil({inner})"),
            Self::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::If(c, t, e) => write!(f, "if {c} then {t} else {e}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
