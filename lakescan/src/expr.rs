use crate::scalar::Scalar;
use std::collections::BTreeSet;
use std::fmt;

/// Binary operators of the predicate tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl Operator {
    /// Operator with left and right operands swapped (`c == x.f` is the
    /// same constraint as `x.f == c` with the comparison flipped).
    pub fn swap(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => other,
        }
    }
}

/// Structured predicate tree composed against a row type's fields.
///
/// Columns name fields of the row type, not physical parquet columns; the
/// analyzer resolves them through the type metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Scalar),
    Binary {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    /// Byte-ordinal prefix match on a string field.
    StartsWith { field: String, prefix: String },
}

/// References a field of the row type.
pub fn col(field: impl Into<String>) -> Expr {
    Expr::Column(field.into())
}

/// Wraps a literal value.
pub fn lit(value: impl Into<Scalar>) -> Expr {
    Expr::Literal(value.into())
}

/// Byte-ordinal prefix predicate on a string field.
pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Expr {
    Expr::StartsWith {
        field: field.into(),
        prefix: prefix.into(),
    }
}

impl Expr {
    fn binary(self, op: Operator, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Expr {
        self.binary(Operator::Eq, right)
    }

    pub fn not_eq(self, right: Expr) -> Expr {
        self.binary(Operator::NotEq, right)
    }

    pub fn lt(self, right: Expr) -> Expr {
        self.binary(Operator::Lt, right)
    }

    pub fn lt_eq(self, right: Expr) -> Expr {
        self.binary(Operator::LtEq, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        self.binary(Operator::Gt, right)
    }

    pub fn gt_eq(self, right: Expr) -> Expr {
        self.binary(Operator::GtEq, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(Operator::And, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        self.binary(Operator::Or, right)
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Splits nested conjunctions into their members, in left-to-right
    /// order. Anything that is not an `And` is returned whole.
    pub fn split_conjunction(&self) -> Vec<&Expr> {
        let mut members = Vec::new();
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
            match expr {
                Expr::Binary {
                    left,
                    op: Operator::And,
                    right,
                } => {
                    walk(left, out);
                    walk(right, out);
                }
                other => out.push(other),
            }
        }
        walk(self, &mut members);
        members
    }

    /// Set of row-type fields the expression reads.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Column(field) => {
                out.insert(field.clone());
            }
            Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Not(inner) => inner.collect_fields(out),
            Expr::StartsWith { field, .. } => {
                out.insert(field.clone());
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(field) => write!(f, "{field}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Binary { left, op, right } => {
                let op = match op {
                    Operator::Eq => "=",
                    Operator::NotEq => "!=",
                    Operator::Lt => "<",
                    Operator::LtEq => "<=",
                    Operator::Gt => ">",
                    Operator::GtEq => ">=",
                    Operator::And => "AND",
                    Operator::Or => "OR",
                };
                write!(f, "({left} {op} {right})")
            }
            Expr::Not(inner) => write!(f, "NOT {inner}"),
            Expr::StartsWith { field, prefix } => write!(f, "{field} STARTS_WITH {prefix:?}"),
        }
    }
}

