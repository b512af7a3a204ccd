//! Expression tree for charm source.

/// A parsed charm expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Str(String),
    /// A bare symbol: either an operator head or a handler variable.
    Sym(String),
    /// A `{k v k v ...}` map literal with string keys, order preserved.
    Map(Vec<(String, Expr)>),
    /// A parenthesized form.
    List(Vec<Expr>),
}

impl Expr {
    pub fn as_sym(&self) -> Option<&str> {
        match self {
            Expr::Sym(s) => Some(s),
            _ => None,
        }
    }
}
