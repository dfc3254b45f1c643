use serde_json::Value;

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value (string, number, bool, null)
    Literal(Value),
    /// A bare identifier resolved in the current scope (`V`, `In`, ...)
    Ident(String),
    /// A JSONPath query over the current scope (`$.a.b`)
    JsonPath(String),
    /// A list literal
    List(Vec<Expr>),
    /// A map literal, keys in source order
    Map(Vec<(String, Expr)>),
    /// `base.name`
    Field(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// `name(args...)` from the built-in function table
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : else`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `left | right`: `right` is evaluated with `left`'s value as scope
    Pipe(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    /// `??`
    Coalesce,
    /// `=~`
    Matches,
    /// `in`
    In,
}

impl BinaryOp {
    /// Operator spelling, for error messages
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
            BinaryOp::Matches => "=~",
            BinaryOp::In => "in",
        }
    }
}
