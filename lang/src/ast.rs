//! Syntax tree for step programs.
//!
//! Plain enums, no interning, no arenas: programs are short and parsed once
//! per step. Constructs the policy bans still get nodes ([`Stmt::Banned`],
//! [`Expr::Banned`]) so validation can name exactly what was rejected.

use crate::token::Pos;

/// A whole program: the statements of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// `a = value` or chained `a = b = value`.
    Assign {
        targets: Vec<Target>,
        value: Expr,
        pos: Pos,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
        pos: Pos,
    },
    /// `if`/`elif` chain; each branch pairs a test with its suite.
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
        pos: Pos,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        pos: Pos,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        pos: Pos,
    },
    FuncDef {
        name: String,
        params: Vec<Param>,
        body: Vec<Stmt>,
        pos: Pos,
    },
    Return {
        value: Option<Expr>,
        pos: Pos,
    },
    Break {
        pos: Pos,
    },
    Continue {
        pos: Pos,
    },
    Pass {
        pos: Pos,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        finally: Vec<Stmt>,
        pos: Pos,
    },
    /// A construct the policy will reject by name (`import`, `class`, ...).
    Banned {
        construct: &'static str,
        pos: Pos,
    },
}

impl Stmt {
    #[must_use]
    pub fn pos(&self) -> Pos {
        match self {
            Stmt::Expr(e) => e.pos(),
            Stmt::Assign { pos, .. }
            | Stmt::AugAssign { pos, .. }
            | Stmt::If { pos, .. }
            | Stmt::While { pos, .. }
            | Stmt::For { pos, .. }
            | Stmt::FuncDef { pos, .. }
            | Stmt::Return { pos, .. }
            | Stmt::Break { pos }
            | Stmt::Continue { pos }
            | Stmt::Pass { pos }
            | Stmt::Try { pos, .. }
            | Stmt::Banned { pos, .. } => *pos,
        }
    }
}

/// One `except` clause. `names` empty means a bare `except:`, which the
/// policy rejects.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub names: Vec<String>,
    pub alias: Option<String>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub pos: Pos,
}

/// Assignment / loop targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String, Pos),
    Subscript {
        value: Expr,
        index: Expr,
        pos: Pos,
    },
    /// `x.y = ...`; parsed, then rejected by policy.
    Attribute {
        value: Expr,
        attr: String,
        pos: Pos,
    },
    /// Unpacking, as in `for start, text in doc.iter_lines():`.
    Tuple(Vec<Target>, Pos),
}

impl Target {
    #[must_use]
    pub fn pos(&self) -> Pos {
        match self {
            Target::Name(_, pos)
            | Target::Subscript { pos, .. }
            | Target::Attribute { pos, .. }
            | Target::Tuple(_, pos) => *pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompKind {
    List,
    Set,
    Dict,
    Generator,
}

/// One `for ... in ... [if ...]` clause of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct CompFor {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// Subscript index: single item or `lo:hi` slice.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Item(Expr),
    Slice {
        lower: Option<Expr>,
        upper: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    None(Pos),
    Bool(bool, Pos),
    Int(i64, Pos),
    Float(f64, Pos),
    Str(String, Pos),
    Name(String, Pos),
    List(Vec<Expr>, Pos),
    Tuple(Vec<Expr>, Pos),
    Set(Vec<Expr>, Pos),
    Dict {
        items: Vec<(Expr, Expr)>,
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        pos: Pos,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        pos: Pos,
    },
    BoolChain {
        op: BoolOp,
        values: Vec<Expr>,
        pos: Pos,
    },
    /// Chained comparison: `left op0 rhs0 op1 rhs1 ...`.
    Compare {
        left: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
        pos: Pos,
    },
    /// `body if test else orelse`.
    Cond {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
        pos: Pos,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        pos: Pos,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        pos: Pos,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Index>,
        pos: Pos,
    },
    Comp {
        kind: CompKind,
        key: Box<Expr>,
        /// Value expression of a dict comprehension; `None` otherwise.
        value: Option<Box<Expr>>,
        fors: Vec<CompFor>,
        pos: Pos,
    },
    /// A construct the policy will reject by name (`lambda`, `yield`, ...).
    Banned {
        construct: &'static str,
        pos: Pos,
    },
}

impl Expr {
    #[must_use]
    pub fn pos(&self) -> Pos {
        match self {
            Expr::None(pos)
            | Expr::Bool(_, pos)
            | Expr::Int(_, pos)
            | Expr::Float(_, pos)
            | Expr::Str(_, pos)
            | Expr::Name(_, pos)
            | Expr::List(_, pos)
            | Expr::Tuple(_, pos)
            | Expr::Set(_, pos)
            | Expr::Dict { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::BoolChain { pos, .. }
            | Expr::Compare { pos, .. }
            | Expr::Cond { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Attribute { pos, .. }
            | Expr::Subscript { pos, .. }
            | Expr::Comp { pos, .. }
            | Expr::Banned { pos, .. } => *pos,
        }
    }

    /// Literal in the policy sense: a constant or a display built purely
    /// from literals. Used to validate parameter defaults.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        match self {
            Expr::None(_) | Expr::Bool(..) | Expr::Int(..) | Expr::Float(..) | Expr::Str(..) => {
                true
            }
            Expr::List(items, _) | Expr::Tuple(items, _) | Expr::Set(items, _) => {
                items.iter().all(Expr::is_literal)
            }
            Expr::Dict { items, .. } => {
                items.iter().all(|(k, v)| k.is_literal() && v.is_literal())
            }
            Expr::Unary {
                op: UnaryOp::Neg | UnaryOp::Pos,
                operand,
                ..
            } => operand.is_literal(),
            _ => false,
        }
    }
}
