//! Syntax tree produced by the AST builder. Every node owns its children and
//! carries the span of the token that introduced it.
use crate::token::Span;
use smol_str::SmolStr;
use std::fmt;

/// A sequence of statements.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    /// `local a <close>, b: num = ...`
    Local {
        names: Vec<LocalName>,
        values: Vec<Expr>,
    },
    LocalFunction {
        name: SmolStr,
        func: FunctionBody,
    },
    /// `function a.b.c:m(...) ... end`
    Function {
        path: FunctionPath,
        func: FunctionBody,
    },
    If {
        clauses: Vec<IfClause>,
        else_block: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    NumericFor {
        var: SmolStr,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Do(Block),
    /// `defer (params) body end (args)`: the callable runs when the enclosing
    /// scope exits; the arguments are evaluated at the defer site.
    Defer {
        func: FunctionBody,
        args: Vec<Expr>,
    },
    Return(ReturnStmt),
    Break,
    Continue,
    Assignment {
        op: AssignOp,
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    Expression(Expr),
    /// `value?? return|break|continue`, fires when `condition` is empty.
    ConditionalShorthand {
        condition: Expr,
        body: Box<Stmt>,
    },
    /// `global a, b = ...`: stores into the global table even where a local
    /// of the same name is in scope. `op` is `Plain` or `IfEmpty`.
    Global {
        op: AssignOp,
        names: Vec<SmolStr>,
        values: Vec<Expr>,
    },
    /// `raise code [, message]`
    Raise {
        code: Expr,
        message: Option<Expr>,
    },
    /// `check code`: raises only for failing codes.
    Check(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfClause {
    pub cond: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub values: Vec<Expr>,
    /// The single value is a call whose results are all returned.
    pub forwards_call: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalName {
    pub name: SmolStr,
    pub type_name: Option<TypeName>,
    pub has_close: bool,
    /// `<const>`: the name cannot be assigned after its declaration.
    pub is_const: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionPath {
    /// `a.b.c`; at least one segment.
    pub segments: Vec<SmolStr>,
    /// `:m` suffix.
    pub method: Option<SmolStr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: SmolStr,
    pub type_name: Option<TypeName>,
    pub is_self: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionBody {
    pub params: Vec<Param>,
    pub is_vararg: bool,
    pub body: Block,
    /// Span of the closing token.
    pub end_span: Span,
}

/// Parameter and local type annotations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeName {
    Any,
    Nil,
    Bool,
    Num,
    Str,
    Table,
    Func,
    Thread,
    CData,
    Object,
}

impl TypeName {
    pub fn from_name(name: &str) -> Option<TypeName> {
        Some(match name {
            "any" => TypeName::Any,
            "nil" => TypeName::Nil,
            "bool" | "boolean" => TypeName::Bool,
            "num" | "number" => TypeName::Num,
            "str" | "string" => TypeName::Str,
            "table" => TypeName::Table,
            "func" | "function" => TypeName::Func,
            "thread" => TypeName::Thread,
            "cdata" => TypeName::CData,
            "obj" | "object" => TypeName::Object,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeName::Any => "any",
            TypeName::Nil => "nil",
            TypeName::Bool => "bool",
            TypeName::Num => "num",
            TypeName::Str => "str",
            TypeName::Table => "table",
            TypeName::Func => "func",
            TypeName::Thread => "thread",
            TypeName::CData => "cdata",
            TypeName::Object => "obj",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Plain,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    IfEmpty,
}

impl AssignOp {
    /// The binary operator applied by a compound assignment.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Plain => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
            AssignOp::Concat => Some(BinaryOp::Concat),
            AssignOp::IfEmpty => Some(BinaryOp::IfEmpty),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Plain => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Mod => "%=",
            AssignOp::Concat => "..=",
            AssignOp::IfEmpty => "??=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(SmolStr),
    Vararg,
    Function(Box<FunctionBody>),
    Table(TableExpr),
    Paren(Box<Expr>),
    /// `<{ expr }>`, evaluated lazily.
    Deferred(Box<Expr>),
    Member {
        table: Box<Expr>,
        name: SmolStr,
        safe: bool,
    },
    Index {
        table: Box<Expr>,
        key: Box<Expr>,
        safe: bool,
    },
    Call(CallExpr),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// `lhs |N> call`; `limit` 0 forwards every result of `lhs`.
    Pipe {
        lhs: Box<Expr>,
        call: Box<Expr>,
        limit: u32,
    },
    Presence(Box<Expr>),
    Update {
        op: UpdateOp,
        target: Box<Expr>,
        postfix: bool,
    },
    ResultFilter(ResultFilter),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Nil,
    True,
    False,
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableExpr {
    pub fields: Vec<TableField>,
    pub has_array: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableField {
    Array(Expr),
    Record { name: SmolStr, value: Expr },
    Computed { key: Expr, value: Expr },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallExpr {
    pub target: CallTarget,
    pub args: Vec<Expr>,
    /// The last argument is a call or vararg expanded into the argument list.
    pub forwards_multret: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallTarget {
    Direct(Box<Expr>),
    Method {
        receiver: Box<Expr>,
        name: SmolStr,
        /// `?:`: the call yields nil when the receiver is nil.
        safe: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResultFilter {
    pub call: Box<Expr>,
    /// Bit `i` set keeps result `i`.
    pub keep_mask: u64,
    pub count: u8,
    /// Results past `count` are kept.
    pub trailing_keep: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Len,
    BNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Shl,
    Shr,
    BAnd,
    BOr,
    BXor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    IfEmpty,
}

/// Binding strength of unary operators: tighter than everything but `^`.
pub const UNARY_PRIORITY: u8 = 8;

impl BinaryOp {
    /// Returns (left priority, right priority); higher binds tighter.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinaryOp::Or | BinaryOp::IfEmpty => (1, 1),
            BinaryOp::And | BinaryOp::BOr => (2, 2),
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::BXor => (3, 3),
            BinaryOp::BAnd => (4, 4),
            BinaryOp::Shl | BinaryOp::Shr => (5, 5),
            BinaryOp::Concat => (5, 4), // right-associative
            BinaryOp::Add | BinaryOp::Sub => (6, 6),
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::IDiv | BinaryOp::Mod => (7, 7),
            BinaryOp::Pow => (10, 9), // right-associative
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "..",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BAnd => "&",
            BinaryOp::BOr => "|",
            BinaryOp::BXor => "~",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "~=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::IfEmpty => "??",
        }
    }
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Not => "not ",
            UnaryOp::Neg => "-",
            UnaryOp::Len => "#",
            UnaryOp::BNot => "~",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    /// Plain or method call, including safe method calls.
    pub fn is_call(&self) -> bool {
        matches!(self.kind, ExprKind::Call(_))
    }

    /// Produces a variable number of values.
    pub fn is_multi_value(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call(_) | ExprKind::Vararg | ExprKind::ResultFilter(_) | ExprKind::Pipe { .. }
        )
    }

    /// Names a storable location.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Identifier(_)
                | ExprKind::Member { safe: false, .. }
                | ExprKind::Index { safe: false, .. }
        )
    }

    pub fn clear_spans(&mut self) {
        self.span = Span::default();
        match &mut self.kind {
            ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::Vararg => {}
            ExprKind::Function(func) => func.clear_spans(),
            ExprKind::Table(table) => {
                for field in &mut table.fields {
                    match field {
                        TableField::Array(value) | TableField::Record { value, .. } => {
                            value.clear_spans()
                        }
                        TableField::Computed { key, value } => {
                            key.clear_spans();
                            value.clear_spans();
                        }
                    }
                }
            }
            ExprKind::Paren(inner)
            | ExprKind::Deferred(inner)
            | ExprKind::Presence(inner)
            | ExprKind::Member { table: inner, .. }
            | ExprKind::Unary { operand: inner, .. }
            | ExprKind::Update { target: inner, .. } => inner.clear_spans(),
            ExprKind::Index { table, key, .. } => {
                table.clear_spans();
                key.clear_spans();
            }
            ExprKind::Call(call) => call.clear_spans(),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.clear_spans();
                rhs.clear_spans();
            }
            ExprKind::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                cond.clear_spans();
                if_true.clear_spans();
                if_false.clear_spans();
            }
            ExprKind::Pipe { lhs, call, .. } => {
                lhs.clear_spans();
                call.clear_spans();
            }
            ExprKind::ResultFilter(filter) => filter.call.clear_spans(),
        }
    }
}

impl CallExpr {
    fn clear_spans(&mut self) {
        match &mut self.target {
            CallTarget::Direct(callee) => callee.clear_spans(),
            CallTarget::Method { receiver, .. } => receiver.clear_spans(),
        }
        self.args.iter_mut().for_each(Expr::clear_spans);
    }
}

impl FunctionBody {
    pub fn clear_spans(&mut self) {
        self.end_span = Span::default();
        self.body.clear_spans();
    }
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Block { stmts, span }
    }

    /// Reset every span in the tree so two trees compare structurally.
    pub fn clear_spans(&mut self) {
        self.span = Span::default();
        self.stmts.iter_mut().for_each(Stmt::clear_spans);
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt { kind, span }
    }

    pub fn clear_spans(&mut self) {
        self.span = Span::default();
        let exprs = |list: &mut Vec<Expr>| list.iter_mut().for_each(Expr::clear_spans);
        match &mut self.kind {
            StmtKind::Local { values, .. } => exprs(values),
            StmtKind::LocalFunction { func, .. } | StmtKind::Function { func, .. } => {
                func.clear_spans()
            }
            StmtKind::If {
                clauses,
                else_block,
            } => {
                for clause in clauses {
                    clause.cond.clear_spans();
                    clause.body.clear_spans();
                }
                if let Some(block) = else_block {
                    block.clear_spans();
                }
            }
            StmtKind::While { cond, body } | StmtKind::Repeat { body, cond } => {
                cond.clear_spans();
                body.clear_spans();
            }
            StmtKind::NumericFor {
                start,
                limit,
                step,
                body,
                ..
            } => {
                start.clear_spans();
                limit.clear_spans();
                if let Some(step) = step {
                    step.clear_spans();
                }
                body.clear_spans();
            }
            StmtKind::GenericFor { exprs: list, body, .. } => {
                exprs(list);
                body.clear_spans();
            }
            StmtKind::Do(block) => block.clear_spans(),
            StmtKind::Defer { func, args } => {
                func.clear_spans();
                exprs(args);
            }
            StmtKind::Return(ret) => exprs(&mut ret.values),
            StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Assignment {
                targets, values, ..
            } => {
                exprs(targets);
                exprs(values);
            }
            StmtKind::Expression(expr) => expr.clear_spans(),
            StmtKind::ConditionalShorthand { condition, body } => {
                condition.clear_spans();
                body.clear_spans();
            }
            StmtKind::Global { values, .. } => exprs(values),
            StmtKind::Raise { code, message } => {
                code.clear_spans();
                if let Some(message) = message {
                    message.clear_spans();
                }
            }
            StmtKind::Check(code) => code.clear_spans(),
        }
    }
}
