//! Statement and expression tree.
//!
//! The parser builds these with `DataType::Void` placeholders and
//! unresolved bindings; the checker fills in types, bindings and local
//! ids in place. Emission and the evaluator only ever see checked trees.

use crate::compiler::cfg::{LocalId, TempId};
use crate::compiler::datatypes::DataType;
use crate::compiler::registry::{BuiltinFn, ClassId, MemberRef};
use crate::compiler::string_interning::StringId;
use crate::compiler::tokenizer::tokens::TextLocation;

/// A parsed (not yet resolved) type annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub location: TextLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    Bool,
    Char,
    Int,
    Float,
    Double,
    Str,
    Void,
    Named(StringId),
    Array(Box<TypeExpr>),
    Owned(Box<TypeExpr>),
}

#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: NodeKind,
    pub location: TextLocation,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Block(Vec<AstNode>),

    VarDecl {
        name: StringId,
        declared: TypeExpr,
        init: Option<Expression>,
        /// Assigned by the checker when the local is registered.
        local: Option<LocalId>,
    },

    ExprStmt(Expression),

    If {
        condition: Expression,
        then_branch: Box<AstNode>,
        else_branch: Option<Box<AstNode>>,
    },

    While {
        condition: Expression,
        body: Box<AstNode>,
    },

    DoWhile {
        body: Box<AstNode>,
        condition: Expression,
    },

    For {
        init: Option<Box<AstNode>>,
        condition: Option<Expression>,
        iterator: Option<Expression>,
        body: Box<AstNode>,
    },

    Foreach {
        declared: TypeExpr,
        var_name: StringId,
        collection: Expression,
        body: Box<AstNode>,
        /// Iteration local, registered by the checker.
        local: Option<LocalId>,
        /// Hidden local holding the once-evaluated collection.
        collection_local: Option<LocalId>,
        /// Hidden counter local.
        index_local: Option<LocalId>,
    },

    Switch {
        scrutinee: Expression,
        sections: Vec<SwitchSection>,
    },

    Break,
    Continue,
    Return(Option<Expression>),
}

#[derive(Debug, Clone)]
pub struct SwitchSection {
    pub labels: Vec<SwitchLabel>,
    pub body: Vec<AstNode>,
    pub location: TextLocation,
}

#[derive(Debug, Clone)]
pub enum SwitchLabel {
    Case(Expression),
    Default,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub location: TextLocation,
    pub data_type: DataType,

    /// Links an owning-typed expression to its recorded flow span when
    /// the ref-count analysis may need to wrap it at emission.
    pub ref_temp: Option<TempId>,
}

impl Expression {
    pub fn new(kind: ExpressionKind, location: TextLocation) -> Self {
        Expression {
            kind,
            location,
            data_type: DataType::Void,
            ref_temp: None,
        }
    }
}

/// What a bare name resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    Unresolved,
    Local(LocalId),
    Field(MemberRef),
    StaticField(MemberRef),
    Property(MemberRef),
    ClassRef(ClassId),
}

/// Callee shapes before resolution.
#[derive(Debug, Clone)]
pub enum Callee {
    /// Unqualified: current class chain, then the builtin library.
    Name { name: StringId, location: TextLocation },
    /// `expr.Name(...)` or `ClassName.Name(...)`
    Member {
        object: Box<Expression>,
        name: StringId,
        location: TextLocation,
    },
    /// `base.Name(...)` — never a virtual dispatch.
    Base { name: StringId, location: TextLocation },
}

/// Resolved call target, filled by the checker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallTarget {
    Method {
        member: MemberRef,
        is_static: bool,
        virtual_dispatch: bool,
    },
    Builtin(BuiltinFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::LtEq => "<=",
            BinOp::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Null,
    BoolLiteral(bool),
    IntLiteral(i32),
    FloatLiteral(f32),
    DoubleLiteral(f64),
    CharLiteral(u16),
    StrLiteral(StringId),

    This,

    Name {
        name: StringId,
        binding: Binding,
    },

    FieldAccess {
        object: Box<Expression>,
        name: StringId,
        binding: Binding,
    },

    Index {
        object: Box<Expression>,
        index: Box<Expression>,
        indexer: Option<MemberRef>,
    },

    Call {
        callee: Callee,
        args: Vec<Expression>,
        /// Parallel to `args`: `In` unless the call site wrote `ref`/`out`.
        arg_modes: Vec<crate::compiler::registry::ParamMode>,
        target: Option<CallTarget>,
    },

    New {
        class_name: StringId,
        args: Vec<Expression>,
        arg_modes: Vec<crate::compiler::registry::ParamMode>,
        /// `new(pool) T(...)` allocates inside the pool.
        pool: Option<Box<Expression>>,
        class_id: Option<ClassId>,
        ctor: Option<MemberRef>,
    },

    NewArray {
        elem: TypeExpr,
        length: Box<Expression>,
    },

    Cast {
        target: TypeExpr,
        value: Box<Expression>,
    },

    /// Moves out of an owning storage location, leaving null behind.
    Take(Box<Expression>),

    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },

    Binary {
        op: BinOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// Short-circuiting && and || — these fork the CFG.
    Logical {
        op: LogicalOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    Ternary {
        condition: Box<Expression>,
        then_value: Box<Expression>,
        else_value: Box<Expression>,
    },

    Assign {
        target: Box<Expression>,
        op: Option<BinOp>,
        value: Box<Expression>,
    },

    Increment {
        target: Box<Expression>,
        decrement: bool,
    },
}
