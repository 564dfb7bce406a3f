// AST node types for kernel IR text.
//
// Names are still textual here; `lower` resolves them to ids. Every node
// that can be the subject of a diagnostic carries a `SimpleSpan`.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::ir::{BinOp, CastOp, IntPred, Type};

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Root ──

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Declare(FnDecl),
    Define(FnDef),
    Metadata(MdDef),
}

// ── Functions ──

/// `declare <ret> @name(<ty>, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub ret: Type,
    pub name: Ident,
    pub params: Vec<Type>,
    pub span: Span,
}

/// `define <ret> @name(<ty> %p, ...) { blocks }`
#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub ret: Type,
    pub name: Ident,
    pub params: Vec<(Type, Ident)>,
    pub blocks: Vec<BlockAst>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockAst {
    pub label: Ident,
    pub insts: Vec<InstAst>,
    pub term: TermAst,
}

/// `!kind !N`
#[derive(Debug, Clone, PartialEq)]
pub struct MdRef {
    pub kind: String,
    pub id: u32,
    pub span: Span,
}

// ── Operands ──

#[derive(Debug, Clone, PartialEq)]
pub enum ValueAst {
    Local(Ident),
    Int(i64),
    Null,
    Str(String),
}

// ── Instructions ──

#[derive(Debug, Clone, PartialEq)]
pub struct InstAst {
    pub result: Option<Ident>,
    pub op: OpAst,
    pub md: Vec<MdRef>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpAst {
    Binary {
        op: BinOp,
        ty: Type,
        lhs: ValueAst,
        rhs: ValueAst,
    },
    ICmp {
        pred: IntPred,
        ty: Type,
        lhs: ValueAst,
        rhs: ValueAst,
    },
    Select {
        cond: ValueAst,
        ty: Type,
        on_true: ValueAst,
        on_false: ValueAst,
    },
    Phi {
        ty: Type,
        incoming: Vec<(ValueAst, Ident)>,
    },
    Alloca {
        ty: Type,
        count: u64,
    },
    Load {
        ty: Type,
        ptr: ValueAst,
    },
    Store {
        ty: Type,
        value: ValueAst,
        ptr: ValueAst,
    },
    Gep {
        elem: Type,
        base: ValueAst,
        index_ty: Type,
        index: ValueAst,
    },
    Cast {
        op: CastOp,
        from: Type,
        value: ValueAst,
        to: Type,
    },
    Call {
        ret: Type,
        callee: Ident,
        args: Vec<(Type, ValueAst)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermAst {
    pub kind: TermKind,
    pub md: Vec<MdRef>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TermKind {
    Br(Ident),
    CondBr {
        cond: ValueAst,
        on_true: Ident,
        on_false: Ident,
    },
    Ret(Option<(Type, ValueAst)>),
    Unreachable,
}

// ── Metadata definitions ──

/// `!N = [distinct] !{ops}`
#[derive(Debug, Clone, PartialEq)]
pub struct MdDef {
    pub id: u32,
    pub distinct: bool,
    pub operands: Vec<MdOperandAst>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MdOperandAst {
    Ref(u32, Span),
    Str(String),
    Int(Type, i64),
    Null,
}
