// ir.rs — Kernel IR: module, functions, blocks, instructions, metadata
//
// An LLVM-flavoured SSA IR. Blocks are stored in layout order and never
// removed, so `BlockId` doubles as the block's ordinal. Metadata nodes live
// in a module-wide table; non-distinct nodes are uniqued by content, loop IDs
// are distinct and self-referential (operand 0 points at the node itself).
//
// Printing is canonical: metadata is renumbered in first-reference order and
// unreferenced nodes are dropped, so two modules with equal structure print
// byte-identically regardless of how their node tables grew.

use std::collections::HashMap;
use std::fmt::{self, Write as _};

use crate::id::{BlockId, MdId, ValueId};

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Integer of the given bit width (1..=64).
    Int(u8),
    Ptr,
}

impl Type {
    pub const I1: Type = Type::Int(1);
    pub const I8: Type = Type::Int(8);
    pub const I32: Type = Type::Int(32);
    pub const I64: Type = Type::Int(64);

    pub fn bits(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Int(b) => b as u32,
            Type::Ptr => 64,
        }
    }

    /// Storage size in bytes.
    pub fn size_bytes(self) -> u64 {
        (self.bits() as u64).div_ceil(8)
    }

    pub fn is_void(self) -> bool {
        self == Type::Void
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(b) => write!(f, "i{}", b),
            Type::Ptr => write!(f, "ptr"),
        }
    }
}

// ── Operands ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Value(ValueId),
    Const(i64),
    Null,
    /// Constant C string; has pointer type.
    Str(String),
}

impl Operand {
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Operand::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(*v),
            _ => None,
        }
    }
}

// ── Instructions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub const ALL: [BinOp; 13] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::UDiv,
        BinOp::SDiv,
        BinOp::URem,
        BinOp::SRem,
        BinOp::Shl,
        BinOp::LShr,
        BinOp::AShr,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<BinOp> {
        BinOp::ALL.into_iter().find(|op| op.mnemonic() == s)
    }
}

/// Integer comparison predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl IntPred {
    pub const ALL: [IntPred; 10] = [
        IntPred::Eq,
        IntPred::Ne,
        IntPred::Slt,
        IntPred::Sle,
        IntPred::Sgt,
        IntPred::Sge,
        IntPred::Ult,
        IntPred::Ule,
        IntPred::Ugt,
        IntPred::Uge,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            IntPred::Eq => "eq",
            IntPred::Ne => "ne",
            IntPred::Slt => "slt",
            IntPred::Sle => "sle",
            IntPred::Sgt => "sgt",
            IntPred::Sge => "sge",
            IntPred::Ult => "ult",
            IntPred::Ule => "ule",
            IntPred::Ugt => "ugt",
            IntPred::Uge => "uge",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<IntPred> {
        IntPred::ALL.into_iter().find(|p| p.mnemonic() == s)
    }

    /// Predicate that holds exactly when `self` does not.
    pub fn inverse(self) -> IntPred {
        match self {
            IntPred::Eq => IntPred::Ne,
            IntPred::Ne => IntPred::Eq,
            IntPred::Slt => IntPred::Sge,
            IntPred::Sle => IntPred::Sgt,
            IntPred::Sgt => IntPred::Sle,
            IntPred::Sge => IntPred::Slt,
            IntPred::Ult => IntPred::Uge,
            IntPred::Ule => IntPred::Ugt,
            IntPred::Ugt => IntPred::Ule,
            IntPred::Uge => IntPred::Ult,
        }
    }

    /// Predicate with operands exchanged (`a < b` ⇔ `b > a`).
    pub fn swapped(self) -> IntPred {
        match self {
            IntPred::Eq => IntPred::Eq,
            IntPred::Ne => IntPred::Ne,
            IntPred::Slt => IntPred::Sgt,
            IntPred::Sle => IntPred::Sge,
            IntPred::Sgt => IntPred::Slt,
            IntPred::Sge => IntPred::Sle,
            IntPred::Ult => IntPred::Ugt,
            IntPred::Ule => IntPred::Uge,
            IntPred::Ugt => IntPred::Ult,
            IntPred::Uge => IntPred::Ule,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntPred::Slt | IntPred::Sle | IntPred::Sgt | IntPred::Sge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
}

impl CastOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::Trunc => "trunc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Binary {
        op: BinOp,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    ICmp {
        pred: IntPred,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Select {
        cond: Operand,
        ty: Type,
        on_true: Operand,
        on_false: Operand,
    },
    Phi {
        ty: Type,
        incoming: Vec<(Operand, BlockId)>,
    },
    Alloca {
        ty: Type,
        count: u64,
    },
    Load {
        ty: Type,
        ptr: Operand,
    },
    Store {
        ty: Type,
        value: Operand,
        ptr: Operand,
    },
    /// `getelementptr <elem>, ptr <base>, <idx_ty> <index>`: base + index * sizeof(elem).
    Gep {
        elem: Type,
        base: Operand,
        index_ty: Type,
        index: Operand,
    },
    Cast {
        op: CastOp,
        from: Type,
        value: Operand,
        to: Type,
    },
    Call {
        ret: Type,
        callee: String,
        args: Vec<(Type, Operand)>,
    },
}

/// Named metadata attachment (`!kind !N`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdAttachment {
    pub kind: String,
    pub node: MdId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub result: Option<ValueId>,
    pub kind: InstKind,
    pub md: Vec<MdAttachment>,
}

impl Inst {
    pub fn new(result: Option<ValueId>, kind: InstKind) -> Self {
        Self {
            result,
            kind,
            md: Vec::new(),
        }
    }

    /// A void call with no result.
    pub fn call(callee: &str, args: Vec<(Type, Operand)>) -> Self {
        Self::new(
            None,
            InstKind::Call {
                ret: Type::Void,
                callee: callee.to_string(),
                args,
            },
        )
    }

    pub fn with_md(mut self, kind: &str, node: MdId) -> Self {
        self.md.push(MdAttachment {
            kind: kind.to_string(),
            node,
        });
        self
    }

    pub fn md(&self, kind: &str) -> Option<MdId> {
        find_md(&self.md, kind)
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }

    pub fn callee(&self) -> Option<&str> {
        match &self.kind {
            InstKind::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
    },
    Ret(Option<(Type, Operand)>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(b) => vec![*b],
            Terminator::CondBr {
                on_true, on_false, ..
            } => {
                if on_true == on_false {
                    vec![*on_true]
                } else {
                    vec![*on_true, *on_false]
                }
            }
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
        }
    }
}

fn find_md(md: &[MdAttachment], kind: &str) -> Option<MdId> {
    md.iter().find(|a| a.kind == kind).map(|a| a.node)
}

fn set_md(md: &mut Vec<MdAttachment>, kind: &str, node: MdId) {
    match md.iter_mut().find(|a| a.kind == kind) {
        Some(a) => a.node = node,
        None => md.push(MdAttachment {
            kind: kind.to_string(),
            node,
        }),
    }
}

// ── Blocks and functions ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<Inst>,
    pub term: Terminator,
    pub term_md: Vec<MdAttachment>,
}

impl Block {
    /// Index of the first non-phi instruction.
    pub fn first_insertion_point(&self) -> usize {
        self.insts.iter().take_while(|i| i.is_phi()).count()
    }

    pub fn term_md(&self, kind: &str) -> Option<MdId> {
        find_md(&self.term_md, kind)
    }

    pub fn set_term_md(&mut self, kind: &str, node: MdId) {
        set_md(&mut self.term_md, kind, node);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    /// Parameter types. For definitions, `params[i]` is also `ValueId(i)`.
    pub params: Vec<Type>,
    /// Argument and instruction-result names, indexed by `ValueId`.
    pub values: Vec<ValueInfo>,
    /// Empty for declarations.
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn declaration(name: &str, ret: Type, params: Vec<Type>) -> Self {
        Self {
            name: name.to_string(),
            ret,
            params,
            values: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.name == name)
            .map(|i| BlockId(i as u32))
    }

    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).term.successors()
    }

    pub fn value_name(&self, id: ValueId) -> &str {
        &self.values[id.index()].name
    }

    pub fn value_type(&self, id: ValueId) -> Type {
        self.values[id.index()].ty
    }

    /// The instruction defining `id`, if it is an instruction result.
    pub fn def_of(&self, id: ValueId) -> Option<(BlockId, &Inst)> {
        self.blocks.iter().enumerate().find_map(|(b, block)| {
            block
                .insts
                .iter()
                .find(|i| i.result == Some(id))
                .map(|i| (BlockId(b as u32), i))
        })
    }

    /// Number of instructions, terminators included.
    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len() + 1).sum()
    }
}

// ── Metadata ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MdOperand {
    Node(MdId),
    Str(String),
    Int { ty: Type, value: i64 },
    Null,
}

impl MdOperand {
    pub fn int(value: i64) -> Self {
        MdOperand::Int {
            ty: Type::I32,
            value,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MdOperand::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MdOperand::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdNode {
    pub distinct: bool,
    pub operands: Vec<MdOperand>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    nodes: Vec<MdNode>,
    uniqued: HashMap<Vec<MdOperand>, MdId>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: MdId) -> &MdNode {
        &self.nodes[id.index()]
    }

    /// Uniqued (non-distinct) node with the given operands.
    pub fn get(&mut self, operands: Vec<MdOperand>) -> MdId {
        if let Some(&id) = self.uniqued.get(&operands) {
            return id;
        }
        let id = self.push(MdNode {
            distinct: false,
            operands: operands.clone(),
        });
        self.uniqued.insert(operands, id);
        id
    }

    /// Append a node verbatim, without uniquing.
    pub fn push(&mut self, node: MdNode) -> MdId {
        let id = MdId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Fresh distinct loop ID: `distinct !{self, extra...}`.
    pub fn new_loop_id(&mut self, extra: Vec<MdOperand>) -> MdId {
        let id = MdId(self.nodes.len() as u32);
        let mut operands = vec![MdOperand::Node(id)];
        operands.extend(extra);
        self.nodes.push(MdNode {
            distinct: true,
            operands,
        });
        id
    }

    /// Replace a node's operands in place.
    pub fn set_operands(&mut self, id: MdId, operands: Vec<MdOperand>) {
        let node = &mut self.nodes[id.index()];
        if !node.distinct && self.uniqued.get(&node.operands) == Some(&id) {
            self.uniqued.remove(&node.operands);
        }
        node.operands = operands;
    }

    /// First operand as a string tag (`!{!"tag", ...}`).
    pub fn tag(&self, id: MdId) -> Option<&str> {
        self.node(id).operands.first().and_then(MdOperand::as_str)
    }

    /// A node with no meaningful content: no operands, or only references
    /// to itself.
    pub fn is_vacuous(&self, id: MdId) -> bool {
        self.node(id)
            .operands
            .iter()
            .all(|op| *op == MdOperand::Node(id))
    }

    /// Operand nodes of a loop ID (skipping the self reference) whose tag
    /// equals `tag`.
    pub fn find_tagged(&self, loop_id: MdId, tag: &str) -> Option<MdId> {
        self.node(loop_id).operands.iter().skip(1).find_map(|op| match op {
            MdOperand::Node(n) if *n != loop_id && self.tag(*n) == Some(tag) => Some(*n),
            _ => None,
        })
    }
}

// ── Module ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub metadata: MetadataTable,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Declare `name` unless a function of that name already exists.
    pub fn get_or_insert_declaration(&mut self, name: &str, ret: Type, params: Vec<Type>) {
        if self.function(name).is_none() {
            self.functions
                .push(Function::declaration(name, ret, params));
        }
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| !f.is_declaration())
    }
}

// ── Printing ────────────────────────────────────────────────────────────────

/// Escape a string for `c"..."` / `!"..."` literals (`\HH` for specials).
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b == b'"' || b == b'\\' || !(0x20..0x7f).contains(&b) {
            let _ = write!(out, "\\{:02X}", b);
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Canonical metadata numbering: first-reference order over attachments,
/// depth-first through node operands.
fn number_metadata(module: &Module) -> (HashMap<MdId, usize>, Vec<MdId>) {
    let mut numbers = HashMap::new();
    let mut order = Vec::new();

    fn visit(
        table: &MetadataTable,
        id: MdId,
        numbers: &mut HashMap<MdId, usize>,
        order: &mut Vec<MdId>,
    ) {
        if numbers.contains_key(&id) {
            return;
        }
        numbers.insert(id, order.len());
        order.push(id);
        for op in &table.node(id).operands {
            if let MdOperand::Node(child) = op {
                visit(table, *child, numbers, order);
            }
        }
    }

    for func in &module.functions {
        for block in &func.blocks {
            let attachments = block
                .insts
                .iter()
                .flat_map(|i| i.md.iter())
                .chain(block.term_md.iter());
            for a in attachments {
                visit(&module.metadata, a.node, &mut numbers, &mut order);
            }
        }
    }
    (numbers, order)
}

struct Printer<'a> {
    func: &'a Function,
    md_numbers: &'a HashMap<MdId, usize>,
}

impl Printer<'_> {
    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Value(v) => format!("%{}", self.func.value_name(*v)),
            Operand::Const(c) => c.to_string(),
            Operand::Null => "null".to_string(),
            Operand::Str(s) => format!("c\"{}\"", escape_string(s)),
        }
    }

    fn label(&self, b: BlockId) -> String {
        format!("%{}", self.func.block(b).name)
    }

    fn attachments(&self, md: &[MdAttachment]) -> String {
        let mut out = String::new();
        for a in md {
            let _ = write!(out, ", !{} !{}", a.kind, self.md_numbers[&a.node]);
        }
        out
    }

    fn inst(&self, inst: &Inst) -> String {
        let mut out = String::new();
        if let Some(r) = inst.result {
            let _ = write!(out, "%{} = ", self.func.value_name(r));
        }
        let body = match &inst.kind {
            InstKind::Binary { op, ty, lhs, rhs } => format!(
                "{} {} {}, {}",
                op.mnemonic(),
                ty,
                self.operand(lhs),
                self.operand(rhs)
            ),
            InstKind::ICmp { pred, ty, lhs, rhs } => format!(
                "icmp {} {} {}, {}",
                pred.mnemonic(),
                ty,
                self.operand(lhs),
                self.operand(rhs)
            ),
            InstKind::Select {
                cond,
                ty,
                on_true,
                on_false,
            } => format!(
                "select i1 {}, {} {}, {} {}",
                self.operand(cond),
                ty,
                self.operand(on_true),
                ty,
                self.operand(on_false)
            ),
            InstKind::Phi { ty, incoming } => {
                let arms: Vec<String> = incoming
                    .iter()
                    .map(|(v, b)| format!("[ {}, {} ]", self.operand(v), self.label(*b)))
                    .collect();
                format!("phi {} {}", ty, arms.join(", "))
            }
            InstKind::Alloca { ty, count } => {
                if *count == 1 {
                    format!("alloca {}", ty)
                } else {
                    format!("alloca {}, i64 {}", ty, count)
                }
            }
            InstKind::Load { ty, ptr } => format!("load {}, ptr {}", ty, self.operand(ptr)),
            InstKind::Store { ty, value, ptr } => format!(
                "store {} {}, ptr {}",
                ty,
                self.operand(value),
                self.operand(ptr)
            ),
            InstKind::Gep {
                elem,
                base,
                index_ty,
                index,
            } => format!(
                "getelementptr {}, ptr {}, {} {}",
                elem,
                self.operand(base),
                index_ty,
                self.operand(index)
            ),
            InstKind::Cast {
                op,
                from,
                value,
                to,
            } => format!(
                "{} {} {} to {}",
                op.mnemonic(),
                from,
                self.operand(value),
                to
            ),
            InstKind::Call { ret, callee, args } => {
                let args: Vec<String> = args
                    .iter()
                    .map(|(ty, v)| format!("{} {}", ty, self.operand(v)))
                    .collect();
                format!("call {} @{}({})", ret, callee, args.join(", "))
            }
        };
        out.push_str(&body);
        out.push_str(&self.attachments(&inst.md));
        out
    }

    fn term(&self, block: &Block) -> String {
        let body = match &block.term {
            Terminator::Br(b) => format!("br label {}", self.label(*b)),
            Terminator::CondBr {
                cond,
                on_true,
                on_false,
            } => format!(
                "br i1 {}, label {}, label {}",
                self.operand(cond),
                self.label(*on_true),
                self.label(*on_false)
            ),
            Terminator::Ret(None) => "ret void".to_string(),
            Terminator::Ret(Some((ty, v))) => format!("ret {} {}", ty, self.operand(v)),
            Terminator::Unreachable => "unreachable".to_string(),
        };
        body + &self.attachments(&block.term_md)
    }
}

fn write_function(
    f: &mut fmt::Formatter<'_>,
    func: &Function,
    md_numbers: &HashMap<MdId, usize>,
) -> fmt::Result {
    if func.is_declaration() {
        let params: Vec<String> = func.params.iter().map(|t| t.to_string()).collect();
        return writeln!(f, "declare {} @{}({})", func.ret, func.name, params.join(", "));
    }
    let params: Vec<String> = func
        .params
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{} %{}", t, func.values[i].name))
        .collect();
    writeln!(f, "define {} @{}({}) {{", func.ret, func.name, params.join(", "))?;
    let printer = Printer { func, md_numbers };
    for (i, block) in func.blocks.iter().enumerate() {
        if i > 0 {
            writeln!(f)?;
        }
        writeln!(f, "{}:", block.name)?;
        for inst in &block.insts {
            writeln!(f, "  {}", printer.inst(inst))?;
        }
        writeln!(f, "  {}", printer.term(block))?;
    }
    writeln!(f, "}}")
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (numbers, order) = number_metadata(self);
        for (i, func) in self.functions.iter().enumerate() {
            // Consecutive declarations are grouped; definitions are set apart.
            let prev_is_decl = i > 0 && self.functions[i - 1].is_declaration();
            if i > 0 && !(prev_is_decl && func.is_declaration()) {
                writeln!(f)?;
            }
            write_function(f, func, &numbers)?;
        }
        if !order.is_empty() {
            writeln!(f)?;
        }
        for id in order {
            let node = self.metadata.node(id);
            let ops: Vec<String> = node
                .operands
                .iter()
                .map(|op| match op {
                    MdOperand::Node(n) => format!("!{}", numbers[n]),
                    MdOperand::Str(s) => format!("!\"{}\"", escape_string(s)),
                    MdOperand::Int { ty, value } => format!("{} {}", ty, value),
                    MdOperand::Null => "null".to_string(),
                })
                .collect();
            let distinct = if node.distinct { "distinct " } else { "" };
            writeln!(f, "!{} = {}!{{{}}}", numbers[&id], distinct, ops.join(", "))?;
        }
        Ok(())
    }
}

/// Print only the metadata section (used to compare metadata across runs).
pub fn metadata_text(module: &Module) -> String {
    let text = module.to_string();
    text.lines()
        .filter(|l| l.starts_with('!'))
        .map(|l| format!("{}\n", l))
        .collect()
}
