// lower.rs — Name resolution: AST to kernel IR
//
// Resolves textual names into ids: `%value` to `ValueId`, `%label` to
// `BlockId`, `!N` to `MdId`. Assigns value ids to parameters first, then to
// instruction results in layout order.
//
// Preconditions: AST produced by `parser::parse`.
// Postconditions: `LowerResult.module` is structurally valid when
//   `has_errors()` is false: every operand, label and metadata reference
//   resolves.
// Failure modes: undefined or duplicate names produce diagnostics; the
//   offending reference is replaced by a placeholder so lowering continues.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::ast::{self, Span};
use crate::diag::{codes, has_errors, Diagnostic};
use crate::id::{BlockId, MdId, ValueAllocator, ValueId};
use crate::ir::{
    Block, Function, Inst, InstKind, MdAttachment, MdNode, MdOperand, Module, Operand,
    Terminator, Type, ValueInfo,
};

// ── Output types ────────────────────────────────────────────────────────────

pub struct LowerResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

impl LowerResult {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }
}

/// Parse and lower IR text in one step.
///
/// Warnings are logged; any error (parse or resolution) fails the whole
/// module.
pub fn parse_module(source: &str) -> Result<Module, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    if !parsed.errors.is_empty() {
        return Err(parsed
            .errors
            .iter()
            .map(|e| Diagnostic::error(*e.span(), e.to_string()).with_code(codes::E0001))
            .collect());
    }
    let Some(ast) = parsed.module else {
        return Err(vec![Diagnostic::error(
            Span::from(0..source.len()),
            "no module parsed",
        )
        .with_code(codes::E0001)]);
    };
    let result = lower(&ast);
    if result.has_errors() {
        return Err(result.diagnostics);
    }
    for d in &result.diagnostics {
        log::warn!("{}", d.render(source));
    }
    Ok(result.module)
}

pub fn lower(ast: &ast::Module) -> LowerResult {
    let mut ctx = LowerCtx {
        module: Module::new(),
        md_ids: HashMap::new(),
        diagnostics: Vec::new(),
    };
    ctx.lower_metadata(ast);
    ctx.lower_functions(ast);
    LowerResult {
        module: ctx.module,
        diagnostics: ctx.diagnostics,
    }
}

// ── Module-level lowering ───────────────────────────────────────────────────

struct LowerCtx {
    module: Module,
    md_ids: HashMap<u32, MdId>,
    diagnostics: Vec<Diagnostic>,
}

impl LowerCtx {
    /// Two passes so nodes may reference later (or themselves).
    fn lower_metadata(&mut self, ast: &ast::Module) {
        let defs: Vec<&ast::MdDef> = ast
            .items
            .iter()
            .filter_map(|i| match i {
                ast::Item::Metadata(d) => Some(d),
                _ => None,
            })
            .collect();

        let mut fresh = Vec::new();
        for def in &defs {
            if self.md_ids.contains_key(&def.id) {
                self.diagnostics.push(
                    Diagnostic::error(def.span, format!("metadata !{} defined twice", def.id))
                        .with_code(codes::E0108),
                );
                continue;
            }
            let id = self.module.metadata.push(MdNode {
                distinct: def.distinct,
                operands: Vec::new(),
            });
            self.md_ids.insert(def.id, id);
            fresh.push((id, *def));
        }

        for (id, def) in fresh {
            let operands = def
                .operands
                .iter()
                .map(|op| match op {
                    ast::MdOperandAst::Ref(n, span) => match self.md_ids.get(n) {
                        Some(target) => MdOperand::Node(*target),
                        None => {
                            self.diagnostics.push(
                                Diagnostic::error(*span, format!("undefined metadata !{}", n))
                                    .with_code(codes::E0105),
                            );
                            MdOperand::Null
                        }
                    },
                    ast::MdOperandAst::Str(s) => MdOperand::Str(s.clone()),
                    ast::MdOperandAst::Int(ty, value) => MdOperand::Int {
                        ty: *ty,
                        value: *value,
                    },
                    ast::MdOperandAst::Null => MdOperand::Null,
                })
                .collect();
            self.module.metadata.set_operands(id, operands);
        }
    }

    fn lower_functions(&mut self, ast: &ast::Module) {
        let mut seen = HashSet::new();
        for item in &ast.items {
            let name = match item {
                ast::Item::Declare(d) => &d.name,
                ast::Item::Define(f) => &f.name,
                ast::Item::Metadata(_) => continue,
            };
            if !seen.insert(name.name.as_str()) {
                self.diagnostics.push(
                    Diagnostic::error(name.span, format!("function '@{}' defined twice", name.name))
                        .with_code(codes::E0106),
                );
            }
        }

        for item in &ast.items {
            match item {
                ast::Item::Declare(d) => {
                    self.module.functions.push(Function::declaration(
                        &d.name.name,
                        d.ret,
                        d.params.clone(),
                    ));
                }
                ast::Item::Define(f) => {
                    let func = FnLowerer::new(f, &self.md_ids, &mut self.diagnostics).lower();
                    self.module.functions.push(func);
                }
                ast::Item::Metadata(_) => {}
            }
        }

        for item in &ast.items {
            let ast::Item::Define(f) = item else { continue };
            for inst in f.blocks.iter().flat_map(|b| &b.insts) {
                if let ast::OpAst::Call { callee, .. } = &inst.op {
                    if !seen.contains(callee.name.as_str()) {
                        self.diagnostics.push(
                            Diagnostic::warning(
                                callee.span,
                                format!("call to undeclared function '@{}'", callee.name),
                            )
                            .with_code(codes::W0201)
                            .with_hint("add a `declare` for it"),
                        );
                    }
                }
            }
        }
    }
}

// ── Function-level lowering ─────────────────────────────────────────────────

struct FnLowerer<'a> {
    def: &'a ast::FnDef,
    md_ids: &'a HashMap<u32, MdId>,
    diagnostics: &'a mut Vec<Diagnostic>,
    values: HashMap<&'a str, ValueId>,
    labels: HashMap<&'a str, BlockId>,
    infos: Vec<ValueInfo>,
}

impl<'a> FnLowerer<'a> {
    fn new(
        def: &'a ast::FnDef,
        md_ids: &'a HashMap<u32, MdId>,
        diagnostics: &'a mut Vec<Diagnostic>,
    ) -> Self {
        Self {
            def,
            md_ids,
            diagnostics,
            values: HashMap::new(),
            labels: HashMap::new(),
            infos: Vec::new(),
        }
    }

    fn lower(mut self) -> Function {
        let def = self.def;
        if def.blocks.is_empty() {
            self.error(
                def.span,
                codes::E0107,
                format!("function '@{}' has an empty body", def.name.name),
            );
        }

        self.collect_names();

        let blocks = def
            .blocks
            .iter()
            .map(|b| self.lower_block(b))
            .collect();

        Function {
            name: def.name.name.clone(),
            ret: def.ret,
            params: def.params.iter().map(|(ty, _)| *ty).collect(),
            values: self.infos,
            blocks,
        }
    }

    fn error(&mut self, span: Span, code: crate::diag::DiagCode, message: String) {
        self.diagnostics
            .push(Diagnostic::error(span, message).with_code(code));
    }

    /// Assign value ids and block ids before lowering bodies, so forward
    /// references (phis, branches) resolve.
    fn collect_names(&mut self) {
        let def = self.def;
        let mut alloc = ValueAllocator::new();
        for (ty, name) in &def.params {
            self.define_value(&mut alloc, name, *ty);
        }
        for block in &def.blocks {
            for inst in &block.insts {
                if let Some(name) = &inst.result {
                    self.define_value(&mut alloc, name, result_type(&inst.op));
                }
            }
        }
        for (i, block) in def.blocks.iter().enumerate() {
            let label = &block.label;
            if self
                .labels
                .insert(label.name.as_str(), BlockId(i as u32))
                .is_some()
            {
                self.error(
                    label.span,
                    codes::E0104,
                    format!("block label '%{}' defined twice", label.name),
                );
            }
        }
    }

    fn define_value(&mut self, alloc: &mut ValueAllocator, name: &'a ast::Ident, ty: Type) {
        if self.values.contains_key(name.name.as_str()) {
            self.error(
                name.span,
                codes::E0103,
                format!("value '%{}' defined twice", name.name),
            );
            return;
        }
        let id = alloc.alloc();
        self.values.insert(name.name.as_str(), id);
        self.infos.push(ValueInfo {
            name: name.name.clone(),
            ty,
        });
    }

    fn lower_block(&mut self, block: &ast::BlockAst) -> Block {
        let insts = block.insts.iter().map(|i| self.lower_inst(i)).collect();
        let term = self.lower_term(&block.term.kind);
        let term_md = self.lower_md(&block.term.md);
        Block {
            name: block.label.name.clone(),
            insts,
            term,
            term_md,
        }
    }

    fn lower_inst(&mut self, inst: &ast::InstAst) -> Inst {
        let kind = match &inst.op {
            ast::OpAst::Binary { op, ty, lhs, rhs } => InstKind::Binary {
                op: *op,
                ty: *ty,
                lhs: self.operand(lhs),
                rhs: self.operand(rhs),
            },
            ast::OpAst::ICmp { pred, ty, lhs, rhs } => InstKind::ICmp {
                pred: *pred,
                ty: *ty,
                lhs: self.operand(lhs),
                rhs: self.operand(rhs),
            },
            ast::OpAst::Select {
                cond,
                ty,
                on_true,
                on_false,
            } => InstKind::Select {
                cond: self.operand(cond),
                ty: *ty,
                on_true: self.operand(on_true),
                on_false: self.operand(on_false),
            },
            ast::OpAst::Phi { ty, incoming } => InstKind::Phi {
                ty: *ty,
                incoming: incoming
                    .iter()
                    .map(|(v, label)| (self.operand(v), self.label(label)))
                    .collect(),
            },
            ast::OpAst::Alloca { ty, count } => InstKind::Alloca {
                ty: *ty,
                count: *count,
            },
            ast::OpAst::Load { ty, ptr } => InstKind::Load {
                ty: *ty,
                ptr: self.operand(ptr),
            },
            ast::OpAst::Store { ty, value, ptr } => InstKind::Store {
                ty: *ty,
                value: self.operand(value),
                ptr: self.operand(ptr),
            },
            ast::OpAst::Gep {
                elem,
                base,
                index_ty,
                index,
            } => InstKind::Gep {
                elem: *elem,
                base: self.operand(base),
                index_ty: *index_ty,
                index: self.operand(index),
            },
            ast::OpAst::Cast {
                op,
                from,
                value,
                to,
            } => InstKind::Cast {
                op: *op,
                from: *from,
                value: self.operand(value),
                to: *to,
            },
            ast::OpAst::Call { ret, callee, args } => InstKind::Call {
                ret: *ret,
                callee: callee.name.clone(),
                args: args
                    .iter()
                    .map(|(ty, v)| (*ty, self.operand(v)))
                    .collect(),
            },
        };
        let result = inst
            .result
            .as_ref()
            .and_then(|name| self.values.get(name.name.as_str()).copied());
        Inst {
            result,
            kind,
            md: self.lower_md(&inst.md),
        }
    }

    fn lower_term(&mut self, term: &ast::TermKind) -> Terminator {
        match term {
            ast::TermKind::Br(target) => Terminator::Br(self.label(target)),
            ast::TermKind::CondBr {
                cond,
                on_true,
                on_false,
            } => Terminator::CondBr {
                cond: self.operand(cond),
                on_true: self.label(on_true),
                on_false: self.label(on_false),
            },
            ast::TermKind::Ret(None) => Terminator::Ret(None),
            ast::TermKind::Ret(Some((ty, v))) => Terminator::Ret(Some((*ty, self.operand(v)))),
            ast::TermKind::Unreachable => Terminator::Unreachable,
        }
    }

    fn operand(&mut self, v: &ast::ValueAst) -> Operand {
        match v {
            ast::ValueAst::Local(name) => match self.values.get(name.name.as_str()) {
                Some(id) => Operand::Value(*id),
                None => {
                    self.error(
                        name.span,
                        codes::E0101,
                        format!("undefined value '%{}'", name.name),
                    );
                    Operand::Const(0)
                }
            },
            ast::ValueAst::Int(c) => Operand::Const(*c),
            ast::ValueAst::Null => Operand::Null,
            ast::ValueAst::Str(s) => Operand::Str(s.clone()),
        }
    }

    fn label(&mut self, name: &ast::Ident) -> BlockId {
        match self.labels.get(name.name.as_str()) {
            Some(id) => *id,
            None => {
                self.error(
                    name.span,
                    codes::E0102,
                    format!("undefined block label '%{}'", name.name),
                );
                BlockId(0)
            }
        }
    }

    fn lower_md(&mut self, refs: &[ast::MdRef]) -> Vec<MdAttachment> {
        let mut out = Vec::with_capacity(refs.len());
        for r in refs {
            match self.md_ids.get(&r.id) {
                Some(node) => out.push(MdAttachment {
                    kind: r.kind.clone(),
                    node: *node,
                }),
                None => self.error(
                    r.span,
                    codes::E0105,
                    format!("undefined metadata !{}", r.id),
                ),
            }
        }
        out
    }
}

fn result_type(op: &ast::OpAst) -> Type {
    match op {
        ast::OpAst::Binary { ty, .. }
        | ast::OpAst::Select { ty, .. }
        | ast::OpAst::Phi { ty, .. }
        | ast::OpAst::Load { ty, .. } => *ty,
        ast::OpAst::ICmp { .. } => Type::I1,
        ast::OpAst::Alloca { .. } | ast::OpAst::Gep { .. } => Type::Ptr,
        ast::OpAst::Cast { to, .. } => *to,
        ast::OpAst::Call { ret, .. } => *ret,
        ast::OpAst::Store { .. } => Type::Void,
    }
}

// ── Tests ──
