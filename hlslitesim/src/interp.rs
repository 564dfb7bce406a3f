// interp.rs — IR interpreter
//
// Executes functions of an (instrumented) module on the CPU against a
// `SimContext`. Calls to declarations are dispatched to the runtime: the
// trace entry points, the FIFO and AXI models, and the synthesis directives.
//
// Memory is one flat little-endian byte heap. String constants are interned
// at construction, host allocations come next, and each frame's allocas are
// released when the frame returns. Integers are kept zero-extended to their
// type width; signed operations sign-extend on use.
//
// Preconditions: the module was lowered without errors.
// Postconditions: a successful run leaves the trace exactly as a native build
//   of the same kernel would.
// Failure modes: every runtime fault is a `SimError`; nothing panics.
// Side effects: writes trace lines through the context's sink.

use std::collections::HashMap;

use crate::bb_trace::TRACE_BB;
use crate::id::{BlockId, ValueId};
use crate::ir::{BinOp, CastOp, Function, InstKind, IntPred, Module, Operand, Terminator, Type};
use crate::loop_trace::{TRACE_END_LOOP, TRACE_END_LOOP_BLOCKS, TRACE_LOOP, TRACE_LOOP_BB};
use crate::sim::{SimContext, SimError};

/// Lowest heap address; keeps `null` distinct from every allocation.
pub const HEAP_BASE: u64 = 0x1000;
const ALIGN: u64 = 8;

#[derive(Debug, Clone)]
pub struct InterpConfig {
    /// Instructions (terminators included) before `SimError::StepLimit`.
    pub max_steps: u64,
    pub max_call_depth: usize,
    pub heap_limit: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            max_steps: 50_000_000,
            max_call_depth: 256,
            heap_limit: 64 << 20,
        }
    }
}

// ── Integer helpers ────────────────────────────────────────────────────────

fn mask(bits: u32, v: u64) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

fn sext(bits: u32, v: u64) -> i64 {
    if bits == 0 || bits >= 64 {
        v as i64
    } else {
        let shift = 64 - bits;
        ((v << shift) as i64) >> shift
    }
}

// ── Memory ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Memory {
    bytes: Vec<u8>,
    limit: usize,
}

impl Memory {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    pub fn alloc(&mut self, size: u64) -> Result<u64, SimError> {
        let start = (self.bytes.len() as u64).next_multiple_of(ALIGN);
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.limit as u64)
            .ok_or(SimError::OutOfMemory(size))?;
        self.bytes.resize(end as usize, 0);
        Ok(HEAP_BASE + start)
    }

    fn mark(&self) -> usize {
        self.bytes.len()
    }

    fn release(&mut self, mark: usize) {
        self.bytes.truncate(mark);
    }

    fn range(&self, addr: u64, size: u64) -> Result<std::ops::Range<usize>, SimError> {
        let bad = SimError::BadAddress { addr, size };
        let start = addr.checked_sub(HEAP_BASE).ok_or(bad.clone())?;
        let end = start.checked_add(size).ok_or(bad.clone())?;
        if end > self.bytes.len() as u64 {
            return Err(bad);
        }
        Ok(start as usize..end as usize)
    }

    pub fn read(&self, addr: u64, size: u64) -> Result<&[u8], SimError> {
        let r = self.range(addr, size)?;
        Ok(&self.bytes[r])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), SimError> {
        let r = self.range(addr, data.len() as u64)?;
        self.bytes[r].copy_from_slice(data);
        Ok(())
    }

    pub fn load(&self, addr: u64, ty: Type) -> Result<u64, SimError> {
        let mut buf = [0u8; 8];
        let n = ty.size_bytes() as usize;
        buf[..n].copy_from_slice(self.read(addr, n as u64)?);
        Ok(mask(ty.bits(), u64::from_le_bytes(buf)))
    }

    pub fn store(&mut self, addr: u64, ty: Type, value: u64) -> Result<(), SimError> {
        let n = ty.size_bytes() as usize;
        self.write(addr, &value.to_le_bytes()[..n])
    }

    /// NUL-terminated string at `addr`; `null` reads as empty.
    pub fn c_str(&self, addr: u64) -> Result<String, SimError> {
        if addr == 0 {
            return Ok(String::new());
        }
        let start = self.range(addr, 0)?.start;
        let tail = &self.bytes[start..];
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(SimError::BadAddress {
                addr,
                size: tail.len() as u64 + 1,
            })?;
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }
}

// ── Interpreter ────────────────────────────────────────────────────────────

pub struct Interpreter<'m> {
    module: &'m Module,
    config: InterpConfig,
    functions: HashMap<&'m str, &'m Function>,
    strings: HashMap<&'m str, u64>,
    mem: Memory,
    steps: u64,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module, config: InterpConfig) -> Result<Self, SimError> {
        let mut interp = Self {
            module,
            functions: module
                .functions
                .iter()
                .map(|f| (f.name.as_str(), f))
                .collect(),
            mem: Memory::new(config.heap_limit),
            config,
            strings: HashMap::new(),
            steps: 0,
        };
        interp.intern_strings()?;
        Ok(interp)
    }

    fn intern_strings(&mut self) -> Result<(), SimError> {
        let module = self.module;
        for func in module.definitions() {
            for inst in func.blocks.iter().flat_map(|b| &b.insts) {
                let InstKind::Call { args, .. } = &inst.kind else {
                    continue;
                };
                for (_, op) in args {
                    if let Operand::Str(s) = op {
                        if !self.strings.contains_key(s.as_str()) {
                            let addr = self.mem.alloc(s.len() as u64 + 1)?;
                            self.mem.write(addr, s.as_bytes())?;
                            self.strings.insert(s.as_str(), addr);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call `entry` with raw argument words; `None` for void functions.
    pub fn run(
        &mut self,
        ctx: &mut SimContext,
        entry: &str,
        args: &[u64],
    ) -> Result<Option<u64>, SimError> {
        let func = *self
            .functions
            .get(entry)
            .ok_or_else(|| SimError::UnknownFunction(entry.to_string()))?;
        if args.len() != func.params.len() {
            return Err(SimError::ArgCount {
                function: entry.to_string(),
                expected: func.params.len(),
                found: args.len(),
            });
        }
        let args: Vec<(Type, u64)> = func
            .params
            .iter()
            .zip(args)
            .map(|(ty, v)| (*ty, mask(ty.bits(), *v)))
            .collect();
        let value = self.call(ctx, entry, func.ret, &args, 0)?;
        Ok((!func.ret.is_void()).then_some(value))
    }

    fn tick(&mut self) -> Result<(), SimError> {
        self.steps += 1;
        if self.steps > self.config.max_steps {
            return Err(SimError::StepLimit(self.config.max_steps));
        }
        Ok(())
    }

    fn call(
        &mut self,
        ctx: &mut SimContext,
        callee: &str,
        ret: Type,
        args: &[(Type, u64)],
        depth: usize,
    ) -> Result<u64, SimError> {
        match self.functions.get(callee).copied() {
            Some(func) if !func.is_declaration() => {
                if depth >= self.config.max_call_depth {
                    return Err(SimError::CallDepth(self.config.max_call_depth));
                }
                if func.params.len() != args.len() {
                    return Err(SimError::ArgCount {
                        function: callee.to_string(),
                        expected: func.params.len(),
                        found: args.len(),
                    });
                }
                let words: Vec<u64> = args.iter().map(|(_, v)| *v).collect();
                let mark = self.mem.mark();
                let result = self.exec(ctx, func, &words, depth);
                self.mem.release(mark);
                result
            }
            _ => self.external(ctx, callee, ret, args),
        }
    }

    fn eval(&self, regs: &[u64], op: &Operand) -> Result<u64, SimError> {
        match op {
            Operand::Value(v) => Ok(regs[v.index()]),
            Operand::Const(c) => Ok(*c as u64),
            Operand::Null => Ok(0),
            Operand::Str(s) => self
                .strings
                .get(s.as_str())
                .copied()
                .ok_or_else(|| SimError::TypeMismatch(format!("string c\"{}\" used outside a call", s))),
        }
    }

    fn exec(
        &mut self,
        ctx: &mut SimContext,
        func: &'m Function,
        args: &[u64],
        depth: usize,
    ) -> Result<u64, SimError> {
        let mut regs = vec![0u64; func.values.len()];
        regs[..args.len()].copy_from_slice(args);
        let mut prev: Option<BlockId> = None;
        let mut cur = BlockId(0);

        loop {
            let block = func.block(cur);
            let n_phis = block.first_insertion_point();

            // Phis read the values live at the end of the predecessor, so
            // all of them are evaluated before any is assigned.
            if n_phis > 0 {
                let from = prev.ok_or_else(|| {
                    SimError::TypeMismatch(format!("phi in entry block of '@{}'", func.name))
                })?;
                let mut updates: Vec<(ValueId, u64)> = Vec::with_capacity(n_phis);
                for inst in &block.insts[..n_phis] {
                    self.tick()?;
                    let InstKind::Phi { ty, incoming } = &inst.kind else {
                        continue;
                    };
                    let (op, _) = incoming.iter().find(|(_, b)| *b == from).ok_or_else(|| {
                        SimError::TypeMismatch(format!(
                            "phi in '%{}' has no value for '%{}'",
                            block.name,
                            func.block(from).name
                        ))
                    })?;
                    if let Some(r) = inst.result {
                        updates.push((r, mask(ty.bits(), self.eval(&regs, op)?)));
                    }
                }
                for (r, v) in updates {
                    regs[r.index()] = v;
                }
            }

            for inst in &block.insts[n_phis..] {
                self.tick()?;
                let value = self.step(ctx, func, &regs, &inst.kind, depth)?;
                if let (Some(r), Some(v)) = (inst.result, value) {
                    regs[r.index()] = v;
                }
            }

            self.tick()?;
            let next = match &block.term {
                Terminator::Br(b) => *b,
                Terminator::CondBr {
                    cond,
                    on_true,
                    on_false,
                } => {
                    if mask(1, self.eval(&regs, cond)?) != 0 {
                        *on_true
                    } else {
                        *on_false
                    }
                }
                Terminator::Ret(None) => return Ok(0),
                Terminator::Ret(Some((ty, op))) => return Ok(mask(ty.bits(), self.eval(&regs, op)?)),
                Terminator::Unreachable => return Err(SimError::Unreachable(func.name.clone())),
            };
            prev = Some(cur);
            cur = next;
        }
    }

    fn step(
        &mut self,
        ctx: &mut SimContext,
        func: &Function,
        regs: &[u64],
        kind: &InstKind,
        depth: usize,
    ) -> Result<Option<u64>, SimError> {
        let v = match kind {
            InstKind::Binary { op, ty, lhs, rhs } => {
                let bits = ty.bits();
                let a = mask(bits, self.eval(regs, lhs)?);
                let b = mask(bits, self.eval(regs, rhs)?);
                mask(bits, binary(*op, bits, a, b).ok_or_else(|| SimError::DivisionByZero(func.name.clone()))?)
            }
            InstKind::ICmp { pred, ty, lhs, rhs } => {
                let bits = ty.bits();
                let a = mask(bits, self.eval(regs, lhs)?);
                let b = mask(bits, self.eval(regs, rhs)?);
                compare(*pred, bits, a, b) as u64
            }
            InstKind::Select {
                cond,
                ty,
                on_true,
                on_false,
            } => {
                let pick = if mask(1, self.eval(regs, cond)?) != 0 {
                    on_true
                } else {
                    on_false
                };
                mask(ty.bits(), self.eval(regs, pick)?)
            }
            InstKind::Phi { .. } => {
                return Err(SimError::TypeMismatch(format!(
                    "phi after non-phi instruction in '@{}'",
                    func.name
                )))
            }
            InstKind::Alloca { ty, count } => {
                let size = ty.size_bytes().saturating_mul(*count);
                self.mem.alloc(size)?
            }
            InstKind::Load { ty, ptr } => {
                let addr = self.eval(regs, ptr)?;
                self.mem.load(addr, *ty)?
            }
            InstKind::Store { ty, value, ptr } => {
                let v = mask(ty.bits(), self.eval(regs, value)?);
                let addr = self.eval(regs, ptr)?;
                self.mem.store(addr, *ty, v)?;
                return Ok(None);
            }
            InstKind::Gep {
                elem,
                base,
                index_ty,
                index,
            } => {
                let base = self.eval(regs, base)?;
                let index = sext(index_ty.bits(), mask(index_ty.bits(), self.eval(regs, index)?));
                base.wrapping_add((index as u64).wrapping_mul(elem.size_bytes()))
            }
            InstKind::Cast {
                op,
                from,
                value,
                to,
            } => {
                let v = mask(from.bits(), self.eval(regs, value)?);
                match op {
                    CastOp::ZExt => v,
                    CastOp::SExt => mask(to.bits(), sext(from.bits(), v) as u64),
                    CastOp::Trunc => mask(to.bits(), v),
                }
            }
            InstKind::Call { ret, callee, args } => {
                let args = args
                    .iter()
                    .map(|(ty, op)| Ok((*ty, mask(ty.bits(), self.eval(regs, op)?))))
                    .collect::<Result<Vec<_>, SimError>>()?;
                let v = self.call(ctx, callee, *ret, &args, depth + 1)?;
                if ret.is_void() {
                    return Ok(None);
                }
                mask(ret.bits(), v)
            }
        };
        Ok(Some(v))
    }

    // ── Runtime dispatch ───────────────────────────────────────────────────

    fn external(
        &mut self,
        ctx: &mut SimContext,
        name: &str,
        ret: Type,
        args: &[(Type, u64)],
    ) -> Result<u64, SimError> {
        let arg = |i: usize| -> Result<u64, SimError> {
            args.get(i).map(|(_, v)| *v).ok_or_else(|| SimError::ArgCount {
                function: name.to_string(),
                expected: i + 1,
                found: args.len(),
            })
        };

        match name {
            TRACE_BB => ctx.trace_bb(&self.mem.c_str(arg(0)?)?, arg(1)? as u32),
            TRACE_LOOP => ctx.trace_loop(&self.mem.c_str(arg(0)?)?, arg(1)? as u32),
            TRACE_LOOP_BB => ctx.trace_loop_bb(&self.mem.c_str(arg(0)?)?, arg(1)? as u32),
            TRACE_END_LOOP_BLOCKS => {
                ctx.trace_end_loop_blocks(&self.mem.c_str(arg(0)?)?, arg(1)? as u32)
            }
            TRACE_END_LOOP => ctx.trace_end_loop(&self.mem.c_str(arg(0)?)?, arg(1)? as u32),
            "__hlslitesim_set_read_req" => {
                ctx.set_read_req(arg(0)?, arg(1)? as u32, arg(2)? as u32)
            }
            "__hlslitesim_set_write_req" => {
                ctx.set_write_req(arg(0)?, arg(1)? as u32, arg(2)? as u32)
            }
            "__hlslitesim_update_read_req" => return ctx.update_read_req(arg(0)?),
            "__hlslitesim_update_write_req" => return ctx.update_write_req(arg(0)?),
            "__hlslitesim_write_resp" => ctx.write_resp(arg(0)?),
            "_ssdm_op_SpecChannel" => {
                let channel_name = self.mem.c_str(arg(0)?)?;
                ctx.spec_channel(arg(6)?, &channel_name, arg(4)? as u32);
            }
            "_ssdm_op_SpecInterface" => {
                let kind = self.mem.c_str(arg(1)?)?;
                let iface = self.mem.c_str(arg(7)?)?;
                ctx.spec_interface(arg(0)?, &kind, &iface, arg(5)? as u32);
            }
            _ if name.starts_with("_autotb_FifoRead_") => return ctx.fifo_read(arg(0)?),
            _ if name.starts_with("_autotb_FifoWrite_") => {
                let value = arg(1)?;
                ctx.fifo_write(arg(0)?, value);
                return Ok(value);
            }
            _ => {
                if let Some((op, suffix)) = name
                    .strip_prefix("_ssdm_op_")
                    .and_then(|rest| rest.split_once(".m_axi."))
                {
                    return self.m_axi(ctx, name, op, suffix, ret, args);
                }
                if name.starts_with("_ssdm") {
                    log::trace!("ignoring directive '@{}'", name);
                    return Ok(0);
                }
                return Err(SimError::UnknownExternal(name.to_string()));
            }
        }
        Ok(0)
    }

    /// Vendor m_axi intrinsics, lowered onto the AXI model and the heap.
    ///
    /// `ReadReq(ptr, count)`, `WriteReq(ptr, count)` open a window whose
    /// stride is the element width named in the suffix (`i32` in `p1i32`);
    /// `Read(ptr)` and `Write(ptr, value, ...)` advance it and touch memory;
    /// `WriteResp(ptr)` closes the burst.
    fn m_axi(
        &mut self,
        ctx: &mut SimContext,
        name: &str,
        op: &str,
        suffix: &str,
        ret: Type,
        args: &[(Type, u64)],
    ) -> Result<u64, SimError> {
        let elem = element_type(suffix)
            .ok_or_else(|| SimError::TypeMismatch(format!("no element width in '@{}'", name)))?;
        let need = |n: usize| -> Result<(), SimError> {
            if args.len() < n {
                return Err(SimError::ArgCount {
                    function: name.to_string(),
                    expected: n,
                    found: args.len(),
                });
            }
            Ok(())
        };
        let stride = elem.size_bytes() as u32;
        match op {
            "ReadReq" => {
                need(2)?;
                ctx.set_read_req(args[0].1, stride, args[1].1 as u32);
                Ok(1)
            }
            "WriteReq" => {
                need(2)?;
                ctx.set_write_req(args[0].1, stride, args[1].1 as u32);
                Ok(1)
            }
            "Read" => {
                need(1)?;
                let at = ctx.update_read_req(args[0].1)?;
                let ty = if ret.is_void() { elem } else { ret };
                self.mem.load(at, ty)
            }
            "Write" => {
                need(2)?;
                let at = ctx.update_write_req(args[0].1)?;
                let (ty, value) = args[1];
                self.mem.store(at, ty, value)?;
                Ok(0)
            }
            "WriteResp" => {
                need(1)?;
                ctx.write_resp(args[0].1);
                Ok(1)
            }
            _ => Err(SimError::UnknownExternal(name.to_string())),
        }
    }
}

/// `i<N>` inside an intrinsic suffix such as `p1i32` or `i64.p0`.
fn element_type(suffix: &str) -> Option<Type> {
    let at = suffix
        .char_indices()
        .find(|(i, c)| *c == 'i' && suffix[i + 1..].starts_with(|d: char| d.is_ascii_digit()))?
        .0;
    let digits: String = suffix[at + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let bits: u8 = digits.parse().ok().filter(|b| (1..=64).contains(b))?;
    Some(Type::Int(bits))
}

/// `None` on division by zero.
fn binary(op: BinOp, bits: u32, a: u64, b: u64) -> Option<u64> {
    let sa = sext(bits, a);
    let sb = sext(bits, b);
    let shift = |f: fn(u64, u32) -> u64| if b >= bits as u64 { 0 } else { f(a, b as u32) };
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::UDiv => a.checked_div(b)?,
        BinOp::URem => a.checked_rem(b)?,
        BinOp::SDiv => {
            if sb == 0 {
                return None;
            }
            sa.wrapping_div(sb) as u64
        }
        BinOp::SRem => {
            if sb == 0 {
                return None;
            }
            sa.wrapping_rem(sb) as u64
        }
        BinOp::Shl => shift(|a, s| a << s),
        BinOp::LShr => shift(|a, s| a >> s),
        BinOp::AShr => {
            if b >= bits as u64 {
                (sa >> 63) as u64
            } else {
                (sa >> b) as u64
            }
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
    })
}

fn compare(pred: IntPred, bits: u32, a: u64, b: u64) -> bool {
    let (sa, sb) = (sext(bits, a), sext(bits, b));
    match pred {
        IntPred::Eq => a == b,
        IntPred::Ne => a != b,
        IntPred::Ult => a < b,
        IntPred::Ule => a <= b,
        IntPred::Ugt => a > b,
        IntPred::Uge => a >= b,
        IntPred::Slt => sa < sb,
        IntPred::Sle => sa <= sb,
        IntPred::Sgt => sa > sb,
        IntPred::Sge => sa >= sb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;
    use crate::sink::TraceSink;

    fn run(src: &str, entry: &str, args: &[u64]) -> Result<Option<u64>, SimError> {
        let m = parse_module(src).unwrap();
        let mut ctx = SimContext::default();
        Interpreter::new(&m, InterpConfig::default())?.run(&mut ctx, entry, args)
    }

    #[test]
    fn sums_a_range() {
        let src = "define i32 @sum(i32 %n) {
            entry:
              br label %loop
            loop:
              %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
              %acc = phi i32 [ 0, %entry ], [ %acc.next, %loop ]
              %acc.next = add i32 %acc, %i
              %i.next = add i32 %i, 1
              %c = icmp slt i32 %i.next, %n
              br i1 %c, label %loop, label %exit
            exit:
              ret i32 %acc.next
            }";
        assert_eq!(run(src, "sum", &[10]), Ok(Some(45)));
    }

    #[test]
    fn phis_are_parallel_copies() {
        let src = "define i32 @swap(i32 %n) {
            entry:
              br label %loop
            loop:
              %a = phi i32 [ 1, %entry ], [ %b, %loop ]
              %b = phi i32 [ 2, %entry ], [ %a, %loop ]
              %k = phi i32 [ 0, %entry ], [ %k.next, %loop ]
              %k.next = add i32 %k, 1
              %c = icmp ult i32 %k.next, %n
              br i1 %c, label %loop, label %exit
            exit:
              %r = mul i32 %a, 10
              %s = add i32 %r, %b
              ret i32 %s
            }";
        assert_eq!(run(src, "swap", &[1]), Ok(Some(12)));
        assert_eq!(run(src, "swap", &[2]), Ok(Some(21)));
    }

    #[test]
    fn integer_semantics_follow_width() {
        let src = "define i32 @f(i8 %x) {
            entry:
              %w = sext i8 %x to i32
              %d = sdiv i32 %w, 2
              %t = trunc i32 %d to i8
              %z = zext i8 %t to i32
              ret i32 %z
            }";
        // -6 as i8 -> -3 -> 0xfd
        assert_eq!(run(src, "f", &[0xfa]), Ok(Some(0xfd)));
    }

    #[test]
    fn memory_round_trips_through_allocas() {
        let src = "define i64 @f() {
            entry:
              %buf = alloca i32, i64 4
              %p = getelementptr i32, ptr %buf, i64 3
              store i32 -1, ptr %p
              %v = load i32, ptr %p
              %w = zext i32 %v to i64
              ret i64 %w
            }";
        assert_eq!(run(src, "f", &[]), Ok(Some(0xffff_ffff)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let src = "define i32 @f(i32 %d) {
            entry:
              %q = udiv i32 7, %d
              ret i32 %q
            }";
        assert_eq!(run(src, "f", &[0]), Err(SimError::DivisionByZero("f".into())));
    }

    #[test]
    fn runaway_loop_hits_step_limit() {
        let src = "define void @spin() {
            entry:
              br label %loop
            loop:
              br label %loop
            }";
        let m = parse_module(src).unwrap();
        let mut ctx = SimContext::default();
        let config = InterpConfig {
            max_steps: 100,
            ..InterpConfig::default()
        };
        let mut interp = Interpreter::new(&m, config).unwrap();
        assert_eq!(interp.run(&mut ctx, "spin", &[]), Err(SimError::StepLimit(100)));
    }

    #[test]
    fn recursion_is_bounded() {
        let src = "define void @r() {
            entry:
              call void @r()
              ret void
            }";
        assert!(matches!(run(src, "r", &[]), Err(SimError::CallDepth(_))));
    }

    #[test]
    fn fifo_intrinsics_reach_the_runtime() {
        let src = "declare i32 @_autotb_FifoWrite_i32(ptr, i32)
            declare i32 @_autotb_FifoRead_i32(ptr)
            define i32 @f() {
            entry:
              %ch = alloca i32
              %w = call i32 @_autotb_FifoWrite_i32(ptr %ch, i32 7)
              %r = call i32 @_autotb_FifoRead_i32(ptr %ch)
              %r2 = call i32 @_autotb_FifoRead_i32(ptr %ch)
              ret i32 %r
            }";
        let m = parse_module(src).unwrap();
        let mut ctx = SimContext::default();
        let mut interp = Interpreter::new(&m, InterpConfig::default()).unwrap();
        assert!(matches!(
            interp.run(&mut ctx, "f", &[]),
            Err(SimError::FifoEmpty { .. })
        ));
    }

    #[test]
    fn spec_directives_are_traced() {
        let src = "declare i32 @_ssdm_op_SpecChannel(ptr, i32, ptr, ptr, i32, i32, ptr, ptr)
            declare void @_ssdm_op_SpecInterface(ptr, ptr, i32, i32, ptr, i32, i32, ptr, ptr, ptr, i32, i32, i32, i32, ptr, ptr)
            declare void @_ssdm_op_SpecPipeline(i32, i32, i32, i32, ptr)
            define void @top(ptr %gmem) {
            entry:
              %ch = alloca i64
              %x = call i32 @_ssdm_op_SpecChannel(ptr c\"stream\", i32 1, ptr c\"\", ptr c\"\", i32 8, i32 8, ptr %ch, ptr %ch)
              call void @_ssdm_op_SpecInterface(ptr %gmem, ptr c\"m_axi\", i32 0, i32 0, ptr c\"\", i32 64, i32 0, ptr c\"gmem\", ptr c\"slave\", ptr c\"\", i32 16, i32 16, i32 16, i32 16, ptr c\"\", ptr c\"\")
              call void @_ssdm_op_SpecPipeline(i32 1, i32 0, i32 0, i32 0, ptr c\"\")
              ret void
            }";
        let m = parse_module(src).unwrap();
        let (sink, buf) = TraceSink::capture();
        let mut ctx = SimContext::new(sink);
        let mut interp = Interpreter::new(&m, InterpConfig::default()).unwrap();
        let gmem = interp.memory_mut().alloc(64).unwrap();
        interp.run(&mut ctx, "top", &[gmem]).unwrap();
        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("spec_channel\t0x"));
        assert!(lines[0].ends_with("\tstream\t8"));
        assert_eq!(lines[1], format!("spec_interface\t{:#x}\tgmem\t64", gmem));
    }

    #[test]
    fn m_axi_intrinsics_move_data_through_windows() {
        let src = "declare i1 @_ssdm_op_ReadReq.m_axi.p1i32(ptr, i32)
            declare i32 @_ssdm_op_Read.m_axi.p1i32(ptr)
            declare i1 @_ssdm_op_WriteReq.m_axi.p1i32(ptr, i32)
            declare void @_ssdm_op_Write.m_axi.p1i32(ptr, i32, i8)
            declare i1 @_ssdm_op_WriteResp.m_axi.p1i32(ptr)
            define void @copy(ptr %src, ptr %dst) {
            entry:
              %a = call i1 @_ssdm_op_ReadReq.m_axi.p1i32(ptr %src, i32 2)
              %b = call i1 @_ssdm_op_WriteReq.m_axi.p1i32(ptr %dst, i32 2)
              %x = call i32 @_ssdm_op_Read.m_axi.p1i32(ptr %src)
              call void @_ssdm_op_Write.m_axi.p1i32(ptr %dst, i32 %x, i8 15)
              %y = call i32 @_ssdm_op_Read.m_axi.p1i32(ptr %src)
              call void @_ssdm_op_Write.m_axi.p1i32(ptr %dst, i32 %y, i8 15)
              %c = call i1 @_ssdm_op_WriteResp.m_axi.p1i32(ptr %dst)
              ret void
            }";
        let m = parse_module(src).unwrap();
        let mut ctx = SimContext::default();
        let mut interp = Interpreter::new(&m, InterpConfig::default()).unwrap();
        let mem = interp.memory_mut();
        let src_buf = mem.alloc(8).unwrap();
        let dst_buf = mem.alloc(8).unwrap();
        mem.store(src_buf, Type::I32, 11).unwrap();
        mem.store(src_buf + 4, Type::I32, 22).unwrap();
        interp.run(&mut ctx, "copy", &[src_buf, dst_buf]).unwrap();
        assert_eq!(interp.memory().load(dst_buf, Type::I32), Ok(11));
        assert_eq!(interp.memory().load(dst_buf + 4, Type::I32), Ok(22));
    }

    #[test]
    fn unknown_external_is_reported() {
        let src = "declare void @mystery()
            define void @f() {
            entry:
              call void @mystery()
              ret void
            }";
        assert_eq!(
            run(src, "f", &[]),
            Err(SimError::UnknownExternal("mystery".into()))
        );
    }

    #[test]
    fn element_width_comes_from_suffix() {
        assert_eq!(element_type("p1i32"), Some(Type::I32));
        assert_eq!(element_type("i64.p0"), Some(Type::I64));
        assert_eq!(element_type("p1"), None);
    }

    #[test]
    fn wrong_arity_is_reported() {
        let src = "define void @f(i32 %a) {
            entry:
              ret void
            }";
        assert!(matches!(
            run(src, "f", &[]),
            Err(SimError::ArgCount { expected: 1, found: 0, .. })
        ));
    }
}
