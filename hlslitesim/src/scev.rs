// scev.rs — Affine induction analysis and closed-form trip counts
//
// Recognizes the latch test of a counted loop: an `icmp` between an affine
// induction expression `{start,+,step}` (a header phi plus constant offsets)
// and a constant bound. Solves for the first failing iteration in exact
// 128-bit arithmetic and rejects any sequence that would wrap in the
// compared width before the loop exits.
//
// Preconditions: `loops` and `cfg` were computed from `func`.
// Postconditions: `Some(T)` means the header executes exactly `T` times per
//   entry, `1 <= T <= u32::MAX`.
// Failure modes: any shape outside the recognized form yields `None`.
// Side effects: none.

use crate::cfg::{Cfg, LoopInfo};
use crate::id::{BlockId, LoopIdx, ValueId};
use crate::ir::{BinOp, Function, InstKind, IntPred, Operand, Terminator, Type};

/// An affine sequence `start + k * step` over iterations `k = 0, 1, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddRec {
    pub start: i64,
    pub step: i64,
}

/// The recognized exit test: the loop continues while `pred(rec_k, bound)`
/// holds in `bits`-wide arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitTest {
    pub rec: AddRec,
    pub pred: IntPred,
    pub bound: i64,
    pub bits: u32,
}

impl ExitTest {
    /// Number of header executions per entry, if finite, wrap-free and
    /// representable in 32 bits.
    pub fn trip_count(&self) -> Option<u32> {
        let k = exit_iteration(self)?;
        u32::try_from(k + 1).ok()
    }
}

/// Trip count of `idx`, when its latch test is a recognized exit test.
pub fn trip_count(func: &Function, cfg: &Cfg, loops: &LoopInfo, idx: LoopIdx) -> Option<u32> {
    exit_test(func, cfg, loops, idx)?.trip_count()
}

/// Extract the exit test of a loop whose only exiting block is its latch.
pub fn exit_test(func: &Function, cfg: &Cfg, loops: &LoopInfo, idx: LoopIdx) -> Option<ExitTest> {
    let l = loops.get(idx);
    let latch = l.single_latch()?;
    if loops.exiting_blocks(idx, cfg) != [latch] {
        return None;
    }

    let Terminator::CondBr {
        cond,
        on_true,
        on_false,
    } = &func.block(latch).term
    else {
        return None;
    };
    let stay_on_true = match (l.contains(*on_true), l.contains(*on_false)) {
        (true, false) => true,
        (false, true) => false,
        _ => return None,
    };

    let (_, cmp) = func.def_of(cond.as_value()?)?;
    let InstKind::ICmp { pred, ty, lhs, rhs } = &cmp.kind else {
        return None;
    };
    let Type::Int(bits) = *ty else {
        return None;
    };

    let (rec, bound, pred) = match (rhs.as_const(), lhs.as_const()) {
        (Some(c), None) => (induction(func, l.header, latch, lhs)?, c, *pred),
        (None, Some(c)) => (induction(func, l.header, latch, rhs)?, c, pred.swapped()),
        _ => return None,
    };
    let pred = if stay_on_true { pred } else { pred.inverse() };

    Some(ExitTest {
        rec,
        pred,
        bound,
        bits: bits as u32,
    })
}

/// `operand` as `{start,+,step}` over the loop with the given header.
fn induction(func: &Function, header: BlockId, latch: BlockId, operand: &Operand) -> Option<AddRec> {
    // Walk constant offsets down to a header phi.
    let mut offset: i64 = 0;
    let mut cur = operand.as_value()?;
    let (phi, incoming) = loop {
        let (block, inst) = func.def_of(cur)?;
        match &inst.kind {
            InstKind::Phi { incoming, .. } if block == header => break (cur, incoming),
            _ => {
                let (base, delta) = constant_offset(&inst.kind)?;
                offset = offset.checked_add(delta)?;
                cur = base;
            }
        }
    };

    let mut start: Option<i64> = None;
    let mut step: Option<i64> = None;
    for (value, pred) in incoming {
        if *pred == latch {
            let d = offset_from(func, value, phi)?;
            if step.replace(d).is_some_and(|prev| prev != d) {
                return None;
            }
        } else {
            let c = value.as_const()?;
            if start.replace(c).is_some_and(|prev| prev != c) {
                return None;
            }
        }
    }
    let step = step?;
    Some(AddRec {
        start: start?.checked_add(offset)?,
        step,
    })
}

/// `x + c`, `c + x` or `x - c`, as `(x, ±c)`.
fn constant_offset(kind: &InstKind) -> Option<(ValueId, i64)> {
    let InstKind::Binary { op, lhs, rhs, .. } = kind else {
        return None;
    };
    match (op, lhs, rhs) {
        (BinOp::Add, Operand::Value(x), Operand::Const(c))
        | (BinOp::Add, Operand::Const(c), Operand::Value(x)) => Some((*x, *c)),
        (BinOp::Sub, Operand::Value(x), Operand::Const(c)) => Some((*x, c.checked_neg()?)),
        _ => None,
    }
}

/// Constant `d` such that `value == phi + d`.
fn offset_from(func: &Function, value: &Operand, phi: ValueId) -> Option<i64> {
    let mut total: i64 = 0;
    let mut cur = value.as_value()?;
    while cur != phi {
        let (_, inst) = func.def_of(cur)?;
        let (base, delta) = constant_offset(&inst.kind)?;
        total = total.checked_add(delta)?;
        cur = base;
    }
    Some(total)
}

// ── Closed form ─────────────────────────────────────────────────────────────

/// Interpret the low `bits` of `v` as signed or unsigned.
fn normalize(v: i64, bits: u32, signed: bool) -> i128 {
    let bits = bits.clamp(1, 64);
    let mask: u128 = if bits == 64 { u64::MAX as u128 } else { (1u128 << bits) - 1 };
    let raw = (v as i128 as u128) & mask;
    if signed && raw >> (bits - 1) & 1 == 1 {
        raw as i128 - (1i128 << bits)
    } else {
        raw as i128
    }
}

fn range(bits: u32, signed: bool) -> (i128, i128) {
    let bits = bits.clamp(1, 64);
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

fn div_ceil(a: i128, b: i128) -> i128 {
    // a >= 0, b > 0
    (a + b - 1) / b
}

/// First iteration `k` at which the continue condition fails.
pub fn exit_iteration(test: &ExitTest) -> Option<u64> {
    let signed = !matches!(
        test.pred,
        IntPred::Ult | IntPred::Ule | IntPred::Ugt | IntPred::Uge
    );
    let start = normalize(test.rec.start, test.bits, signed);
    let bound = normalize(test.bound, test.bits, signed);
    let step = normalize(test.rec.step, test.bits, true);

    let k: i128 = match test.pred {
        IntPred::Slt | IntPred::Ult => {
            if start >= bound {
                0
            } else if step > 0 {
                div_ceil(bound - start, step)
            } else {
                return None;
            }
        }
        IntPred::Sle | IntPred::Ule => {
            if start > bound {
                0
            } else if step > 0 {
                (bound - start) / step + 1
            } else {
                return None;
            }
        }
        IntPred::Sgt | IntPred::Ugt => {
            if start <= bound {
                0
            } else if step < 0 {
                div_ceil(start - bound, -step)
            } else {
                return None;
            }
        }
        IntPred::Sge | IntPred::Uge => {
            if start < bound {
                0
            } else if step < 0 {
                (start - bound) / (-step) + 1
            } else {
                return None;
            }
        }
        IntPred::Ne => {
            let diff = bound - start;
            if diff == 0 {
                0
            } else if step != 0 && diff % step == 0 && diff / step > 0 {
                diff / step
            } else {
                return None;
            }
        }
        IntPred::Eq => {
            if start != bound {
                0
            } else if step != 0 {
                1
            } else {
                return None;
            }
        }
    };

    // The sequence is monotone, so checking the exit value covers every
    // value tested before it.
    let (lo, hi) = range(test.bits, signed);
    let last = start + k * step;
    if last < lo || last > hi {
        return None;
    }
    u64::try_from(k).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;

    fn scev_of(source: &str) -> Option<u32> {
        let m = parse_module(source).unwrap();
        let f = m.definitions().next().unwrap();
        let (cfg, loops) = LoopInfo::of(f);
        let idx = loops.innermost_first()[0];
        trip_count(f, &cfg, &loops, idx)
    }

    fn counted(start: i64, update: &str, test: &str) -> String {
        format!(
            "define void @f(i32 %n) {{
             entry:
               br label %loop
             loop:
               %i = phi i32 [ {start}, %entry ], [ %i.next, %loop ]
               %i.next = {update}
               %c = {test}
               br i1 %c, label %loop, label %exit
             exit:
               ret void
             }}"
        )
    }

    #[test]
    fn increment_to_sixteen() {
        let src = counted(0, "add i32 %i, 1", "icmp slt i32 %i.next, 16");
        assert_eq!(scev_of(&src), Some(16));
    }

    #[test]
    fn compare_phi_itself() {
        let src = counted(0, "add i32 %i, 1", "icmp slt i32 %i, 15");
        assert_eq!(scev_of(&src), Some(16));
    }

    #[test]
    fn stride_and_ne() {
        let src = counted(0, "add i32 %i, 4", "icmp ne i32 %i.next, 64");
        assert_eq!(scev_of(&src), Some(16));
        let src = counted(0, "add i32 %i, 3", "icmp ne i32 %i.next, 64");
        assert_eq!(scev_of(&src), None);
    }

    #[test]
    fn countdown_with_swapped_operands() {
        let src = counted(10, "sub i32 %i, 1", "icmp slt i32 0, %i.next");
        assert_eq!(scev_of(&src), Some(10));
    }

    #[test]
    fn unsigned_countdown() {
        let src = counted(8, "add i32 %i, -1", "icmp ugt i32 %i.next, 0");
        assert_eq!(scev_of(&src), Some(8));
    }

    #[test]
    fn exit_on_true_edge_inverts() {
        let src = "define void @f() {
             entry:
               br label %loop
             loop:
               %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
               %i.next = add i32 %i, 1
               %done = icmp eq i32 %i.next, 100
               br i1 %done, label %exit, label %loop
             exit:
               ret void
             }";
        assert_eq!(scev_of(src), Some(100));
    }

    #[test]
    fn runtime_bound_is_unknown() {
        let src = counted(0, "add i32 %i, 1", "icmp slt i32 %i.next, %n");
        assert_eq!(scev_of(&src), None);
    }

    #[test]
    fn wrapping_sequence_is_rejected() {
        // i8 counting to 200 signed would wrap at 127.
        let src = "define void @f() {
             entry:
               br label %loop
             loop:
               %i = phi i8 [ 0, %entry ], [ %i.next, %loop ]
               %i.next = add i8 %i, 1
               %c = icmp sle i8 %i.next, 127
               br i1 %c, label %loop, label %exit
             exit:
               ret void
             }";
        assert_eq!(scev_of(src), None);
    }

    #[test]
    fn non_latch_exit_is_unknown() {
        let src = "define void @f(i1 %b) {
             entry:
               br label %head
             head:
               %i = phi i32 [ 0, %entry ], [ %i.next, %latch ]
               br i1 %b, label %latch, label %exit
             latch:
               %i.next = add i32 %i, 1
               %c = icmp slt i32 %i.next, 8
               br i1 %c, label %head, label %exit
             exit:
               ret void
             }";
        assert_eq!(scev_of(src), None);
    }

    #[test]
    fn start_already_past_bound_runs_once() {
        let test = ExitTest {
            rec: AddRec { start: 20, step: 1 },
            pred: IntPred::Slt,
            bound: 10,
            bits: 32,
        };
        assert_eq!(test.trip_count(), Some(1));
    }

    #[test]
    fn trip_count_beyond_u32_is_rejected() {
        let test = ExitTest {
            rec: AddRec { start: 0, step: 1 },
            pred: IntPred::Slt,
            bound: 1 << 40,
            bits: 64,
        };
        assert_eq!(test.trip_count(), None);
    }

    #[test]
    fn normalize_widths() {
        assert_eq!(normalize(-1, 8, false), 255);
        assert_eq!(normalize(255, 8, true), -1);
        assert_eq!(normalize(i64::MIN, 64, true), i64::MIN as i128);
        assert_eq!(normalize(-1, 64, false), u64::MAX as i128);
    }
}
