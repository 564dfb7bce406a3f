// trip_count.rs — Loop trip-count discovery
//
// Annotates every loop of every traceable function with a trip-count record
// `!{!"hlslitesim.loop.tripcount", i32 T}` inside its loop ID. `T` is the
// number of header executions per loop entry, or 0 when no detector can
// prove a constant. Detectors form an ordered chain; the first `Some` wins.
//
// Preconditions: module lowered without errors.
// Postconditions: every examined loop has a loop ID carrying exactly one
//   trip-count record.
// Failure modes: none; undetectable loops are recorded as 0.
// Side effects: mutates loop IDs in place, may create fresh loop IDs. A loop
//   ID attached to the latches of more than one loop is kept by the first of
//   them; each later loop gets a distinct copy without any record.

use std::collections::HashSet;

use crate::cfg::{Cfg, LoopInfo};
use crate::id::{LoopIdx, MdId};
use crate::ir::{Function, InstKind, MdOperand, MetadataTable, Module};

/// Tag of the record written by discovery.
pub const TRIPCOUNT_TAG: &str = "hlslitesim.loop.tripcount";
/// Tag that replaces the record once the loop has been rewritten.
pub const TRACED_TAG: &str = "hlslitesim.loop.traced";
/// Tag of a user-supplied `min, max, avg` estimate.
pub const USER_TRIPCOUNT_TAG: &str = "llvm.loop.tripcount";
/// Synthesis intrinsic carrying a trip-count directive.
pub const SPEC_LOOP_TRIPCOUNT: &str = "_ssdm_op_SpecLoopTripCount";

/// Everything a detector may look at for one loop.
pub struct LoopView<'a> {
    pub func: &'a Function,
    pub cfg: &'a Cfg,
    pub loops: &'a LoopInfo,
    pub idx: LoopIdx,
    pub metadata: &'a MetadataTable,
}

impl LoopView<'_> {
    pub fn loop_id(&self) -> Option<MdId> {
        self.loops.loop_id(self.func, self.idx)
    }
}

pub trait TripCountDetector {
    fn name(&self) -> &'static str;

    /// A constant trip count for the loop, or `None` to defer to the next
    /// detector.
    fn detect(&self, view: &LoopView<'_>) -> Option<u32>;
}

/// Reads a `_ssdm_op_SpecLoopTripCount(min, max, avg)` call placed in the
/// loop (and not in a nested one) when all three bounds are the same
/// constant.
#[derive(Debug, Default)]
pub struct SpecLoopTripCountDetector;

impl TripCountDetector for SpecLoopTripCountDetector {
    fn name(&self) -> &'static str {
        "spec-loop-tripcount"
    }

    fn detect(&self, view: &LoopView<'_>) -> Option<u32> {
        let l = view.loops.get(view.idx);
        let call_args = l
            .blocks
            .iter()
            .filter(|b| view.loops.innermost_loop_for(**b) == Some(view.idx))
            .flat_map(|b| view.func.block(*b).insts.iter())
            .find_map(|inst| match &inst.kind {
                InstKind::Call { callee, args, .. } if callee == SPEC_LOOP_TRIPCOUNT => {
                    Some(args)
                }
                _ => None,
            })?;

        let bounds: Vec<i64> = call_args
            .iter()
            .take(3)
            .map(|(_, op)| op.as_const())
            .collect::<Option<_>>()?;
        let [min, max, avg] = bounds[..] else {
            return None;
        };
        if min != max || min != avg {
            return None;
        }
        // A directive that merely echoes the user's own estimate says
        // nothing about the actual iteration count.
        if let Some(hint) = view.loop_id().and_then(|id| user_hint(view.metadata, id)) {
            if hint == min {
                log::debug!("{}: intrinsic repeats user hint {}", self.name(), hint);
                return None;
            }
        }
        u32::try_from(min).ok().filter(|t| *t > 0)
    }
}

/// Closed-form trip count of counted loops (see `scev`).
#[derive(Debug, Default)]
pub struct ScevDetector;

impl TripCountDetector for ScevDetector {
    fn name(&self) -> &'static str {
        "scev"
    }

    fn detect(&self, view: &LoopView<'_>) -> Option<u32> {
        crate::scev::trip_count(view.func, view.cfg, view.loops, view.idx)
    }
}

pub fn default_detectors() -> Vec<Box<dyn TripCountDetector>> {
    vec![Box::new(SpecLoopTripCountDetector), Box::new(ScevDetector)]
}

/// Uniform value of a `!{!"llvm.loop.tripcount", i32 a, i32 b, i32 c}` hint.
fn user_hint(md: &MetadataTable, loop_id: MdId) -> Option<i64> {
    let hint = md.find_tagged(loop_id, USER_TRIPCOUNT_TAG)?;
    let vals: Vec<i64> = md.node(hint).operands[1..]
        .iter()
        .map(MdOperand::as_int)
        .collect::<Option<_>>()?;
    match vals[..] {
        [a, b, c] if a == b && a == c => Some(a),
        _ => None,
    }
}

/// The recorded trip count of a loop ID, if any.
pub fn recorded_trip_count(md: &MetadataTable, loop_id: MdId) -> Option<u32> {
    let rec = md.find_tagged(loop_id, TRIPCOUNT_TAG)?;
    md.node(rec)
        .operands
        .get(1)
        .and_then(MdOperand::as_int)
        .and_then(|v| u32::try_from(v).ok())
}

/// Append a record (or marker) node tagged `tag` with value `t` to the loop
/// ID, creating a fresh distinct loop ID when there is none.
pub fn append_record(
    md: &mut MetadataTable,
    func: &mut Function,
    loops: &LoopInfo,
    idx: LoopIdx,
    tag: &str,
    t: u32,
) -> MdId {
    let record = md.get(vec![MdOperand::Str(tag.to_string()), MdOperand::int(t as i64)]);
    match loops.loop_id(func, idx) {
        Some(id) => {
            let mut ops = md.node(id).operands.clone();
            ops.push(MdOperand::Node(record));
            md.set_operands(id, ops);
            id
        }
        None => {
            let id = md.new_loop_id(vec![MdOperand::Node(record)]);
            loops.set_loop_id(func, idx, id);
            id
        }
    }
}

/// Distinct copy of a loop ID, minus its self reference and any trip-count
/// record or traced marker.
fn unshared_copy(md: &mut MetadataTable, id: MdId) -> MdId {
    let extra: Vec<MdOperand> = md
        .node(id)
        .operands
        .iter()
        .filter(|op| match op {
            MdOperand::Node(n) => {
                *n != id && !matches!(md.tag(*n), Some(TRIPCOUNT_TAG | TRACED_TAG))
            }
            _ => true,
        })
        .cloned()
        .collect();
    md.new_loop_id(extra)
}

/// Is this function instrumented at all?
pub fn is_traceable(func: &Function, reserved_prefix: &str) -> bool {
    !func.is_declaration() && !func.name.starts_with(reserved_prefix)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub examined: usize,
    pub known: usize,
    pub unknown: usize,
    pub skipped: usize,
}

/// Run the detector chain over every loop, innermost first.
pub fn discover_trip_counts(
    module: &mut Module,
    reserved_prefix: &str,
    detectors: &[Box<dyn TripCountDetector>],
) -> DiscoveryStats {
    let mut stats = DiscoveryStats::default();
    let Module {
        functions,
        metadata,
    } = module;
    let mut claimed: HashSet<MdId> = HashSet::new();

    for func in functions.iter_mut() {
        if !is_traceable(func, reserved_prefix) {
            continue;
        }
        let (cfg, loops) = LoopInfo::of(func);
        for idx in loops.innermost_first() {
            if let Some(mut id) = loops.loop_id(func, idx) {
                if !claimed.insert(id) {
                    let fresh = unshared_copy(metadata, id);
                    log::debug!(
                        "@{}: loop '{}' shares loop ID !{} with an earlier loop, now !{}",
                        func.name,
                        loops.name(func, idx),
                        id.0,
                        fresh.0
                    );
                    loops.set_loop_id(func, idx, fresh);
                    claimed.insert(fresh);
                    id = fresh;
                }
                if metadata.find_tagged(id, TRIPCOUNT_TAG).is_some()
                    || metadata.find_tagged(id, TRACED_TAG).is_some()
                {
                    stats.skipped += 1;
                    continue;
                }
            }
            stats.examined += 1;

            let view = LoopView {
                func: &*func,
                cfg: &cfg,
                loops: &loops,
                idx,
                metadata: &*metadata,
            };
            let found = detectors
                .iter()
                .find_map(|d| d.detect(&view).map(|t| (d.name(), t)));
            let t = match found {
                Some((by, t)) => {
                    log::debug!(
                        "@{}: loop '{}' trip count {} ({})",
                        func.name,
                        loops.name(func, idx),
                        t,
                        by
                    );
                    stats.known += 1;
                    t
                }
                None => {
                    log::debug!(
                        "@{}: loop '{}' trip count unknown",
                        func.name,
                        loops.name(func, idx)
                    );
                    stats.unknown += 1;
                    0
                }
            };
            append_record(metadata, func, &loops, idx, TRIPCOUNT_TAG, t);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;

    fn loop_src(intrinsic: &str, bound: &str, hint: &str) -> String {
        format!(
            "declare void @_ssdm_op_SpecLoopTripCount(i32, i32, i32)
            define void @k(i32 %n) {{
            entry:
              br label %loop
            loop:
              %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
              {intrinsic}
              %i.next = add i32 %i, 1
              %c = icmp slt i32 %i.next, {bound}
              br i1 %c, label %loop, label %exit, !llvm.loop !0
            exit:
              ret void
            }}
            !0 = distinct !{{!0{hint}}}
            !1 = !{{!\"llvm.loop.tripcount\", i32 8, i32 8, i32 8}}"
        )
    }

    fn discovered(src: &str) -> (Module, DiscoveryStats) {
        let mut m = parse_module(src).unwrap();
        let stats = discover_trip_counts(&mut m, "_ssdm_op_", &default_detectors());
        (m, stats)
    }

    fn recorded(m: &Module) -> Option<u32> {
        let f = m.function("k").unwrap();
        let (_, loops) = LoopInfo::of(f);
        let id = loops.loop_id(f, LoopIdx(0))?;
        recorded_trip_count(&m.metadata, id)
    }

    #[test]
    fn scev_finds_constant_bound() {
        let (m, stats) = discovered(&loop_src("", "16", ""));
        assert_eq!(recorded(&m), Some(16));
        assert_eq!(stats.known, 1);
    }

    #[test]
    fn intrinsic_wins_over_scev() {
        let call = "call void @_ssdm_op_SpecLoopTripCount(i32 4, i32 4, i32 4)";
        let (m, _) = discovered(&loop_src(call, "16", ""));
        assert_eq!(recorded(&m), Some(4));
    }

    #[test]
    fn intrinsic_echoing_user_hint_defers() {
        let call = "call void @_ssdm_op_SpecLoopTripCount(i32 8, i32 8, i32 8)";
        let (m, _) = discovered(&loop_src(call, "%n", ", !1"));
        assert_eq!(recorded(&m), Some(0));
    }

    #[test]
    fn intrinsic_differing_from_hint_is_used() {
        let call = "call void @_ssdm_op_SpecLoopTripCount(i32 5, i32 5, i32 5)";
        let (m, _) = discovered(&loop_src(call, "%n", ", !1"));
        assert_eq!(recorded(&m), Some(5));
    }

    #[test]
    fn non_uniform_intrinsic_is_unknown() {
        let call = "call void @_ssdm_op_SpecLoopTripCount(i32 1, i32 9, i32 4)";
        let (m, stats) = discovered(&loop_src(call, "%n", ""));
        assert_eq!(recorded(&m), Some(0));
        assert_eq!(stats.unknown, 1);
    }

    #[test]
    fn loop_without_id_gets_fresh_distinct_node() {
        let src = "define void @k() {
            entry:
              br label %loop
            loop:
              %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
              %i.next = add i32 %i, 1
              %c = icmp ult i32 %i.next, 3
              br i1 %c, label %loop, label %exit
            exit:
              ret void
            }";
        let (m, _) = discovered(src);
        let f = m.function("k").unwrap();
        let (_, loops) = LoopInfo::of(f);
        let id = loops.loop_id(f, LoopIdx(0)).unwrap();
        assert!(m.metadata.node(id).distinct);
        assert_eq!(m.metadata.node(id).operands[0], MdOperand::Node(id));
        assert_eq!(recorded_trip_count(&m.metadata, id), Some(3));
    }

    #[test]
    fn second_discovery_is_a_no_op() {
        let (mut m, _) = discovered(&loop_src("", "16", ""));
        let before = m.to_string();
        let stats = discover_trip_counts(&mut m, "_ssdm_op_", &default_detectors());
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.examined, 0);
        assert_eq!(m.to_string(), before);
    }

    #[test]
    fn reserved_functions_are_left_alone() {
        let src = loop_src("", "16", "").replace("@k(", "@_ssdm_op_k(");
        let mut m = parse_module(&src).unwrap();
        let stats = discover_trip_counts(&mut m, "_ssdm_op_", &default_detectors());
        assert_eq!(stats, DiscoveryStats::default());
    }

    #[test]
    fn loops_sharing_an_id_get_their_own_records() {
        let src = "define void @k() {
            entry:
              br label %a.body
            a.body:
              %i = phi i32 [ 0, %entry ], [ %i.next, %a.latch ]
              br label %a.latch
            a.latch:
              %i.next = add i32 %i, 1
              %c = icmp slt i32 %i.next, 4
              br i1 %c, label %a.body, label %mid, !llvm.loop !0
            mid:
              br label %b.body
            b.body:
              %j = phi i32 [ 0, %mid ], [ %j.next, %b.latch ]
              br label %b.latch
            b.latch:
              %j.next = add i32 %j, 1
              %d = icmp slt i32 %j.next, 9
              br i1 %d, label %b.body, label %exit, !llvm.loop !0
            exit:
              ret void
            }
            !0 = distinct !{!0, !1}
            !1 = !{!\"llvm.loop.mustprogress\"}";
        let (m, stats) = discovered(src);
        assert_eq!(stats.examined, 2);
        assert_eq!(stats.known, 2);

        let f = m.function("k").unwrap();
        let id_of = |latch: &str| {
            let b = f.block(f.block_by_name(latch).unwrap());
            b.term_md("llvm.loop").unwrap()
        };
        let (a, b) = (id_of("a.latch"), id_of("b.latch"));
        assert_ne!(a, b);
        let mut counts = [
            recorded_trip_count(&m.metadata, a).unwrap(),
            recorded_trip_count(&m.metadata, b).unwrap(),
        ];
        counts.sort();
        assert_eq!(counts, [4, 9]);
        for id in [a, b] {
            let node = m.metadata.node(id);
            assert!(node.distinct);
            assert_eq!(node.operands[0], MdOperand::Node(id));
            assert!(m.metadata.find_tagged(id, "llvm.loop.mustprogress").is_some());
        }
    }
}
