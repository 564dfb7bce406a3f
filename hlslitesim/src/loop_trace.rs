// loop_trace.rs — Fixed-trip-count loop trace compression
//
// For a loop with one back edge, two blocks and a known trip count `T > 0`,
// per-iteration block tracing is replaced by a summary emitted once per
// entry from the preheader:
//
//   loop <name> T, loop_bb <fn> <k> (per loop block), end_loop_blocks <name> T
//
// and `end_loop <name> T` at the start of the unique exit block. That exit
// must be dedicated: a block also entered from outside the loop would log
// `end_loop` on paths that never left it, so such loops are left alone. The
// blocks' own trace calls are deleted and the loop's trip-count record becomes a
// `hlslitesim.loop.traced` marker, so a second application finds nothing
// to do.
//
// Preconditions: `bb_trace` and `trip_count` have run.
// Postconditions: every rewritten loop emits exactly one `loop` line per entry
// and at most one `end_loop` line per exit.
// Failure modes: none; ineligible loops keep per-block tracing.
// Side effects: inserts and deletes calls; updates loop IDs in place.

use crate::bb_trace::block_ordinal;
use crate::cfg::{Cfg, LoopInfo};
use crate::id::{BlockId, LoopIdx, MdId};
use crate::ir::{Function, Inst, MdOperand, MetadataTable, Module, Operand, Type};
use crate::trip_count::{is_traceable, recorded_trip_count, TRACED_TAG, TRIPCOUNT_TAG};

pub const TRACE_LOOP: &str = "__hlslitesim_trace_loop";
pub const TRACE_LOOP_BB: &str = "__hlslitesim_trace_loop_bb";
pub const TRACE_END_LOOP_BLOCKS: &str = "__hlslitesim_trace_end_loop_blocks";
pub const TRACE_END_LOOP: &str = "__hlslitesim_trace_end_loop";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub rewritten: usize,
    pub ineligible: usize,
    pub unknown_trip_count: usize,
    pub no_preheader: usize,
    pub shared_exit: usize,
}

pub fn rewrite_fixed_loops(module: &mut Module, reserved_prefix: &str) -> RewriteStats {
    let mut stats = RewriteStats::default();
    let Module {
        functions,
        metadata,
    } = module;

    for func in functions.iter_mut() {
        if !is_traceable(func, reserved_prefix) {
            continue;
        }
        let (cfg, loops) = LoopInfo::of(func);
        for idx in loops.innermost_first() {
            let l = loops.get(idx);
            if l.num_back_edges() != 1 || l.blocks.len() != 2 {
                stats.ineligible += 1;
                continue;
            }
            let Some((loop_id, t)) = loops
                .loop_id(func, idx)
                .and_then(|id| Some((id, recorded_trip_count(metadata, id)?)))
                .filter(|(_, t)| *t > 0)
            else {
                stats.unknown_trip_count += 1;
                continue;
            };
            let Some(preheader) = loops.preheader(idx, &cfg) else {
                log::debug!(
                    "@{}: loop '{}' has no preheader, keeping per-block tracing",
                    func.name,
                    loops.name(func, idx)
                );
                stats.no_preheader += 1;
                continue;
            };
            if let Some(exit) = shared_exit(&cfg, &loops, idx) {
                log::debug!(
                    "@{}: exit '{}' of loop '{}' is entered from outside it, keeping per-block tracing",
                    func.name,
                    func.block(exit).name,
                    loops.name(func, idx)
                );
                stats.shared_exit += 1;
                continue;
            }
            rewrite_loop(func, metadata, &cfg, &loops, idx, preheader, t);
            mark_traced(metadata, loop_id, t);
            stats.rewritten += 1;
        }
    }

    if stats.rewritten > 0 {
        for callee in [TRACE_LOOP, TRACE_LOOP_BB, TRACE_END_LOOP_BLOCKS, TRACE_END_LOOP] {
            module.get_or_insert_declaration(callee, Type::Void, vec![Type::Ptr, Type::I32]);
        }
    }
    stats
}

/// First exit block with a predecessor outside the loop.
fn shared_exit(cfg: &Cfg, loops: &LoopInfo, idx: LoopIdx) -> Option<BlockId> {
    let l = loops.get(idx);
    loops
        .exit_blocks(idx, cfg)
        .into_iter()
        .find(|&exit| cfg.preds(exit).iter().any(|&p| !l.contains(p)))
}

fn trace_call(callee: &str, name: &str, value: u32) -> Inst {
    Inst::call(
        callee,
        vec![
            (Type::Ptr, Operand::Str(name.to_string())),
            (Type::I32, Operand::Const(value as i64)),
        ],
    )
}

fn rewrite_loop(
    func: &mut Function,
    md: &MetadataTable,
    cfg: &Cfg,
    loops: &LoopInfo,
    idx: LoopIdx,
    preheader: BlockId,
    t: u32,
) {
    let loop_name = loops.name(func, idx).to_string();
    let fn_name = func.name.clone();
    let members = loops.get(idx).blocks.clone();

    let mut summary = vec![trace_call(TRACE_LOOP, &loop_name, t)];
    for b in &members {
        let block = func.block_mut(*b);
        let ordinal = match block_ordinal(block, md) {
            Some((pos, k)) => {
                block.insts.remove(pos);
                k
            }
            None => b.0,
        };
        summary.push(trace_call(TRACE_LOOP_BB, &fn_name, ordinal));
    }
    summary.push(trace_call(TRACE_END_LOOP_BLOCKS, &loop_name, t));
    func.block_mut(preheader).insts.extend(summary);

    if let [exit] = loops.exit_blocks(idx, cfg)[..] {
        let block = func.block_mut(exit);
        let at = block.first_insertion_point();
        block
            .insts
            .insert(at, trace_call(TRACE_END_LOOP, &loop_name, t));
    }

    log::debug!(
        "@{}: loop '{}' compressed (T = {}, {} blocks)",
        fn_name,
        loop_name,
        t,
        members.len()
    );
}

/// Swap the trip-count record for the traced marker, in place.
fn mark_traced(md: &mut MetadataTable, loop_id: MdId, t: u32) {
    let marker = md.get(vec![
        MdOperand::Str(TRACED_TAG.to_string()),
        MdOperand::int(t as i64),
    ]);
    let ops: Vec<MdOperand> = md
        .node(loop_id)
        .operands
        .iter()
        .map(|op| match op {
            MdOperand::Node(n) if *n != loop_id && md.tag(*n) == Some(TRIPCOUNT_TAG) => {
                MdOperand::Node(marker)
            }
            other => other.clone(),
        })
        .collect();
    md.set_operands(loop_id, ops);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bb_trace::instrument_blocks;
    use crate::lower::parse_module;
    use crate::trip_count::{default_detectors, discover_trip_counts};

    const TWO_BLOCK: &str = "define void @k() {
        entry:
          br label %body
        body:
          %i = phi i32 [ 0, %entry ], [ %i.next, %latch ]
          br label %latch
        latch:
          %i.next = add i32 %i, 1
          %c = icmp slt i32 %i.next, 4
          br i1 %c, label %body, label %exit
        exit:
          ret void
        }";

    fn prepared(src: &str) -> Module {
        let mut m = parse_module(src).unwrap();
        instrument_blocks(&mut m, "_ssdm_op_");
        discover_trip_counts(&mut m, "_ssdm_op_", &default_detectors());
        m
    }

    #[test]
    fn two_block_loop_is_compressed() {
        let mut m = prepared(TWO_BLOCK);
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.rewritten, 1);
        insta::assert_snapshot!(m.to_string().trim_end(), @r#"
        define void @k() {
        entry:
          call void @__hlslitesim_trace_bb(ptr c"k", i32 0), !hlslitesim.bb_id !0
          call void @__hlslitesim_trace_loop(ptr c"body", i32 4)
          call void @__hlslitesim_trace_loop_bb(ptr c"k", i32 1)
          call void @__hlslitesim_trace_loop_bb(ptr c"k", i32 2)
          call void @__hlslitesim_trace_end_loop_blocks(ptr c"body", i32 4)
          br label %body

        body:
          %i = phi i32 [ 0, %entry ], [ %i.next, %latch ]
          br label %latch

        latch:
          %i.next = add i32 %i, 1
          %c = icmp slt i32 %i.next, 4
          br i1 %c, label %body, label %exit, !llvm.loop !1

        exit:
          call void @__hlslitesim_trace_end_loop(ptr c"body", i32 4)
          call void @__hlslitesim_trace_bb(ptr c"k", i32 3), !hlslitesim.bb_id !3
          ret void
        }

        declare void @__hlslitesim_trace_bb(ptr, i32)
        declare void @__hlslitesim_trace_loop(ptr, i32)
        declare void @__hlslitesim_trace_loop_bb(ptr, i32)
        declare void @__hlslitesim_trace_end_loop_blocks(ptr, i32)
        declare void @__hlslitesim_trace_end_loop(ptr, i32)

        !0 = !{!"hlslitesim.bb_id", i32 0}
        !1 = distinct !{!1, !2}
        !2 = !{!"hlslitesim.loop.traced", i32 4}
        !3 = !{!"hlslitesim.bb_id", i32 3}
        "#);
    }

    #[test]
    fn second_application_is_a_no_op() {
        let mut m = prepared(TWO_BLOCK);
        rewrite_fixed_loops(&mut m, "_ssdm_op_");
        let once = m.to_string();
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.rewritten, 0);
        assert_eq!(stats.unknown_trip_count, 1);
        assert_eq!(m.to_string(), once);
    }

    #[test]
    fn single_block_loop_is_ineligible() {
        let mut m = prepared(
            "define void @k() {
             entry:
               br label %loop
             loop:
               %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
               %i.next = add i32 %i, 1
               %c = icmp slt i32 %i.next, 4
               br i1 %c, label %loop, label %exit
             exit:
               ret void
             }",
        );
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.ineligible, 1);
        assert!(m.function(TRACE_LOOP).is_none());
    }

    #[test]
    fn unknown_trip_count_keeps_block_tracing() {
        let src = TWO_BLOCK
            .replace("define void @k()", "define void @k(i32 %n)")
            .replace("icmp slt i32 %i.next, 4", "icmp slt i32 %i.next, %n");
        let mut m = prepared(&src);
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.unknown_trip_count, 1);
        let f = m.function("k").unwrap();
        assert!(f.blocks.iter().all(|b| block_ordinal(b, &m.metadata).is_some()));
    }

    #[test]
    fn missing_preheader_is_skipped() {
        let src = "define void @k(i1 %go) {
            entry:
              br i1 %go, label %body, label %exit
            body:
              %i = phi i32 [ 0, %entry ], [ %i.next, %latch ]
              br label %latch
            latch:
              %i.next = add i32 %i, 1
              %c = icmp slt i32 %i.next, 4
              br i1 %c, label %body, label %exit
            exit:
              ret void
            }";
        let mut m = prepared(src);
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.no_preheader, 1);
        assert_eq!(stats.rewritten, 0);
    }

    #[test]
    fn exit_into_following_loop_header_is_left_alone() {
        let src = "define void @k(i32 %n) {
            entry:
              br label %a.body
            a.body:
              %i = phi i32 [ 0, %entry ], [ %i.next, %a.latch ]
              br label %a.latch
            a.latch:
              %i.next = add i32 %i, 1
              %c = icmp slt i32 %i.next, 4
              br i1 %c, label %a.body, label %b
            b:
              %j = phi i32 [ 0, %a.latch ], [ %j.next, %b ]
              %j.next = add i32 %j, 1
              %d = icmp slt i32 %j.next, %n
              br i1 %d, label %b, label %exit
            exit:
              ret void
            }";
        let mut m = prepared(src);
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.shared_exit, 1);
        assert_eq!(stats.rewritten, 0);
        let text = m.to_string();
        assert!(!text.contains("@__hlslitesim_trace_end_loop("));
        assert!(!text.contains("@__hlslitesim_trace_loop("));
        let f = m.function("k").unwrap();
        assert!(f.blocks.iter().all(|b| block_ordinal(b, &m.metadata).is_some()));
    }

    #[test]
    fn exit_reachable_around_the_loop_is_left_alone() {
        let src = "define void @k(i1 %go) {
            entry:
              br i1 %go, label %ph, label %exit
            ph:
              br label %body
            body:
              %i = phi i32 [ 0, %ph ], [ %i.next, %latch ]
              br label %latch
            latch:
              %i.next = add i32 %i, 1
              %c = icmp slt i32 %i.next, 4
              br i1 %c, label %body, label %exit
            exit:
              ret void
            }";
        let mut m = prepared(src);
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.shared_exit, 1);
        assert_eq!(stats.rewritten, 0);
        assert!(!m.to_string().contains("@__hlslitesim_trace_end_loop("));

        // With a dedicated exit block the same loop is summarized.
        let split = src
            .replace("label %body, label %exit", "label %body, label %done")
            .replace("exit:\n", "done:\n              br label %exit\n            exit:\n");
        let mut m = prepared(&split);
        let stats = rewrite_fixed_loops(&mut m, "_ssdm_op_");
        assert_eq!(stats.rewritten, 1);
        let f = m.function("k").unwrap();
        let done = f.block(f.block_by_name("done").unwrap());
        assert_eq!(done.insts[0].callee(), Some(TRACE_END_LOOP));
    }
}
