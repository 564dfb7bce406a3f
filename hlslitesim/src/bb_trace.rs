// bb_trace.rs — Basic-block trace instrumentation
//
// Inserts `call void @__hlslitesim_trace_bb(ptr c"<fn>", i32 <k>)` at the
// first insertion point of every block of every traceable function, where
// `k` is the block's layout ordinal. The call carries
// `!hlslitesim.bb_id !{!"hlslitesim.bb_id", i32 k}` so later passes can
// recover the ordinal without recounting.
//
// Preconditions: module lowered without errors.
// Postconditions: every block of every traceable function starts (after its
//   phis) with exactly one tagged trace call; ordinals are dense from 0.
// Failure modes: none.
// Side effects: inserts calls and one declaration.

use crate::ir::{Block, Function, Inst, MdOperand, MetadataTable, Module, Operand, Type};
use crate::trip_count::is_traceable;

pub const TRACE_BB: &str = "__hlslitesim_trace_bb";
/// Metadata kind (and tag) carrying a block's ordinal.
pub const BB_ID_KIND: &str = "hlslitesim.bb_id";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BbStats {
    pub functions: usize,
    pub blocks: usize,
    /// Functions that already carried ordinals.
    pub already_instrumented: usize,
}

pub fn instrument_blocks(module: &mut Module, reserved_prefix: &str) -> BbStats {
    let mut stats = BbStats::default();
    let Module {
        functions,
        metadata,
    } = module;

    for func in functions.iter_mut() {
        if !is_traceable(func, reserved_prefix) {
            continue;
        }
        if is_instrumented(func) {
            log::debug!("@{}: already instrumented, skipping", func.name);
            stats.already_instrumented += 1;
            continue;
        }
        stats.functions += 1;
        stats.blocks += instrument_function(func, metadata);
    }

    if stats.functions > 0 {
        module.get_or_insert_declaration(TRACE_BB, Type::Void, vec![Type::Ptr, Type::I32]);
    }
    stats
}

fn instrument_function(func: &mut Function, md: &mut MetadataTable) -> usize {
    let name = func.name.clone();
    for (k, block) in func.blocks.iter_mut().enumerate() {
        let node = md.get(vec![
            MdOperand::Str(BB_ID_KIND.to_string()),
            MdOperand::int(k as i64),
        ]);
        let call = Inst::call(
            TRACE_BB,
            vec![
                (Type::Ptr, Operand::Str(name.clone())),
                (Type::I32, Operand::Const(k as i64)),
            ],
        )
        .with_md(BB_ID_KIND, node);
        let at = block.first_insertion_point();
        block.insts.insert(at, call);
    }
    func.blocks.len()
}

fn is_instrumented(func: &Function) -> bool {
    func.blocks
        .iter()
        .flat_map(|b| &b.insts)
        .any(|i| i.md(BB_ID_KIND).is_some())
}

/// Position and ordinal of a block's tagged trace call.
pub fn block_ordinal(block: &Block, md: &MetadataTable) -> Option<(usize, u32)> {
    block.insts.iter().enumerate().find_map(|(pos, inst)| {
        let node = inst.md(BB_ID_KIND)?;
        let k = md.node(node).operands.get(1)?.as_int()?;
        Some((pos, u32::try_from(k).ok()?))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;

    const SRC: &str = "define i32 @top(i32 %n) {
        entry:
          br label %loop
        loop:
          %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
          %i.next = add i32 %i, 1
          %c = icmp slt i32 %i.next, %n
          br i1 %c, label %loop, label %exit
        exit:
          ret i32 %i
        }
        declare void @_ssdm_op_SpecInterface(ptr)";

    #[test]
    fn inserts_after_phis() {
        let mut m = parse_module(SRC).unwrap();
        let stats = instrument_blocks(&mut m, "_ssdm_op_");
        assert_eq!(stats.functions, 1);
        assert_eq!(stats.blocks, 3);
        insta::assert_snapshot!(m.to_string().trim_end(), @r#"
        define i32 @top(i32 %n) {
        entry:
          call void @__hlslitesim_trace_bb(ptr c"top", i32 0), !hlslitesim.bb_id !0
          br label %loop

        loop:
          %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
          call void @__hlslitesim_trace_bb(ptr c"top", i32 1), !hlslitesim.bb_id !1
          %i.next = add i32 %i, 1
          %c = icmp slt i32 %i.next, %n
          br i1 %c, label %loop, label %exit

        exit:
          call void @__hlslitesim_trace_bb(ptr c"top", i32 2), !hlslitesim.bb_id !2
          ret i32 %i
        }

        declare void @_ssdm_op_SpecInterface(ptr)
        declare void @__hlslitesim_trace_bb(ptr, i32)

        !0 = !{!"hlslitesim.bb_id", i32 0}
        !1 = !{!"hlslitesim.bb_id", i32 1}
        !2 = !{!"hlslitesim.bb_id", i32 2}
        "#);
    }

    #[test]
    fn ordinals_are_recoverable() {
        let mut m = parse_module(SRC).unwrap();
        instrument_blocks(&mut m, "_ssdm_op_");
        let f = m.function("top").unwrap();
        let found: Vec<_> = f
            .blocks
            .iter()
            .map(|b| block_ordinal(b, &m.metadata))
            .collect();
        assert_eq!(found, vec![Some((0, 0)), Some((1, 1)), Some((0, 2))]);
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut m = parse_module(SRC).unwrap();
        instrument_blocks(&mut m, "_ssdm_op_");
        let once = m.to_string();
        let stats = instrument_blocks(&mut m, "_ssdm_op_");
        assert_eq!(stats.already_instrumented, 1);
        assert_eq!(m.to_string(), once);
    }

    #[test]
    fn declarations_only_module_is_untouched() {
        let mut m = parse_module("declare void @ext(i32)").unwrap();
        assert_eq!(instrument_blocks(&mut m, "_ssdm_op_"), BbStats::default());
        assert_eq!(m.functions.len(), 1);
    }
}
