// loop_md.rs — Loop ID repair
//
// Rebuilds every loop ID as `[self] ++ ops[1..]`, dropping operands that
// point at empty or purely self-referential nodes, and any repeat of the
// loop ID's own self reference past position 0. Such operands are left
// behind by front ends that strip loop hints, and downstream consumers treat
// them as malformed. Nodes are updated in place, so every attachment sees
// the repaired operand list.

use std::collections::BTreeSet;

use crate::cfg::LOOP_MD_KIND;
use crate::id::MdId;
use crate::ir::{MdOperand, MetadataTable, Module};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub loop_ids: usize,
    pub repaired: usize,
}

impl RepairStats {
    pub fn changed(&self) -> bool {
        self.repaired > 0
    }
}

pub fn repair_loop_metadata(module: &mut Module) -> RepairStats {
    let ids: BTreeSet<MdId> = module
        .definitions()
        .flat_map(|f| &f.blocks)
        .filter_map(|b| b.term_md(LOOP_MD_KIND))
        .collect();

    let mut stats = RepairStats {
        loop_ids: ids.len(),
        repaired: 0,
    };
    for id in ids {
        if repair_one(&mut module.metadata, id) {
            stats.repaired += 1;
        }
    }
    if stats.changed() {
        log::debug!("repaired {} of {} loop IDs", stats.repaired, stats.loop_ids);
    }
    stats
}

/// Returns whether the node changed.
fn repair_one(md: &mut MetadataTable, id: MdId) -> bool {
    let old = &md.node(id).operands;
    let mut ops = vec![MdOperand::Node(id)];
    ops.extend(old.iter().skip(1).filter(|op| match op {
        MdOperand::Node(n) => *n != id && !md.is_vacuous(*n),
        _ => true,
    }).cloned());
    if ops == *old {
        return false;
    }
    md.set_operands(id, ops);
    true
}
