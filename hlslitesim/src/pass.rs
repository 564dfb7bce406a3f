// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the instrumentation passes (parse is outside the runner), their
// dependency edges, and the module annotations they produce. Used by the
// pipeline runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each pass (parse excluded, handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    InstrumentBlocks,
    RepairLoopMetadata,
    DiscoverTripCounts,
    RewriteFixedLoops,
    /// The named module pass: all of the above, then verification.
    Hlslitesim,
}

/// Annotations a pass leaves on the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    BlockTraceCalls,   // __hlslitesim_trace_bb + !hlslitesim.bb_id
    WellFormedLoopIds, // [self, ...] with no vacuous operands
    TripCountRecords,  // !{!"hlslitesim.loop.tripcount", i32 T}
    LoopSummaries,     // preheader loop/loop_bb/end_loop_blocks calls
    Verified,
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::InstrumentBlocks => PassDescriptor {
            name: "bb_trace",
            inputs: &[],
            outputs: &[ArtifactId::BlockTraceCalls],
            invariants: "every block of every traceable function traced once, ordinals dense",
        },
        PassId::RepairLoopMetadata => PassDescriptor {
            name: "fix_loop_md",
            inputs: &[PassId::InstrumentBlocks],
            outputs: &[ArtifactId::WellFormedLoopIds],
            invariants: "loop IDs start with self, no empty or self-only operands",
        },
        PassId::DiscoverTripCounts => PassDescriptor {
            name: "trip_count",
            inputs: &[PassId::RepairLoopMetadata],
            outputs: &[ArtifactId::TripCountRecords],
            invariants: "every loop carries a trip-count record or a traced marker",
        },
        PassId::RewriteFixedLoops => PassDescriptor {
            name: "fixed_loop",
            inputs: &[PassId::InstrumentBlocks, PassId::DiscoverTripCounts],
            outputs: &[ArtifactId::LoopSummaries],
            invariants: "eligible loops emit one summary per entry, records become markers",
        },
        PassId::Hlslitesim => PassDescriptor {
            name: "hlslitesim",
            inputs: &[PassId::RewriteFixedLoops],
            outputs: &[ArtifactId::Verified],
            invariants: "each block ordinal is traced by exactly one call",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::InstrumentBlocks,
    PassId::RepairLoopMetadata,
    PassId::DiscoverTripCounts,
    PassId::RewriteFixedLoops,
    PassId::Hlslitesim,
];

/// Look a pass up by its descriptor name.
pub fn by_name(name: &str) -> Option<PassId> {
    ALL_PASSES
        .iter()
        .copied()
        .find(|p| descriptor(*p).name == name)
}

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
