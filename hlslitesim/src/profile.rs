// profile.rs — Trace replay
//
// Folds a trace into execution statistics: per-block counts, loop entries and
// trip counts, FIFO traffic per channel and AXI traffic per interface.
//
// A compressed loop summary (`loop`, `loop_bb`..., `end_loop_blocks`) credits
// each listed block `T` executions, so a compressed trace and the equivalent
// per-iteration trace replay to the same block counts.
//
// AXI addresses are attributed to the interface with the greatest base
// address not above them, as announced by `spec_interface`. Addresses below
// every interface are kept under their own hex address.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::trace::{fmt_ptr, parse_trace, TraceEvent, TraceParseError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub entries: u64,
    pub exits: u64,
    /// Distinct trip counts observed on entry.
    pub trip_counts: BTreeSet<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoStats {
    pub name: Option<String>,
    pub depth: Option<u32>,
    pub reads: u64,
    pub writes: u64,
}

impl FifoStats {
    /// Words written but never read.
    pub fn residue(&self) -> i64 {
        self.writes as i64 - self.reads as i64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxiStats {
    pub latency: Option<u32>,
    pub read_reqs: u64,
    pub reads: u64,
    pub write_reqs: u64,
    pub writes: u64,
    pub write_resps: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// function -> block ordinal -> executions.
    pub blocks: BTreeMap<String, BTreeMap<u32, u64>>,
    pub loops: BTreeMap<String, LoopStats>,
    /// Keyed by channel address.
    pub fifos: BTreeMap<String, FifoStats>,
    /// Keyed by interface name.
    pub axi: BTreeMap<String, AxiStats>,
    pub ap_ctrl_chain: bool,
    pub events: u64,
}

impl Profile {
    pub fn replay(events: &[TraceEvent]) -> Profile {
        let mut p = Profile::default();
        let mut interfaces: BTreeMap<u64, String> = BTreeMap::new();
        // Trip count of the open summary, between `loop` and `end_loop_blocks`.
        let mut open: Option<u32> = None;

        for event in events {
            p.events += 1;
            match event {
                TraceEvent::TraceBb { function, block } => p.credit(function, *block, 1),
                TraceEvent::Loop { name, trip_count } => {
                    let stats = p.loops.entry(name.clone()).or_default();
                    stats.entries += 1;
                    stats.trip_counts.insert(*trip_count);
                    open = Some(*trip_count);
                }
                TraceEvent::LoopBb { function, block } => {
                    let times = open.unwrap_or_else(|| {
                        log::warn!("loop_bb {} {} outside a loop summary", function, block);
                        1
                    });
                    p.credit(function, *block, times as u64);
                }
                TraceEvent::EndLoopBlocks { .. } => open = None,
                TraceEvent::EndLoop { name, .. } => {
                    p.loops.entry(name.clone()).or_default().exits += 1;
                }
                TraceEvent::FifoRead { channel } => p.fifo(*channel).reads += 1,
                TraceEvent::FifoWrite { channel } => p.fifo(*channel).writes += 1,
                TraceEvent::SpecChannel {
                    channel,
                    name,
                    depth,
                } => {
                    let stats = p.fifo(*channel);
                    stats.name = Some(name.clone());
                    stats.depth = Some(*depth);
                }
                TraceEvent::SpecInterface {
                    addr,
                    name,
                    latency,
                } => {
                    interfaces.insert(*addr, name.clone());
                    p.axi.entry(name.clone()).or_default().latency = Some(*latency);
                }
                TraceEvent::ApCtrlChain => p.ap_ctrl_chain = true,
                TraceEvent::AxiReadReq { addr, .. } => p.axi_at(&interfaces, *addr).read_reqs += 1,
                TraceEvent::AxiWriteReq { addr, .. } => {
                    p.axi_at(&interfaces, *addr).write_reqs += 1
                }
                TraceEvent::AxiRead { addr } => p.axi_at(&interfaces, *addr).reads += 1,
                TraceEvent::AxiWrite { addr } => p.axi_at(&interfaces, *addr).writes += 1,
                TraceEvent::AxiWriteResp { addr } => {
                    p.axi_at(&interfaces, *addr).write_resps += 1
                }
            }
        }
        p
    }

    /// Parse and replay trace text; errors carry the 1-based line number.
    pub fn from_trace_text(text: &str) -> Result<Profile, (usize, TraceParseError)> {
        Ok(Self::replay(&parse_trace(text)?))
    }

    fn credit(&mut self, function: &str, block: u32, times: u64) {
        *self
            .blocks
            .entry(function.to_string())
            .or_default()
            .entry(block)
            .or_default() += times;
    }

    fn fifo(&mut self, channel: u64) -> &mut FifoStats {
        self.fifos.entry(fmt_ptr(channel)).or_default()
    }

    fn axi_at(&mut self, interfaces: &BTreeMap<u64, String>, addr: u64) -> &mut AxiStats {
        let key = match interfaces.range(..=addr).next_back() {
            Some((_, name)) => name.clone(),
            None => fmt_ptr(addr),
        };
        self.axi.entry(key).or_default()
    }

    pub fn block_count(&self, function: &str, block: u32) -> u64 {
        self.blocks
            .get(function)
            .and_then(|b| b.get(&block))
            .copied()
            .unwrap_or(0)
    }

    /// Total block executions across all functions.
    pub fn total_block_executions(&self) -> u64 {
        self.blocks.values().flat_map(|b| b.values()).sum()
    }

    pub fn to_json(&self) -> String {
        // Every key is a string or an integer, so serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "events: {}", self.events)?;
        for (function, blocks) in &self.blocks {
            writeln!(f, "@{}", function)?;
            for (block, n) in blocks {
                writeln!(f, "  bb {:<4} {}", block, n)?;
            }
        }
        for (name, l) in &self.loops {
            let counts: Vec<String> = l.trip_counts.iter().map(|t| t.to_string()).collect();
            writeln!(
                f,
                "loop {}: entries {}, exits {}, trip count {}",
                name,
                l.entries,
                l.exits,
                counts.join("/")
            )?;
        }
        for (addr, c) in &self.fifos {
            writeln!(
                f,
                "fifo {} ({}): {} written, {} read, depth {}",
                addr,
                c.name.as_deref().unwrap_or("?"),
                c.writes,
                c.reads,
                c.depth.map_or("?".to_string(), |d| d.to_string())
            )?;
        }
        for (name, a) in &self.axi {
            writeln!(
                f,
                "axi {}: {} read req, {} read, {} write req, {} write, {} write resp",
                name, a.read_reqs, a.reads, a.write_reqs, a.writes, a.write_resps
            )?;
        }
        if self.ap_ctrl_chain {
            writeln!(f, "ap_ctrl_chain")?;
        }
        Ok(())
    }
}
