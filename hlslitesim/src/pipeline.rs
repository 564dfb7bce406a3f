// pipeline.rs — Compilation state and pass orchestration
//
// Holds the module being instrumented plus per-pass statistics, and runs the
// minimal set of passes for a given terminal PassId.
//
// Preconditions: the module was lowered without errors.
// Postconditions: every pass in required_passes(terminal) has run, or has_error is set.
// Failure modes: the terminal verification emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass; logs timing at info.

use std::time::Instant;

use serde::Serialize;

use crate::ast::Span;
use crate::bb_trace::{instrument_blocks, BbStats, BB_ID_KIND, TRACE_BB};
use crate::cfg::LoopInfo;
use crate::diag::codes;
use crate::diag::{has_errors, Diagnostic};
use crate::ir::{Function, InstKind, Module, Operand};
use crate::loop_md::{repair_loop_metadata, RepairStats};
use crate::loop_trace::{rewrite_fixed_loops, RewriteStats, TRACE_LOOP_BB};
use crate::pass::{descriptor, required_passes, PassId};
use crate::trip_count::{
    default_detectors, discover_trip_counts, is_traceable, recorded_trip_count, DiscoveryStats,
    TRACED_TAG,
};

/// Functions whose names start with this are vendor intrinsics and are
/// never instrumented.
pub const DEFAULT_RESERVED_PREFIX: &str = "_ssdm_op_";

// ── Options ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub reserved_prefix: String,
    pub terminal: PassId,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            reserved_prefix: DEFAULT_RESERVED_PREFIX.to_string(),
            terminal: PassId::Hlslitesim,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible instrumentation.
///
/// `source_hash`: SHA-256 of the raw IR text.
/// `tool_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub tool_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "manifest_schema_version": 1,
            "tool_version": self.tool_version,
        });
        format!("{:#}\n", value)
    }
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&hasher.finalize());
    Provenance {
        source_hash,
        tool_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// Statistics of the passes that ran; `None` for passes outside the subset.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub blocks: Option<BbStats>,
    pub repair: Option<RepairStats>,
    pub discovery: Option<DiscoveryStats>,
    pub rewrite: Option<RewriteStats>,
}

pub struct CompilationState {
    pub module: Module,
    pub report: PassReport,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            report: PassReport::default(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    pub failing_pass: PassId,
}

fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    log::info!(
        "{} complete, {:.1}ms",
        descriptor(pass_id).name,
        elapsed.as_secs_f64() * 1000.0
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `options.terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let prefix = options.reserved_prefix.as_str();
    for pass_id in required_passes(options.terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::InstrumentBlocks => {
                state.report.blocks = Some(instrument_blocks(&mut state.module, prefix));
                Vec::new()
            }
            PassId::RepairLoopMetadata => {
                state.report.repair = Some(repair_loop_metadata(&mut state.module));
                Vec::new()
            }
            PassId::DiscoverTripCounts => {
                let detectors = default_detectors();
                state.report.discovery =
                    Some(discover_trip_counts(&mut state.module, prefix, &detectors));
                Vec::new()
            }
            PassId::RewriteFixedLoops => {
                state.report.rewrite = Some(rewrite_fixed_loops(&mut state.module, prefix));
                Vec::new()
            }
            PassId::Hlslitesim => verify_instrumentation(&state.module, prefix),
        };
        finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
    }
    Ok(())
}

/// Parse, lower and instrument IR text with the default options.
pub fn instrument_source(source: &str) -> Result<CompilationState, Vec<Diagnostic>> {
    let module = crate::lower::parse_module(source)?;
    let mut state = CompilationState::new(module);
    state.provenance = Some(compute_provenance(source));
    if run_pipeline(&mut state, &PipelineOptions::default(), |_, _| {}).is_err() {
        return Err(state.diagnostics);
    }
    Ok(state)
}

// ── Verification ───────────────────────────────────────────────────────────

/// Check that each block ordinal of each traceable function is covered by
/// exactly one trace call, either its own `trace_bb` or a `loop_bb` in a
/// loop summary.
pub fn verify_instrumentation(module: &Module, reserved_prefix: &str) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for func in module.functions.iter() {
        if !is_traceable(func, reserved_prefix) {
            continue;
        }
        let mut hits = vec![0usize; func.blocks.len()];
        let mut stray = Vec::new();
        for k in traced_ordinals(func, module) {
            match hits.get_mut(k as usize) {
                Some(h) => *h += 1,
                None => stray.push(k),
            }
        }
        let missing: Vec<usize> = (0..hits.len()).filter(|&k| hits[k] == 0).collect();
        let repeated: Vec<usize> = (0..hits.len()).filter(|&k| hits[k] > 1).collect();
        if missing.is_empty() && repeated.is_empty() && stray.is_empty() {
            continue;
        }
        diags.push(
            Diagnostic::error(
                Span::from(0..0),
                format!(
                    "@{}: block tracing is inconsistent (missing {:?}, repeated {:?}, out of range {:?})",
                    func.name, missing, repeated, stray
                ),
            )
            .with_code(codes::E0301),
        );
    }
    diags
}

fn traced_ordinals<'a>(func: &'a Function, module: &'a Module) -> impl Iterator<Item = u32> + 'a {
    func.blocks.iter().flat_map(|b| &b.insts).filter_map(move |inst| {
        match inst.callee()? {
            TRACE_BB => {
                let node = inst.md(BB_ID_KIND)?;
                let k = module.metadata.node(node).operands.get(1)?.as_int()?;
                u32::try_from(k).ok()
            }
            TRACE_LOOP_BB => {
                let InstKind::Call { args, .. } = &inst.kind else {
                    return None;
                };
                match (&args.first()?.1, args.get(1)?.1.as_const()?) {
                    (Operand::Str(owner), k) if *owner == func.name => u32::try_from(k).ok(),
                    _ => None,
                }
            }
            _ => None,
        }
    })
}

// ── Loop table (--emit loops) ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopRow {
    pub function: String,
    pub name: String,
    pub depth: u32,
    pub blocks: usize,
    /// Recorded trip count, `0` when unknown.
    pub trip_count: u32,
    pub compressed: bool,
}

/// One row per natural loop of every traceable function.
pub fn loop_table(module: &Module, reserved_prefix: &str) -> Vec<LoopRow> {
    let mut rows = Vec::new();
    for func in &module.functions {
        if !is_traceable(func, reserved_prefix) {
            continue;
        }
        let (_, loops) = LoopInfo::of(func);
        for (idx, l) in loops.iter() {
            let id = loops.loop_id(func, idx);
            let traced = id.and_then(|id| module.metadata.find_tagged(id, TRACED_TAG));
            let trip_count = match traced {
                Some(marker) => module
                    .metadata
                    .node(marker)
                    .operands
                    .get(1)
                    .and_then(|op| op.as_int())
                    .and_then(|t| u32::try_from(t).ok())
                    .unwrap_or(0),
                None => id
                    .and_then(|id| recorded_trip_count(&module.metadata, id))
                    .unwrap_or(0),
            };
            rows.push(LoopRow {
                function: func.name.clone(),
                name: loops.name(func, idx).to_string(),
                depth: l.depth,
                blocks: l.blocks.len(),
                trip_count,
                compressed: traced.is_some(),
            });
        }
    }
    rows
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_module;

    const KERNEL: &str = "define i32 @kernel(ptr %in, i32 %n) {
        entry:
          br label %loop
        loop:
          %i = phi i32 [ 0, %entry ], [ %i.next, %latch ]
          br label %latch
        latch:
          %i.next = add i32 %i, 1
          %c = icmp slt i32 %i.next, 16
          br i1 %c, label %loop, label %exit
        exit:
          ret i32 %i.next
        }";

    fn state() -> CompilationState {
        CompilationState::new(parse_module(KERNEL).unwrap())
    }

    #[test]
    fn full_pipeline_reports_every_pass() {
        let mut s = state();
        let mut seen = Vec::new();
        run_pipeline(&mut s, &PipelineOptions::default(), |p, _| seen.push(p)).unwrap();
        assert_eq!(seen, required_passes(PassId::Hlslitesim));
        assert_eq!(s.report.blocks.as_ref().unwrap().blocks, 4);
        assert_eq!(s.report.discovery.as_ref().unwrap().known, 1);
        assert_eq!(s.report.rewrite.as_ref().unwrap().rewritten, 1);
        assert!(!s.has_error);
    }

    #[test]
    fn terminal_limits_the_pass_subset() {
        let mut s = state();
        let options = PipelineOptions {
            terminal: PassId::DiscoverTripCounts,
            ..PipelineOptions::default()
        };
        run_pipeline(&mut s, &options, |_, _| {}).unwrap();
        assert!(s.report.rewrite.is_none());
        let rows = loop_table(&s.module, DEFAULT_RESERVED_PREFIX);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trip_count, 16);
        assert!(!rows[0].compressed);
    }

    #[test]
    fn loop_table_marks_compressed_loops() {
        let mut s = state();
        run_pipeline(&mut s, &PipelineOptions::default(), |_, _| {}).unwrap();
        let rows = loop_table(&s.module, DEFAULT_RESERVED_PREFIX);
        assert_eq!(
            rows,
            vec![LoopRow {
                function: "kernel".into(),
                name: "loop".into(),
                depth: 1,
                blocks: 2,
                trip_count: 16,
                compressed: true,
            }]
        );
    }

    #[test]
    fn verification_flags_untraced_blocks() {
        let m = parse_module(KERNEL).unwrap();
        let diags = verify_instrumentation(&m, DEFAULT_RESERVED_PREFIX);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::E0301));
        assert!(diags[0].message.contains("missing [0, 1, 2, 3]"));
    }

    #[test]
    fn provenance_is_stable() {
        let a = compute_provenance(KERNEL);
        let b = compute_provenance(KERNEL);
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.source_hash_hex().len(), 64);
        let json: serde_json::Value = serde_json::from_str(&a.to_json()).unwrap();
        assert_eq!(json["tool_version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["manifest_schema_version"], 1);
    }

    #[test]
    fn instrument_source_rejects_bad_ir() {
        let Err(diags) = instrument_source("define void @f() { entry: br label %nowhere }") else {
            panic!("expected diagnostics");
        };
        assert!(diags.iter().any(|d| d.code == Some(codes::E0102)));
    }
}
