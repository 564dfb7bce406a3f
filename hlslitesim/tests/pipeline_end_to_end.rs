// End-to-end tests of the instrumentation pipeline over the sample kernels.
//
// Each test parses a kernel from `kernels/`, runs the pass pipeline and
// checks the resulting module:
// - which loops were summarized and which stay per-iteration
// - the post-instrumentation check accepts every kernel
// - printed output re-parses and re-instrumenting it changes nothing

use std::path::{Path, PathBuf};

use hlslitesim::lower::parse_module;
use hlslitesim::pass::PassId;
use hlslitesim::pipeline::{
    instrument_source, loop_table, run_pipeline, verify_instrumentation, CompilationState,
    LoopRow, PipelineOptions, DEFAULT_RESERVED_PREFIX,
};

// ── Test helpers ────────────────────────────────────────────────────────────

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn kernel(name: &str) -> String {
    let path = project_root().join("kernels").join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}

fn instrumented(name: &str) -> CompilationState {
    instrument_source(&kernel(name))
        .unwrap_or_else(|diags| panic!("{} failed to instrument: {:?}", name, diags))
}

fn row<'a>(rows: &'a [LoopRow], name: &str) -> &'a LoopRow {
    rows.iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no loop named '{}' in {:?}", name, rows))
}

fn count_calls(text: &str, callee: &str) -> usize {
    text.matches(&format!("call void @{}(", callee)).count()
}

const ALL_KERNELS: &[&str] = &["vadd.ll", "stream.ll", "nested.ll", "hinted.ll"];

// ── Loop classification ─────────────────────────────────────────────────────

#[test]
fn constant_two_block_loop_is_summarized() {
    let state = instrumented("vadd.ll");
    let rows = loop_table(&state.module, DEFAULT_RESERVED_PREFIX);
    assert_eq!(
        rows,
        vec![LoopRow {
            function: "vadd".into(),
            name: "loop".into(),
            depth: 1,
            blocks: 2,
            trip_count: 8,
            compressed: true,
        }]
    );

    let text = state.module.to_string();
    // entry and done keep their own trace call; loop and tail are summarized.
    assert_eq!(count_calls(&text, "__hlslitesim_trace_bb"), 2);
    assert_eq!(count_calls(&text, "__hlslitesim_trace_loop_bb"), 2);
    assert_eq!(count_calls(&text, "__hlslitesim_trace_loop"), 1);
    assert_eq!(count_calls(&text, "__hlslitesim_trace_end_loop"), 1);

    let rewrite = state.report.rewrite.as_ref().unwrap();
    assert_eq!(rewrite.rewritten, 1);
}

#[test]
fn runtime_bound_loops_keep_per_block_tracing() {
    let state = instrumented("stream.ll");
    let rows = loop_table(&state.module, DEFAULT_RESERVED_PREFIX);
    assert_eq!(rows.len(), 2);
    for r in &rows {
        assert_eq!(r.trip_count, 0, "{:?}", r);
        assert!(!r.compressed, "{:?}", r);
    }
    let text = state.module.to_string();
    assert_eq!(count_calls(&text, "__hlslitesim_trace_loop"), 0);
    // stream has 5 blocks, overdrain has 1.
    assert_eq!(count_calls(&text, "__hlslitesim_trace_bb"), 6);
}

#[test]
fn only_the_inner_loop_of_a_nest_is_summarized() {
    let state = instrumented("nested.ll");
    let rows = loop_table(&state.module, DEFAULT_RESERVED_PREFIX);
    let inner = row(&rows, "inner");
    assert_eq!((inner.depth, inner.trip_count, inner.compressed), (2, 4, true));
    let outer = row(&rows, "outer");
    assert_eq!((outer.depth, outer.trip_count, outer.compressed), (1, 3, false));
    assert_eq!(outer.blocks, 4);
}

#[test]
fn synthesis_directive_pins_trip_count() {
    let state = instrumented("hinted.ll");
    let rows = loop_table(&state.module, DEFAULT_RESERVED_PREFIX);
    let body = row(&rows, "body");
    assert_eq!(body.trip_count, 6);
    assert!(body.compressed);
    let discovery = state.report.discovery.as_ref().unwrap();
    assert_eq!(discovery.known, 1);
}

// ── Verification and stability ──────────────────────────────────────────────

#[test]
fn every_kernel_passes_the_tracing_check() {
    for name in ALL_KERNELS {
        let state = instrumented(name);
        assert!(!state.has_error, "{}: {:?}", name, state.diagnostics);
        let diags = verify_instrumentation(&state.module, DEFAULT_RESERVED_PREFIX);
        assert!(diags.is_empty(), "{}: {:?}", name, diags);
    }
}

#[test]
fn printed_output_reparses_to_the_same_text() {
    for name in ALL_KERNELS {
        let first = instrumented(name).module.to_string();
        let reparsed = parse_module(&first)
            .unwrap_or_else(|d| panic!("{}: instrumented output does not parse: {:?}", name, d));
        assert_eq!(reparsed.to_string(), first, "{}", name);
    }
}

#[test]
fn instrumenting_twice_is_a_no_op() {
    for name in ALL_KERNELS {
        let first = instrumented(name).module.to_string();
        let second = instrument_source(&first)
            .unwrap_or_else(|d| panic!("{}: second run failed: {:?}", name, d));
        assert_eq!(second.module.to_string(), first, "{}", name);
        let blocks = second.report.blocks.as_ref().unwrap();
        assert_eq!(blocks.functions, 0, "{}", name);
        let rewrite = second.report.rewrite.as_ref().unwrap();
        assert_eq!(rewrite.rewritten, 0, "{}", name);
    }
}

#[test]
fn stopping_after_discovery_leaves_loops_uncompressed() {
    let module = parse_module(&kernel("vadd.ll")).unwrap();
    let mut state = CompilationState::new(module);
    let options = PipelineOptions {
        terminal: PassId::DiscoverTripCounts,
        ..PipelineOptions::default()
    };
    let mut ran = Vec::new();
    run_pipeline(&mut state, &options, |id, _| ran.push(id)).unwrap();
    assert_eq!(
        ran,
        vec![
            PassId::InstrumentBlocks,
            PassId::RepairLoopMetadata,
            PassId::DiscoverTripCounts
        ]
    );
    assert!(state.report.rewrite.is_none());

    let rows = loop_table(&state.module, DEFAULT_RESERVED_PREFIX);
    assert_eq!(rows[0].trip_count, 8);
    assert!(!rows[0].compressed);
    // Per-block tracing is complete even without the rewrite.
    assert!(verify_instrumentation(&state.module, DEFAULT_RESERVED_PREFIX).is_empty());
}

#[test]
fn reserved_prefix_functions_are_left_alone() {
    let src = "define void @_ssdm_op_Helper() {
        entry:
          ret void
        }
        define void @top() {
        entry:
          call void @_ssdm_op_Helper()
          ret void
        }";
    let text = instrument_source(src).unwrap().module.to_string();
    assert_eq!(count_calls(&text, "__hlslitesim_trace_bb"), 1);
    assert!(text.contains("ptr c\"top\""));
    assert!(!text.contains("ptr c\"_ssdm_op_Helper\""));
}

#[test]
fn provenance_depends_only_on_source() {
    let a = instrumented("vadd.ll").provenance.unwrap();
    let b = instrumented("vadd.ll").provenance.unwrap();
    let c = instrumented("nested.ll").provenance.unwrap();
    assert_eq!(a.source_hash_hex(), b.source_hash_hex());
    assert_ne!(a.source_hash_hex(), c.source_hash_hex());
    assert_eq!(a.source_hash_hex().len(), 64);
}
