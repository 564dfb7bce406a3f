// hlslitesim — basic-block and loop trace instrumentation for HLS kernels
//
// Library root. Compile-time passes over the textual IR, the runtime models
// they call into, and the tools that replay the resulting traces.

// ── IR front end ──
pub mod ast;
pub mod diag;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod parser;

// ── Analyses and passes ──
pub mod bb_trace;
pub mod cfg;
pub mod loop_md;
pub mod loop_trace;
pub mod pass;
pub mod pipeline;
pub mod scev;
pub mod trip_count;

// ── Runtime ──
pub mod axi;
pub mod capi;
pub mod fifo;
pub mod interp;
pub mod sim;
pub mod sink;

// ── Trace consumers ──
pub mod profile;
pub mod trace;
