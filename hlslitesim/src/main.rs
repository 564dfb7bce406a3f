use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use hlslitesim::interp::{InterpConfig, Interpreter};
use hlslitesim::ir::Type;
use hlslitesim::pass::{self, PassId};
use hlslitesim::pipeline::{
    compute_provenance, loop_table, run_pipeline, CompilationState, PipelineOptions,
    DEFAULT_RESERVED_PREFIX,
};
use hlslitesim::profile::Profile;
use hlslitesim::sim::SimContext;
use hlslitesim::sink::TraceSink;

#[derive(Debug, Clone, ValueEnum)]
enum EmitStage {
    Ir,
    Loops,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "hlslitesim",
    version,
    about = "HLSLiteSim — trace instrumentation and CPU-side simulation of HLS kernels"
)]
struct Cli {
    /// Print pass timing and decisions (RUST_LOG overrides)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the instrumentation passes over an IR file
    Instrument {
        /// Input IR file
        input: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
        emit: EmitStage,

        /// Stop after the named pass (bb_trace, fix_loop_md, trip_count, fixed_loop)
        #[arg(long)]
        stop_after: Option<String>,

        /// Functions with this prefix are never instrumented
        #[arg(long, default_value = DEFAULT_RESERVED_PREFIX)]
        reserved_prefix: String,
    },
    /// Execute a function of an IR file and write its trace
    Run {
        /// Input IR file
        input: PathBuf,

        /// Function to call
        #[arg(long)]
        entry: String,

        /// Argument: an integer, or `buf:<bytes>` for a zeroed buffer (repeatable)
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Instrument the module before running it
        #[arg(long)]
        instrument: bool,

        /// Write the trace here instead of HLSLITESIM_TRACE_FD
        #[arg(long)]
        trace_file: Option<PathBuf>,

        #[arg(long, default_value_t = InterpConfig::default().max_steps)]
        max_steps: u64,
    },
    /// Summarize a trace file
    Profile {
        trace: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    let code = match cli.command {
        Command::Instrument {
            input,
            output,
            emit,
            stop_after,
            reserved_prefix,
        } => instrument(&input, output.as_deref(), emit, stop_after, reserved_prefix),
        Command::Run {
            input,
            entry,
            args,
            instrument,
            trace_file,
            max_steps,
        } => run(&input, &entry, &args, instrument, trace_file.as_deref(), max_steps),
        Command::Profile { trace, json } => profile(&trace, json),
    };
    std::process::exit(code);
}

fn read_source(path: &Path) -> Result<String, i32> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("hlslitesim: error: {}: {}", path.display(), e);
        2
    })
}

fn load_module(path: &Path, source: &str) -> Result<hlslitesim::ir::Module, i32> {
    hlslitesim::lower::parse_module(source).map_err(|diags| {
        for d in &diags {
            eprintln!("hlslitesim: {}:{}", path.display(), d.render(source));
        }
        1
    })
}

fn write_output(output: Option<&Path>, text: &str) -> i32 {
    match output {
        Some(path) => match std::fs::write(path, text) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("hlslitesim: error: {}: {}", path.display(), e);
                2
            }
        },
        None => {
            print!("{}", text);
            0
        }
    }
}

// ── instrument ─────────────────────────────────────────────────────────────

fn instrument(
    input: &Path,
    output: Option<&Path>,
    emit: EmitStage,
    stop_after: Option<String>,
    reserved_prefix: String,
) -> i32 {
    let source = match read_source(input) {
        Ok(s) => s,
        Err(code) => return code,
    };
    if let EmitStage::BuildInfo = emit {
        return write_output(output, &compute_provenance(&source).to_json());
    }

    let terminal = match stop_after.as_deref() {
        None => PassId::Hlslitesim,
        Some(name) => match pass::by_name(name) {
            Some(p) => p,
            None => {
                eprintln!("hlslitesim: error: unknown pass '{}'", name);
                return 2;
            }
        },
    };
    let module = match load_module(input, &source) {
        Ok(m) => m,
        Err(code) => return code,
    };

    let mut state = CompilationState::new(module);
    let options = PipelineOptions {
        reserved_prefix,
        terminal,
    };
    let result = run_pipeline(&mut state, &options, |_, diags| {
        for d in diags {
            eprintln!("hlslitesim: {}", d);
        }
    });
    if let Err(e) = result {
        eprintln!(
            "hlslitesim: {} failed",
            pass::descriptor(e.failing_pass).name
        );
        return 1;
    }

    match emit {
        EmitStage::Ir => write_output(output, &state.module.to_string()),
        EmitStage::Loops => {
            let rows = loop_table(&state.module, &options.reserved_prefix);
            match serde_json::to_string_pretty(&rows) {
                Ok(json) => write_output(output, &(json + "\n")),
                Err(e) => {
                    eprintln!("hlslitesim: error: {}", e);
                    1
                }
            }
        }
        EmitStage::BuildInfo => 0,
    }
}

// ── run ────────────────────────────────────────────────────────────────────

enum ArgValue {
    Word(u64),
    Buffer(u64),
}

fn parse_arg(s: &str) -> Option<ArgValue> {
    if let Some(size) = s.strip_prefix("buf:") {
        return size.parse().ok().map(ArgValue::Buffer);
    }
    if let Some(hex) = s.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16).ok().map(ArgValue::Word);
    }
    s.parse::<i64>()
        .map(|v| v as u64)
        .or_else(|_| s.parse::<u64>())
        .ok()
        .map(ArgValue::Word)
}

fn run(
    input: &Path,
    entry: &str,
    raw_args: &[String],
    instrument: bool,
    trace_file: Option<&Path>,
    max_steps: u64,
) -> i32 {
    let source = match read_source(input) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut module = match load_module(input, &source) {
        Ok(m) => m,
        Err(code) => return code,
    };
    if instrument {
        let mut state = CompilationState::new(module);
        if run_pipeline(&mut state, &PipelineOptions::default(), |_, _| {}).is_err() {
            for d in &state.diagnostics {
                eprintln!("hlslitesim: {}", d);
            }
            return 1;
        }
        module = state.module;
    }

    let sink = match trace_file {
        Some(path) => match TraceSink::to_file(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("hlslitesim: error: {}: {}", path.display(), e);
                return 2;
            }
        },
        None => TraceSink::from_env(),
    };
    let mut ctx = SimContext::new(sink);
    let config = InterpConfig {
        max_steps,
        ..InterpConfig::default()
    };

    let outcome = Interpreter::new(&module, config).and_then(|mut interp| {
        let mut words = Vec::with_capacity(raw_args.len());
        for raw in raw_args {
            match parse_arg(raw) {
                Some(ArgValue::Word(w)) => words.push(w),
                Some(ArgValue::Buffer(n)) => words.push(interp.memory_mut().alloc(n)?),
                None => {
                    return Ok(Err(format!("invalid argument '{}'", raw)));
                }
            }
        }
        let ret = interp.run(&mut ctx, entry, &words)?;
        log::info!("{} instruction(s) executed", interp.steps());
        Ok(Ok(ret))
    });
    ctx.finish();

    match outcome {
        Ok(Ok(ret)) => {
            let ret_ty = module.function(entry).map_or(Type::Void, |f| f.ret);
            if let Some(v) = ret {
                println!("{}", render_word(ret_ty, v));
            }
            0
        }
        Ok(Err(msg)) => {
            eprintln!("hlslitesim: error: {}", msg);
            2
        }
        Err(e) => {
            eprintln!("hlslitesim: {}", e);
            1
        }
    }
}

/// Integers print signed at their width; pointers print in hex.
fn render_word(ty: Type, v: u64) -> String {
    match ty {
        Type::Ptr => format!("{:#x}", v),
        Type::Int(bits) if bits < 64 && bits > 1 => {
            let shift = 64 - bits as u32;
            (((v << shift) as i64) >> shift).to_string()
        }
        _ => (v as i64).to_string(),
    }
}

// ── profile ────────────────────────────────────────────────────────────────

fn profile(path: &Path, json: bool) -> i32 {
    let text = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match Profile::from_trace_text(&text) {
        Ok(p) if json => write_output(None, &(p.to_json() + "\n")),
        Ok(p) => write_output(None, &p.to_string()),
        Err((line, e)) => {
            eprintln!("hlslitesim: {}:{}: {}", path.display(), line, e);
            1
        }
    }
}
