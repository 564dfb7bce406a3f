// trace.rs — Trace line records
//
// One `TraceEvent` per line of the side-channel trace. `Display` produces the
// exact tab-separated wire format consumed by downstream profiling tools;
// `FromStr` parses it back (used by `profile` and the `profile` subcommand).
//
// Pointers are written like C's `%p`: lowercase hex with a `0x` prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single trace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// `trace_bb <function> <block>`
    TraceBb { function: String, block: u32 },
    /// `loop <loop> <trip_count>`
    Loop { name: String, trip_count: u32 },
    /// `loop_bb <function> <block>`
    LoopBb { function: String, block: u32 },
    /// `end_loop_blocks <loop> <trip_count>`
    EndLoopBlocks { name: String, trip_count: u32 },
    /// `end_loop <loop> <trip_count>`
    EndLoop { name: String, trip_count: u32 },
    FifoRead { channel: u64 },
    FifoWrite { channel: u64 },
    AxiReadReq { addr: u64, stride: u32, count: u32 },
    AxiWriteReq { addr: u64, stride: u32, count: u32 },
    AxiRead { addr: u64 },
    AxiWrite { addr: u64 },
    AxiWriteResp { addr: u64 },
    SpecChannel { channel: u64, name: String, depth: u32 },
    SpecInterface { addr: u64, name: String, latency: u32 },
    ApCtrlChain,
}

impl TraceEvent {
    /// The leading tag of the line.
    pub fn tag(&self) -> &'static str {
        match self {
            TraceEvent::TraceBb { .. } => "trace_bb",
            TraceEvent::Loop { .. } => "loop",
            TraceEvent::LoopBb { .. } => "loop_bb",
            TraceEvent::EndLoopBlocks { .. } => "end_loop_blocks",
            TraceEvent::EndLoop { .. } => "end_loop",
            TraceEvent::FifoRead { .. } => "fifo_read",
            TraceEvent::FifoWrite { .. } => "fifo_write",
            TraceEvent::AxiReadReq { .. } => "axi_readreq",
            TraceEvent::AxiWriteReq { .. } => "axi_writereq",
            TraceEvent::AxiRead { .. } => "axi_read",
            TraceEvent::AxiWrite { .. } => "axi_write",
            TraceEvent::AxiWriteResp { .. } => "axi_writeresp",
            TraceEvent::SpecChannel { .. } => "spec_channel",
            TraceEvent::SpecInterface { .. } => "spec_interface",
            TraceEvent::ApCtrlChain => "ap_ctrl_chain",
        }
    }
}

/// Format a pointer the way C `%p` does on glibc for non-null values.
pub fn fmt_ptr(addr: u64) -> String {
    format!("{:#x}", addr)
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            TraceEvent::TraceBb { function, block } | TraceEvent::LoopBb { function, block } => {
                write!(f, "{}\t{}\t{}", tag, function, block)
            }
            TraceEvent::Loop { name, trip_count }
            | TraceEvent::EndLoopBlocks { name, trip_count }
            | TraceEvent::EndLoop { name, trip_count } => {
                write!(f, "{}\t{}\t{}", tag, name, trip_count)
            }
            TraceEvent::FifoRead { channel } | TraceEvent::FifoWrite { channel } => {
                write!(f, "{}\t{:#x}", tag, channel)
            }
            TraceEvent::AxiReadReq {
                addr,
                stride,
                count,
            }
            | TraceEvent::AxiWriteReq {
                addr,
                stride,
                count,
            } => write!(f, "{}\t{:#x}\t{}\t{}", tag, addr, stride, count),
            TraceEvent::AxiRead { addr }
            | TraceEvent::AxiWrite { addr }
            | TraceEvent::AxiWriteResp { addr } => write!(f, "{}\t{:#x}", tag, addr),
            TraceEvent::SpecChannel {
                channel,
                name,
                depth,
            } => write!(f, "{}\t{:#x}\t{}\t{}", tag, channel, name, depth),
            TraceEvent::SpecInterface {
                addr,
                name,
                latency,
            } => write!(f, "{}\t{:#x}\t{}\t{}", tag, addr, name, latency),
            TraceEvent::ApCtrlChain => write!(f, "{}", tag),
        }
    }
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Error parsing one trace line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceParseError {
    #[error("empty trace line")]
    Empty,
    #[error("unknown trace entry type '{0}'")]
    UnknownTag(String),
    #[error("'{tag}' expects {expected} field(s), found {found}")]
    FieldCount {
        tag: String,
        expected: usize,
        found: usize,
    },
    #[error("'{tag}': invalid {what} '{value}'")]
    BadField {
        tag: String,
        what: &'static str,
        value: String,
    },
}

fn parse_ptr(tag: &str, s: &str) -> Result<u64, TraceParseError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if s == "(nil)" {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|_| TraceParseError::BadField {
        tag: tag.to_string(),
        what: "pointer",
        value: s.to_string(),
    })
}

fn parse_u32(tag: &str, what: &'static str, s: &str) -> Result<u32, TraceParseError> {
    s.parse().map_err(|_| TraceParseError::BadField {
        tag: tag.to_string(),
        what,
        value: s.to_string(),
    })
}

fn expect_fields<'a>(
    tag: &str,
    fields: &'a [&'a str],
    expected: usize,
) -> Result<&'a [&'a str], TraceParseError> {
    if fields.len() != expected {
        return Err(TraceParseError::FieldCount {
            tag: tag.to_string(),
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

impl FromStr for TraceEvent {
    type Err = TraceParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Err(TraceParseError::Empty);
        }
        let mut parts = line.split('\t');
        let tag = parts.next().unwrap_or_default();
        let fields: Vec<&str> = parts.collect();

        let event = match tag {
            "trace_bb" | "loop_bb" => {
                let f = expect_fields(tag, &fields, 2)?;
                let function = f[0].to_string();
                let block = parse_u32(tag, "block id", f[1])?;
                if tag == "trace_bb" {
                    TraceEvent::TraceBb { function, block }
                } else {
                    TraceEvent::LoopBb { function, block }
                }
            }
            "loop" | "end_loop_blocks" | "end_loop" => {
                let f = expect_fields(tag, &fields, 2)?;
                let name = f[0].to_string();
                let trip_count = parse_u32(tag, "trip count", f[1])?;
                match tag {
                    "loop" => TraceEvent::Loop { name, trip_count },
                    "end_loop_blocks" => TraceEvent::EndLoopBlocks { name, trip_count },
                    _ => TraceEvent::EndLoop { name, trip_count },
                }
            }
            "fifo_read" | "fifo_write" => {
                let f = expect_fields(tag, &fields, 1)?;
                let channel = parse_ptr(tag, f[0])?;
                if tag == "fifo_read" {
                    TraceEvent::FifoRead { channel }
                } else {
                    TraceEvent::FifoWrite { channel }
                }
            }
            "axi_readreq" | "axi_writereq" => {
                let f = expect_fields(tag, &fields, 3)?;
                let addr = parse_ptr(tag, f[0])?;
                let stride = parse_u32(tag, "stride", f[1])?;
                let count = parse_u32(tag, "count", f[2])?;
                if tag == "axi_readreq" {
                    TraceEvent::AxiReadReq {
                        addr,
                        stride,
                        count,
                    }
                } else {
                    TraceEvent::AxiWriteReq {
                        addr,
                        stride,
                        count,
                    }
                }
            }
            "axi_read" | "axi_write" | "axi_writeresp" => {
                let f = expect_fields(tag, &fields, 1)?;
                let addr = parse_ptr(tag, f[0])?;
                match tag {
                    "axi_read" => TraceEvent::AxiRead { addr },
                    "axi_write" => TraceEvent::AxiWrite { addr },
                    _ => TraceEvent::AxiWriteResp { addr },
                }
            }
            "spec_channel" => {
                let f = expect_fields(tag, &fields, 3)?;
                TraceEvent::SpecChannel {
                    channel: parse_ptr(tag, f[0])?,
                    name: f[1].to_string(),
                    depth: parse_u32(tag, "depth", f[2])?,
                }
            }
            "spec_interface" => {
                let f = expect_fields(tag, &fields, 3)?;
                TraceEvent::SpecInterface {
                    addr: parse_ptr(tag, f[0])?,
                    name: f[1].to_string(),
                    latency: parse_u32(tag, "latency", f[2])?,
                }
            }
            "ap_ctrl_chain" => {
                expect_fields(tag, &fields, 0)?;
                TraceEvent::ApCtrlChain
            }
            other => return Err(TraceParseError::UnknownTag(other.to_string())),
        };
        Ok(event)
    }
}

/// Parse a whole trace, reporting the 1-based line number of the first error.
/// Blank lines are skipped.
pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>, (usize, TraceParseError)> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| line.parse().map_err(|e| (i + 1, e)))
        .collect()
}
