// sim.rs — Simulation context
//
// Owns everything one simulated kernel invocation touches at run time: the
// trace sink, the FIFO tables and the AXI tables. Channel and address
// identities are keys into this context rather than into process-wide
// state, so independent simulations can run side by side and tear down
// deterministically.

use crate::axi::{AxiDir, AxiTable};
use crate::fifo::FifoTable;
use crate::sink::TraceSink;
use crate::trace::TraceEvent;

/// Fatal runtime conditions. Each one means the simulated hardware
/// description broke a protocol; none is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("tried to read nonexistent FIFO {channel:#x}")]
    FifoNeverWritten { channel: u64 },
    #[error("tried to read empty FIFO {channel:#x}")]
    FifoEmpty { channel: u64 },
    #[error("no AXI {dir} request issued for {addr:#x}")]
    AxiNoRequest { dir: AxiDir, addr: u64 },
    #[error("AXI {dir} out of bounds at {addr:#x}: offset {offset} >= length {length}")]
    AxiOutOfBounds {
        dir: AxiDir,
        addr: u64,
        offset: u64,
        length: u64,
    },
    #[error("no function named '@{0}'")]
    UnknownFunction(String),
    #[error("call to unsupported external function '@{0}'")]
    UnknownExternal(String),
    #[error("'@{function}' expects {expected} argument(s), got {found}")]
    ArgCount {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("memory access out of bounds: {size} byte(s) at {addr:#x}")]
    BadAddress { addr: u64, size: u64 },
    #[error("out of simulated memory allocating {0} byte(s)")]
    OutOfMemory(u64),
    #[error("integer division by zero in '@{0}'")]
    DivisionByZero(String),
    #[error("reached unreachable in '@{0}'")]
    Unreachable(String),
    #[error("step limit of {0} instruction(s) exceeded")]
    StepLimit(u64),
    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

#[derive(Debug, Default)]
pub struct SimContext {
    pub sink: TraceSink,
    pub fifos: FifoTable,
    pub axi: AxiTable,
}

impl SimContext {
    pub fn new(sink: TraceSink) -> Self {
        Self {
            sink,
            fifos: FifoTable::new(),
            axi: AxiTable::new(),
        }
    }

    /// Context tracing to the fd named by `HLSLITESIM_TRACE_FD`.
    pub fn from_env() -> Self {
        Self::new(TraceSink::from_env())
    }

    // ── Trace records emitted by instrumentation calls ──

    pub fn trace_bb(&mut self, function: &str, block: u32) {
        self.sink.emit(&TraceEvent::TraceBb {
            function: function.to_string(),
            block,
        });
    }

    pub fn trace_loop(&mut self, name: &str, trip_count: u32) {
        self.sink.emit(&TraceEvent::Loop {
            name: name.to_string(),
            trip_count,
        });
    }

    pub fn trace_loop_bb(&mut self, function: &str, block: u32) {
        self.sink.emit(&TraceEvent::LoopBb {
            function: function.to_string(),
            block,
        });
    }

    pub fn trace_end_loop_blocks(&mut self, name: &str, trip_count: u32) {
        self.sink.emit(&TraceEvent::EndLoopBlocks {
            name: name.to_string(),
            trip_count,
        });
    }

    pub fn trace_end_loop(&mut self, name: &str, trip_count: u32) {
        self.sink.emit(&TraceEvent::EndLoop {
            name: name.to_string(),
            trip_count,
        });
    }

    // ── Synthesis directives observed at run time ──

    /// `_ssdm_op_SpecChannel`: announces a FIFO channel and its depth.
    pub fn spec_channel(&mut self, channel: u64, name: &str, depth: u32) {
        self.sink.emit(&TraceEvent::SpecChannel {
            channel,
            name: name.to_string(),
            depth,
        });
    }

    /// `_ssdm_op_SpecInterface`: only `m_axi` and `ap_ctrl_chain` interfaces
    /// are recorded; every other interface type is ignored.
    pub fn spec_interface(&mut self, addr: u64, kind: &str, name: &str, latency: u32) {
        match kind {
            "m_axi" => self.sink.emit(&TraceEvent::SpecInterface {
                addr,
                name: name.to_string(),
                latency,
            }),
            "ap_ctrl_chain" => self.sink.emit(&TraceEvent::ApCtrlChain),
            _ => {}
        }
    }

    // ── Runtime models ──

    pub fn fifo_write(&mut self, channel: u64, value: u64) {
        self.fifos.write(&mut self.sink, channel, value);
    }

    pub fn fifo_read(&mut self, channel: u64) -> Result<u64, SimError> {
        self.fifos.read(&mut self.sink, channel)
    }

    pub fn set_read_req(&mut self, addr: u64, stride: u32, count: u32) {
        self.axi.set_read_req(&mut self.sink, addr, stride, count);
    }

    pub fn set_write_req(&mut self, addr: u64, stride: u32, count: u32) {
        self.axi.set_write_req(&mut self.sink, addr, stride, count);
    }

    pub fn update_read_req(&mut self, addr: u64) -> Result<u64, SimError> {
        self.axi.update_read_req(&mut self.sink, addr)
    }

    pub fn update_write_req(&mut self, addr: u64) -> Result<u64, SimError> {
        self.axi.update_write_req(&mut self.sink, addr)
    }

    pub fn write_resp(&mut self, addr: u64) {
        self.axi.write_resp(&mut self.sink, addr);
    }

    /// End of simulation: report unconsumed FIFO data and unfinished AXI
    /// bursts, then flush the trace.
    pub fn finish(&mut self) {
        for (channel, words) in self.fifos.drain_report() {
            log::warn!(
                "FIFO {:#x} still holds {} unread word(s) at end of simulation",
                channel,
                words
            );
        }
        for (dir, addr, remaining) in self.axi.unfinished_report() {
            log::warn!(
                "AXI {} burst at {:#x} ended with {} element(s) never accessed",
                dir,
                addr,
                remaining
            );
        }
        self.sink.flush();
    }
}
