// axi.rs — AXI memory-mapped transaction model
//
// A burst is modelled as a request window keyed by its base address:
// `set_*_req` installs (or resets) the window, each `update_*_req` checks the
// running offset against the window length, returns `addr + offset`, and
// advances by the element stride. Read and write windows are tracked in
// separate tables because one address may carry both at once.

use std::collections::HashMap;

use crate::sim::SimError;
use crate::sink::TraceSink;
use crate::trace::TraceEvent;

/// Direction of an AXI burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxiDir {
    Read,
    Write,
}

impl std::fmt::Display for AxiDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxiDir::Read => write!(f, "read"),
            AxiDir::Write => write!(f, "write"),
        }
    }
}

/// One in-flight request window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxiWindow {
    pub stride: u32,
    /// Window length in bytes (`stride * count`).
    pub length: u64,
    pub offset: u64,
}

impl AxiWindow {
    fn new(stride: u32, count: u32) -> Self {
        Self {
            stride,
            length: stride as u64 * count as u64,
            offset: 0,
        }
    }

    /// Elements not yet accessed.
    pub fn remaining(&self) -> u64 {
        if self.stride == 0 {
            return 0;
        }
        self.length.saturating_sub(self.offset) / self.stride as u64
    }
}

#[derive(Debug, Default)]
pub struct AxiTable {
    read_reqs: HashMap<u64, AxiWindow>,
    write_reqs: HashMap<u64, AxiWindow>,
}

impl AxiTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_req(&mut self, sink: &mut TraceSink, addr: u64, stride: u32, count: u32) {
        self.read_reqs.insert(addr, AxiWindow::new(stride, count));
        sink.emit(&TraceEvent::AxiReadReq {
            addr,
            stride,
            count,
        });
    }

    pub fn set_write_req(&mut self, sink: &mut TraceSink, addr: u64, stride: u32, count: u32) {
        self.write_reqs.insert(addr, AxiWindow::new(stride, count));
        sink.emit(&TraceEvent::AxiWriteReq {
            addr,
            stride,
            count,
        });
    }

    /// Address of the next element of the read burst at `addr`.
    pub fn update_read_req(&mut self, sink: &mut TraceSink, addr: u64) -> Result<u64, SimError> {
        let effective = advance(&mut self.read_reqs, AxiDir::Read, addr)?;
        sink.emit(&TraceEvent::AxiRead { addr });
        Ok(effective)
    }

    /// Address of the next element of the write burst at `addr`.
    pub fn update_write_req(&mut self, sink: &mut TraceSink, addr: u64) -> Result<u64, SimError> {
        let effective = advance(&mut self.write_reqs, AxiDir::Write, addr)?;
        sink.emit(&TraceEvent::AxiWrite { addr });
        Ok(effective)
    }

    /// Marks completion of a write burst. Trace only.
    pub fn write_resp(&mut self, sink: &mut TraceSink, addr: u64) {
        sink.emit(&TraceEvent::AxiWriteResp { addr });
    }

    /// Windows with elements never accessed, as `(dir, base, remaining)`
    /// sorted by direction then address.
    pub fn unfinished_report(&self) -> Vec<(AxiDir, u64, u64)> {
        let mut leftover: Vec<(AxiDir, u64, u64)> = [
            (AxiDir::Read, &self.read_reqs),
            (AxiDir::Write, &self.write_reqs),
        ]
        .into_iter()
        .flat_map(|(dir, table)| {
            table
                .iter()
                .map(move |(&addr, w)| (dir, addr, w.remaining()))
        })
        .filter(|&(_, _, remaining)| remaining > 0)
        .collect();
        leftover.sort_unstable_by_key(|&(dir, addr, _)| (dir == AxiDir::Write, addr));
        leftover
    }
}

fn advance(table: &mut HashMap<u64, AxiWindow>, dir: AxiDir, addr: u64) -> Result<u64, SimError> {
    let window = table
        .get_mut(&addr)
        .ok_or(SimError::AxiNoRequest { dir, addr })?;
    if window.offset >= window.length {
        return Err(SimError::AxiOutOfBounds {
            dir,
            addr,
            offset: window.offset,
            length: window.length,
        });
    }
    let effective = addr.wrapping_add(window.offset);
    window.offset += window.stride as u64;
    Ok(effective)
}
