// fifo.rs — FIFO channel model
//
// Channels are keyed by the runtime address of their descriptor (pointer
// identity, never contents). Each holds a strict FIFO of 64-bit words.
// A channel comes into existence on its first write. Reading a channel that
// was never written, or whose queue is drained, is a protocol violation of
// the simulated hardware and is reported as a fatal `SimError`; there is no
// blocking or retry because the simulation is single-threaded and
// deterministic.

use std::collections::{HashMap, VecDeque};

use crate::sim::SimError;
use crate::sink::TraceSink;
use crate::trace::TraceEvent;

#[derive(Debug, Default)]
pub struct FifoTable {
    queues: HashMap<u64, VecDeque<u64>>,
}

impl FifoTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` to `channel`, creating the queue if absent.
    pub fn write(&mut self, sink: &mut TraceSink, channel: u64, value: u64) {
        self.queues.entry(channel).or_default().push_back(value);
        sink.emit(&TraceEvent::FifoWrite { channel });
    }

    /// Pop the oldest value of `channel`.
    pub fn read(&mut self, sink: &mut TraceSink, channel: u64) -> Result<u64, SimError> {
        let queue = self
            .queues
            .get_mut(&channel)
            .ok_or(SimError::FifoNeverWritten { channel })?;
        let value = queue.pop_front().ok_or(SimError::FifoEmpty { channel })?;
        sink.emit(&TraceEvent::FifoRead { channel });
        Ok(value)
    }

    /// Number of words currently queued on `channel` (0 if unknown).
    pub fn occupancy(&self, channel: u64) -> usize {
        self.queues.get(&channel).map_or(0, VecDeque::len)
    }

    /// Channels that still hold data, sorted by address.
    pub fn drain_report(&self) -> Vec<(u64, usize)> {
        let mut leftover: Vec<(u64, usize)> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(&ch, q)| (ch, q.len()))
            .collect();
        leftover.sort_unstable();
        leftover
    }

    pub fn channel_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_come_out_in_write_order() {
        let mut sink = TraceSink::disabled();
        let mut fifos = FifoTable::new();
        for v in [11, 22, 33] {
            fifos.write(&mut sink, 0x100, v);
        }
        assert_eq!(fifos.read(&mut sink, 0x100), Ok(11));
        assert_eq!(fifos.read(&mut sink, 0x100), Ok(22));
        assert_eq!(fifos.read(&mut sink, 0x100), Ok(33));
    }

    #[test]
    fn channels_are_independent() {
        let mut sink = TraceSink::disabled();
        let mut fifos = FifoTable::new();
        fifos.write(&mut sink, 0x100, 1);
        fifos.write(&mut sink, 0x200, 2);
        assert_eq!(fifos.read(&mut sink, 0x200), Ok(2));
        assert_eq!(fifos.read(&mut sink, 0x100), Ok(1));
        assert_eq!(fifos.channel_count(), 2);
    }

    #[test]
    fn reading_unknown_channel_is_fatal() {
        let mut sink = TraceSink::disabled();
        let mut fifos = FifoTable::new();
        assert_eq!(
            fifos.read(&mut sink, 0x40),
            Err(SimError::FifoNeverWritten { channel: 0x40 })
        );
    }

    #[test]
    fn reading_drained_channel_is_fatal() {
        let mut sink = TraceSink::disabled();
        let mut fifos = FifoTable::new();
        fifos.write(&mut sink, 0x40, 9);
        fifos.read(&mut sink, 0x40).unwrap();
        assert_eq!(
            fifos.read(&mut sink, 0x40),
            Err(SimError::FifoEmpty { channel: 0x40 })
        );
    }

    #[test]
    fn operations_are_traced() {
        let (mut sink, buf) = TraceSink::capture();
        let mut fifos = FifoTable::new();
        fifos.write(&mut sink, 0x1000, 5);
        fifos.read(&mut sink, 0x1000).unwrap();
        assert_eq!(buf.contents(), "fifo_write\t0x1000\nfifo_read\t0x1000\n");
    }

    #[test]
    fn failed_read_emits_nothing() {
        let (mut sink, buf) = TraceSink::capture();
        let mut fifos = FifoTable::new();
        assert!(fifos.read(&mut sink, 0x1000).is_err());
        assert!(buf.contents().is_empty());
    }

    #[test]
    fn drain_report_lists_leftovers() {
        let mut sink = TraceSink::disabled();
        let mut fifos = FifoTable::new();
        fifos.write(&mut sink, 0x300, 1);
        fifos.write(&mut sink, 0x300, 2);
        fifos.write(&mut sink, 0x100, 3);
        fifos.read(&mut sink, 0x100).unwrap();
        assert_eq!(fifos.drain_report(), vec![(0x300, 2)]);
        assert_eq!(fifos.occupancy(0x300), 2);
        assert_eq!(fifos.occupancy(0x999), 0);
    }
}
