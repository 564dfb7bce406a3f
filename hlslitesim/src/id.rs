// id.rs — Stable index identifiers for IR entities
//
// Blocks and values are indexed per function; metadata nodes are indexed per
// module. Indices are allocated in definition order and never reused within a
// module, so they stay valid across instruction insertion and deletion.

/// Index of a basic block within its parent function (layout order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of an SSA value (argument or instruction result) within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Index of a metadata node within a module's metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MdId(pub u32);

/// Index of a natural loop within one function's `LoopInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopIdx(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl MdId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl LoopIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for per-function value IDs. Produces monotonically increasing
/// IDs so that printing in allocation order is deterministic.
#[derive(Debug, Default, Clone)]
pub struct ValueAllocator {
    next: u32,
}

impl ValueAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> ValueId {
        let id = ValueId(self.next);
        self.next += 1;
        id
    }
}
