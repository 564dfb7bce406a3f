// cfg.rs — Control-flow graph, dominators and natural loops
//
// Builds successor/predecessor lists from block terminators, the dominator
// tree (Cooper, Harvey & Kennedy's iterative algorithm over reverse
// postorder) and the natural-loop forest. Loops sharing a header are merged,
// so a loop may have several latches.
//
// Preconditions: `func` has a body; block 0 is the entry.
// Postconditions: unreachable blocks have no dominator and belong to no loop.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeSet;

use crate::id::{BlockId, LoopIdx, MdId};
use crate::ir::Function;

/// Metadata kind of a loop ID.
pub const LOOP_MD_KIND: &str = "llvm.loop";

// ── CFG ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Cfg {
    succs: Vec<Vec<BlockId>>,
    preds: Vec<Vec<BlockId>>,
    rpo: Vec<BlockId>,
}

impl Cfg {
    pub fn new(func: &Function) -> Self {
        let n = func.blocks.len();
        let succs: Vec<Vec<BlockId>> = func.block_ids().map(|b| func.successors(b)).collect();

        // Iterative DFS from entry for postorder.
        let mut reachable = vec![false; n];
        let mut post = Vec::with_capacity(n);
        if n > 0 {
            let mut stack: Vec<(BlockId, usize)> = vec![(BlockId(0), 0)];
            reachable[0] = true;
            while let Some((b, next)) = stack.pop() {
                if let Some(&s) = succs[b.index()].get(next) {
                    stack.push((b, next + 1));
                    if !reachable[s.index()] {
                        reachable[s.index()] = true;
                        stack.push((s, 0));
                    }
                } else {
                    post.push(b);
                }
            }
        }
        post.reverse();

        let mut preds = vec![Vec::new(); n];
        for (b, ss) in succs.iter().enumerate() {
            if !reachable[b] {
                continue;
            }
            for s in ss {
                preds[s.index()].push(BlockId(b as u32));
            }
        }

        Self {
            succs,
            preds,
            rpo: post,
        }
    }

    pub fn succs(&self, b: BlockId) -> &[BlockId] {
        &self.succs[b.index()]
    }

    /// Reachable predecessors, in layout order.
    pub fn preds(&self, b: BlockId) -> &[BlockId] {
        &self.preds[b.index()]
    }

    /// Reachable blocks in reverse postorder.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub(crate) fn len(&self) -> usize {
        self.succs.len()
    }
}

// ── Dominators ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DomTree {
    idom: Vec<Option<BlockId>>,
    rpo_index: Vec<usize>,
}

impl DomTree {
    pub fn compute(cfg: &Cfg) -> Self {
        let n = cfg.len();
        let mut rpo_index = vec![usize::MAX; n];
        for (i, b) in cfg.rpo().iter().enumerate() {
            rpo_index[b.index()] = i;
        }
        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if n == 0 {
            return Self { idom, rpo_index };
        }
        idom[0] = Some(BlockId(0));

        let mut changed = true;
        while changed {
            changed = false;
            for &b in cfg.rpo().iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in cfg.preds(b) {
                    if idom[p.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &rpo_index, p, cur),
                    });
                }
                if new_idom.is_some() && idom[b.index()] != new_idom {
                    idom[b.index()] = new_idom;
                    changed = true;
                }
            }
        }
        Self { idom, rpo_index }
    }

    /// Whether `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if self.idom[a.index()].is_none() || self.idom[b.index()].is_none() {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom[cur.index()] {
                Some(next) if next != cur => cur = next,
                _ => return false,
            }
        }
    }
}

fn intersect(idom: &[Option<BlockId>], rpo_index: &[usize], a: BlockId, b: BlockId) -> BlockId {
    let (mut f1, mut f2) = (a, b);
    while f1 != f2 {
        while rpo_index[f1.index()] > rpo_index[f2.index()] {
            f1 = idom[f1.index()].unwrap_or(BlockId(0));
        }
        while rpo_index[f2.index()] > rpo_index[f1.index()] {
            f2 = idom[f2.index()].unwrap_or(BlockId(0));
        }
    }
    f1
}

// ── Loops ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
    pub header: BlockId,
    /// Sources of back edges into the header, in layout order.
    pub latches: Vec<BlockId>,
    /// Member blocks (nested loops included), in layout order.
    pub blocks: Vec<BlockId>,
    pub parent: Option<LoopIdx>,
    /// 1 for outermost loops.
    pub depth: u32,
}

impl Loop {
    pub fn contains(&self, b: BlockId) -> bool {
        self.blocks.binary_search(&b).is_ok()
    }

    pub fn num_back_edges(&self) -> usize {
        self.latches.len()
    }

    /// The latch, if there is exactly one.
    pub fn single_latch(&self) -> Option<BlockId> {
        match self.latches.as_slice() {
            [l] => Some(*l),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    loops: Vec<Loop>,
}

impl LoopInfo {
    pub fn compute(cfg: &Cfg, dom: &DomTree) -> Self {
        let mut headers: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
        for &b in cfg.rpo() {
            for &s in cfg.succs(b) {
                if dom.dominates(s, b) {
                    match headers.iter_mut().find(|(h, _)| *h == s) {
                        Some((_, latches)) => latches.push(b),
                        None => headers.push((s, vec![b])),
                    }
                }
            }
        }

        let mut loops: Vec<Loop> = headers
            .into_iter()
            .map(|(header, mut latches)| {
                latches.sort_unstable();
                latches.dedup();
                let mut body = BTreeSet::from([header]);
                let mut work: Vec<BlockId> = latches.clone();
                while let Some(b) = work.pop() {
                    if body.insert(b) {
                        work.extend(cfg.preds(b).iter().copied());
                    }
                }
                Loop {
                    header,
                    latches,
                    blocks: body.into_iter().collect(),
                    parent: None,
                    depth: 1,
                }
            })
            .collect();

        // Parent = smallest strictly enclosing loop.
        let parents: Vec<Option<LoopIdx>> = (0..loops.len())
            .map(|i| {
                (0..loops.len())
                    .filter(|&j| j != i && loops[j].contains(loops[i].header))
                    .filter(|&j| loops[j].blocks.len() > loops[i].blocks.len())
                    .min_by_key(|&j| loops[j].blocks.len())
                    .map(|j| LoopIdx(j as u32))
            })
            .collect();
        for (i, parent) in parents.iter().enumerate() {
            loops[i].parent = *parent;
        }
        for i in 0..loops.len() {
            let mut depth = 1;
            let mut cur = loops[i].parent;
            while let Some(p) = cur {
                depth += 1;
                cur = loops[p.index()].parent;
            }
            loops[i].depth = depth;
        }

        Self { loops }
    }

    /// Convenience: CFG, dominators and loops of one function.
    pub fn of(func: &Function) -> (Cfg, LoopInfo) {
        let cfg = Cfg::new(func);
        let dom = DomTree::compute(&cfg);
        let loops = LoopInfo::compute(&cfg, &dom);
        (cfg, loops)
    }

    pub fn get(&self, idx: LoopIdx) -> &Loop {
        &self.loops[idx.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (LoopIdx, &Loop)> {
        self.loops
            .iter()
            .enumerate()
            .map(|(i, l)| (LoopIdx(i as u32), l))
    }

    /// Deepest loops first; ties in header layout order.
    pub fn innermost_first(&self) -> Vec<LoopIdx> {
        let mut order: Vec<LoopIdx> = (0..self.loops.len() as u32).map(LoopIdx).collect();
        order.sort_by_key(|&i| {
            let l = self.get(i);
            (std::cmp::Reverse(l.depth), l.header)
        });
        order
    }

    /// The deepest loop containing `b`.
    pub fn innermost_loop_for(&self, b: BlockId) -> Option<LoopIdx> {
        self.iter()
            .filter(|(_, l)| l.contains(b))
            .max_by_key(|(_, l)| l.depth)
            .map(|(i, _)| i)
    }

    /// The unique out-of-loop predecessor of the header whose only
    /// successor is the header.
    pub fn preheader(&self, idx: LoopIdx, cfg: &Cfg) -> Option<BlockId> {
        let l = self.get(idx);
        let mut outside = cfg.preds(l.header).iter().filter(|p| !l.contains(**p));
        let candidate = *outside.next()?;
        if outside.next().is_some() {
            return None;
        }
        (cfg.succs(candidate) == [l.header]).then_some(candidate)
    }

    /// Blocks outside the loop with a predecessor inside it, deduplicated,
    /// in layout order.
    pub fn exit_blocks(&self, idx: LoopIdx, cfg: &Cfg) -> Vec<BlockId> {
        let l = self.get(idx);
        let exits: BTreeSet<BlockId> = l
            .blocks
            .iter()
            .flat_map(|b| cfg.succs(*b).iter().copied())
            .filter(|s| !l.contains(*s))
            .collect();
        exits.into_iter().collect()
    }

    /// Loop blocks with a successor outside the loop.
    pub fn exiting_blocks(&self, idx: LoopIdx, cfg: &Cfg) -> Vec<BlockId> {
        let l = self.get(idx);
        l.blocks
            .iter()
            .copied()
            .filter(|b| cfg.succs(*b).iter().any(|s| !l.contains(*s)))
            .collect()
    }

    /// The loop ID: the `!llvm.loop` node shared by every latch terminator.
    pub fn loop_id(&self, func: &Function, idx: LoopIdx) -> Option<MdId> {
        let l = self.get(idx);
        let mut ids = l
            .latches
            .iter()
            .map(|b| func.block(*b).term_md(LOOP_MD_KIND));
        let first = ids.next()??;
        ids.all(|id| id == Some(first)).then_some(first)
    }

    /// Attach `id` as the loop ID on every latch terminator.
    pub fn set_loop_id(&self, func: &mut Function, idx: LoopIdx, id: MdId) {
        for b in &self.get(idx).latches {
            func.block_mut(*b).set_term_md(LOOP_MD_KIND, id);
        }
    }

    /// Loop name: the header block's label.
    pub fn name<'f>(&self, func: &'f Function, idx: LoopIdx) -> &'f str {
        &func.block(self.get(idx).header).name
    }
}
