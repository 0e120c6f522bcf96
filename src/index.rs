// ============================================================================
// SECTION 6: ENTRY ARENA & HASH INDICES
// ============================================================================
// Entries live in a slab addressed by stable slot numbers. Each index is an
// array of bucket heads; the chain links themselves sit beside the entry in
// its slot, one link per index, so an entry can be threaded onto both
// indices without being copied.
// ============================================================================

use crate::entry::{Entry, EntryState};
use crate::error::fatal_no_memory;
use crate::indom::InDom;

/// Stable address of an entry inside the arena
pub(crate) type Slot = usize;

// ----------------------------------------------------------------------------
// 6.1 Entry Arena
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct Node<P> {
    pub entry: Entry<P>,
    next_inst: Option<Slot>,
    next_name: Option<Slot>,
}

/// Slab of entries with a free list for reclaimed slots.
#[derive(Debug)]
pub(crate) struct Arena<P> {
    nodes: Vec<Option<Node<P>>>,
    free: Vec<Slot>,
}

impl<P> Arena<P> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, entry: Entry<P>) -> Slot {
        let node = Node {
            entry,
            next_inst: None,
            next_name: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Take an entry out, releasing its slot for reuse
    pub fn remove(&mut self, slot: Slot) -> Option<Entry<P>> {
        let node = self.nodes.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some(node.entry)
    }

    #[inline]
    pub fn entry(&self, slot: Slot) -> &Entry<P> {
        &self.node(slot).entry
    }

    #[inline]
    pub fn entry_mut(&mut self, slot: Slot) -> &mut Entry<P> {
        &mut self.node_mut(slot).entry
    }

    #[inline]
    fn node(&self, slot: Slot) -> &Node<P> {
        self.nodes[slot]
            .as_ref()
            .unwrap_or_else(|| panic!("slot {} referenced after release", slot))
    }

    #[inline]
    fn node_mut(&mut self, slot: Slot) -> &mut Node<P> {
        self.nodes[slot]
            .as_mut()
            .unwrap_or_else(|| panic!("slot {} referenced after release", slot))
    }

    fn link(&self, slot: Slot, kind: IndexKind) -> Option<Slot> {
        let node = self.node(slot);
        match kind {
            IndexKind::Inst => node.next_inst,
            IndexKind::Name => node.next_name,
        }
    }

    fn set_link(&mut self, slot: Slot, kind: IndexKind, next: Option<Slot>) {
        let node = self.node_mut(slot);
        match kind {
            IndexKind::Inst => node.next_inst = next,
            IndexKind::Name => node.next_name = next,
        }
    }
}

// ----------------------------------------------------------------------------
// 6.2 Chained Hash Index
// ----------------------------------------------------------------------------

/// Which link field of a node an index threads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexKind {
    Inst,
    Name,
}

/// Bucket heads of one chained index. Sizes are powers of two so the bucket
/// is selected with a mask.
#[derive(Debug)]
pub(crate) struct HashChains {
    kind: IndexKind,
    heads: Vec<Option<Slot>>,
}

impl HashChains {
    pub fn new(kind: IndexKind, size: usize, indom: InDom) -> Self {
        Self {
            kind,
            heads: alloc_heads(size, indom),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub fn bucket(&self, hash: u32) -> usize {
        hash as usize & (self.heads.len() - 1)
    }

    /// Thread `slot` onto the head of the chain for `hash`
    pub fn link<P>(&mut self, arena: &mut Arena<P>, hash: u32, slot: Slot) {
        let bucket = self.bucket(hash);
        arena.set_link(slot, self.kind, self.heads[bucket]);
        self.heads[bucket] = Some(slot);
    }

    /// Walk the chain for one bucket
    pub fn chain<'a, P>(&self, arena: &'a Arena<P>, bucket: usize) -> Chain<'a, P> {
        Chain {
            arena,
            kind: self.kind,
            next: self.heads[bucket],
        }
    }

    /// Re-thread every chained entry into `new_size` buckets
    pub fn rehash<P>(
        &mut self,
        arena: &mut Arena<P>,
        new_size: usize,
        indom: InDom,
        hasher: impl Fn(&Entry<P>) -> u32,
    ) {
        let old = std::mem::replace(&mut self.heads, alloc_heads(new_size, indom));
        for head in old {
            let mut cursor = head;
            while let Some(slot) = cursor {
                cursor = arena.link(slot, self.kind);
                let hash = hasher(arena.entry(slot));
                self.link(arena, hash, slot);
            }
        }
    }

    /// Reorder each chain to Active-then-Inactive, keeping relative order
    /// within each group, and unlink Empty entries.
    pub fn compact<P>(&mut self, arena: &mut Arena<P>) {
        let mut active = Vec::new();
        let mut inactive = Vec::new();
        for bucket in 0..self.heads.len() {
            active.clear();
            inactive.clear();
            let mut cursor = self.heads[bucket].take();
            while let Some(slot) = cursor {
                cursor = arena.link(slot, self.kind);
                arena.set_link(slot, self.kind, None);
                match arena.entry(slot).state {
                    EntryState::Active => active.push(slot),
                    EntryState::Inactive => inactive.push(slot),
                    EntryState::Empty => {}
                }
            }
            let mut next = None;
            for &slot in active.iter().chain(inactive.iter()).rev() {
                arena.set_link(slot, self.kind, next);
                next = Some(slot);
            }
            self.heads[bucket] = next;
        }
    }
}

fn alloc_heads(size: usize, indom: InDom) -> Vec<Option<Slot>> {
    debug_assert!(size.is_power_of_two());
    let mut heads = Vec::new();
    if heads.try_reserve_exact(size).is_err() {
        fatal_no_memory(indom, "hash buckets", size * std::mem::size_of::<Option<Slot>>());
    }
    heads.resize(size, None);
    heads
}

/// Iterator over the slots of one hash chain.
pub(crate) struct Chain<'a, P> {
    arena: &'a Arena<P>,
    kind: IndexKind,
    next: Option<Slot>,
}

impl<'a, P> Iterator for Chain<'a, P> {
    type Item = (Slot, &'a Entry<P>);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.next?;
        self.next = self.arena.link(slot, self.kind);
        Some((slot, self.arena.entry(slot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(inst: u32, state: EntryState) -> Entry<()> {
        let mut e = Entry::new(inst, format!("i{}", inst).into(), 0, None);
        e.state = state;
        e
    }

    fn chain_insts(chains: &HashChains, arena: &Arena<()>, bucket: usize) -> Vec<u32> {
        chains.chain(arena, bucket).map(|(_, e)| e.inst).collect()
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(entry(0, EntryState::Active));
        let b = arena.insert(entry(1, EntryState::Active));
        assert_ne!(a, b);

        assert_eq!(arena.remove(a).map(|e| e.inst), Some(0));
        assert!(arena.remove(a).is_none());
        let c = arena.insert(entry(2, EntryState::Active));
        assert_eq!(c, a);
        assert_eq!(arena.entry(c).inst, 2);
    }

    #[test]
    fn test_link_pushes_to_front() {
        let indom = InDom::new(1, 1);
        let mut arena = Arena::new();
        let mut chains = HashChains::new(IndexKind::Inst, 4, indom);
        for inst in [1u32, 5, 9] {
            let slot = arena.insert(entry(inst, EntryState::Active));
            chains.link(&mut arena, inst, slot);
        }
        assert_eq!(chain_insts(&chains, &arena, 1), vec![9, 5, 1]);
        assert!(chain_insts(&chains, &arena, 0).is_empty());
    }

    #[test]
    fn test_compact_orders_and_drops_empty() {
        let indom = InDom::new(1, 1);
        let mut arena = Arena::new();
        let mut chains = HashChains::new(IndexKind::Inst, 4, indom);
        let states = [
            (1, EntryState::Inactive),
            (5, EntryState::Active),
            (9, EntryState::Empty),
            (13, EntryState::Inactive),
            (17, EntryState::Active),
        ];
        for (inst, state) in states {
            let slot = arena.insert(entry(inst, state));
            chains.link(&mut arena, inst, slot);
        }
        // Chain is 17 13 9 5 1 before compaction.
        chains.compact(&mut arena);
        assert_eq!(chain_insts(&chains, &arena, 1), vec![17, 5, 13, 1]);
    }

    #[test]
    fn test_rehash_spreads_entries() {
        let indom = InDom::new(1, 1);
        let mut arena = Arena::new();
        let mut chains = HashChains::new(IndexKind::Inst, 2, indom);
        for inst in 0..8u32 {
            let slot = arena.insert(entry(inst, EntryState::Active));
            chains.link(&mut arena, inst, slot);
        }
        chains.rehash(&mut arena, 8, indom, |e| e.inst);
        assert_eq!(chains.size(), 8);
        for bucket in 0..8 {
            assert_eq!(chain_insts(&chains, &arena, bucket), vec![bucket as u32]);
        }
    }
}
