// ============================================================================
// SECTION 7: CACHE TABLE
// ============================================================================
// One table per instance domain: the entries in ascending instance order plus
// two chained hash indices (by instance id, by significant name prefix) kept
// in lock-step with the list. Operations here never touch the filesystem;
// see `persist` for load/save.
//
// A table is single-threaded: every mutating operation takes `&mut self`,
// and the walk cursor is shared by all callers of `walk_next`.
// ============================================================================

use std::time::Duration;

use bitflags::bitflags;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::constants::{HASH_LOAD_FACTOR, INITIAL_HASH_SIZE, MAX_HASH_SIZE, MAX_INSTANCE, MAX_PROBE};
use crate::entry::{match_len, name_eq, Entry, EntryState, InstId, InstKey, NameMatch};
use crate::error::{CacheError, CacheResult};
use crate::hash::{hash, hash_name};
use crate::index::{Arena, HashChains, IndexKind, Slot};
use crate::indom::InDom;

// ----------------------------------------------------------------------------
// 7.1 Table Modes & Flags
// ----------------------------------------------------------------------------

bitflags! {
    /// Dirty state consulted by save, plus the string-cache mode bit.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u8 {
        /// Entries added, culled or resized since the last save
        const INSTANCES = 0b001;
        /// Entries (re)activated with a zero stamp since the last save
        const STAMPS    = 0b010;
        /// Whole names are significant and the table is never persisted
        const STRINGS   = 0b100;
    }
}

/// How id-less stores pick an instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertMode {
    /// One past the highest identifier in the table
    Append,
    /// Lowest identifier not present in the table
    ReuseLowest,
}

impl InsertMode {
    pub fn as_code(&self) -> u8 {
        match self {
            InsertMode::Append => 0,
            InsertMode::ReuseLowest => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(InsertMode::Append),
            1 => Some(InsertMode::ReuseLowest),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// 7.2 Cache Table Structure
// ----------------------------------------------------------------------------

/// Instance cache for one instance domain.
///
/// `P` is the caller's per-instance owner value. The table stores it and
/// hands references back out; it never inspects it.
#[derive(Debug)]
pub struct CacheTable<P = ()> {
    pub(crate) indom: InDom,
    pub(crate) arena: Arena<P>,
    /// Slots in ascending instance order
    pub(crate) order: Vec<Slot>,
    pub(crate) by_inst: HashChains,
    pub(crate) by_name: HashChains,
    pub(crate) insert_mode: InsertMode,
    pub(crate) max_instance: u32,
    pub(crate) dirty: DirtyFlags,
    /// Position in `order` of the next entry `walk_next` returns
    cursor: usize,
    /// Successful key allocations by number of probes taken
    pub(crate) probe_histogram: [u64; MAX_PROBE],
}

impl<P> CacheTable<P> {
    /// Create an empty table
    pub fn new(indom: InDom) -> Self {
        Self::with_max_instance(indom, MAX_INSTANCE)
    }

    /// Create an empty table with a custom identifier bound
    pub fn with_max_instance(indom: InDom, max_instance: u32) -> Self {
        Self {
            indom,
            arena: Arena::new(),
            order: Vec::new(),
            by_inst: HashChains::new(IndexKind::Inst, INITIAL_HASH_SIZE, indom),
            by_name: HashChains::new(IndexKind::Name, INITIAL_HASH_SIZE, indom),
            insert_mode: InsertMode::Append,
            max_instance: max_instance.clamp(1, MAX_INSTANCE),
            dirty: DirtyFlags::empty(),
            cursor: 0,
            probe_histogram: [0; MAX_PROBE],
        }
    }

    #[inline]
    pub fn indom(&self) -> InDom {
        self.indom
    }

    #[inline]
    pub fn insert_mode(&self) -> InsertMode {
        self.insert_mode
    }

    #[inline]
    pub fn max_instance(&self) -> u32 {
        self.max_instance
    }

    #[inline]
    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    #[inline]
    pub fn is_string_cache(&self) -> bool {
        self.dirty.contains(DirtyFlags::STRINGS)
    }

    /// Current bucket count of each index
    #[inline]
    pub fn hash_size(&self) -> usize {
        self.by_inst.size()
    }

    /// Successful key-based allocations, indexed by probe count minus one
    pub fn probe_histogram(&self) -> &[u64; MAX_PROBE] {
        &self.probe_histogram
    }

    /// Entries in ascending instance order, culled ones included
    pub fn iter(&self) -> impl Iterator<Item = &Entry<P>> + '_ {
        self.order.iter().map(move |&slot| self.arena.entry(slot))
    }

    // ------------------------------------------------------------------------
    // Index lookups
    // ------------------------------------------------------------------------

    pub(crate) fn find_inst(&self, inst: InstId) -> Option<Slot> {
        let bucket = self.by_inst.bucket(inst);
        self.by_inst
            .chain(&self.arena, bucket)
            .find(|(_, e)| e.state.is_live() && e.inst == inst)
            .map(|(slot, _)| slot)
    }

    /// First live entry whose name is not a `NoMatch` for `name`
    pub(crate) fn find_name(&self, name: &str) -> Option<(Slot, NameMatch)> {
        let len = match_len(name, self.is_string_cache());
        let bucket = self.by_name.bucket(hash_name(name, len));
        self.by_name
            .chain(&self.arena, bucket)
            .filter(|(_, e)| e.state.is_live())
            .find_map(|(slot, e)| match name_eq(&e.name, e.match_len, name, len) {
                NameMatch::NoMatch => None,
                found => Some((slot, found)),
            })
    }

    /// Resolve a name to its slot, reporting short-name conflicts
    fn find_name_strict(&self, name: &str) -> CacheResult<Option<Slot>> {
        match self.find_name(name) {
            None => Ok(None),
            Some((slot, NameMatch::Match)) => Ok(Some(slot)),
            Some((slot, _)) => {
                let existing = &self.arena.entry(slot).name;
                warn!(
                    target: "cerebro_indom::cache",
                    indom = %self.indom,
                    name,
                    existing = %existing,
                    "Short name collides with a different instance"
                );
                Err(CacheError::conflict(
                    self.indom,
                    format!("name '{}' collides with existing instance '{}'", name, existing),
                ))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------------

    /// Names are stored one per line in the cache file, so they must be
    /// non-empty and free of line breaks.
    fn check_name(&self, name: &str) -> CacheResult<()> {
        if name.is_empty() || name.contains(['\n', '\r']) {
            return Err(CacheError::InvalidState {
                indom: self.indom,
                message: format!("unstorable instance name {:?}", name),
            });
        }
        Ok(())
    }

    fn copy_name(&self, name: &str) -> CacheResult<CompactString> {
        let mut owned = String::new();
        owned.try_reserve_exact(name.len()).map_err(|_| CacheError::OutOfMemory {
            indom: self.indom,
            message: format!("{} bytes for name '{}'", name.len(), name),
        })?;
        owned.push_str(name);
        Ok(CompactString::from(owned))
    }

    fn copy_key(&self, key: &[u8]) -> CacheResult<InstKey> {
        let mut owned = InstKey::new();
        owned.try_reserve_exact(key.len()).map_err(|_| CacheError::OutOfMemory {
            indom: self.indom,
            message: format!("{} bytes for key", key.len()),
        })?;
        owned.extend_from_slice(key);
        Ok(owned)
    }

    /// Pick an identifier for an id-less insert and the list position it
    /// belongs at.
    fn allocate_inst(&mut self) -> CacheResult<(InstId, usize)> {
        if self.insert_mode == InsertMode::Append {
            match self.order.last() {
                None => return Ok((0, 0)),
                Some(&slot) => {
                    let next = self.arena.entry(slot).inst as u64 + 1;
                    if next < self.max_instance as u64 {
                        return Ok((next as InstId, self.order.len()));
                    }
                    debug!(
                        target: "cerebro_indom::cache",
                        indom = %self.indom,
                        max_instance = self.max_instance,
                        "Instance identifiers wrapped, switching to reuse mode"
                    );
                    self.insert_mode = InsertMode::ReuseLowest;
                }
            }
        }

        // First gap in the ascending list. Culled entries still hold their
        // identifier until the list is reorganized.
        let mut candidate: InstId = 0;
        let mut pos = self.order.len();
        for (i, &slot) in self.order.iter().enumerate() {
            let inst = self.arena.entry(slot).inst;
            if candidate < inst {
                pos = i;
                break;
            }
            if inst == candidate {
                candidate += 1;
            }
        }
        if candidate >= self.max_instance {
            warn!(
                target: "cerebro_indom::cache",
                indom = %self.indom,
                max_instance = self.max_instance,
                "Too many instances"
            );
            return Err(CacheError::AllocationExhausted {
                indom: self.indom,
                message: format!("no free identifier below {}", self.max_instance),
            });
        }
        Ok((candidate, pos))
    }

    /// Add a new entry to the list and both indices. The entry starts
    /// Inactive with a zero stamp.
    pub(crate) fn insert(
        &mut self,
        name: &str,
        inst: Option<InstId>,
        key: Option<&[u8]>,
    ) -> CacheResult<Slot> {
        self.check_name(name)?;
        let owned_name = self.copy_name(name)?;
        let owned_key = key.map(|k| self.copy_key(k)).transpose()?;

        let (inst, pos) = match inst {
            Some(inst) => {
                let pos = self
                    .order
                    .partition_point(|&slot| self.arena.entry(slot).inst <= inst);
                (inst, pos)
            }
            None => self.allocate_inst()?,
        };

        let len = match_len(name, self.is_string_cache());
        let slot = self.arena.insert(Entry::new(inst, owned_name, len, owned_key));
        self.order.insert(pos, slot);
        if pos < self.cursor {
            self.cursor += 1;
        }

        let size = self.by_inst.size();
        if size < MAX_HASH_SIZE && self.order.len() > HASH_LOAD_FACTOR * size {
            self.reorganize(true);
        }

        self.by_inst.link(&mut self.arena, inst, slot);
        self.by_name.link(&mut self.arena, hash_name(name, len), slot);

        trace!(
            target: "cerebro_indom::cache",
            indom = %self.indom,
            inst,
            name,
            "Instance inserted"
        );
        Ok(slot)
    }

    fn activate(&mut self, slot: Slot, owner: Option<P>) -> InstId {
        let entry = self.arena.entry_mut(slot);
        entry.state = EntryState::Active;
        entry.owner = owner;
        entry.stamp = 0;
        self.dirty |= DirtyFlags::STAMPS;
        entry.inst
    }

    // ------------------------------------------------------------------------
    // 7.3 Store Operations
    // ------------------------------------------------------------------------

    /// Add or reactivate the instance called `name`, returning its id.
    pub fn store(&mut self, name: &str, owner: Option<P>) -> CacheResult<InstId> {
        self.check_name(name)?;
        let slot = match self.find_name_strict(name)? {
            Some(slot) => slot,
            None => {
                let slot = self.insert(name, None, None)?;
                self.dirty |= DirtyFlags::INSTANCES;
                slot
            }
        };
        Ok(self.activate(slot, owner))
    }

    /// Mark an existing instance Inactive by name.
    pub fn store_hidden(&mut self, name: &str) -> CacheResult<InstId> {
        let slot = self
            .find_name_strict(name)?
            .ok_or_else(|| CacheError::not_found(self.indom, format!("name '{}'", name)))?;
        let entry = self.arena.entry_mut(slot);
        entry.state = EntryState::Inactive;
        Ok(entry.inst)
    }

    /// Cull an existing instance by name.
    pub fn cull_name(&mut self, name: &str) -> CacheResult<InstId> {
        let slot = self
            .find_name_strict(name)?
            .ok_or_else(|| CacheError::not_found(self.indom, format!("name '{}'", name)))?;
        let entry = self.arena.entry_mut(slot);
        entry.state = EntryState::Empty;
        let inst = entry.inst;
        self.dirty |= DirtyFlags::INSTANCES;
        Ok(inst)
    }

    /// Add or reactivate an instance whose identifier is derived from `key`
    /// (or from the name bytes when the key is missing or empty).
    ///
    /// The same name and key always yield the same identifier for the same
    /// prior table contents. A name already bound to a different key, or a
    /// key already bound to a different name, is an `InstanceConflict`.
    pub fn store_by_key(&mut self, name: &str, key: Option<&[u8]>, owner: Option<P>) -> CacheResult<InstId> {
        self.check_name(name)?;
        let key = key.filter(|k| !k.is_empty());
        let key_bytes = key.unwrap_or(name.as_bytes());

        if let Some(slot) = self.find_name_strict(name)? {
            let entry = self.arena.entry(slot);
            if entry.key_bytes() != key_bytes {
                warn!(
                    target: "cerebro_indom::cache",
                    indom = %self.indom,
                    inst = entry.inst,
                    name,
                    "Instance name already bound to a different key"
                );
                return Err(CacheError::conflict(
                    self.indom,
                    format!("name '{}' is bound to a different key", name),
                ));
            }
            return Ok(self.activate(slot, owner));
        }

        let len = match_len(name, self.is_string_cache());
        let mut seed = 0u32;
        for probe in 1..=MAX_PROBE {
            seed = hash(key_bytes, seed);
            let candidate = self.candidate_inst(seed);

            let Some(slot) = self.find_inst(candidate) else {
                let slot = self.insert(name, Some(candidate), key)?;
                self.probe_histogram[probe - 1] += 1;
                self.insert_mode = InsertMode::ReuseLowest;
                self.dirty |= DirtyFlags::INSTANCES;
                debug!(
                    target: "cerebro_indom::cache",
                    indom = %self.indom,
                    inst = candidate,
                    name,
                    probes = probe,
                    "Instance allocated from key"
                );
                return Ok(self.activate(slot, owner));
            };

            let entry = self.arena.entry(slot);
            let same_name = name_eq(&entry.name, entry.match_len, name, len);
            let same_key = entry.key_bytes() == key_bytes;
            match (same_name, same_key) {
                (NameMatch::Match, true) => return Ok(self.activate(slot, owner)),
                (NameMatch::NoMatch, false) => {
                    trace!(
                        target: "cerebro_indom::cache",
                        indom = %self.indom,
                        inst = candidate,
                        probe,
                        "Key probe collided, rehashing"
                    );
                }
                _ => {
                    warn!(
                        target: "cerebro_indom::cache",
                        indom = %self.indom,
                        inst = candidate,
                        name,
                        existing = %entry.name,
                        "Key probe hit a conflicting instance"
                    );
                    return Err(CacheError::conflict(
                        self.indom,
                        format!(
                            "'{}' and existing instance '{}' disagree on name or key",
                            name, entry.name
                        ),
                    ));
                }
            }
        }

        warn!(
            target: "cerebro_indom::cache",
            indom = %self.indom,
            name,
            probes = MAX_PROBE,
            "Key probing exhausted"
        );
        Err(CacheError::AllocationExhausted {
            indom: self.indom,
            message: format!("no free identifier for '{}' after {} probes", name, MAX_PROBE),
        })
    }

    /// Map a probe hash onto an identifier below `max_instance`
    #[inline]
    fn candidate_inst(&self, seed: u32) -> InstId {
        let inst = seed & MAX_INSTANCE;
        if inst >= self.max_instance {
            inst % self.max_instance
        } else {
            inst
        }
    }

    // ------------------------------------------------------------------------
    // 7.4 Lookup Operations
    // ------------------------------------------------------------------------

    /// Look up a live instance by identifier.
    pub fn lookup_by_id(&self, inst: InstId) -> CacheResult<&Entry<P>> {
        self.find_inst(inst)
            .map(|slot| self.arena.entry(slot))
            .ok_or_else(|| CacheError::not_found(self.indom, format!("instance {}", inst)))
    }

    /// Look up a live instance by name; a short-name collision is an error.
    pub fn lookup_by_name(&self, name: &str) -> CacheResult<&Entry<P>> {
        self.find_name_strict(name)?
            .map(|slot| self.arena.entry(slot))
            .ok_or_else(|| CacheError::not_found(self.indom, format!("name '{}'", name)))
    }

    /// Find a keyed instance without allocating. The name index is tried
    /// first; the key hash sequence is replayed only when the name is absent.
    pub fn lookup_by_key(&self, name: &str, key: Option<&[u8]>) -> CacheResult<&Entry<P>> {
        let key_bytes = key.filter(|k| !k.is_empty()).unwrap_or(name.as_bytes());
        let len = match_len(name, self.is_string_cache());
        let miss = || CacheError::not_found(self.indom, format!("key for '{}'", name));

        if let Some(slot) = self.find_name_strict(name)? {
            let entry = self.arena.entry(slot);
            return if entry.key_bytes() == key_bytes {
                Ok(entry)
            } else {
                Err(miss())
            };
        }

        let mut seed = 0u32;
        for _ in 0..MAX_PROBE {
            seed = hash(key_bytes, seed);
            let slot = self.find_inst(self.candidate_inst(seed)).ok_or_else(miss)?;
            let entry = self.arena.entry(slot);
            if entry.key_bytes() == key_bytes
                && name_eq(&entry.name, entry.match_len, name, len) == NameMatch::Match
            {
                return Ok(entry);
            }
        }
        Err(miss())
    }

    // ------------------------------------------------------------------------
    // 7.5 State Transitions
    // ------------------------------------------------------------------------

    fn live_slot(&self, inst: InstId) -> CacheResult<Slot> {
        self.find_inst(inst)
            .ok_or_else(|| CacheError::not_found(self.indom, format!("instance {}", inst)))
    }

    pub fn set_active(&mut self, inst: InstId) -> CacheResult<()> {
        let slot = self.live_slot(inst)?;
        self.arena.entry_mut(slot).state = EntryState::Active;
        Ok(())
    }

    pub fn set_inactive(&mut self, inst: InstId) -> CacheResult<()> {
        let slot = self.live_slot(inst)?;
        self.arena.entry_mut(slot).state = EntryState::Inactive;
        Ok(())
    }

    /// Mark one instance Empty; it is reclaimed by the next reorganize.
    pub fn cull(&mut self, inst: InstId) -> CacheResult<()> {
        let slot = self.live_slot(inst)?;
        self.arena.entry_mut(slot).state = EntryState::Empty;
        self.dirty |= DirtyFlags::INSTANCES;
        Ok(())
    }

    fn transition_all(&mut self, from: impl Fn(EntryState) -> bool, to: EntryState) -> usize {
        let mut count = 0;
        for &slot in &self.order {
            let entry = self.arena.entry_mut(slot);
            if from(entry.state) {
                entry.state = to;
                count += 1;
            }
        }
        count
    }

    /// Flip every Inactive entry to Active, returning how many changed.
    pub fn mark_all_active(&mut self) -> usize {
        self.transition_all(|s| s == EntryState::Inactive, EntryState::Active)
    }

    /// Flip every Active entry to Inactive, returning how many changed.
    pub fn mark_all_inactive(&mut self) -> usize {
        self.transition_all(|s| s == EntryState::Active, EntryState::Inactive)
    }

    /// Cull every live entry, returning how many changed.
    pub fn cull_all(&mut self) -> usize {
        let count = self.transition_all(|s| s.is_live(), EntryState::Empty);
        if count > 0 {
            self.dirty |= DirtyFlags::INSTANCES;
        }
        count
    }

    /// Cull entries last saved more than `max_age` ago. Entries activated
    /// since the last save carry a zero stamp and are never purged.
    pub fn purge(&mut self, max_age: Duration) -> usize {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        self.purge_older_than(now_secs().saturating_sub(max_age))
    }

    /// Cull entries whose nonzero stamp is before `cutoff` (epoch seconds).
    pub fn purge_older_than(&mut self, cutoff: i64) -> usize {
        let mut count = 0;
        for &slot in &self.order {
            let entry = self.arena.entry_mut(slot);
            if entry.state.is_live() && entry.stamp != 0 && entry.stamp < cutoff {
                entry.state = EntryState::Empty;
                count += 1;
            }
        }
        if count > 0 {
            self.dirty |= DirtyFlags::INSTANCES;
            debug!(
                target: "cerebro_indom::cache",
                indom = %self.indom,
                count,
                cutoff,
                "Purged stale instances"
            );
        }
        count
    }

    // ------------------------------------------------------------------------
    // 7.6 Table Configuration
    // ------------------------------------------------------------------------

    /// Lower or raise the identifier bound. Fails if a live instance would
    /// fall outside it.
    pub fn resize(&mut self, max_instance: u32) -> CacheResult<()> {
        if max_instance == 0 || max_instance > MAX_INSTANCE {
            return Err(CacheError::SizeExceeded {
                indom: self.indom,
                inst: max_instance,
                limit: MAX_INSTANCE,
            });
        }
        if let Some(entry) = self
            .iter()
            .find(|e| e.state.is_live() && e.inst >= max_instance)
        {
            return Err(CacheError::SizeExceeded {
                indom: self.indom,
                inst: entry.inst,
                limit: max_instance,
            });
        }
        self.max_instance = max_instance;
        self.dirty |= DirtyFlags::INSTANCES;
        Ok(())
    }

    /// Permanently switch id-less stores to lowest-free-identifier reuse.
    pub fn set_reuse(&mut self) {
        self.insert_mode = InsertMode::ReuseLowest;
    }

    /// Treat whole names as significant and never persist this table. Only
    /// allowed before the first entry exists.
    pub fn enable_string_cache(&mut self) -> CacheResult<()> {
        if !self.order.is_empty() {
            return Err(CacheError::InvalidState {
                indom: self.indom,
                message: "string cache mode must be set before any instance is stored".into(),
            });
        }
        self.dirty |= DirtyFlags::STRINGS;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 7.7 Reorganization
    // ------------------------------------------------------------------------

    /// Optionally double both indices, then reorder every chain Active
    /// before Inactive, unlink culled entries and release them.
    pub fn reorganize(&mut self, resize: bool) {
        if resize {
            let new_size = self.by_inst.size() << 1;
            self.by_inst
                .rehash(&mut self.arena, new_size, self.indom, |e| e.inst);
            self.by_name
                .rehash(&mut self.arena, new_size, self.indom, |e| hash_name(&e.name, e.match_len));
            debug!(
                target: "cerebro_indom::cache",
                indom = %self.indom,
                hash_size = new_size,
                "Hash indices resized"
            );
        }
        self.by_inst.compact(&mut self.arena);
        self.by_name.compact(&mut self.arena);

        let arena = &mut self.arena;
        let cursor = self.cursor;
        let mut kept_before_cursor = 0;
        let mut position = 0;
        self.order.retain(|&slot| {
            let live = arena.entry(slot).state.is_live();
            if live && position < cursor {
                kept_before_cursor += 1;
            }
            position += 1;
            if !live {
                arena.remove(slot);
            }
            live
        });
        self.cursor = kept_before_cursor;
    }

    // ------------------------------------------------------------------------
    // 7.8 Walk & Counting
    // ------------------------------------------------------------------------

    /// Reset the walk cursor to the first entry.
    pub fn walk_rewind(&mut self) {
        self.cursor = 0;
    }

    /// Next entry in instance order, whatever its state.
    pub fn walk_next(&mut self) -> Option<&Entry<P>> {
        let slot = *self.order.get(self.cursor)?;
        self.cursor += 1;
        Some(self.arena.entry(slot))
    }

    /// Next Active instance identifier, skipping everything else.
    pub fn walk_next_active(&mut self) -> Option<InstId> {
        while let Some(entry) = self.walk_next() {
            if entry.state == EntryState::Active {
                return Some(entry.inst);
            }
        }
        None
    }

    /// Entries on the list, including culled ones not yet reclaimed
    pub fn size(&self) -> usize {
        self.order.len()
    }

    pub fn size_active(&self) -> usize {
        self.iter().filter(|e| e.state == EntryState::Active).count()
    }

    pub fn size_inactive(&self) -> usize {
        self.iter().filter(|e| e.state == EntryState::Inactive).count()
    }
}

/// Wall-clock seconds since the Unix epoch
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table() -> CacheTable<()> {
        CacheTable::new(InDom::new(60, 0))
    }

    fn insts(t: &CacheTable<()>) -> Vec<u32> {
        t.iter().map(|e| e.inst).collect()
    }

    fn chains_hold_no_empty(t: &CacheTable<()>) -> bool {
        (0..t.hash_size()).all(|b| {
            t.by_inst.chain(&t.arena, b).all(|(_, e)| e.state.is_live())
                && t.by_name.chain(&t.arena, b).all(|(_, e)| e.state.is_live())
        })
    }

    #[test]
    fn test_store_appends_identifiers() {
        let mut t = table();
        assert_eq!(t.store("sda", None).unwrap(), 0);
        assert_eq!(t.store("sdb", None).unwrap(), 1);
        assert_eq!(t.store("sdc", None).unwrap(), 2);
        assert_eq!(t.store("sdb", None).unwrap(), 1);
        assert_eq!(t.size(), 3);
        assert_eq!(t.size_active(), 3);
        assert!(t.dirty().contains(DirtyFlags::INSTANCES | DirtyFlags::STAMPS));
    }

    #[test]
    fn test_store_keeps_owner() {
        let mut t: CacheTable<String> = CacheTable::new(InDom::new(60, 0));
        let id = t.store("eth0", Some("netdev".to_string())).unwrap();
        assert_eq!(t.lookup_by_id(id).unwrap().owner.as_deref(), Some("netdev"));

        t.store("eth0", Some("netdev2".to_string())).unwrap();
        assert_eq!(t.lookup_by_name("eth0").unwrap().owner.as_deref(), Some("netdev2"));
    }

    #[test]
    fn test_short_name_matching() {
        let mut t = table();
        let id = t.store("1234 /usr/bin/sshd -D", None).unwrap();
        assert_eq!(t.lookup_by_name("1234").unwrap().inst, id);
        assert_eq!(t.lookup_by_name("1234 /usr/bin/sshd -D").unwrap().inst, id);

        let err = t.store("1234 /usr/bin/bash", None).unwrap_err();
        assert!(matches!(err, CacheError::InstanceConflict { .. }));
        assert_eq!(t.lookup_by_id(id).unwrap().name, "1234 /usr/bin/sshd -D");
        assert_eq!(t.size(), 1);
    }

    #[test]
    fn test_string_cache_uses_whole_name() {
        let mut t = table();
        t.enable_string_cache().unwrap();
        let a = t.store("1234 /usr/bin/sshd", None).unwrap();
        let b = t.store("1234 /usr/bin/bash", None).unwrap();
        assert_ne!(a, b);
        assert!(t.lookup_by_name("1234").is_err());
    }

    #[test]
    fn test_string_cache_requires_empty_table() {
        let mut t = table();
        t.store("a", None).unwrap();
        assert!(matches!(
            t.enable_string_cache(),
            Err(CacheError::InvalidState { .. })
        ));
        assert!(!t.is_string_cache());
    }

    #[test]
    fn test_reuse_mode_fills_gaps() {
        let mut t = table();
        for name in ["a", "b", "c", "d"] {
            t.store(name, None).unwrap();
        }
        t.cull(1).unwrap();
        t.reorganize(false);
        // Append mode ignores the gap.
        assert_eq!(t.store("e", None).unwrap(), 4);

        t.set_reuse();
        assert_eq!(t.store("f", None).unwrap(), 1);
        assert_eq!(t.store("g", None).unwrap(), 5);
        assert_eq!(insts(&t), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_append_wraps_into_reuse() {
        let mut t = CacheTable::<()>::with_max_instance(InDom::new(60, 0), 3);
        assert_eq!(t.store("a", None).unwrap(), 0);
        assert_eq!(t.store("b", None).unwrap(), 1);
        assert_eq!(t.store("c", None).unwrap(), 2);
        t.cull(0).unwrap();
        t.reorganize(false);

        assert_eq!(t.store("d", None).unwrap(), 0);
        assert_eq!(t.insert_mode(), InsertMode::ReuseLowest);
        assert!(matches!(
            t.store("e", None),
            Err(CacheError::AllocationExhausted { .. })
        ));
    }

    #[test]
    fn test_culled_identifier_held_until_reorganize() {
        let mut t = table();
        t.set_reuse();
        t.store("a", None).unwrap();
        t.store("b", None).unwrap();
        t.cull(0).unwrap();
        assert_eq!(t.store("c", None).unwrap(), 2);
        t.reorganize(false);
        assert_eq!(t.store("d", None).unwrap(), 0);
    }

    #[test]
    fn test_store_by_key_is_idempotent() {
        let mut t = table();
        let key: &[u8] = &[0x01, 0x02];
        let x = t.store_by_key("disk0", Some(key), None).unwrap();
        assert_eq!(t.store_by_key("disk0", Some(key), None).unwrap(), x);
        assert!(x <= MAX_INSTANCE);

        let err = t.store_by_key("disk0", Some(&[0x03u8, 0x04][..]), None).unwrap_err();
        assert!(matches!(err, CacheError::InstanceConflict { .. }));
        assert_eq!(t.size(), 1);
        assert_eq!(t.lookup_by_id(x).unwrap().key.as_deref(), Some(key));
        assert_eq!(t.insert_mode(), InsertMode::ReuseLowest);
    }

    #[test]
    fn test_store_by_key_is_deterministic() {
        let key: &[u8] = b"\x08\x00\x00\x00\x10\x00";
        let first = table().store_by_key("nvme0n1", Some(key), None).unwrap();
        for _ in 0..5 {
            assert_eq!(table().store_by_key("nvme0n1", Some(key), None).unwrap(), first);
        }
        assert_eq!(first, hash(key, 0) & MAX_INSTANCE);
    }

    #[test]
    fn test_store_by_key_rehashes_on_collision() {
        let key: &[u8] = b"shared-handle";
        let first = hash(key, 0) & MAX_INSTANCE;
        let second = hash(key, hash(key, 0)) & MAX_INSTANCE;

        // Occupy the first probe slot with an unrelated instance.
        let mut t = table();
        t.insert("squatter", Some(first), Some(&b"other"[..])).unwrap();
        t.arena.entry_mut(t.find_inst(first).unwrap()).state = EntryState::Active;

        let id = t.store_by_key("mine", Some(key), None).unwrap();
        assert_eq!(id, second);
        assert_eq!(t.probe_histogram()[1], 1);
        assert_eq!(t.lookup_by_key("mine", Some(key)).unwrap().inst, second);
    }

    #[test]
    fn test_store_by_key_same_key_other_name_conflicts() {
        let key: &[u8] = b"handle";
        let first = hash(key, 0) & MAX_INSTANCE;
        let mut t = table();
        t.insert("theirs", Some(first), Some(key)).unwrap();

        let err = t.store_by_key("mine", Some(key), None).unwrap_err();
        assert!(matches!(err, CacheError::InstanceConflict { .. }));
    }

    #[test]
    fn test_store_by_key_without_key_uses_name() {
        let mut t = table();
        let id = t.store_by_key("eth0", None, None).unwrap();
        assert_eq!(id, hash(b"eth0", 0) & MAX_INSTANCE);
        assert!(t.lookup_by_id(id).unwrap().key.is_none());
        assert_eq!(t.lookup_by_key("eth0", None).unwrap().inst, id);
    }

    #[test]
    fn test_store_by_key_empty_key_uses_name() {
        let mut t = table();
        let id = t.store_by_key("eth0", Some(&[0u8; 0][..]), None).unwrap();
        assert_eq!(id, table().store_by_key("eth0", None, None).unwrap());
        assert!(t.lookup_by_id(id).unwrap().key.is_none());
        assert_eq!(t.store_by_key("eth0", None, None).unwrap(), id);
        assert_eq!(t.lookup_by_key("eth0", Some(&[0u8; 0][..])).unwrap().inst, id);
    }

    #[test]
    fn test_lookup_by_key_after_earlier_slot_culled() {
        let key: &[u8] = b"shared-handle";
        let first = hash(key, 0) & MAX_INSTANCE;

        let mut t = table();
        t.insert("squatter", Some(first), Some(&b"other"[..])).unwrap();
        t.arena.entry_mut(t.find_inst(first).unwrap()).state = EntryState::Active;
        let id = t.store_by_key("mine", Some(key), None).unwrap();
        assert_ne!(id, first);

        t.cull(first).unwrap();
        t.reorganize(false);
        assert!(t.lookup_by_id(first).is_err());
        assert_eq!(t.lookup_by_key("mine", Some(key)).unwrap().inst, id);
        assert!(t.lookup_by_key("mine", Some(&b"other"[..])).is_err());
        assert_eq!(t.store_by_key("mine", Some(key), None).unwrap(), id);
    }

    #[test]
    fn test_unstorable_names_rejected() {
        let mut t = table();
        for name in ["", "bad\nname", "bad\r"] {
            assert!(matches!(t.store(name, None), Err(CacheError::InvalidState { .. })));
            assert!(matches!(
                t.store_by_key(name, Some(&b"k"[..]), None),
                Err(CacheError::InvalidState { .. })
            ));
        }
        assert_eq!(t.size(), 0);
        assert!(t.dirty().is_empty());
    }

    #[test]
    fn test_store_by_key_small_id_space() {
        let mut t = CacheTable::<()>::with_max_instance(InDom::new(60, 0), 1000);
        let id = t.store_by_key("eth0", Some(&b"k"[..]), None).unwrap();
        assert!(id < 1000);
    }

    #[test]
    fn test_lookup_misses() {
        let mut t = table();
        t.store("a", None).unwrap();
        assert!(matches!(t.lookup_by_id(7), Err(CacheError::NotFound { .. })));
        assert!(matches!(t.lookup_by_name("z"), Err(CacheError::NotFound { .. })));
        assert!(matches!(
            t.lookup_by_key("a", Some(&b"nope"[..])),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn test_lookup_skips_culled() {
        let mut t = table();
        let id = t.store("a", None).unwrap();
        t.cull(id).unwrap();
        assert!(t.lookup_by_id(id).is_err());
        assert!(t.lookup_by_name("a").is_err());
        assert_eq!(t.size(), 1);
    }

    #[test]
    fn test_bulk_transitions() {
        let mut t = table();
        for name in ["a", "b", "c"] {
            t.store(name, None).unwrap();
        }
        t.dirty = DirtyFlags::empty();

        assert_eq!(t.mark_all_inactive(), 3);
        assert_eq!(t.size_inactive(), 3);
        t.store("b", None).unwrap();
        assert_eq!(t.size_active(), 1);
        assert_eq!(t.mark_all_active(), 2);
        assert!(!t.dirty().contains(DirtyFlags::INSTANCES));

        assert_eq!(t.cull_all(), 3);
        assert_eq!(t.cull_all(), 0);
        assert!(t.dirty().contains(DirtyFlags::INSTANCES));
    }

    #[test]
    fn test_hide_and_cull_by_name() {
        let mut t = table();
        let id = t.store("a", None).unwrap();
        assert_eq!(t.store_hidden("a").unwrap(), id);
        assert_eq!(t.lookup_by_id(id).unwrap().state, EntryState::Inactive);
        assert_eq!(t.cull_name("a").unwrap(), id);
        assert!(matches!(t.store_hidden("a"), Err(CacheError::NotFound { .. })));
    }

    #[test]
    fn test_purge_exempts_unsaved() {
        let mut t = table();
        let warm = t.store("warm", None).unwrap();
        let old = t.store("old", None).unwrap();
        let now = now_secs();
        t.arena.entry_mut(t.find_inst(old).unwrap()).stamp = now - 100;

        assert_eq!(t.purge(Duration::from_secs(50)), 1);
        assert!(t.lookup_by_id(old).is_err());
        assert!(t.lookup_by_id(warm).is_ok());
        assert_eq!(t.purge_older_than(i64::MAX), 0);
    }

    #[test]
    fn test_resize_bounds() {
        let mut t = table();
        for i in 0..12 {
            t.store(&format!("inst{}", i), None).unwrap();
        }
        assert!(t.resize(1234).is_ok());
        assert_eq!(t.max_instance(), 1234);
        assert!(matches!(t.resize(10), Err(CacheError::SizeExceeded { inst: 10, .. })));
        assert!(t.resize(0).is_err());
        assert!(t.resize(MAX_INSTANCE + 1).is_err());
        assert_eq!(t.max_instance(), 1234);
    }

    #[test]
    fn test_reorganize_compacts() {
        let mut t = table();
        for i in 0..10 {
            t.store(&format!("inst{}", i), None).unwrap();
        }
        for inst in [1, 3, 5, 7] {
            t.cull(inst).unwrap();
        }
        t.reorganize(false);
        assert_eq!(t.size(), 6);
        assert_eq!(insts(&t), vec![0, 2, 4, 6, 8, 9]);
        assert!(chains_hold_no_empty(&t));
        assert_eq!(t.lookup_by_name("inst4").unwrap().inst, 4);
    }

    #[test]
    fn test_indices_grow_with_load() {
        let mut t = table();
        for i in 0..(INITIAL_HASH_SIZE * HASH_LOAD_FACTOR + 1) {
            t.store(&format!("inst{}", i), None).unwrap();
        }
        assert_eq!(t.hash_size(), INITIAL_HASH_SIZE * 2);
        for i in 0..t.size() {
            let name = format!("inst{}", i);
            assert_eq!(t.lookup_by_name(&name).unwrap().inst, i as u32);
            assert_eq!(t.lookup_by_id(i as u32).unwrap().name, name);
        }
    }

    #[test]
    fn test_walk_visits_everything_in_order() {
        let mut t = table();
        for name in ["a", "b", "c"] {
            t.store(name, None).unwrap();
        }
        t.set_inactive(1).unwrap();

        t.walk_rewind();
        let mut seen = Vec::new();
        while let Some(e) = t.walk_next() {
            seen.push((e.inst, e.state));
        }
        assert_eq!(
            seen,
            vec![
                (0, EntryState::Active),
                (1, EntryState::Inactive),
                (2, EntryState::Active)
            ]
        );

        t.walk_rewind();
        assert_eq!(t.walk_next_active(), Some(0));
        assert_eq!(t.walk_next_active(), Some(2));
        assert_eq!(t.walk_next_active(), None);
    }

    #[test]
    fn test_walk_cursor_survives_reorganize() {
        let mut t = table();
        for name in ["a", "b", "c", "d"] {
            t.store(name, None).unwrap();
        }
        t.walk_rewind();
        assert_eq!(t.walk_next().map(|e| e.inst), Some(0));
        assert_eq!(t.walk_next().map(|e| e.inst), Some(1));
        t.cull(0).unwrap();
        t.reorganize(false);
        assert_eq!(t.walk_next().map(|e| e.inst), Some(2));
    }

    #[test]
    fn test_walk_visits_entry_stored_at_cursor() {
        let mut t = table();
        for name in ["a", "b", "c", "d"] {
            t.store(name, None).unwrap();
        }
        t.cull(2).unwrap();
        t.reorganize(false);
        t.set_reuse();

        t.walk_rewind();
        assert_eq!(t.walk_next().map(|e| e.inst), Some(0));
        assert_eq!(t.walk_next().map(|e| e.inst), Some(1));
        assert_eq!(t.store("e", None).unwrap(), 2);
        let next = t.walk_next().map(|e| (e.inst, e.name.to_string()));
        assert_eq!(next, Some((2, "e".to_string())));
        assert_eq!(t.walk_next().map(|e| e.inst), Some(3));
        assert!(t.walk_next().is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Store(u8),
        StoreKey(u8),
        Cull(u8),
        Reorganize,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..40).prop_map(Op::Store),
            (0u8..40).prop_map(Op::StoreKey),
            (0u8..60).prop_map(Op::Cull),
            Just(Op::Reorganize),
        ]
    }

    proptest! {
        #[test]
        fn test_entries_stay_sorted(ops in prop::collection::vec(op(), 1..200)) {
            let mut t = table();
            for op in ops {
                match op {
                    Op::Store(n) => { let _ = t.store(&format!("s{}", n), None); }
                    Op::StoreKey(n) => { let _ = t.store_by_key(&format!("k{}", n), Some(&[n, 0xfe][..]), None); }
                    Op::Cull(n) => { let _ = t.cull(n as u32); }
                    Op::Reorganize => t.reorganize(false),
                }
                let ids = insts(&t);
                prop_assert!(ids.windows(2).all(|w| w[0] <= w[1]));
            }
            t.reorganize(false);
            let ids = insts(&t);
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(chains_hold_no_empty(&t));
        }
    }
}
