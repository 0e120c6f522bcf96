// ============================================================================
// SECTION 11: CACHE REGISTRY
// ============================================================================
// Maps instance domains to their tables and to their persisted files. Tables
// are created on first reference and live as long as the registry.
// ============================================================================

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::CacheSettings;
use crate::constants::MAX_INSTANCE;
use crate::entry::{Entry, InstId};
use crate::error::{CacheError, CacheResult};
use crate::indom::InDom;
use crate::table::{CacheTable, DirtyFlags};

/// Registry shared between threads; every operation runs under the one lock
pub type SharedRegistry<P = ()> = Arc<Mutex<Registry<P>>>;

/// All instance-domain tables of one process.
#[derive(Debug)]
pub struct Registry<P = ()> {
    tables: AHashMap<InDom, CacheTable<P>>,
    dir: PathBuf,
    max_instance: u32,
}

impl<P> Registry<P> {
    /// Registry persisting under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            tables: AHashMap::new(),
            dir: dir.into(),
            max_instance: MAX_INSTANCE,
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            tables: AHashMap::new(),
            dir: settings.dir.clone(),
            max_instance: settings.max_instance,
        }
    }

    pub fn into_shared(self) -> SharedRegistry<P> {
        Arc::new(Mutex::new(self))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persisted file for `indom`, named `<domain>.<serial>`
    pub fn path_for(&self, indom: InDom) -> PathBuf {
        self.dir.join(indom.to_string())
    }

    /// Table for `indom`, created empty on first reference
    pub fn resolve(&mut self, indom: InDom) -> CacheResult<&mut CacheTable<P>> {
        if indom.is_null() {
            return Err(CacheError::InvalidDomain {
                indom: indom.to_string(),
            });
        }
        let max_instance = self.max_instance;
        Ok(self.tables.entry(indom).or_insert_with(|| {
            debug!(
                target: "cerebro_indom::registry",
                indom = %indom,
                "Creating cache table"
            );
            CacheTable::with_max_instance(indom, max_instance)
        }))
    }

    /// Whether a table exists for `indom`; never creates one
    pub fn check(&self, indom: InDom) -> bool {
        self.tables.contains_key(&indom)
    }

    pub fn get(&self, indom: InDom) -> Option<&CacheTable<P>> {
        self.tables.get(&indom)
    }

    /// Known instance domains in ascending order
    pub fn indoms(&self) -> Vec<InDom> {
        let mut indoms: Vec<InDom> = self.tables.keys().copied().collect();
        indoms.sort();
        indoms
    }

    // ------------------------------------------------------------------------
    // Table operations by domain
    // ------------------------------------------------------------------------

    pub fn store(&mut self, indom: InDom, name: &str, owner: Option<P>) -> CacheResult<InstId> {
        self.resolve(indom)?.store(name, owner)
    }

    pub fn store_by_key(
        &mut self,
        indom: InDom,
        name: &str,
        key: Option<&[u8]>,
        owner: Option<P>,
    ) -> CacheResult<InstId> {
        self.resolve(indom)?.store_by_key(name, key, owner)
    }

    pub fn lookup_by_id(&mut self, indom: InDom, inst: InstId) -> CacheResult<&Entry<P>> {
        self.resolve(indom)?.lookup_by_id(inst)
    }

    pub fn lookup_by_name(&mut self, indom: InDom, name: &str) -> CacheResult<&Entry<P>> {
        self.resolve(indom)?.lookup_by_name(name)
    }

    pub fn lookup_by_key(&mut self, indom: InDom, name: &str, key: Option<&[u8]>) -> CacheResult<&Entry<P>> {
        self.resolve(indom)?.lookup_by_key(name, key)
    }

    pub fn purge(&mut self, indom: InDom, max_age: Duration) -> CacheResult<usize> {
        Ok(self.resolve(indom)?.purge(max_age))
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Load the persisted file for `indom` into its table.
    pub fn load(&mut self, indom: InDom) -> CacheResult<usize> {
        let path = self.path_for(indom);
        self.resolve(indom)?.load(&path)
    }

    pub fn save(&mut self, indom: InDom, which: DirtyFlags) -> CacheResult<usize> {
        let path = self.path_for(indom);
        self.resolve(indom)?.save(&path, which)
    }

    pub fn sync(&mut self, indom: InDom) -> CacheResult<usize> {
        let path = self.path_for(indom);
        self.resolve(indom)?.sync(&path)
    }

    /// Save every table with any of `which` dirty, returning the total
    /// record count. Stops at the first failure.
    pub fn save_all(&mut self, which: DirtyFlags) -> CacheResult<usize> {
        let mut total = 0;
        for indom in self.indoms() {
            total += self.save(indom, which)?;
        }
        if total > 0 {
            info!(
                target: "cerebro_indom::registry",
                tables = self.tables.len(),
                count = total,
                "Saved instance caches"
            );
        }
        Ok(total)
    }

    pub fn sync_all(&mut self) -> CacheResult<usize> {
        self.save_all(DirtyFlags::INSTANCES | DirtyFlags::STAMPS)
    }

    /// Dump every table in domain order
    pub fn dump_all<W: Write>(&self, out: &mut W, with_hash: bool) -> io::Result<()> {
        for indom in self.indoms() {
            if let Some(table) = self.tables.get(&indom) {
                table.dump(out, with_hash)?;
            }
        }
        Ok(())
    }
}
