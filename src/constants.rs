// ============================================================================
// SECTION 2: CONSTANTS & VERSION INFORMATION
// ============================================================================
// Limits and defaults for the instance-domain cache. The identifier bounds
// follow the 31-bit instance identifier carried on the wire.
// ============================================================================

/// Crate version - follows semantic versioning
pub const INDOM_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const INDOM_NAME: &str = "cerebro-indom";
pub const INDOM_FULL_NAME: &str = "Cerebro Instance Domain Cache";

// ----------------------------------------------------------------------------
// Instance Identifiers
// ----------------------------------------------------------------------------

/// Largest positive 31-bit value; the default upper bound for allocated ids
pub const MAX_INSTANCE: u32 = 0x7fff_ffff;

/// Number of attempts key-based allocation makes before giving up
pub const MAX_PROBE: usize = 10;

// ----------------------------------------------------------------------------
// Hash Indices
// ----------------------------------------------------------------------------

/// Initial bucket count for both indices of a fresh table
pub const INITIAL_HASH_SIZE: usize = 16;

/// Indices stop growing once they reach this many buckets
pub const MAX_HASH_SIZE: usize = 1024;

/// Grow when the entry count exceeds this multiple of the bucket count
pub const HASH_LOAD_FACTOR: usize = 4;

/// Jenkins' golden ratio seed for the mixing hash
pub const GOLDEN_RATIO: u32 = 0x9e37_79b9;

// ----------------------------------------------------------------------------
// Persistence
// ----------------------------------------------------------------------------

/// Current on-disk format version (header carries `max_instance`)
pub const FORMAT_VERSION: u32 = 2;

/// Legacy on-disk format without `max_instance` in the header
pub const FORMAT_VERSION_LEGACY: u32 = 1;

/// Placeholder written in the key column for entries without a key
pub const NO_KEY_MARKER: &str = "-";

/// Default directory for persisted cache files
pub const DEFAULT_CACHE_DIR: &str = "/var/lib/pcp/config/pmda";

/// Suffix of the scratch file written before the atomic rename
pub const TEMP_SUFFIX: &str = "tmp";

// ----------------------------------------------------------------------------
// Instance Domain Layout
// ----------------------------------------------------------------------------

/// Bits of the serial number within an instance domain identifier
pub const INDOM_SERIAL_BITS: u32 = 22;

/// Bits of the domain (agent) number within an instance domain identifier
pub const INDOM_DOMAIN_BITS: u32 = 9;
