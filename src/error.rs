// ============================================================================
// SECTION 4: ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every cache operation. Lookups and stores return these to
// the caller; only allocation failure of the bucket arrays is fatal.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;
use tracing::error;

use crate::indom::InDom;

// ----------------------------------------------------------------------------
// 4.1 Core Cache Errors
// ----------------------------------------------------------------------------

/// The main error type for the instance-domain cache.
#[derive(Error, Debug)]
pub enum CacheError {
    // ---- Identity Errors ----
    #[error("Invalid instance domain: {indom}")]
    InvalidDomain { indom: String },

    #[error("Instance conflict in {indom}: {message}")]
    InstanceConflict { indom: InDom, message: String },

    // ---- Allocation Errors ----
    #[error("Instance allocation exhausted in {indom}: {message}")]
    AllocationExhausted { indom: InDom, message: String },

    #[error("Size exceeded in {indom}: instance {inst} does not fit below {limit}")]
    SizeExceeded { indom: InDom, inst: u32, limit: u32 },

    #[error("Out of memory in {indom}: {message}")]
    OutOfMemory { indom: InDom, message: String },

    // ---- Lookup Errors ----
    #[error("Instance not found in {indom}: {what}")]
    NotFound { indom: InDom, what: String },

    // ---- Persistence Errors ----
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cache file {path} (line {line}): {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    // ---- Generic Errors ----
    #[error("Invalid state for {indom}: {message}")]
    InvalidState { indom: InDom, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            CacheError::InvalidDomain { .. } => false,
            CacheError::InstanceConflict { .. } => true,
            CacheError::AllocationExhausted { .. } => false,
            CacheError::SizeExceeded { .. } => true,
            CacheError::OutOfMemory { .. } => false,
            CacheError::NotFound { .. } => true,
            CacheError::Io { .. } => true,
            CacheError::Malformed { .. } => false,
            CacheError::InvalidState { .. } => true,
            CacheError::Config(_) => false,
        }
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            CacheError::InvalidDomain { .. } => "invalid_domain",
            CacheError::InstanceConflict { .. } => "instance_conflict",
            CacheError::AllocationExhausted { .. } => "allocation_exhausted",
            CacheError::SizeExceeded { .. } => "size_exceeded",
            CacheError::OutOfMemory { .. } => "out_of_memory",
            CacheError::NotFound { .. } => "not_found",
            CacheError::Io { .. } | CacheError::Malformed { .. } => "io",
            CacheError::InvalidState { .. } => "invalid_state",
            CacheError::Config(_) => "config",
        }
    }

    /// True for a load against a file that does not exist yet
    pub fn is_missing_file(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    pub(crate) fn conflict(indom: InDom, message: impl Into<String>) -> Self {
        CacheError::InstanceConflict {
            indom,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(indom: InDom, what: impl Into<String>) -> Self {
        CacheError::NotFound {
            indom,
            what: what.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

// ----------------------------------------------------------------------------
// 4.2 Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// 4.3 Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// ----------------------------------------------------------------------------
// 4.4 Fatal Allocation Failure
// ----------------------------------------------------------------------------

/// Abort after failing to allocate index bookkeeping.
///
/// A half-built bucket array would leave entries unreachable from one index
/// but not the other, so there is no state worth returning to.
#[cold]
pub(crate) fn fatal_no_memory(indom: InDom, what: &str, bytes: usize) -> ! {
    error!(
        target: "cerebro_indom::cache",
        indom = %indom,
        what,
        bytes,
        "Unable to allocate index memory, aborting"
    );
    std::process::abort()
}
