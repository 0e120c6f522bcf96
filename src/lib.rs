//! # Cerebro Indom - Stable Instance Identifiers
//!
//! Persistent instance-domain cache for metric collectors. Maps external
//! instance names (disks, interfaces, processes) to small integer ids that
//! survive restarts and hot-plug, so consumers never see an id reused for a
//! different thing.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              REGISTRY                                    │
//! │        InDom ──► CacheTable ──► entries (sorted by inst)                 │
//! │                      │              ├── hash by inst   (chained)        │
//! │                      │              └── hash by name   (chained)        │
//! │                      └──► <dir>/<domain>.<serial>   (load / save)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use cerebro_indom::{InDom, Registry};
//!
//! let disks = InDom::new(60, 1);
//! let mut registry: Registry = Registry::new("/var/lib/pcp/config/pmda");
//! let _ = registry.load(disks);
//!
//! let sda = registry.store(disks, "sda", None)?;
//! let nvme = registry.store_by_key(disks, "nvme0n1", Some(&[0x08u8, 0x10][..]), None)?;
//! assert_ne!(sda, nvme);
//!
//! registry.sync(disks)?;
//! # Ok::<(), cerebro_indom::CacheError>(())
//! ```
//!
//! Tables are single-threaded (`&mut self`); wrap the registry in a
//! [`SharedRegistry`] to share it.

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod constants;
pub mod dump;
pub mod entry;
pub mod error;
pub mod hash;
pub(crate) mod index;
pub mod indom;
pub mod logging;
pub mod persist;
pub mod registry;
pub mod table;

pub use config::{CacheSettings, IndomConfig, LoggingConfig};
pub use entry::{Entry, EntryState, InstId, InstKey, NameMatch};
pub use error::{CacheError, CacheResult, ConfigError, ConfigResult};
pub use indom::InDom;
pub use logging::init_logging;
pub use registry::{Registry, SharedRegistry};
pub use table::{CacheTable, DirtyFlags, InsertMode};
