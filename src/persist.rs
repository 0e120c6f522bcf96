// ============================================================================
// SECTION 8: PERSISTENCE LAYER
// ============================================================================
// One text file per instance domain:
//
//   2 <mode> <max_instance>                 header, version 2
//   <inst> <stamp> <key-hex|-> <name>       one record per live entry
//
// Version 1 files (`1 <mode>` header, `<inst> <stamp> <name>` records) are
// still accepted by load. The name is the rest of the line and may contain
// spaces. Saves go to `<file>.tmp` and are renamed into place.
// ============================================================================

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

use crate::constants::{FORMAT_VERSION, FORMAT_VERSION_LEGACY, MAX_INSTANCE, NO_KEY_MARKER, TEMP_SUFFIX};
use crate::entry::{match_len, name_eq, InstId, NameMatch};
use crate::error::{CacheError, CacheResult};
use crate::logging::IoTimer;
use crate::table::{now_secs, CacheTable, DirtyFlags, InsertMode};

// ----------------------------------------------------------------------------
// 8.1 File Format Parsing
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    version: u32,
    mode: InsertMode,
    max_instance: Option<u32>,
}

#[derive(Debug)]
struct Record<'a> {
    line: usize,
    inst: InstId,
    stamp: i64,
    key: Option<Vec<u8>>,
    name: &'a str,
}

impl Record<'_> {
    fn key_bytes(&self) -> &[u8] {
        self.key.as_deref().unwrap_or(self.name.as_bytes())
    }
}

fn malformed(path: &Path, line: usize, message: impl Into<String>) -> CacheError {
    let message = message.into();
    warn!(
        target: "cerebro_indom::persist",
        path = %path.display(),
        line,
        reason = %message,
        "Malformed cache file"
    );
    CacheError::Malformed {
        path: path.to_path_buf(),
        line,
        message,
    }
}

/// Split off the next whitespace-delimited field
fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

fn parse_header(path: &Path, text: &str) -> CacheResult<Header> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let version: u32 = fields
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed(path, 1, "missing format version"))?;

    let expected = match version {
        FORMAT_VERSION => 3,
        FORMAT_VERSION_LEGACY => 2,
        other => return Err(malformed(path, 1, format!("unsupported format version {}", other))),
    };
    if fields.len() != expected {
        return Err(malformed(
            path,
            1,
            format!("version {} header needs {} fields, found {}", version, expected, fields.len()),
        ));
    }

    let mode = fields[1]
        .parse::<u8>()
        .ok()
        .and_then(InsertMode::from_code)
        .ok_or_else(|| malformed(path, 1, format!("bad insertion mode '{}'", fields[1])))?;

    let max_instance = match fields.get(2) {
        None => None,
        Some(raw) => {
            let max = raw
                .parse::<u32>()
                .ok()
                .filter(|m| (1..=MAX_INSTANCE).contains(m))
                .ok_or_else(|| malformed(path, 1, format!("bad max instance '{}'", raw)))?;
            Some(max)
        }
    };

    Ok(Header {
        version,
        mode,
        max_instance,
    })
}

fn parse_record<'a>(
    path: &Path,
    line: usize,
    text: &'a str,
    version: u32,
    max_instance: u32,
) -> CacheResult<Record<'a>> {
    let (inst, rest) = next_field(text).ok_or_else(|| malformed(path, line, "empty record"))?;
    let inst: InstId = inst
        .parse()
        .map_err(|_| malformed(path, line, format!("bad instance '{}'", inst)))?;
    if inst >= max_instance {
        return Err(malformed(
            path,
            line,
            format!("instance {} not below {}", inst, max_instance),
        ));
    }

    let (stamp, rest) = next_field(rest).ok_or_else(|| malformed(path, line, "missing stamp"))?;
    let stamp: i64 = stamp
        .parse()
        .ok()
        .filter(|s| *s >= 0)
        .ok_or_else(|| malformed(path, line, format!("bad stamp '{}'", stamp)))?;

    let (key, rest) = if version == FORMAT_VERSION_LEGACY {
        (None, rest)
    } else {
        let (field, rest) = next_field(rest).ok_or_else(|| malformed(path, line, "missing key"))?;
        let key = if field == NO_KEY_MARKER {
            None
        } else {
            Some(hex::decode(field).map_err(|e| malformed(path, line, format!("bad key: {}", e)))?)
        };
        (key, rest)
    };

    // One separator precedes the name; any further whitespace belongs to it.
    let name = rest.strip_prefix(char::is_whitespace).unwrap_or(rest);
    if name.is_empty() {
        return Err(malformed(path, line, "missing name"));
    }
    if name.contains('\r') {
        return Err(malformed(path, line, "carriage return in name"));
    }

    Ok(Record {
        line,
        inst,
        stamp,
        key,
        name,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

// ----------------------------------------------------------------------------
// 8.2 Load / Save / Sync
// ----------------------------------------------------------------------------

impl<P> CacheTable<P> {
    /// Read a persisted file into this table, returning the record count.
    ///
    /// Every line is parsed and checked against the table before anything is
    /// inserted, so a malformed or conflicting file leaves the table as it
    /// was. Loaded entries are Inactive and keep their saved stamp.
    pub fn load(&mut self, path: &Path) -> CacheResult<usize> {
        if self.is_string_cache() {
            debug!(
                target: "cerebro_indom::persist",
                indom = %self.indom,
                "String cache is never persisted, skipping load"
            );
            return Ok(0);
        }
        let timer = IoTimer::start("load", path);

        let text = fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));
        let (_, first) = lines
            .next()
            .ok_or_else(|| malformed(path, 1, "empty file"))?;
        let header = parse_header(path, first)?;
        let max_instance = header.max_instance.unwrap_or(self.max_instance);

        let records = lines
            .map(|(line, text)| parse_record(path, line, text, header.version, max_instance))
            .collect::<CacheResult<Vec<_>>>()?;
        self.check_records(path, &records, max_instance)?;

        if header.mode == InsertMode::ReuseLowest {
            self.insert_mode = InsertMode::ReuseLowest;
        }
        self.max_instance = max_instance;

        for record in &records {
            if self.find_inst(record.inst).is_some() {
                continue;
            }
            let slot = self.insert(record.name, Some(record.inst), record.key.as_deref())?;
            self.arena.entry_mut(slot).stamp = record.stamp;
        }

        debug!(
            target: "cerebro_indom::persist",
            indom = %self.indom,
            path = %path.display(),
            version = header.version,
            count = records.len(),
            "Cache loaded"
        );
        timer.finish(records.len());
        Ok(records.len())
    }

    /// Reject records that clash with each other or with live entries.
    /// A record identical to a live entry is accepted and skipped.
    fn check_records(&self, path: &Path, records: &[Record<'_>], max_instance: u32) -> CacheResult<()> {
        if let Some(entry) = self.iter().find(|e| e.state.is_live() && e.inst >= max_instance) {
            return Err(CacheError::SizeExceeded {
                indom: self.indom,
                inst: entry.inst,
                limit: max_instance,
            });
        }

        let mut insts = AHashSet::with_capacity(records.len());
        let mut names: AHashMap<&str, InstId> = AHashMap::with_capacity(records.len());
        for record in records {
            if !insts.insert(record.inst) {
                return Err(malformed(
                    path,
                    record.line,
                    format!("duplicate instance {}", record.inst),
                ));
            }
            let len = match_len(record.name, false);
            if let Some(other) = names.insert(&record.name[..len], record.inst) {
                return Err(self.load_conflict(
                    path,
                    record,
                    format!("short name '{}' also used by instance {}", &record.name[..len], other),
                ));
            }

            if let Some(slot) = self.find_inst(record.inst) {
                let entry = self.arena.entry(slot);
                let same_name = name_eq(&entry.name, entry.match_len, record.name, len);
                if same_name != NameMatch::Match || entry.key_bytes() != record.key_bytes() {
                    return Err(self.load_conflict(
                        path,
                        record,
                        format!("instance {} is already '{}'", record.inst, entry.name),
                    ));
                }
            }
            if let Some((slot, found)) = self.find_name(record.name) {
                let entry = self.arena.entry(slot);
                if found == NameMatch::Conflict || entry.inst != record.inst {
                    return Err(self.load_conflict(
                        path,
                        record,
                        format!("name '{}' is already instance {}", record.name, entry.inst),
                    ));
                }
            }
        }
        Ok(())
    }

    fn load_conflict(&self, path: &Path, record: &Record<'_>, message: String) -> CacheError {
        warn!(
            target: "cerebro_indom::persist",
            indom = %self.indom,
            path = %path.display(),
            line = record.line,
            inst = record.inst,
            name = record.name,
            "Persisted record conflicts"
        );
        CacheError::conflict(self.indom, format!("{} (line {})", message, record.line))
    }

    /// Write the table if any of `which` is dirty, returning the number of
    /// records written (0 when nothing was due).
    pub fn save(&mut self, path: &Path, which: DirtyFlags) -> CacheResult<usize> {
        let due = which & (DirtyFlags::INSTANCES | DirtyFlags::STAMPS);
        if self.is_string_cache() || !self.dirty.intersects(due) {
            return Ok(0);
        }
        let timer = IoTimer::start("save", path);

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        }

        let now = now_secs();
        let tmp = temp_path(path);
        let written = self
            .write_records(&tmp, now)
            .and_then(|count| fs::rename(&tmp, path).map(|_| count));
        let count = match written {
            Ok(count) => count,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(CacheError::io(path, e));
            }
        };

        for &slot in &self.order {
            let entry = self.arena.entry_mut(slot);
            if entry.state.is_live() && entry.stamp == 0 {
                entry.stamp = now;
            }
        }
        self.dirty.remove(DirtyFlags::INSTANCES | DirtyFlags::STAMPS);

        debug!(
            target: "cerebro_indom::persist",
            indom = %self.indom,
            path = %path.display(),
            count,
            "Cache saved"
        );
        timer.finish(count);
        Ok(count)
    }

    /// Save if either the instance set or any stamp changed.
    pub fn sync(&mut self, path: &Path) -> CacheResult<usize> {
        self.save(path, DirtyFlags::INSTANCES | DirtyFlags::STAMPS)
    }

    fn write_records(&self, tmp: &Path, now: i64) -> std::io::Result<usize> {
        let mut out = BufWriter::new(File::create(tmp)?);
        writeln!(
            out,
            "{} {} {}",
            FORMAT_VERSION,
            self.insert_mode.as_code(),
            self.max_instance
        )?;

        let mut count = 0;
        for entry in self.iter().filter(|e| e.state.is_live()) {
            let stamp = if entry.stamp == 0 { now } else { entry.stamp };
            let key = entry
                .key
                .as_deref()
                .map(hex::encode)
                .unwrap_or_else(|| NO_KEY_MARKER.to_string());
            writeln!(out, "{} {} {} {}", entry.inst, stamp, key, entry.name)?;
            count += 1;
        }

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(count)
    }
}
