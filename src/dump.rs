// ----------------------------------------------------------------------------
// 8.3 Diagnostics
// ----------------------------------------------------------------------------
// Human-readable listing of a table. Read-only.

use std::io::{self, Write};

use crate::entry::{Entry, EntryState};
use crate::index::HashChains;
use crate::table::{CacheTable, DirtyFlags, InsertMode};

fn state_mark(state: EntryState) -> char {
    match state {
        EntryState::Active => 'A',
        EntryState::Inactive => 'I',
        EntryState::Empty => 'E',
    }
}

fn dirty_names(flags: DirtyFlags) -> String {
    if flags.is_empty() {
        return "none".into();
    }
    flags
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

impl<P> CacheTable<P> {
    /// Write the entry list, and with `with_hash` both index chains and the
    /// key probe histogram.
    pub fn dump<W: Write>(&self, out: &mut W, with_hash: bool) -> io::Result<()> {
        let mode = match self.insert_mode {
            InsertMode::Append => "append",
            InsertMode::ReuseLowest => "reuse",
        };
        writeln!(
            out,
            "indom {}: entries={} active={} inactive={} mode={} max={} hsize={} dirty={}",
            self.indom,
            self.size(),
            self.size_active(),
            self.size_inactive(),
            mode,
            self.max_instance,
            self.hash_size(),
            dirty_names(self.dirty),
        )?;

        for entry in self.iter() {
            dump_entry(out, entry)?;
        }

        if with_hash {
            self.dump_chains(out, "inst", &self.by_inst)?;
            self.dump_chains(out, "name", &self.by_name)?;

            if self.probe_histogram.iter().any(|&n| n > 0) {
                write!(out, "probes:")?;
                for (i, &n) in self.probe_histogram.iter().enumerate().filter(|(_, n)| **n > 0) {
                    write!(out, " {}={}", i + 1, n)?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }

    fn dump_chains<W: Write>(&self, out: &mut W, label: &str, chains: &HashChains) -> io::Result<()> {
        writeln!(out, "hash by {}:", label)?;
        for bucket in 0..chains.size() {
            let mut chain = chains.chain(&self.arena, bucket).peekable();
            if chain.peek().is_none() {
                continue;
            }
            write!(out, "  [{}]", bucket)?;
            for (_, entry) in chain {
                write!(out, " {}{}", entry.inst, state_mark(entry.state))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

fn dump_entry<W: Write, P>(out: &mut W, entry: &Entry<P>) -> io::Result<()> {
    let key = entry
        .key
        .as_deref()
        .map(hex::encode)
        .unwrap_or_else(|| "-".into());
    writeln!(
        out,
        "  {:>10} {} stamp={} key={} owner={} name=\"{}\"",
        entry.inst,
        state_mark(entry.state),
        entry.stamp,
        key,
        if entry.owner.is_some() { "yes" } else { "no" },
        entry.name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indom::InDom;
    use pretty_assertions::assert_eq;

    fn render(t: &CacheTable<()>, with_hash: bool) -> String {
        let mut out = Vec::new();
        t.dump(&mut out, with_hash).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_dump_lists_entries() {
        let mut t = CacheTable::<()>::new(InDom::new(60, 2));
        t.store("sda", Some(())).unwrap();
        t.store("sdb", None).unwrap();
        t.set_inactive(1).unwrap();

        assert_eq!(
            render(&t, false),
            "indom 60.2: entries=2 active=1 inactive=1 mode=append max=2147483647 hsize=16 dirty=instances|stamps\n\
             \x20          0 A stamp=0 key=- owner=yes name=\"sda\"\n\
             \x20          1 I stamp=0 key=- owner=no name=\"sdb\"\n"
        );
    }

    #[test]
    fn test_dump_with_hash_shows_chains() {
        let mut t = CacheTable::<()>::new(InDom::new(60, 2));
        t.store("a", None).unwrap();
        t.store("b", None).unwrap();
        t.store("c", None).unwrap();
        t.set_inactive(1).unwrap();

        let text = render(&t, true);
        assert!(text.contains("hash by inst:\n  [0] 0A\n  [1] 1I\n  [2] 2A\nhash by name:\n"));
        assert!(!text.contains("probes:"));
    }

    #[test]
    fn test_dump_shows_keys_and_probes() {
        let mut t = CacheTable::<()>::new(InDom::new(60, 2));
        t.store_by_key("k", Some(&[7u8][..]), None).unwrap();

        let text = render(&t, true);
        assert!(text.contains("key=07"));
        assert!(text.contains("probes: 1=1\n"));
        assert!(!render(&t, false).contains("probes:"));
    }

    #[test]
    fn test_dump_is_read_only() {
        let mut t = CacheTable::<()>::new(InDom::new(60, 2));
        t.store("a", None).unwrap();
        let before = t.dirty();
        let _ = render(&t, true);
        let _ = render(&t, true);
        assert_eq!(t.dirty(), before);
        assert_eq!(t.size(), 1);
    }
}
