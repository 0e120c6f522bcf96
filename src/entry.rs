// ----------------------------------------------------------------------------
// 3.2 Cache Entries - One Record Per Instance
// ----------------------------------------------------------------------------

use std::fmt::{self, Display, Formatter};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Instance identifier, always below the table's `max_instance`
pub type InstId = u32;

/// Opaque key bytes; kernel handles and device ids fit inline
pub type InstKey = SmallVec<[u8; 16]>;

/// Lifecycle state of a cached instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// Visible to enumeration and fetch
    Active,
    /// Retained but currently absent
    Inactive,
    /// Culled; reclaimed by the next reorganize
    Empty,
}

impl EntryState {
    #[inline]
    pub fn is_live(&self) -> bool {
        !matches!(self, EntryState::Empty)
    }
}

impl Display for EntryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Active => write!(f, "active"),
            EntryState::Inactive => write!(f, "inactive"),
            EntryState::Empty => write!(f, "empty"),
        }
    }
}

/// One cached instance.
///
/// `owner` is whatever the caller handed in. Lookups lend it back; the
/// cache never inspects it.
#[derive(Debug, Clone)]
pub struct Entry<P> {
    pub inst: InstId,
    pub name: CompactString,
    /// Bytes of `name` significant for equality
    pub match_len: usize,
    pub key: Option<InstKey>,
    pub state: EntryState,
    pub owner: Option<P>,
    /// Seconds since the epoch at last save; 0 until the next save
    pub stamp: i64,
}

impl<P> Entry<P> {
    pub(crate) fn new(inst: InstId, name: CompactString, match_len: usize, key: Option<InstKey>) -> Self {
        Self {
            inst,
            name,
            match_len,
            key,
            state: EntryState::Inactive,
            owner: None,
            stamp: 0,
        }
    }

    /// The key this entry was derived from; plain entries use their name
    #[inline]
    pub fn key_bytes(&self) -> &[u8] {
        self.key.as_deref().unwrap_or(self.name.as_bytes())
    }
}

// ----------------------------------------------------------------------------
// 3.3 Name Matching - Short Names Up To The First Space
// ----------------------------------------------------------------------------

/// Outcome of comparing an entry's name against a candidate name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    NoMatch,
    Match,
    /// Short names agree but the remainders disagree
    Conflict,
}

/// Length of the significant prefix of `name`: up to the first space, or
/// the whole string for string-only caches.
#[inline]
pub fn match_len(name: &str, whole_string: bool) -> usize {
    if whole_string {
        return name.len();
    }
    name.find(' ').unwrap_or(name.len())
}

/// Compare `name` (with significant length `len`) against an entry name.
///
/// ```text
/// entry      name       result
/// foo        foo        Match
/// foo bar    foo        Match
/// foo bar    foo bar    Match
/// foo        foo bar    Conflict
/// foo blah   foo bar    Conflict
/// foo...     foo        NoMatch   (different significant length)
/// ```
pub fn name_eq(entry_name: &str, entry_len: usize, name: &str, len: usize) -> NameMatch {
    if entry_len != len {
        return NameMatch::NoMatch;
    }
    let (ours, theirs) = (entry_name.as_bytes(), name.as_bytes());
    if ours[..len] != theirs[..len] {
        return NameMatch::NoMatch;
    }
    if theirs.len() == len {
        return NameMatch::Match;
    }
    if ours.len() == len {
        return NameMatch::Conflict;
    }
    if ours[len..] == theirs[len..] {
        NameMatch::Match
    } else {
        NameMatch::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(entry: &str, name: &str) -> NameMatch {
        name_eq(entry, match_len(entry, false), name, match_len(name, false))
    }

    #[test]
    fn test_match_len() {
        assert_eq!(match_len("eth0", false), 4);
        assert_eq!(match_len("1234 /usr/bin/foo -x", false), 4);
        assert_eq!(match_len("1234 /usr/bin/foo -x", true), 20);
        assert_eq!(match_len("", false), 0);
    }

    #[test]
    fn test_name_eq_table() {
        assert_eq!(cmp("foo", "foo"), NameMatch::Match);
        assert_eq!(cmp("foo bar", "foo"), NameMatch::Match);
        assert_eq!(cmp("foo bar", "foo bar"), NameMatch::Match);
        assert_eq!(cmp("foo", "foo bar"), NameMatch::Conflict);
        assert_eq!(cmp("foo blah", "foo bar"), NameMatch::Conflict);
        assert_eq!(cmp("foobar", "foo"), NameMatch::NoMatch);
        assert_eq!(cmp("foo", "foobar"), NameMatch::NoMatch);
        assert_eq!(cmp("bar", "foo"), NameMatch::NoMatch);
    }

    #[test]
    fn test_name_eq_whole_string() {
        let a = "1234 /usr/bin/foo";
        let b = "1234 /usr/bin/bar";
        assert_eq!(name_eq(a, a.len(), b, b.len()), NameMatch::NoMatch);
        assert_eq!(name_eq(a, a.len(), a, a.len()), NameMatch::Match);
    }

    #[test]
    fn test_key_bytes_falls_back_to_name() {
        let plain: Entry<()> = Entry::new(0, "sda".into(), 3, None);
        assert_eq!(plain.key_bytes(), b"sda");

        let keyed: Entry<()> = Entry::new(1, "sdb".into(), 3, Some(InstKey::from_slice(&[1, 2])));
        assert_eq!(keyed.key_bytes(), &[1, 2]);
        assert_eq!(keyed.state, EntryState::Inactive);
    }
}
