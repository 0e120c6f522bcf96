// ============================================================================
// SECTION 3: CORE TYPE SYSTEM
// ============================================================================

// ----------------------------------------------------------------------------
// 3.1 Instance Domain Identity
// ----------------------------------------------------------------------------

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{INDOM_DOMAIN_BITS, INDOM_SERIAL_BITS};
use crate::error::CacheError;

const SERIAL_MASK: u32 = (1 << INDOM_SERIAL_BITS) - 1;
const DOMAIN_MASK: u32 = (1 << INDOM_DOMAIN_BITS) - 1;

/// Identifier of an instance domain: a 9-bit agent domain and a 22-bit
/// serial packed into one word. Rendered as `domain.serial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct InDom(u32);

impl InDom {
    /// The null instance domain, never backed by a table
    pub const NULL: InDom = InDom(u32::MAX);

    /// Build from domain and serial; out-of-range bits are masked off
    #[inline]
    pub const fn new(domain: u32, serial: u32) -> Self {
        Self(((domain & DOMAIN_MASK) << INDOM_SERIAL_BITS) | (serial & SERIAL_MASK))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn domain(&self) -> u32 {
        (self.0 >> INDOM_SERIAL_BITS) & DOMAIN_MASK
    }

    #[inline]
    pub const fn serial(&self) -> u32 {
        self.0 & SERIAL_MASK
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == u32::MAX
    }
}

impl Display for InDom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}.{}", self.domain(), self.serial())
        }
    }
}

impl FromStr for InDom {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CacheError::InvalidDomain { indom: s.to_string() };

        let (domain, serial) = s.trim().split_once('.').ok_or_else(invalid)?;
        let domain: u32 = domain.parse().map_err(|_| invalid())?;
        let serial: u32 = serial.parse().map_err(|_| invalid())?;
        if domain > DOMAIN_MASK || serial > SERIAL_MASK {
            return Err(invalid());
        }
        Ok(InDom::new(domain, serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indom_layout() {
        let indom = InDom::new(60, 3);
        assert_eq!(indom.domain(), 60);
        assert_eq!(indom.serial(), 3);
        assert_eq!(indom.as_raw(), (60 << 22) | 3);
        assert_eq!(indom.to_string(), "60.3");
    }

    #[test]
    fn test_indom_parse() {
        let indom: InDom = "60.0".parse().unwrap();
        assert_eq!(indom, InDom::new(60, 0));

        assert!("60".parse::<InDom>().is_err());
        assert!("512.0".parse::<InDom>().is_err());
        assert!("1.4194304".parse::<InDom>().is_err());
        assert!("x.y".parse::<InDom>().is_err());
        assert!("NULL".parse::<InDom>().is_err());
        // The top bit is never set from a parsed pair, so NULL is unreachable.
        assert!(!"511.4194303".parse::<InDom>().unwrap().is_null());
    }

    #[test]
    fn test_null_indom() {
        assert!(InDom::NULL.is_null());
        assert_eq!(InDom::NULL.to_string(), "NULL");
        assert!(!InDom::new(0, 0).is_null());
    }
}
