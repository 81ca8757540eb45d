// src/types.rs

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Which cached artifacts must be invalidated before a task runs.
///
/// Combined with `|` from every source that asks for cleaning (config file,
/// command line, "start from scratch"). OR is commutative, so the order in
/// which overrides are applied never matters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CleanFlags(u8);

impl CleanFlags {
    pub const NONE: CleanFlags = CleanFlags(0);
    pub const REDOWNLOAD: CleanFlags = CleanFlags(0x01);
    pub const REEXTRACT: CleanFlags = CleanFlags(0x02);
    pub const RECONFIGURE: CleanFlags = CleanFlags(0x04);
    pub const REBUILD: CleanFlags = CleanFlags(0x08);
    pub const RECLONE: CleanFlags = CleanFlags(0x10);
    pub const ALL: CleanFlags = CleanFlags(0x1f);

    const NAMES: [(CleanFlags, &'static str); 5] = [
        (CleanFlags::REDOWNLOAD, "redownload"),
        (CleanFlags::REEXTRACT, "reextract"),
        (CleanFlags::RECONFIGURE, "reconfigure"),
        (CleanFlags::REBUILD, "rebuild"),
        (CleanFlags::RECLONE, "reclone"),
    ];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: CleanFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Iterate over the individual flags that are set.
    pub fn iter(self) -> impl Iterator<Item = CleanFlags> {
        Self::NAMES
            .into_iter()
            .map(|(flag, _)| flag)
            .filter(move |flag| self.contains(*flag))
    }

    /// Name of a single flag, `None` for combinations.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
    }
}

impl BitOr for CleanFlags {
    type Output = CleanFlags;

    fn bitor(self, rhs: CleanFlags) -> CleanFlags {
        CleanFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CleanFlags {
    fn bitor_assign(&mut self, rhs: CleanFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for CleanFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("CleanFlags(none)");
        }
        let names: Vec<_> = self.iter().filter_map(CleanFlags::name).collect();
        write!(f, "CleanFlags({})", names.join("|"))
    }
}

impl FromStr for CleanFlags {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if wanted == "new" || wanted == "all" {
            return Ok(CleanFlags::ALL);
        }
        CleanFlags::NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(flag, _)| *flag)
            .ok_or_else(|| {
                format!(
                    "invalid clean flag: {s} (expected redownload, reextract, reconfigure, rebuild, reclone or new)"
                )
            })
    }
}

/// Global phase switches (`run_clean` / `run_fetch` / `run_build`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSwitches {
    pub clean: bool,
    pub fetch: bool,
    pub build: bool,
}

impl Default for PhaseSwitches {
    fn default() -> Self {
        Self {
            clean: true,
            fetch: true,
            build: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_is_order_independent() {
        let a = CleanFlags::REDOWNLOAD | CleanFlags::REBUILD;
        let b = CleanFlags::REBUILD | CleanFlags::REDOWNLOAD;
        assert_eq!(a, b);

        let mut c = CleanFlags::NONE;
        c |= CleanFlags::REBUILD;
        c |= CleanFlags::REDOWNLOAD;
        assert_eq!(a, c);
    }

    #[test]
    fn all_contains_every_flag() {
        for (flag, _) in CleanFlags::NAMES {
            assert!(CleanFlags::ALL.contains(flag));
        }
        assert_eq!(CleanFlags::ALL.iter().count(), 5);
    }

    #[test]
    fn parse_and_debug() {
        assert_eq!("Rebuild".parse::<CleanFlags>(), Ok(CleanFlags::REBUILD));
        assert_eq!("new".parse::<CleanFlags>(), Ok(CleanFlags::ALL));
        assert!("bogus".parse::<CleanFlags>().is_err());

        let flags = CleanFlags::REEXTRACT | CleanFlags::RECLONE;
        assert_eq!(format!("{flags:?}"), "CleanFlags(reextract|reclone)");
        assert_eq!(format!("{:?}", CleanFlags::NONE), "CleanFlags(none)");
    }
}
