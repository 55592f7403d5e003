//! C5: key acceptance filter (spec.md §3, §4.5).
//!
//! The wire key-code space is a single `u64`. This module resolves the
//! spec's open bit-layout question (§9: "the space uses defined
//! bit-fields: type, command code, flags, driver group, driver number")
//! into a concrete, documented layout:
//!
//! ```text
//! bit 63       press flag
//! bit 62       kind: 0 = Command, 1 = DriverKeyCode
//! Command:     bits 0-15  command code, bits 16-31 flags
//! DriverKeyCode: bits 0-7 driver number, bits 8-23 driver group
//! ```
//!
//! The driver form spec.md gives explicitly, `(group << 8) | number |
//! (press << 63)`, is exactly [`KeyCode::from_driver`] with the kind bit
//! additionally set so it can live in the same interval space as command
//! codes.

/// Command codes are owned by the external command table (out of scope
/// per spec.md §1); these placeholders exist only so the default
/// exclusion list in §4.5 has something concrete to point at.
pub mod privileged {
    pub const OFFLINE: u16 = 1;
    pub const NOOP: u16 = 2;
    pub const RESTARTBRL: u16 = 3;
    pub const BRL_START: u16 = 4;
    pub const BRL_STOP: u16 = 5;
    pub const RESTARTSPEECH: u16 = 6;
    pub const SPK_BASE: u16 = 7;
    pub const SCR_BASE: u16 = 8;
    pub const SWITCHVT_BASE: u16 = 9;
    pub const SELECTVT_BASE: u16 = 10;
    pub const PASSXT: u16 = 11;
    pub const PASSAT: u16 = 12;
    pub const PASSPS2: u16 = 13;
    pub const CONTEXT: u16 = 14;
    pub const ALERT: u16 = 15;
    pub const PASSDOTS: u16 = 16;

    pub const ALL: &[u16] = &[
        OFFLINE,
        NOOP,
        RESTARTBRL,
        BRL_START,
        BRL_STOP,
        RESTARTSPEECH,
        SPK_BASE,
        SCR_BASE,
        SWITCHVT_BASE,
        SELECTVT_BASE,
        PASSXT,
        PASSAT,
        PASSPS2,
        CONTEXT,
        ALERT,
        PASSDOTS,
    ];
}

const PRESS_BIT: u64 = 1 << 63;
const KIND_BIT: u64 = 1 << 62;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyCodeKind {
    Command,
    DriverKeyCode,
}

/// A single wire key-code value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KeyCode(pub u64);

impl KeyCode {
    pub fn from_command(code: u16, flags: u16, press: bool) -> Self {
        let mut bits = (code as u64) | ((flags as u64) << 16);
        if press {
            bits |= PRESS_BIT;
        }
        Self(bits)
    }

    /// The formula from spec.md §6, with the kind bit additionally set.
    pub fn from_driver(group: u16, number: u8, press: bool) -> Self {
        let mut bits = ((group as u64) << 8) | (number as u64) | KIND_BIT;
        if press {
            bits |= PRESS_BIT;
        }
        Self(bits)
    }

    pub fn press(self) -> bool {
        self.0 & PRESS_BIT != 0
    }

    pub fn kind(self) -> KeyCodeKind {
        if self.0 & KIND_BIT != 0 {
            KeyCodeKind::DriverKeyCode
        } else {
            KeyCodeKind::Command
        }
    }

    pub fn command_code(self) -> Option<u16> {
        matches!(self.kind(), KeyCodeKind::Command).then_some(self.0 as u16)
    }

    pub fn driver_group(self) -> Option<u16> {
        matches!(self.kind(), KeyCodeKind::DriverKeyCode).then_some((self.0 >> 8) as u16)
    }

    pub fn driver_number(self) -> Option<u8> {
        matches!(self.kind(), KeyCodeKind::DriverKeyCode).then_some(self.0 as u8)
    }
}

impl From<u64> for KeyCode {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

/// A half-open-internally, inclusive-at-the-API interval set over the
/// 64-bit key-code space, supporting add/remove/contains (spec.md §3).
///
/// Stored as a sorted list of disjoint, non-adjacent inclusive ranges.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyRangeSet {
    ranges: Vec<(u64, u64)>,
}

impl KeyRangeSet {
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn full() -> Self {
        Self {
            ranges: vec![(0, u64::MAX)],
        }
    }

    pub fn contains(&self, code: KeyCode) -> bool {
        self.ranges
            .binary_search_by(|&(lo, hi)| {
                if code.0 < lo {
                    std::cmp::Ordering::Greater
                } else if code.0 > hi {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Adds `[first, last]` to the accepted set, merging with any
    /// overlapping or adjacent existing range.
    pub fn add(&mut self, first: u64, last: u64) {
        let (first, last) = normalize(first, last);
        let mut merged_lo = first;
        let mut merged_hi = last;
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for &(lo, hi) in &self.ranges {
            if adjacent_or_overlapping(lo, hi, merged_lo, merged_hi) {
                merged_lo = merged_lo.min(lo);
                merged_hi = merged_hi.max(hi);
            } else {
                out.push((lo, hi));
            }
        }
        out.push((merged_lo, merged_hi));
        out.sort_unstable();
        self.ranges = out;
    }

    /// Removes `[first, last]` from the accepted set, splitting any
    /// range that straddles the removed interval.
    pub fn remove(&mut self, first: u64, last: u64) {
        let (first, last) = normalize(first, last);
        let mut out = Vec::with_capacity(self.ranges.len());
        for &(lo, hi) in &self.ranges {
            if hi < first || lo > last {
                out.push((lo, hi));
                continue;
            }
            if lo < first {
                out.push((lo, first - 1));
            }
            if hi > last {
                out.push((last + 1, hi));
            }
        }
        self.ranges = out;
    }
}

fn normalize(first: u64, last: u64) -> (u64, u64) {
    if first <= last {
        (first, last)
    } else {
        (last, first)
    }
}

fn adjacent_or_overlapping(a_lo: u64, a_hi: u64, b_lo: u64, b_hi: u64) -> bool {
    let a_touches_b_after = a_hi.checked_add(1).map_or(false, |v| v >= b_lo);
    let b_touches_a_after = b_hi.checked_add(1).map_or(false, |v| v >= a_lo);
    a_lo <= b_hi && b_lo <= a_hi || (a_touches_b_after && a_lo <= b_hi) || (b_touches_a_after && b_lo <= a_hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_space_accepts_everything() {
        let set = KeyRangeSet::full();
        assert!(set.contains(KeyCode(0)));
        assert!(set.contains(KeyCode(u64::MAX)));
    }

    #[test]
    fn add_then_contains() {
        let mut set = KeyRangeSet::empty();
        set.add(10, 20);
        assert!(!set.contains(KeyCode(9)));
        assert!(set.contains(KeyCode(10)));
        assert!(set.contains(KeyCode(20)));
        assert!(!set.contains(KeyCode(21)));
    }

    #[test]
    fn remove_splits_range() {
        let mut set = KeyRangeSet::empty();
        set.add(0, 100);
        set.remove(40, 60);
        assert!(set.contains(KeyCode(39)));
        assert!(!set.contains(KeyCode(40)));
        assert!(!set.contains(KeyCode(60)));
        assert!(set.contains(KeyCode(61)));
    }

    #[test]
    fn full_minus_privileged_denies_offline() {
        let mut set = KeyRangeSet::full();
        for &cmd in privileged::ALL {
            let code = KeyCode::from_command(cmd, 0, false).0;
            set.remove(code, code);
        }
        let offline = KeyCode::from_command(privileged::OFFLINE, 0, false);
        assert!(!set.contains(offline));
        let ordinary = KeyCode::from_command(0xBEEF, 0, false);
        assert!(set.contains(ordinary));
    }

    #[test]
    fn driver_form_matches_spec_formula() {
        let code = KeyCode::from_driver(3, 7, true);
        let expected = (3u64 << 8) | 7 | KIND_BIT | PRESS_BIT;
        assert_eq!(code.0, expected);
        assert_eq!(code.driver_group(), Some(3));
        assert_eq!(code.driver_number(), Some(7));
        assert!(code.press());
    }

    #[test]
    fn adjacent_ranges_merge() {
        let mut set = KeyRangeSet::empty();
        set.add(0, 9);
        set.add(10, 19);
        assert_eq!(set.ranges, vec![(0, 19)]);
    }
}
