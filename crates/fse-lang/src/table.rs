//! The command table — every key's identity and attributes, as data.
//!
//! Dispatch over the command set is table-driven: a static mapping from key
//! to `{command code, acceptable leading-parameter kinds, trailing-parameter
//! count, equals action}`. The compiler consults the table to validate and
//! emit; nothing here executes anything.
//!
//! Prefix keys (`A`, `M`) resolve through per-prefix sub-tables: the prefix
//! consumes one more key and the pair names the command (`AW` = advance
//! word). An unknown second key is a compile error, not a fallback.

use bitflags::bitflags;

use crate::code::{Cmd, LeadKind};

bitflags! {
    /// The set of leading-parameter kinds a command accepts.
    ///
    /// [`LeadKind::None`] (no prefix written) is always acceptable and has
    /// no bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LeadMask: u16 {
        const COUNT      = 0b0000_0001;
        const PLUS       = 0b0000_0010;
        const MINUS      = 0b0000_0100;
        const INDEF_FWD  = 0b0000_1000;
        const INDEF_BACK = 0b0001_0000;
        const MARKER     = 0b0010_0000;
        const EQUALS     = 0b0100_0000;
        const PERCENT    = 0b1000_0000;
    }
}

/// The bit a concrete lead kind must find in a command's mask.
#[must_use]
pub fn lead_bit(kind: LeadKind) -> LeadMask {
    match kind {
        LeadKind::None => LeadMask::empty(),
        LeadKind::Count => LeadMask::COUNT,
        LeadKind::Plus => LeadMask::PLUS,
        LeadKind::Minus => LeadMask::MINUS,
        LeadKind::IndefFwd => LeadMask::INDEF_FWD,
        LeadKind::IndefBack => LeadMask::INDEF_BACK,
        LeadKind::Marker => LeadMask::MARKER,
        LeadKind::Equals => LeadMask::EQUALS,
        LeadKind::Percent => LeadMask::PERCENT,
    }
}

/// What an `=` leading parameter denotes for a command. Pure table data —
/// the core validates and forwards, the Command Executor interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualsAction {
    /// `=` is not meaningful for this command.
    Reject,
    /// `=` names the last line of the document.
    LastLine,
    /// `=` names the extent of the last match.
    MatchExtent,
}

/// One command's static attributes.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub code: Cmd,
    pub leads: LeadMask,
    pub trails: u8,
    pub equals: EqualsAction,
}

/// What a single key resolves to.
#[derive(Debug, Clone, Copy)]
pub enum KeyEntry {
    /// A terminal command.
    Command(&'static CommandSpec),
    /// A prefix: the next key resolves through this sub-table.
    Prefix(&'static [(char, CommandSpec)]),
}

// ---------------------------------------------------------------------------
// The tables
// ---------------------------------------------------------------------------

const MOTION: LeadMask = LeadMask::COUNT
    .union(LeadMask::PLUS)
    .union(LeadMask::MINUS)
    .union(LeadMask::INDEF_FWD)
    .union(LeadMask::INDEF_BACK);

const fn plain(code: Cmd, leads: LeadMask, trails: u8) -> CommandSpec {
    CommandSpec {
        code,
        leads,
        trails,
        equals: EqualsAction::Reject,
    }
}

/// Single-key commands.
static COMMANDS: &[(char, CommandSpec)] = &[
    ('U', plain(Cmd::UpLine, MOTION, 0)),
    ('N', plain(Cmd::DownLine, MOTION, 0)),
    (
        'B',
        plain(Cmd::BackChar, LeadMask::COUNT.union(LeadMask::INDEF_BACK), 0),
    ),
    (
        'F',
        plain(Cmd::FwdChar, LeadMask::COUNT.union(LeadMask::INDEF_FWD), 0),
    ),
    (
        'P',
        plain(
            Cmd::Page,
            LeadMask::COUNT.union(LeadMask::PLUS).union(LeadMask::MINUS),
            0,
        ),
    ),
    ('L', plain(Cmd::InsertLine, LeadMask::COUNT, 0)),
    (
        'K',
        plain(Cmd::KillLine, LeadMask::COUNT.union(LeadMask::INDEF_FWD), 0),
    ),
    (
        'D',
        plain(Cmd::DelChar, LeadMask::COUNT.union(LeadMask::INDEF_FWD), 0),
    ),
    ('I', plain(Cmd::InsertText, LeadMask::COUNT, 1)),
    (
        'S',
        CommandSpec {
            code: Cmd::Search,
            leads: MOTION.union(LeadMask::MARKER).union(LeadMask::EQUALS).union(LeadMask::PERCENT),
            trails: 1,
            equals: EqualsAction::MatchExtent,
        },
    ),
    ('R', plain(Cmd::Replace, MOTION, 2)),
    (
        'G',
        CommandSpec {
            code: Cmd::GotoLine,
            leads: LeadMask::COUNT
                .union(LeadMask::MARKER)
                .union(LeadMask::EQUALS)
                .union(LeadMask::PERCENT),
            trails: 0,
            equals: EqualsAction::LastLine,
        },
    ),
    ('J', plain(Cmd::JumpMark, LeadMask::MARKER, 0)),
];

/// `A` — advance: motions over larger units.
static ADVANCE: &[(char, CommandSpec)] = &[
    ('W', plain(Cmd::AdvWord, MOTION, 0)),
    ('L', plain(Cmd::AdvLine, MOTION, 0)),
    ('P', plain(Cmd::AdvPara, MOTION, 0)),
];

/// `M` — marker management.
static MARKERS: &[(char, CommandSpec)] = &[
    (
        'S',
        plain(Cmd::SetMark, LeadMask::COUNT.union(LeadMask::MARKER), 0),
    ),
    ('G', plain(Cmd::GotoMark, LeadMask::MARKER, 0)),
    (
        'C',
        plain(Cmd::ClearMark, LeadMask::COUNT.union(LeadMask::MARKER), 0),
    ),
];

/// Resolve a command key.
#[must_use]
pub fn lookup(key: char) -> Option<KeyEntry> {
    match key {
        'A' => Some(KeyEntry::Prefix(ADVANCE)),
        'M' => Some(KeyEntry::Prefix(MARKERS)),
        _ => COMMANDS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, spec)| KeyEntry::Command(spec)),
    }
}

/// Resolve the second key of a prefix pair.
#[must_use]
pub fn prefix_lookup(table: &'static [(char, CommandSpec)], key: char) -> Option<&'static CommandSpec> {
    table.iter().find(|(k, _)| *k == key).map(|(_, spec)| spec)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(key: char) -> &'static CommandSpec {
        match lookup(key) {
            Some(KeyEntry::Command(spec)) => spec,
            other => panic!("{key:?} should be a terminal command, got {other:?}"),
        }
    }

    #[test]
    fn terminal_keys_resolve() {
        assert_eq!(spec('L').code, Cmd::InsertLine);
        assert_eq!(spec('S').code, Cmd::Search);
        assert_eq!(spec('R').trails, 2);
        assert_eq!(spec('I').trails, 1);
    }

    #[test]
    fn unknown_key_is_none() {
        assert!(lookup('Y').is_none());
        assert!(lookup('z').is_none());
        assert!(lookup('[').is_none());
    }

    #[test]
    fn prefixes_resolve_through_sub_tables() {
        let Some(KeyEntry::Prefix(sub)) = lookup('A') else {
            panic!("A must be a prefix");
        };
        assert_eq!(prefix_lookup(sub, 'W').unwrap().code, Cmd::AdvWord);
        assert_eq!(prefix_lookup(sub, 'P').unwrap().code, Cmd::AdvPara);
        assert!(prefix_lookup(sub, 'Z').is_none());

        let Some(KeyEntry::Prefix(sub)) = lookup('M') else {
            panic!("M must be a prefix");
        };
        assert_eq!(prefix_lookup(sub, 'S').unwrap().code, Cmd::SetMark);
    }

    #[test]
    fn lead_bits_cover_every_kind() {
        use crate::code::LeadKind;
        assert_eq!(lead_bit(LeadKind::None), LeadMask::empty());
        assert_eq!(lead_bit(LeadKind::Count), LeadMask::COUNT);
        assert_eq!(lead_bit(LeadKind::Marker), LeadMask::MARKER);
        assert_eq!(lead_bit(LeadKind::Percent), LeadMask::PERCENT);
    }

    #[test]
    fn equals_action_matches_equals_mask() {
        // A command that accepts `=` must say what it means, and one that
        // rejects it must not accept the bit.
        let mut all: Vec<&CommandSpec> = COMMANDS.iter().map(|(_, s)| s).collect();
        all.extend(ADVANCE.iter().map(|(_, s)| s));
        all.extend(MARKERS.iter().map(|(_, s)| s));
        for spec in all {
            assert_eq!(
                spec.leads.contains(LeadMask::EQUALS),
                spec.equals != EqualsAction::Reject,
                "{:?} equals action out of step with its lead mask",
                spec.code
            );
        }
    }

    #[test]
    fn insert_line_takes_only_a_count() {
        let spec = spec('L');
        assert!(spec.leads.contains(LeadMask::COUNT));
        assert!(!spec.leads.contains(LeadMask::PLUS));
        assert!(!spec.leads.contains(LeadMask::INDEF_FWD));
    }
}
