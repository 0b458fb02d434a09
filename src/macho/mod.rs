//! Mach-O load-command model: the tagged base record every command
//! specializes, plus the segment/section subsystem (spec C3).

pub mod decode;
pub mod relocation;
pub mod segment;

pub use relocation::Relocation;
pub use segment::{Section, Segment};

/// Discriminant for a Mach-O load command. Only the two segment variants are
/// modeled in full; `Other` carries any command this crate doesn't need to
/// interpret (every other `LC_*` constant from `loader.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Segment,
    Segment64,
    Other(u32),
}

impl CommandKind {
    pub const LC_SEGMENT: u32 = 0x1;
    pub const LC_SEGMENT_64: u32 = 0x19;

    pub fn from_raw(cmd: u32) -> Self {
        match cmd {
            Self::LC_SEGMENT => CommandKind::Segment,
            Self::LC_SEGMENT_64 => CommandKind::Segment64,
            other => CommandKind::Other(other),
        }
    }

    /// Classification predicate from spec §4.3: a load command "is a
    /// Segment" iff its tag is `SEGMENT` or `SEGMENT_64`.
    pub fn is_segment(self) -> bool {
        matches!(self, CommandKind::Segment | CommandKind::Segment64)
    }
}

/// Base fields shared by every load command, before subtype specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommandBase {
    pub command: CommandKind,
    pub cmdsize: u32,
}
