//! Sync status, block parts, and the per-status tables derived from them.
//!
//! Every status-keyed decision lives here as an exhaustive `match` over
//! [`SyncStatus`], so adding a status is a compile error everywhere it matters.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Which half of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum PartKind {
    /// The marker line's free text.
    Source,
    /// The line two below the marker.
    Target,
}

impl PartKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PartKind::Source => "source",
            PartKind::Target => "target",
        }
    }

    /// The other part.
    pub fn opposite(self) -> Self {
        match self {
            PartKind::Source => PartKind::Target,
            PartKind::Target => PartKind::Source,
        }
    }

    /// The status a block takes when this part is the authoritative side.
    pub fn dirty_status(self) -> SyncStatus {
        match self {
            PartKind::Source => SyncStatus::S2t,
            PartKind::Target => SyncStatus::T2s,
        }
    }
}

impl std::fmt::Display for PartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Block sync status, encoded as a single glyph in the marker line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum SyncStatus {
    /// Source is authoritative; target needs regenerating.
    S2t,
    /// Target is authoritative; source needs regenerating.
    T2s,
    /// A task currently owns both parts.
    Syncing,
    /// Both parts confirmed consistent.
    Synced,
}

impl SyncStatus {
    /// All statuses, in glyph-table order.
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::S2t,
        SyncStatus::T2s,
        SyncStatus::Syncing,
        SyncStatus::Synced,
    ];

    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::S2t => "s2t",
            SyncStatus::T2s => "t2s",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
        }
    }

    /// Marker glyph for this status.
    pub fn glyph(self) -> char {
        match self {
            SyncStatus::S2t => '>',
            SyncStatus::T2s => '<',
            SyncStatus::Syncing => '+',
            SyncStatus::Synced => '|',
        }
    }

    /// Status for a marker glyph.
    pub fn from_glyph(glyph: char) -> Option<Self> {
        match glyph {
            '>' => Some(SyncStatus::S2t),
            '<' => Some(SyncStatus::T2s),
            '+' => Some(SyncStatus::Syncing),
            '|' => Some(SyncStatus::Synced),
            _ => None,
        }
    }

    /// The authoritative part; `None` while syncing or synced.
    pub fn from_part(self) -> Option<PartKind> {
        match self {
            SyncStatus::S2t => Some(PartKind::Source),
            SyncStatus::T2s => Some(PartKind::Target),
            SyncStatus::Syncing | SyncStatus::Synced => None,
        }
    }

    /// The part to be regenerated; `None` while syncing or synced.
    pub fn to_part(self) -> Option<PartKind> {
        self.from_part().map(PartKind::opposite)
    }

    /// Whether one side has edits not yet propagated.
    pub fn is_dirty(self) -> bool {
        self.from_part().is_some()
    }

    /// Highlighting for each part under this status.
    pub fn decoration(self) -> Decoration {
        use Highlight::{Dirty, Synced};
        match self {
            SyncStatus::S2t => Decoration { source: Dirty, target: Synced },
            SyncStatus::T2s => Decoration { source: Synced, target: Dirty },
            SyncStatus::Syncing => Decoration { source: Dirty, target: Dirty },
            SyncStatus::Synced => Decoration { source: Synced, target: Synced },
        }
    }

    /// Actions a host may offer for a block in this status.
    pub fn actions(self) -> Vec<BlockAction> {
        match self {
            SyncStatus::S2t => vec![BlockAction::Sync { from: PartKind::Source }],
            SyncStatus::T2s => vec![BlockAction::Sync { from: PartKind::Target }],
            SyncStatus::Syncing => vec![BlockAction::Abort],
            SyncStatus::Synced => vec![
                BlockAction::Resync { from: PartKind::Source },
                BlockAction::Resync { from: PartKind::Target },
            ],
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Highlight class for one part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Highlight {
    Dirty,
    Synced,
}

/// Per-part highlighting for a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    pub source: Highlight,
    pub target: Highlight,
}

impl Decoration {
    pub fn for_status(status: SyncStatus) -> Self {
        status.decoration()
    }

    /// Highlight for the given part.
    pub fn part(&self, kind: PartKind) -> Highlight {
        match kind {
            PartKind::Source => self.source,
            PartKind::Target => self.target,
        }
    }
}

/// A user-facing action on a block (lens / menu entry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BlockAction {
    /// Propagate the dirty side.
    Sync { from: PartKind },
    /// Regenerate a synced block from the given side.
    Resync { from: PartKind },
    /// Cancel the in-flight task.
    Abort,
}
