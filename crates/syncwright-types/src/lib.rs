//! Block model and marker grammar for syncwright.
//!
//! A document carries paired source/target text regions called blocks. Each
//! block is three lines: a comment-embedded marker holding the uid, status
//! glyph and source text; a separator; and the target text. This crate is the
//! pure leaf: parsing, formatting, and the status tables. No async, no I/O.
//!
//! # Key Types
//!
//! |--------------------|----------------------------------------------|
//! | Type               | Purpose                                      |
//! |--------------------|----------------------------------------------|
//! | [`Uid`]            | 6-char block id, unique within a document    |
//! | [`DocumentId`]     | Stable document identity (UUIDv5 of the URI) |
//! | [`SyncStatus`]     | s2t / t2s / syncing / synced                 |
//! | [`CommentSyntax`]  | Comment tokens of the host file format       |
//! | [`Marker`]         | Parsed marker line                           |
//! | [`Block`]          | Marker + target at a document version        |
//! | [`BlockParser`]    | Parses blocks out of any [`LineSource`]      |
//! |--------------------|----------------------------------------------|

pub mod block;
pub mod ids;
pub mod lang;
pub mod marker;
pub mod status;

pub use block::{Block, BlockParser, LineSource, Part, TARGET_OFFSET};
pub use ids::{DocumentId, UID_LEN, Uid};
pub use lang::{Lang, Languages};
pub use marker::{
    CommentSyntax, MARKER_TAG, Marker, PREFIX_LEN, ParseError, format_prefix, render_marker,
};
pub use status::{BlockAction, Decoration, Highlight, PartKind, SyncStatus};
