//! Block position index.
//!
//! Resolves a uid to its current block without rescanning the document on
//! every lookup. The cached line is only a hint: every lookup re-parses at the
//! hint, and on a miss searches outward from it, so the index heals itself as
//! unrelated edits shift lines.
//!
//! ```text
//! hint-3  hint-2  hint-1  [hint]  hint+1  hint+2  hint+3
//!                    2      0       1
//!            4                              3
//! ```

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use syncwright_types::{Block, BlockParser, DocumentId, LineSource, Uid};
use tracing::{debug, trace};

use crate::cancel::SyncToken;

/// Probes between cancellation checks during a full scan.
const SCAN_CHECK_INTERVAL: usize = 64;

/// Default uid capacity per document.
pub const DEFAULT_BLOCKS_PER_DOCUMENT: usize = 100;

/// Default number of documents tracked.
pub const DEFAULT_DOCUMENTS: usize = 10;

type LineCache = LruCache<Uid, usize>;

/// Uid -> last known line, per document, both levels LRU-bounded.
pub struct Locator {
    parser: BlockParser,
    documents: Mutex<LruCache<DocumentId, LineCache>>,
    blocks_per_document: NonZeroUsize,
}

impl Locator {
    pub fn new(parser: BlockParser) -> Self {
        Self::with_capacity(parser, DEFAULT_DOCUMENTS, DEFAULT_BLOCKS_PER_DOCUMENT)
    }

    /// Zero capacities are clamped to one.
    pub fn with_capacity(parser: BlockParser, documents: usize, blocks_per_document: usize) -> Self {
        Self {
            parser,
            documents: Mutex::new(LruCache::new(
                NonZeroUsize::new(documents).unwrap_or(NonZeroUsize::MIN),
            )),
            blocks_per_document: NonZeroUsize::new(blocks_per_document)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn parser(&self) -> &BlockParser {
        &self.parser
    }

    fn hint(&self, document: DocumentId, uid: Uid) -> Option<usize> {
        self.documents
            .lock()
            .get_mut(&document)
            .and_then(|lines| lines.get(&uid).copied())
    }

    /// Record a block position.
    pub fn remember(&self, document: DocumentId, uid: Uid, line: usize) {
        let mut documents = self.documents.lock();
        let cap = self.blocks_per_document;
        documents
            .get_or_insert_mut(document, || LruCache::new(cap))
            .put(uid, line);
    }

    /// Drop everything known about a document.
    pub fn forget(&self, document: DocumentId) {
        self.documents.lock().pop(&document);
    }

    fn probe<D: LineSource + ?Sized>(&self, doc: &D, line: usize, uid: Uid) -> Option<Block> {
        self.parser.parse_at(doc, line).filter(|block| block.uid == uid)
    }

    /// Resolve `uid` to its block at the document's current version.
    ///
    /// Re-validates the cached line first, then probes `hint - r` and
    /// `hint + r` for growing `r`, checking `token` at each radius. Returns
    /// `None` when not found or when cancelled.
    pub fn find<D: LineSource + ?Sized>(
        &self,
        document: DocumentId,
        doc: &D,
        uid: Uid,
        token: &SyncToken,
    ) -> Option<Block> {
        let line_count = doc.line_count();
        let cached = self.hint(document, uid);
        let hint = cached.unwrap_or(0).min(line_count.saturating_sub(1));

        if let Some(block) = self.probe(doc, hint, uid) {
            if cached != Some(hint) {
                self.remember(document, uid, hint);
            }
            trace!(uid = %uid, line = hint, "locator hit");
            return Some(block);
        }

        for radius in 1..=line_count {
            if token.is_cancelled() {
                debug!(uid = %uid, radius, "locator search cancelled");
                return None;
            }
            let below = hint.checked_sub(radius);
            let above = hint + radius;
            if below.is_none() && above >= line_count {
                break;
            }
            let found = below
                .and_then(|line| self.probe(doc, line, uid))
                .or_else(|| (above < line_count).then(|| self.probe(doc, above, uid)).flatten());
            if let Some(block) = found {
                debug!(uid = %uid, from = hint, to = block.line, radius, "locator healed");
                self.remember(document, uid, block.line);
                return Some(block);
            }
        }

        trace!(uid = %uid, "locator miss");
        None
    }

    /// Every block, top to bottom, refreshing the cache as a side effect.
    ///
    /// On cancellation returns what was found so far.
    pub fn find_all<D: LineSource + ?Sized>(
        &self,
        document: DocumentId,
        doc: &D,
        token: &SyncToken,
    ) -> Vec<Block> {
        let mut blocks = Vec::new();
        for line in 0..doc.line_count() {
            if line % SCAN_CHECK_INTERVAL == 0 && token.is_cancelled() {
                debug!(line, found = blocks.len(), "full scan cancelled");
                break;
            }
            if let Some(block) = self.parser.parse_at(doc, line) {
                self.remember(document, block.uid, line);
                blocks.push(block);
            }
        }
        blocks
    }

    /// Block covering `line` as marker or target line.
    pub fn at_line<D: LineSource + ?Sized>(&self, document: DocumentId, doc: &D, line: usize) -> Option<Block> {
        let block = self.parser.parse_at_any(doc, line)?;
        self.remember(document, block.uid, block.line);
        Some(block)
    }

    /// Number of documents tracked.
    pub fn documents(&self) -> usize {
        self.documents.lock().len()
    }
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("documents", &self.documents())
            .field("blocks_per_document", &self.blocks_per_document)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncwright_types::{CommentSyntax, Languages};

    fn locator() -> Locator {
        Locator::new(BlockParser::new(CommentSyntax::latex(), Languages::default()))
    }

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    fn lines(text: &str) -> Vec<String> {
        text.split('\n').map(str::to_string).collect()
    }

    fn doc_with_padding(before: usize) -> Vec<String> {
        let mut doc: Vec<String> = (0..before).map(|i| format!("filler {i}")).collect();
        doc.extend(lines("%sync>aaaaaa one.\n\n一。\n%sync<bbbbbb two.\n\n二。\nend"));
        doc
    }

    #[test]
    fn test_find_all_then_fast_path() {
        let locator = locator();
        let id = DocumentId::ephemeral();
        let doc = doc_with_padding(0);
        let token = SyncToken::detached();

        let all = locator.find_all(id, &doc, &token);
        assert_eq!(all.len(), 2);
        assert_eq!(locator.hint(id, uid("bbbbbb")), Some(3));

        let block = locator.find(id, &doc, uid("bbbbbb"), &token).unwrap();
        assert_eq!(block.line, 3);
    }

    #[test]
    fn test_find_heals_after_shift() {
        let locator = locator();
        let id = DocumentId::ephemeral();
        let token = SyncToken::detached();
        locator.find_all(id, &doc_with_padding(0), &token);

        for k in [1usize, 2, 7, 25] {
            let shifted = doc_with_padding(k);
            let block = locator.find(id, &shifted, uid("bbbbbb"), &token).unwrap();
            assert_eq!(block.line, 3 + k);
            assert_eq!(locator.hint(id, uid("bbbbbb")), Some(3 + k));
            locator.find_all(id, &doc_with_padding(0), &token);
        }
    }

    #[test]
    fn test_find_heals_after_upward_shift() {
        let locator = locator();
        let id = DocumentId::ephemeral();
        let token = SyncToken::detached();
        locator.find_all(id, &doc_with_padding(10), &token);

        let block = locator.find(id, &doc_with_padding(4), uid("aaaaaa"), &token).unwrap();
        assert_eq!(block.line, 4);
    }

    #[test]
    fn test_find_without_hint_scans_forward() {
        let locator = locator();
        let doc = doc_with_padding(5);
        let block = locator
            .find(DocumentId::ephemeral(), &doc, uid("bbbbbb"), &SyncToken::detached())
            .unwrap();
        assert_eq!(block.line, 8);
    }

    #[test]
    fn test_find_checks_uid_not_just_any_block() {
        let locator = locator();
        let id = DocumentId::ephemeral();
        let doc = doc_with_padding(0);
        locator.remember(id, uid("bbbbbb"), 0);
        let block = locator.find(id, &doc, uid("bbbbbb"), &SyncToken::detached()).unwrap();
        assert_eq!(block.uid, uid("bbbbbb"));
    }

    #[test]
    fn test_find_missing_uid() {
        let locator = locator();
        let doc = doc_with_padding(3);
        assert!(locator
            .find(DocumentId::ephemeral(), &doc, uid("zzzzzz"), &SyncToken::detached())
            .is_none());
        assert!(locator
            .find(DocumentId::ephemeral(), &Vec::<String>::new(), uid("zzzzzz"), &SyncToken::detached())
            .is_none());
    }

    #[test]
    fn test_find_stops_when_cancelled() {
        let locator = locator();
        let doc = doc_with_padding(50);
        let token = SyncToken::detached();
        token.cancel();
        assert!(locator.find(DocumentId::ephemeral(), &doc, uid("bbbbbb"), &token).is_none());
        assert!(locator.find_all(DocumentId::ephemeral(), &doc, &token).is_empty());
    }

    #[test]
    fn test_document_lru_is_bounded() {
        let locator = Locator::with_capacity(
            BlockParser::new(CommentSyntax::latex(), Languages::default()),
            2,
            1,
        );
        let docs: Vec<_> = (0..3).map(|_| DocumentId::ephemeral()).collect();
        for id in &docs {
            locator.remember(*id, uid("aaaaaa"), 1);
            locator.remember(*id, uid("bbbbbb"), 2);
        }
        assert_eq!(locator.documents(), 2);
        assert_eq!(locator.hint(docs[0], uid("bbbbbb")), None);
        assert_eq!(locator.hint(docs[2], uid("aaaaaa")), None);
        assert_eq!(locator.hint(docs[2], uid("bbbbbb")), Some(2));
    }

    #[test]
    fn test_at_line_covers_target() {
        let locator = locator();
        let id = DocumentId::ephemeral();
        let doc = doc_with_padding(0);
        assert_eq!(locator.at_line(id, &doc, 5).unwrap().uid, uid("bbbbbb"));
        assert!(locator.at_line(id, &doc, 4).is_none());
    }
}
