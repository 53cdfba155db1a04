//! Export: the document without its comment lines.
//!
//! Markers live in comments, so dropping comments leaves only the
//! target-language text. LaTeX `\input{..}` and `\include{..}` lines are
//! expanded in place, recursively, relative to a base directory.

use std::path::{Path, PathBuf};

use syncwright_types::{BlockParser, CommentSyntax, SyncStatus, Uid};
use thiserror::Error;
use tracing::{debug, info};

/// Nesting limit for include expansion; also stops include cycles.
pub const MAX_INCLUDE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("included file {} not found", .0.display())]
    MissingInclude(PathBuf),

    #[error("{} has unsynced blocks: {}", .path.display(), format_uids(.uids))]
    Unsynced { path: PathBuf, uids: Vec<Uid> },

    #[error("includes nested too deeply at {}", .0.display())]
    TooDeep(PathBuf),
}

fn format_uids(uids: &[Uid]) -> String {
    uids.iter().map(Uid::as_str).collect::<Vec<_>>().join(", ")
}

/// Drop every comment line (and every line inside a delimited comment).
pub fn strip_markers(text: &str, syntax: &CommentSyntax) -> String {
    let mut out = Vec::new();
    let mut in_comment = false;
    for line in text.split('\n') {
        if in_comment {
            if let Some(close) = &syntax.close {
                in_comment = !line.contains(close.as_str());
            }
            continue;
        }
        if syntax.is_comment(line) {
            if let Some(close) = &syntax.close {
                let body = &line.trim_start()[syntax.open.len()..];
                in_comment = !body.contains(close.as_str());
            }
            continue;
        }
        out.push(line);
    }
    out.join("\n")
}

/// Path argument of a `\input{..}` or `\include{..}` line.
pub fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim_start();
    let rest = rest
        .strip_prefix("\\input{")
        .or_else(|| rest.strip_prefix("\\include{"))?;
    let end = rest.find('}')?;
    let target = rest[..end].trim();
    (!target.is_empty()).then_some(target)
}

/// Exports files on disk.
#[derive(Debug, Clone)]
pub struct Exporter {
    parser: BlockParser,
    base: PathBuf,
}

impl Exporter {
    /// Includes resolve against `base`.
    pub fn new(parser: BlockParser, base: impl Into<PathBuf>) -> Self {
        Self {
            parser,
            base: base.into(),
        }
    }

    fn read(path: &Path) -> Result<String, ExportError> {
        std::fs::read_to_string(path).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn resolve(&self, target: &str) -> Result<PathBuf, ExportError> {
        let mut path = self.base.join(target);
        if path.extension().is_none_or(|ext| ext != "tex") {
            let mut name = path.into_os_string();
            name.push(".tex");
            path = PathBuf::from(name);
        }
        if !path.is_file() {
            return Err(ExportError::MissingInclude(path));
        }
        Ok(path)
    }

    /// Every block in `path` and its includes must be synced.
    pub fn check(&self, path: &Path) -> Result<(), ExportError> {
        self.check_at(path, 0)
    }

    fn check_at(&self, path: &Path, depth: usize) -> Result<(), ExportError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ExportError::TooDeep(path.to_path_buf()));
        }
        let text = Self::read(path)?;
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let uids: Vec<Uid> = self
            .parser
            .scan(&lines)
            .into_iter()
            .filter(|block| block.status != SyncStatus::Synced)
            .map(|block| block.uid)
            .collect();
        if !uids.is_empty() {
            return Err(ExportError::Unsynced {
                path: path.to_path_buf(),
                uids,
            });
        }
        for target in lines.iter().filter_map(|line| include_target(line)) {
            self.check_at(&self.resolve(target)?, depth + 1)?;
        }
        Ok(())
    }

    /// Expanded, comment-free text of `path`.
    pub fn render(&self, path: &Path) -> Result<String, ExportError> {
        self.render_at(path, 0)
    }

    fn render_at(&self, path: &Path, depth: usize) -> Result<String, ExportError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ExportError::TooDeep(path.to_path_buf()));
        }
        let text = strip_markers(&Self::read(path)?, &self.parser.syntax);
        let mut out = Vec::new();
        for line in text.split('\n') {
            match include_target(line) {
                Some(target) => {
                    let included = self.resolve(target)?;
                    debug!(from = %path.display(), include = %included.display(), "expanding include");
                    out.push(String::new());
                    out.push(self.render_at(&included, depth + 1)?);
                    out.push(String::new());
                }
                None => out.push(line.to_string()),
            }
        }
        Ok(out.join("\n"))
    }

    /// Check, render and write `<stem>-exported.<ext>` next to `path`.
    pub fn export(&self, path: &Path) -> Result<PathBuf, ExportError> {
        self.check(path)?;
        let text = self.render(path)?;
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let name = match path.extension() {
            Some(ext) => format!("{stem}-exported.{}", ext.to_string_lossy()),
            None => format!("{stem}-exported"),
        };
        let out = path.with_file_name(name);
        std::fs::write(&out, text).map_err(|source| ExportError::Io {
            path: out.clone(),
            source,
        })?;
        info!(from = %path.display(), to = %out.display(), "exported");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncwright_types::Languages;

    fn exporter(base: &Path) -> Exporter {
        Exporter::new(BlockParser::new(CommentSyntax::latex(), Languages::default()), base)
    }

    #[test]
    fn test_strip_line_comments() {
        let text = "\\section{Intro}\n%sync|ab12cd Hello.\n\n你好。\n  % note\nend";
        assert_eq!(
            strip_markers(text, &CommentSyntax::latex()),
            "\\section{Intro}\n\n你好。\nend"
        );
    }

    #[test]
    fn test_comment_target_is_dropped() {
        let text = "%sync|ab12cd Note.\n\n% just a note\nend";
        let parser = BlockParser::new(CommentSyntax::latex(), Languages::default());
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        assert!(parser.parse_at(lines.as_slice(), 0).is_some());
        assert_eq!(strip_markers(text, &CommentSyntax::latex()), "\nend");
    }

    #[test]
    fn test_strip_delimited_comments() {
        let text = "# Title\n<!--sync|ab12cd Hello.-->\n\n你好。\n<!-- a\nlonger note -->\ntail";
        assert_eq!(
            strip_markers(text, &CommentSyntax::markdown()),
            "# Title\n\n你好。\ntail"
        );
    }

    #[test]
    fn test_include_target() {
        assert_eq!(include_target("  \\input{chapters/one}"), Some("chapters/one"));
        assert_eq!(include_target("\\include{two.tex} % trailing"), Some("two.tex"));
        assert_eq!(include_target("\\input{}"), None);
        assert_eq!(include_target("text \\input{x}"), None);
    }

    #[test]
    fn test_export_expands_includes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.tex"), "%sync|ab12cd One.\n\n一。").unwrap();
        let main = dir.path().join("main.tex");
        std::fs::write(&main, "start\n\\input{one}\nend").unwrap();

        let out = exporter(dir.path()).export(&main).unwrap();
        assert_eq!(out, dir.path().join("main-exported.tex"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "start\n\n\n一。\n\nend");
    }

    #[test]
    fn test_check_reports_unsynced_in_includes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.tex"), "%sync>ab12cd One.\n\n").unwrap();
        let main = dir.path().join("main.tex");
        std::fs::write(&main, "\\include{one}").unwrap();

        match exporter(dir.path()).check(&main) {
            Err(ExportError::Unsynced { uids, .. }) => assert_eq!(uids, vec![Uid::parse("ab12cd").unwrap()]),
            other => panic!("expected unsynced, got {other:?}"),
        }
        assert!(!dir.path().join("main-exported.tex").exists());
    }

    #[test]
    fn test_missing_include_and_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.tex");
        std::fs::write(&main, "\\input{absent}").unwrap();
        assert!(matches!(exporter(dir.path()).render(&main), Err(ExportError::MissingInclude(_))));

        std::fs::write(&main, "\\input{main}").unwrap();
        assert!(matches!(exporter(dir.path()).render(&main), Err(ExportError::TooDeep(_))));
    }
}
