//! Patch parsing, formatting, and strict application.
//!
//! Reads the patch format produced by `git diff`, `git show`, and
//! `git format-patch` (including extended headers, quoted paths, and
//! binary patches), represents it as structured [`File`] records, writes
//! those records back as canonical git diff bytes, and applies them to
//! original content with exact-match conflict detection.

pub mod apply;
pub mod base85;
pub mod binary;
pub mod file_header;
pub mod format;
pub mod io;
pub mod parser;
pub mod quote;
pub mod text;

pub use apply::{Applier, ApplyCause, ApplyError, Conflict};
pub use io::{LineReaderAt, ReadAt};
pub use parser::{parse, Parser};

use bstr::{BStr, BString, ByteSlice};

/// Errors from parsing or validating patch data.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Invalid patch syntax at a specific input line (1-indexed).
    #[error("line {line}: {reason}")]
    Parse { line: u64, reason: String },

    /// A fragment whose stored counts or positions disagree with its lines.
    #[error("{reason}")]
    InvalidFragment { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A parsed patch: zero or more files plus the content that preceded the
/// first file header (commit metadata, mail headers, or nothing).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    /// Bytes before the first file header.
    pub preamble: BString,
    /// Per-file changes, in input order.
    pub files: Vec<File>,
}

/// All changes to a single path.
///
/// A file holds either text fragments or binary fragments, never both. Mode
/// and OID metadata is optional and present only when the patch carried it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    /// Path on the old side (None for created files).
    pub old_name: Option<BString>,
    /// Path on the new side (None for deleted files).
    pub new_name: Option<BString>,

    pub is_new: bool,
    pub is_delete: bool,
    pub is_copy: bool,
    pub is_rename: bool,

    /// Old POSIX file mode (e.g. `0o100644`), if given.
    pub old_mode: Option<u32>,
    /// New POSIX file mode, if given.
    pub new_mode: Option<u32>,

    /// Abbreviated or full hex object id of the old content.
    pub old_oid_prefix: Option<String>,
    /// Abbreviated or full hex object id of the new content.
    pub new_oid_prefix: Option<String>,

    /// Similarity or dissimilarity score in [0, 100]; 0 means unset.
    pub score: u8,

    /// Text hunks, in input order. Empty for binary and metadata-only files.
    pub text_fragments: Vec<TextFragment>,

    pub is_binary: bool,
    /// Forward binary patch data. None when the patch only declared
    /// "Binary files differ" without data.
    pub binary_fragment: Option<BinaryFragment>,
    /// Reverse binary patch data, when present.
    pub reverse_binary_fragment: Option<BinaryFragment>,
}

/// One `@@` hunk: a contiguous change region in a text file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFragment {
    /// Trailing text of the hunk header (usually the enclosing function).
    pub comment: BString,

    /// 1-indexed start line on the old side; 0 for file creation.
    pub old_position: i64,
    pub old_lines: i64,
    /// 1-indexed start line on the new side.
    pub new_position: i64,
    pub new_lines: i64,

    /// Context lines before the first addition or deletion.
    pub leading_context: i64,
    /// Context lines after the last addition or deletion.
    pub trailing_context: i64,

    pub lines_added: i64,
    pub lines_deleted: i64,

    pub lines: Vec<Line>,
}

impl TextFragment {
    /// Check the fragment for internal consistency: every derived count must
    /// match the stored value, and a file-creation fragment (old position 0)
    /// may only add lines.
    ///
    /// Application assumes a validated fragment and will refuse anything else.
    pub fn validate(&self) -> Result<(), PatchError> {
        let mut old_lines: i64 = 0;
        let mut new_lines: i64 = 0;
        let mut leading: i64 = 0;
        let mut trailing: i64 = 0;
        let mut added: i64 = 0;
        let mut deleted: i64 = 0;

        for line in &self.lines {
            match line {
                Line::Context(_) => {
                    old_lines += 1;
                    new_lines += 1;
                    if added == 0 && deleted == 0 {
                        leading += 1;
                    } else {
                        trailing += 1;
                    }
                }
                Line::Add(_) => {
                    new_lines += 1;
                    added += 1;
                    trailing = 0;
                }
                Line::Delete(_) => {
                    old_lines += 1;
                    deleted += 1;
                    trailing = 0;
                }
            }
        }

        let count_err = |kind: &str, actual: i64, stored: i64| PatchError::InvalidFragment {
            reason: format!("fragment contains {actual} {kind} lines, header reports {stored}"),
        };

        if old_lines != self.old_lines {
            return Err(count_err("old", old_lines, self.old_lines));
        }
        if new_lines != self.new_lines {
            return Err(count_err("new", new_lines, self.new_lines));
        }
        if leading != self.leading_context {
            return Err(count_err("leading context", leading, self.leading_context));
        }
        if trailing != self.trailing_context {
            return Err(count_err("trailing context", trailing, self.trailing_context));
        }
        if added != self.lines_added {
            return Err(count_err("added", added, self.lines_added));
        }
        if deleted != self.lines_deleted {
            return Err(count_err("deleted", deleted, self.lines_deleted));
        }

        if self.old_position == 0 && self.old_lines != 0 {
            return Err(PatchError::InvalidFragment {
                reason: "file creation fragment contains old lines".into(),
            });
        }

        Ok(())
    }
}

/// A single line in a text fragment, with its literal content.
///
/// The content includes the trailing newline unless a
/// `\ No newline at end of file` marker removed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Context(BString),
    Add(BString),
    Delete(BString),
}

impl Line {
    /// The line content.
    pub fn text(&self) -> &BStr {
        match self {
            Line::Context(t) | Line::Add(t) | Line::Delete(t) => t.as_bstr(),
        }
    }

    pub(crate) fn text_mut(&mut self) -> &mut BString {
        match self {
            Line::Context(t) | Line::Add(t) | Line::Delete(t) => t,
        }
    }

    /// True if the line appears on the old side (context or delete).
    pub fn is_old(&self) -> bool {
        matches!(self, Line::Context(_) | Line::Delete(_))
    }

    /// True if the line appears on the new side (context or add).
    pub fn is_new(&self) -> bool {
        matches!(self, Line::Context(_) | Line::Add(_))
    }

    /// The operation prefix byte used in hunk bodies.
    pub fn prefix(&self) -> u8 {
        match self {
            Line::Context(_) => b' ',
            Line::Add(_) => b'+',
            Line::Delete(_) => b'-',
        }
    }
}

/// How a binary fragment encodes the new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryPatchMethod {
    /// `data` is the full new content.
    Literal,
    /// `data` is a git delta opcode stream against the old content.
    Delta,
}

/// One binary patch segment: the inflated payload of a `literal` or `delta`
/// block of a `GIT binary patch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFragment {
    pub method: BinaryPatchMethod,
    /// Declared inflated size, verified during parsing.
    pub size: u64,
    /// Inflated bytes.
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace_fragment() -> TextFragment {
        TextFragment {
            old_position: 2,
            old_lines: 3,
            new_position: 2,
            new_lines: 3,
            leading_context: 1,
            trailing_context: 1,
            lines_added: 1,
            lines_deleted: 1,
            lines: vec![
                Line::Context(BString::from("ctx\n")),
                Line::Delete(BString::from("old\n")),
                Line::Add(BString::from("new\n")),
                Line::Context(BString::from("ctx\n")),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn validate_consistent_fragment() {
        replace_fragment().validate().unwrap();
    }

    #[test]
    fn validate_rejects_wrong_old_count() {
        let mut frag = replace_fragment();
        frag.old_lines = 4;
        let err = frag.validate().unwrap_err();
        assert!(matches!(err, PatchError::InvalidFragment { .. }));
    }

    #[test]
    fn validate_rejects_wrong_context_counts() {
        let mut frag = replace_fragment();
        frag.leading_context = 0;
        assert!(frag.validate().is_err());

        let mut frag = replace_fragment();
        frag.trailing_context = 2;
        assert!(frag.validate().is_err());
    }

    #[test]
    fn validate_rejects_creation_with_old_lines() {
        let mut frag = replace_fragment();
        frag.old_position = 0;
        let err = frag.validate().unwrap_err();
        assert!(err.to_string().contains("file creation"));
    }

    #[test]
    fn validate_trailing_context_resets() {
        // context between changes counts as trailing only after the last change
        let frag = TextFragment {
            old_position: 1,
            old_lines: 4,
            new_position: 1,
            new_lines: 4,
            leading_context: 1,
            trailing_context: 1,
            lines_added: 1,
            lines_deleted: 1,
            lines: vec![
                Line::Context(BString::from("a\n")),
                Line::Delete(BString::from("b\n")),
                Line::Context(BString::from("c\n")),
                Line::Add(BString::from("d\n")),
                Line::Context(BString::from("e\n")),
            ],
            ..Default::default()
        };
        frag.validate().unwrap();
    }

    #[test]
    fn line_sides() {
        let ctx = Line::Context(BString::from("x\n"));
        let add = Line::Add(BString::from("x\n"));
        let del = Line::Delete(BString::from("x\n"));
        assert!(ctx.is_old() && ctx.is_new());
        assert!(!add.is_old() && add.is_new());
        assert!(del.is_old() && !del.is_new());
        assert_eq!(ctx.prefix(), b' ');
        assert_eq!(add.prefix(), b'+');
        assert_eq!(del.prefix(), b'-');
    }
}
