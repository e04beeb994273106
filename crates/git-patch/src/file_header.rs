//! File header recognition and metadata parsing.
//!
//! Covers both header families: the `diff --git` form with its extended
//! header lines (modes, rename/copy, similarity scores, `index`), and the
//! traditional `---`/`+++` form, which is only treated as a header when a
//! probable hunk header follows it.

use std::io::BufRead;

use bstr::{BStr, BString, ByteSlice};
use chrono::DateTime;

use crate::parser::Parser;
use crate::quote::unquote_name;
use crate::text::is_maybe_fragment_header;
use crate::{File, PatchError};

pub(crate) const DEV_NULL: &str = "/dev/null";

impl<R: BufRead> Parser<R> {
    /// Parse a `diff --git` header and its metadata block. Leaves the parser
    /// on the first line of non-header content, which is not consumed.
    pub(crate) fn git_file_header(&mut self) -> Result<Option<File>, PatchError> {
        const PREFIX: &[u8] = b"diff --git ";
        if !self.line(0).starts_with(PREFIX) {
            return Ok(None);
        }

        let header = self.line(0)[PREFIX.len()..].to_owned();
        let default_name = parse_git_header_name(header.as_bstr())
            .map_err(|e| self.err_at(0, format!("git file header: {e}")))?;

        let mut file = File::default();
        loop {
            if !self.advance()? {
                break;
            }
            let line = self.lines[0].clone();
            let end = parse_git_header_data(&mut file, line.as_bstr(), default_name.as_bstr())
                .map_err(|e| self.err_at(0, format!("git file header: {e}")))?;
            if end {
                break;
            }
        }

        if file.old_name.is_none() && file.new_name.is_none() {
            if default_name.is_empty() {
                return Err(self.err_at(0, "git file header: missing filename information"));
            }
            file.old_name = Some(default_name.clone());
            file.new_name = Some(default_name);
        }
        if (file.new_name.is_none() && !file.is_delete)
            || (file.old_name.is_none() && !file.is_new)
        {
            return Err(self.err_at(0, "git file header: missing filename information"));
        }

        Ok(Some(file))
    }

    /// Parse a traditional `---`/`+++` header pair. Only recognized when the
    /// line after them looks like a hunk header; anything else is content.
    pub(crate) fn traditional_file_header(&mut self) -> Result<Option<File>, PatchError> {
        const OLD_PREFIX: &[u8] = b"--- ";
        const NEW_PREFIX: &[u8] = b"+++ ";

        if !self.line(0).starts_with(OLD_PREFIX) || !self.line(1).starts_with(NEW_PREFIX) {
            return Ok(None);
        }
        if !is_maybe_fragment_header(self.line(2)) {
            return Ok(None);
        }

        let old_line = self.lines[0].clone();
        let new_line = self.lines[1].clone();

        let (old_name, _) = parse_name(
            strip_newline(old_line[OLD_PREFIX.len()..].as_bstr()),
            Some(b'\t'),
            0,
        )
        .map_err(|e| self.err_at(0, format!("file header: {e}")))?;
        let (new_name, _) = parse_name(
            strip_newline(new_line[NEW_PREFIX.len()..].as_bstr()),
            Some(b'\t'),
            0,
        )
        .map_err(|e| self.err_at(1, format!("file header: {e}")))?;

        self.advance()?;
        self.advance()?;

        let mut file = File::default();
        if old_name == DEV_NULL || has_epoch_timestamp(old_line.as_bstr()) {
            file.is_new = true;
            file.new_name = Some(new_name);
        } else if new_name == DEV_NULL || has_epoch_timestamp(new_line.as_bstr()) {
            file.is_delete = true;
            file.old_name = Some(old_name);
        } else {
            file.old_name = Some(old_name);
            file.new_name = Some(new_name);
        }
        Ok(Some(file))
    }
}

/// Extract the default file name from a `diff --git` header line. The
/// default is used for mode-only changes and creation or deletion of empty
/// files; when the two paths differ after `a/`/`b/` stripping (a rename),
/// the default is empty and later header lines must supply the names.
pub(crate) fn parse_git_header_name(header: &BStr) -> Result<BString, String> {
    let header = strip_newline(header);

    let (first, mut n) = parse_name(header, None, 1)?;
    if n < header.len() && (header[n] == b' ' || header[n] == b'\t') {
        n += 1;
    }
    let (second, _) = parse_name(&header[n..], None, 1)?;

    if first != second {
        return Ok(BString::default());
    }
    Ok(first)
}

type HeaderParser = fn(&mut File, &BStr, &BStr) -> Result<(), String>;

const HEADER_PARSERS: &[(&[u8], HeaderParser)] = &[
    (b"--- ", parse_header_old_name),
    (b"+++ ", parse_header_new_name),
    (b"old mode ", parse_header_old_mode),
    (b"new mode ", parse_header_new_mode),
    (b"deleted file mode ", parse_header_deleted_mode),
    (b"new file mode ", parse_header_created_mode),
    (b"copy from ", parse_header_copy_from),
    (b"copy to ", parse_header_copy_to),
    (b"rename old ", parse_header_rename_from),
    (b"rename new ", parse_header_rename_to),
    (b"rename from ", parse_header_rename_from),
    (b"rename to ", parse_header_rename_to),
    (b"similarity index ", parse_header_score),
    (b"dissimilarity index ", parse_header_score),
    (b"index ", parse_header_index),
];

/// Parse one metadata line of a git file header block. Returns true when the
/// line is not part of the header: a hunk header or any unknown line.
pub(crate) fn parse_git_header_data(
    file: &mut File,
    line: &BStr,
    default_name: &BStr,
) -> Result<bool, String> {
    let line = strip_newline(line);

    if line.starts_with(b"@@ -") {
        return Ok(true);
    }
    for (prefix, parse) in HEADER_PARSERS {
        if let Some(value) = line.strip_prefix(*prefix) {
            parse(file, value.as_bstr(), default_name)?;
            return Ok(false);
        }
    }

    // an unknown line ends the header; this is normal for empty diffs
    Ok(true)
}

fn parse_header_old_name(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    let (name, _) = parse_name(value, Some(b'\t'), 1)?;
    if f.old_name.is_none() && !f.is_new {
        f.old_name = Some(name);
        return Ok(());
    }
    verify_name(name.as_bstr(), f.old_name.as_ref(), f.is_new, "old")
}

fn parse_header_new_name(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    let (name, _) = parse_name(value, Some(b'\t'), 1)?;
    if f.new_name.is_none() && !f.is_delete {
        f.new_name = Some(name);
        return Ok(());
    }
    verify_name(name.as_bstr(), f.new_name.as_ref(), f.is_delete, "new")
}

fn parse_header_old_mode(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    f.old_mode = Some(parse_mode(value)?);
    Ok(())
}

fn parse_header_new_mode(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    f.new_mode = Some(parse_mode(value)?);
    Ok(())
}

fn parse_header_deleted_mode(f: &mut File, value: &BStr, default: &BStr) -> Result<(), String> {
    f.is_delete = true;
    f.old_name = if default.is_empty() {
        None
    } else {
        Some(default.to_owned())
    };
    parse_header_old_mode(f, value, default)
}

fn parse_header_created_mode(f: &mut File, value: &BStr, default: &BStr) -> Result<(), String> {
    f.is_new = true;
    f.new_name = if default.is_empty() {
        None
    } else {
        Some(default.to_owned())
    };
    parse_header_new_mode(f, value, default)
}

fn parse_header_copy_from(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    f.is_copy = true;
    f.old_name = Some(parse_name(value, None, 0)?.0);
    Ok(())
}

fn parse_header_copy_to(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    f.is_copy = true;
    f.new_name = Some(parse_name(value, None, 0)?.0);
    Ok(())
}

fn parse_header_rename_from(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    f.is_rename = true;
    f.old_name = Some(parse_name(value, None, 0)?.0);
    Ok(())
}

fn parse_header_rename_to(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    f.is_rename = true;
    f.new_name = Some(parse_name(value, None, 0)?.0);
    Ok(())
}

fn parse_header_score(f: &mut File, value: &BStr, _default: &BStr) -> Result<(), String> {
    let text = value
        .to_str()
        .map_err(|_| "invalid score line: invalid syntax".to_string())?;
    let text = text.strip_suffix('%').unwrap_or(text);
    let score: i64 = text
        .parse()
        .map_err(|_| "invalid score line: invalid syntax".to_string())?;
    if (0..=100).contains(&score) {
        f.score = score as u8;
    }
    Ok(())
}

fn parse_header_index(f: &mut File, value: &BStr, default: &BStr) -> Result<(), String> {
    const SEP: &str = "..";

    let (oids, mode) = match value.split_once_str(" ") {
        Some((oids, mode)) => (oids, Some(mode)),
        None => (value.as_bytes(), None),
    };
    let (old, new) = oids
        .split_once_str(SEP)
        .ok_or_else(|| format!("invalid index line: missing {SEP:?}"))?;

    // OID length and algorithm validation is left to callers that know the
    // repository's hash function
    f.old_oid_prefix = Some(oid_to_string(old)?);
    f.new_oid_prefix = Some(oid_to_string(new)?);

    if let Some(mode) = mode {
        return parse_header_old_mode(f, mode.as_bstr(), default);
    }
    Ok(())
}

fn oid_to_string(oid: &[u8]) -> Result<String, String> {
    std::str::from_utf8(oid)
        .map(str::to_owned)
        .map_err(|_| "invalid index line: malformed oid".to_string())
}

fn parse_mode(value: &BStr) -> Result<u32, String> {
    let text = value
        .to_str()
        .map_err(|_| "invalid mode line: invalid syntax".to_string())?;
    let mode = u32::from_str_radix(text, 8)
        .map_err(|_| "invalid mode line: invalid syntax".to_string())?;
    if mode >= 1 << 18 {
        return Err("invalid mode line: value out of range".into());
    }
    Ok(mode)
}

/// Extract a file name from the start of `s`, returning the name and the
/// number of input bytes consumed.
///
/// A leading `"` opens a C-style quoted name. Otherwise the name runs to the
/// terminator: `term` when given, else the first space or tab. A name never
/// crosses a newline. The literal `/dev/null` bypasses cleaning; any other
/// name has `drop_prefix` leading path components removed and duplicate
/// slashes collapsed.
pub(crate) fn parse_name(
    s: &BStr,
    term: Option<u8>,
    drop_prefix: usize,
) -> Result<(BString, usize), String> {
    if s.first() == Some(&b'"') {
        let (name, n) = unquote_name(s)?;
        if name == DEV_NULL {
            return Ok((name, n));
        }
        return Ok((clean_name(name.as_bstr(), drop_prefix), n));
    }

    let mut n = 0;
    while n < s.len() {
        let c = s[n];
        let stop = match term {
            Some(t) => c == t,
            None => c == b' ' || c == b'\t',
        };
        if stop || c == b'\n' {
            break;
        }
        n += 1;
    }
    if n == 0 {
        return Err("missing name".into());
    }

    let name = &s[..n];
    if name == DEV_NULL {
        return Ok((name.to_owned(), n));
    }
    Ok((clean_name(name, drop_prefix), n))
}

/// Check a parsed name against state set by previous header lines.
fn verify_name(
    parsed: &BStr,
    existing: Option<&BString>,
    is_null: bool,
    side: &str,
) -> Result<(), String> {
    if let Some(existing) = existing {
        if is_null {
            return Err(format!(
                "expected {DEV_NULL}, but filename is set to {existing}"
            ));
        }
        if existing.as_bstr() != parsed {
            return Err(format!("inconsistent {side} filename"));
        }
    }
    if is_null && parsed != DEV_NULL {
        return Err(format!("expected {DEV_NULL}"));
    }
    Ok(())
}

/// Remove duplicate slashes and drop `drop` leading path components.
fn clean_name(name: &BStr, mut drop: usize) -> BString {
    let mut out = BString::default();
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                i += 1;
                continue;
            }
            if drop > 0 {
                drop -= 1;
                out.clear();
                i += 1;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn strip_newline(line: &BStr) -> &BStr {
    line.strip_suffix(b"\n").map(BStr::new).unwrap_or(line)
}

/// True if the tab-separated suffix of a traditional header line is a
/// timestamp equal to the Unix epoch, which marks the side as absent.
fn has_epoch_timestamp(line: &BStr) -> bool {
    let Some(tab) = line.find_byte(b'\t') else {
        return false;
    };
    let ts = strip_newline(&line[tab + 1..]);
    let Ok(ts) = ts.to_str() else {
        return false;
    };

    match DateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f %z") {
        Ok(dt) => dt.timestamp() == 0 && dt.timestamp_subsec_nanos() == 0,
        Err(_) => false,
    }
}
