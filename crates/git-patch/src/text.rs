//! Text fragment (hunk) parsing.
//!
//! A hunk is a `@@ -old[,n] +new[,n] @@[ comment]` header followed by body
//! lines whose first byte selects the operation. The body is consumed under
//! strict line-count bookkeeping driven by the header ranges.

use std::io::BufRead;

use bstr::{BStr, BString, ByteSlice};

use crate::parser::Parser;
use crate::{File, Line, PatchError, TextFragment};

/// Quick test for a line that could be a fragment header. Git's shortest
/// valid header is `@@ -1 +1 @@` plus a newline.
pub(crate) fn is_maybe_fragment_header(line: &BStr) -> bool {
    const SHORTEST: usize = "@@ -1 +1 @@\n".len();
    line.len() >= SHORTEST && line.starts_with(b"@@ -")
}

/// Parse a fragment header line into `frag`, filling the ranges and comment.
pub(crate) fn parse_fragment_header(frag: &mut TextFragment, header: &BStr) -> Result<(), String> {
    const START_MARK: &[u8] = b"@@ ";
    const END_MARK: &[u8] = b" @@";

    let end = header
        .find(END_MARK)
        .ok_or_else(|| "invalid fragment header".to_string())?;
    let (head, rest) = header.split_at(end + END_MARK.len());
    if !head.starts_with(START_MARK) {
        return Err("invalid fragment header".into());
    }

    frag.comment = rest.trim().as_bstr().to_owned();

    let middle = &head[START_MARK.len()..head.len() - END_MARK.len()];
    let ranges: Vec<&[u8]> = middle.split_str(" ").collect();
    if ranges.len() != 2 {
        return Err("invalid fragment header".into());
    }
    let (old, new) = (ranges[0], ranges[1]);
    if !old.starts_with(b"-") || !new.starts_with(b"+") {
        return Err("invalid fragment header: bad range marker".into());
    }

    let (old_position, old_lines) =
        parse_range(old[1..].as_bstr()).map_err(|e| format!("invalid fragment header: {e}"))?;
    let (new_position, new_lines) =
        parse_range(new[1..].as_bstr()).map_err(|e| format!("invalid fragment header: {e}"))?;

    frag.old_position = old_position;
    frag.old_lines = old_lines;
    frag.new_position = new_position;
    frag.new_lines = new_lines;
    Ok(())
}

/// Parse a `start[,lines]` range; a missing count means 1.
fn parse_range(s: &BStr) -> Result<(i64, i64), String> {
    let (start_part, lines_part) = match s.split_once_str(",") {
        Some((a, b)) => (a, Some(b)),
        None => (s.as_bytes(), None),
    };

    let start = parse_i64(start_part)
        .ok_or_else(|| format!("bad start of range: {}: invalid syntax", start_part.as_bstr()))?;
    let lines = match lines_part {
        Some(part) => parse_i64(part)
            .ok_or_else(|| format!("bad end of range: {}: invalid syntax", part.as_bstr()))?,
        None => 1,
    };
    Ok((start, lines))
}

fn parse_i64(s: &[u8]) -> Option<i64> {
    s.to_str().ok()?.parse().ok()
}

fn is_no_newline_marker(line: &BStr) -> bool {
    // matched by prefix: the marker text is localized, but git guarantees
    // all translations are at least 12 characters
    line.len() >= 12 && line.starts_with(b"\\ ")
}

fn remove_last_newline(frag: &mut TextFragment) -> Result<(), String> {
    let Some(last) = frag.lines.last_mut() else {
        return Err("no newline marker without line content".into());
    };
    let text = last.text_mut();
    if text.last() == Some(&b'\n') {
        text.pop();
    }
    Ok(())
}

impl<R: BufRead> Parser<R> {
    /// Parse all text fragments of a file, returning how many were added.
    pub(crate) fn parse_text_fragments(&mut self, file: &mut File) -> Result<usize, PatchError> {
        let mut n = 0;
        loop {
            let Some(mut frag) = self.text_fragment_header()? else {
                return Ok(n);
            };

            if file.is_new && frag.old_lines > 0 {
                return Err(self.err_at(-1, "new file depends on old contents"));
            }
            if file.is_delete && frag.new_lines > 0 {
                return Err(self.err_at(-1, "deleted file still has contents"));
            }

            self.text_chunk(&mut frag)?;
            file.text_fragments.push(frag);
            n += 1;
        }
    }

    /// Parse and consume a fragment header line, if the current line is one.
    pub(crate) fn text_fragment_header(&mut self) -> Result<Option<TextFragment>, PatchError> {
        if !is_maybe_fragment_header(self.line(0)) {
            return Ok(None);
        }
        let mut frag = TextFragment::default();
        parse_fragment_header(&mut frag, self.line(0)).map_err(|e| self.err_at(0, e))?;
        self.advance()?;
        Ok(Some(frag))
    }

    /// Parse the body of a fragment, consuming lines until the header counts
    /// are satisfied plus any trailing no-newline marker.
    pub(crate) fn text_chunk(&mut self, frag: &mut TextFragment) -> Result<(), PatchError> {
        if self.line(0).is_empty() {
            return Err(self.err_at(0, "no content following fragment header"));
        }
        let header_line = self.lineno.saturating_sub(1);

        let mut old_lines = frag.old_lines;
        let mut new_lines = frag.new_lines;

        while old_lines > 0 || new_lines > 0 {
            let line = self.lines[0].clone();
            if line.is_empty() {
                break;
            }

            let op = line[0];
            match op {
                b' ' | b'\n' => {
                    // a bare newline is an empty context line: some tools
                    // strip the trailing whitespace from " \n"
                    let text: BString = if op == b'\n' {
                        BString::from("\n")
                    } else {
                        line[1..].into()
                    };
                    old_lines -= 1;
                    new_lines -= 1;
                    if frag.lines_added == 0 && frag.lines_deleted == 0 {
                        frag.leading_context += 1;
                    } else {
                        frag.trailing_context += 1;
                    }
                    frag.lines.push(Line::Context(text));
                }
                b'-' => {
                    old_lines -= 1;
                    frag.lines_deleted += 1;
                    frag.trailing_context = 0;
                    frag.lines.push(Line::Delete(line[1..].into()));
                }
                b'+' => {
                    new_lines -= 1;
                    frag.lines_added += 1;
                    frag.trailing_context = 0;
                    frag.lines.push(Line::Add(line[1..].into()));
                }
                _ => {
                    // a no-newline marker can appear mid-fragment when the
                    // old last line was deleted
                    if is_no_newline_marker(line.as_bstr()) {
                        remove_last_newline(frag).map_err(|e| self.err_at(0, e))?;
                    } else {
                        return Err(
                            self.err_at(0, format!("invalid line operation: {:?}", op as char))
                        );
                    }
                }
            }

            if !self.advance()? {
                break;
            }
        }

        if old_lines != 0 || new_lines != 0 {
            return Err(PatchError::Parse {
                line: header_line,
                reason: format!(
                    "fragment header miscounts lines: expected {} old and {} new",
                    frag.old_lines, frag.new_lines
                ),
            });
        }
        if frag.lines_added == 0 && frag.lines_deleted == 0 {
            return Err(PatchError::Parse {
                line: header_line,
                reason: "fragment contains no changes".into(),
            });
        }

        if is_no_newline_marker(self.line(0)) {
            remove_last_newline(frag).map_err(|e| self.err_at(0, e))?;
            self.advance()?;
        }
        Ok(())
    }
}
