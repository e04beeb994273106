//! Streaming patch parser.
//!
//! The parser advances strictly forward through its input with a three-slot
//! line shift register: the current line plus two lines of lookahead, which
//! is enough to disambiguate every header form in the grammar. Header
//! recognition for specific constructs lives in [`crate::file_header`],
//! [`crate::text`], and [`crate::binary`], all as methods on [`Parser`].

use std::io::{BufRead, BufReader, Read};

use bstr::{BStr, BString, ByteSlice, ByteVec};

use crate::text::{is_maybe_fragment_header, parse_fragment_header};
use crate::{File, Patch, PatchError, TextFragment};

/// Parse a complete patch stream.
///
/// Returns every file in the input plus the preamble (content before the
/// first file header). Unlimited non-patch content is tolerated between
/// files. Callers that need the files preceding a mid-stream error should
/// drive a [`Parser`] directly.
pub fn parse<R: Read>(input: R) -> Result<Patch, PatchError> {
    let mut parser = Parser::new(BufReader::new(input));
    let mut files = Vec::new();
    while let Some(file) = parser.next_file()? {
        files.push(file);
    }
    Ok(Patch {
        preamble: parser.preamble().to_owned(),
        files,
    })
}

/// Incremental patch parser over a buffered byte stream.
pub struct Parser<R> {
    input: R,
    eof: bool,
    pub(crate) lineno: u64,
    pub(crate) lines: [BString; 3],
    preamble: BString,
    parsed_files: usize,
}

impl<R: BufRead> Parser<R> {
    pub fn new(input: R) -> Self {
        Parser {
            input,
            eof: false,
            lineno: 0,
            lines: Default::default(),
            preamble: BString::default(),
            parsed_files: 0,
        }
    }

    /// Parse the next file in the stream, or `None` at end of input.
    ///
    /// Parsing does not recover across file boundaries: after an error, the
    /// files already returned are valid but the parser state is not.
    pub fn next_file(&mut self) -> Result<Option<File>, PatchError> {
        if self.lineno == 0 && !self.advance()? {
            return Ok(None);
        }

        let Some((mut file, preamble)) = self.next_file_header()? else {
            return Ok(None);
        };
        if self.parsed_files == 0 {
            self.preamble = preamble;
        }

        let n = self.parse_text_fragments(&mut file)?;
        if n == 0 {
            self.parse_binary_fragments(&mut file)?;
        }

        self.parsed_files += 1;
        Ok(Some(file))
    }

    /// Content that preceded the first file header. Empty until the first
    /// file has been parsed.
    pub fn preamble(&self) -> &BStr {
        self.preamble.as_bstr()
    }

    /// Scan forward to the next file header, collecting skipped content.
    fn next_file_header(&mut self) -> Result<Option<(File, BString)>, PatchError> {
        let mut preamble = BString::default();
        loop {
            // a parseable hunk header before any file header is a corrupt
            // patch, not preamble noise
            if is_maybe_fragment_header(self.line(0)) {
                let mut frag = TextFragment::default();
                if parse_fragment_header(&mut frag, self.line(0)).is_ok() {
                    return Err(self.err_at(
                        0,
                        format!("patch fragment without file header: {}", frag.header()),
                    ));
                }
            }

            if let Some(file) = self.git_file_header()? {
                return Ok(Some((file, preamble)));
            }

            if let Some(file) = self.traditional_file_header()? {
                return Ok(Some((file, preamble)));
            }

            preamble.push_str(&self.lines[0]);
            if !self.advance()? {
                break;
            }
        }
        Ok(None)
    }

    /// Shift the register by one line. Returns false at end of input, after
    /// which the current line is empty. A valid line always holds at least a
    /// newline; only the final line of the input may lack one.
    pub(crate) fn advance(&mut self) -> Result<bool, PatchError> {
        if self.eof {
            self.lines[0].clear();
            return Ok(false);
        }

        if self.lineno == 0 {
            // first call: fill the lookahead slots
            for _ in 0..self.lines.len() - 1 {
                self.shift()?;
            }
        }

        let complete = self.shift()?;
        if !complete {
            self.eof = self.lines[1].is_empty();
        }
        self.lineno += 1;
        Ok(true)
    }

    fn shift(&mut self) -> Result<bool, PatchError> {
        self.lines.rotate_left(1);
        let last = &mut self.lines[2];
        last.clear();
        self.input.read_until(b'\n', last)?;
        Ok(last.last() == Some(&b'\n'))
    }

    /// The current line (delta 0) or a lookahead line (delta 1 or 2), without
    /// consuming it. Lines past the end of input are empty.
    pub(crate) fn line(&self, delta: usize) -> &BStr {
        self.lines[delta].as_bstr()
    }

    /// A parse error positioned `delta` lines from the current line.
    pub(crate) fn err_at(&self, delta: i64, reason: impl Into<String>) -> PatchError {
        PatchError::Parse {
            line: self.lineno.saturating_add_signed(delta),
            reason: reason.into(),
        }
    }
}
