//! Binary fragment parsing.
//!
//! A `GIT binary patch` block holds one or two fragments (forward and
//! reverse), each a `literal <size>` or `delta <size>` header followed by
//! base85 data lines and a blank terminator. Data lines carry one length
//! byte (`A`-`Z` for 1-26 bytes, `a`-`z` for 27-52) and then complete
//! 5-character base85 groups. The concatenated payload is zlib-compressed.

use std::io::{BufRead, Read};

use bstr::{BStr, ByteSlice};

use crate::base85;
use crate::parser::Parser;
use crate::{BinaryFragment, BinaryPatchMethod, File, PatchError};

impl<R: BufRead> Parser<R> {
    /// Parse the binary fragments of a file, if the current line starts a
    /// binary block. Returns 1 when fragment data was parsed.
    pub(crate) fn parse_binary_fragments(&mut self, file: &mut File) -> Result<usize, PatchError> {
        let (is_binary, has_data) = self.binary_marker()?;
        if !is_binary {
            return Ok(0);
        }

        file.is_binary = true;
        if !has_data {
            return Ok(0);
        }

        let Some(mut forward) = self.binary_fragment_header()? else {
            return Err(self.err_at(0, "missing data for binary patch"));
        };
        self.binary_chunk(&mut forward)?;
        file.binary_fragment = Some(forward);

        // the reverse fragment is optional, but must be valid when present
        let Some(mut reverse) = self.binary_fragment_header()? else {
            return Ok(1);
        };
        self.binary_chunk(&mut reverse)?;
        file.reverse_binary_fragment = Some(reverse);

        Ok(1)
    }

    /// Recognize the marker line that opens binary content, consuming it.
    /// Returns (is_binary, has_data).
    fn binary_marker(&mut self) -> Result<(bool, bool), PatchError> {
        let line = self.line(0);
        let (is_binary, has_data) = if line == "GIT binary patch\n" {
            (true, true)
        } else if line == "Binary files differ\n" || line == "Files differ\n" {
            (true, false)
        } else if line.starts_with(b"Binary files ") && line.ends_with(b" differ\n") {
            (true, false)
        } else {
            (false, false)
        };

        if is_binary {
            self.advance()?;
        }
        Ok((is_binary, has_data))
    }

    /// Parse a `literal <size>` or `delta <size>` line, consuming it. Returns
    /// `None` when the current line is not a fragment header.
    fn binary_fragment_header(&mut self) -> Result<Option<BinaryFragment>, PatchError> {
        let line = strip_newline(self.line(0));
        let Some((kind, size)) = line.split_once_str(" ") else {
            return Ok(None);
        };

        let method = if kind == b"literal" {
            BinaryPatchMethod::Literal
        } else if kind == b"delta" {
            BinaryPatchMethod::Delta
        } else {
            return Ok(None);
        };
        let size = parse_u64(size)
            .ok_or_else(|| self.err_at(0, "binary patch: invalid size: invalid syntax"))?;

        self.advance()?;
        Ok(Some(BinaryFragment {
            method,
            size,
            data: Vec::new(),
        }))
    }

    /// Parse base85 data lines up to the blank terminator, then inflate and
    /// verify the declared size.
    fn binary_chunk(&mut self, frag: &mut BinaryFragment) -> Result<(), PatchError> {
        let mut deflated = Vec::new();
        loop {
            let line = self.lines[0].clone();
            if line == "\n" {
                self.advance()?;
                break;
            }
            if line.is_empty() {
                return Err(self.err_at(0, "binary patch: unexpected EOF"));
            }

            let byte_count = match line[0] {
                c @ b'A'..=b'Z' => (c - b'A') as usize + 1,
                c @ b'a'..=b'z' => (c - b'a') as usize + 27,
                _ => return Err(self.err_at(0, "binary patch: invalid length byte")),
            };

            let payload = strip_newline(line[1..].as_bstr());
            if payload.len() % 5 != 0 {
                return Err(self.err_at(0, "binary patch: corrupt data line"));
            }
            let max_byte_count = payload.len() / 5 * 4;
            if byte_count > max_byte_count || byte_count + 3 < max_byte_count {
                return Err(self.err_at(0, "binary patch: incorrect byte count"));
            }

            let start = deflated.len();
            deflated.resize(start + byte_count, 0);
            base85::decode(&mut deflated[start..], payload)
                .map_err(|e| self.err_at(0, format!("binary patch: {e}")))?;

            self.advance()?;
        }

        let mut inflated = Vec::with_capacity(frag.size as usize);
        flate2::read::ZlibDecoder::new(deflated.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|e| self.err_at(0, format!("binary patch: inflating fragment: {e}")))?;

        if inflated.len() as u64 != frag.size {
            return Err(self.err_at(
                0,
                format!(
                    "binary patch: {} byte fragment inflated to {}",
                    frag.size,
                    inflated.len()
                ),
            ));
        }

        frag.data = inflated;
        Ok(())
    }
}

fn strip_newline(line: &BStr) -> &BStr {
    line.strip_suffix(b"\n").map(BStr::new).unwrap_or(line)
}

fn parse_u64(s: &[u8]) -> Option<u64> {
    s.to_str().ok()?.parse().ok()
}
