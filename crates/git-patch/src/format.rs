//! Canonical git diff output.
//!
//! Writes parsed records back as the byte stream `git diff` produces. Text
//! output is byte-identical to the input it was parsed from; binary output
//! re-deflates the data, so it roundtrips structurally rather than
//! byte-for-byte.

use std::io::{self, Write};

use bstr::{BStr, BString, ByteSlice, ByteVec};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::base85;
use crate::file_header::DEV_NULL;
use crate::quote::write_quoted_name;
use crate::{BinaryFragment, BinaryPatchMethod, File, TextFragment};

/// Decoded bytes carried per binary data line.
const BINARY_LINE_BYTES: usize = 52;

impl File {
    /// Write the file as a git diff byte stream.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let empty = BString::default();
        let old_name = self.old_name.as_ref().unwrap_or(&empty);
        let new_name = self.new_name.as_ref().unwrap_or(&empty);
        let a_name = if old_name.is_empty() { new_name } else { old_name };
        let b_name = if new_name.is_empty() { old_name } else { new_name };

        let mut header = BString::from("diff --git ");
        write_prefixed_name(&mut header, "a/", a_name.as_bstr());
        header.push_byte(b' ');
        write_prefixed_name(&mut header, "b/", b_name.as_bstr());
        header.push_byte(b'\n');
        w.write_all(&header)?;

        if let Some(old_mode) = self.old_mode {
            if self.is_delete {
                writeln!(w, "deleted file mode {old_mode:o}")?;
            } else if self.new_mode.is_some() {
                writeln!(w, "old mode {old_mode:o}")?;
            }
        }
        if let Some(new_mode) = self.new_mode {
            if self.is_new {
                writeln!(w, "new file mode {new_mode:o}")?;
            } else if self.old_mode.is_some() {
                writeln!(w, "new mode {new_mode:o}")?;
            }
        }

        if self.score > 0 {
            if self.is_copy || self.is_rename {
                writeln!(w, "similarity index {}%", self.score)?;
            } else {
                writeln!(w, "dissimilarity index {}%", self.score)?;
            }
        }

        if self.is_copy {
            if !old_name.is_empty() {
                write_name_line(w, "copy from ", old_name.as_bstr())?;
            }
            if !new_name.is_empty() {
                write_name_line(w, "copy to ", new_name.as_bstr())?;
            }
        }
        if self.is_rename {
            if !old_name.is_empty() {
                write_name_line(w, "rename from ", old_name.as_bstr())?;
            }
            if !new_name.is_empty() {
                write_name_line(w, "rename to ", new_name.as_bstr())?;
            }
        }

        if let (Some(old_oid), Some(new_oid)) = (&self.old_oid_prefix, &self.new_oid_prefix) {
            write!(w, "index {old_oid}..{new_oid}")?;
            // the mode appears on the index line only when it is unchanging
            if let Some(mode) = self.old_mode {
                if !self.is_new
                    && !self.is_delete
                    && (self.new_mode.is_none() || self.new_mode == self.old_mode)
                {
                    write!(w, " {mode:o}")?;
                }
            }
            w.write_all(b"\n")?;
        }

        if self.is_binary {
            match &self.binary_fragment {
                None => w.write_all(b"Binary files differ\n")?,
                Some(forward) => {
                    w.write_all(b"GIT binary patch\n")?;
                    forward.write_to(w)?;
                    if let Some(reverse) = &self.reverse_binary_fragment {
                        reverse.write_to(w)?;
                    }
                }
            }
        }

        if !self.text_fragments.is_empty() {
            w.write_all(b"--- ")?;
            match &self.old_name {
                Some(name) => {
                    let mut line = BString::default();
                    write_prefixed_name(&mut line, "a/", name.as_bstr());
                    w.write_all(&line)?;
                }
                None => w.write_all(DEV_NULL.as_bytes())?,
            }
            w.write_all(b"\n+++ ")?;
            match &self.new_name {
                Some(name) => {
                    let mut line = BString::default();
                    write_prefixed_name(&mut line, "b/", name.as_bstr());
                    w.write_all(&line)?;
                }
                None => w.write_all(DEV_NULL.as_bytes())?,
            }
            w.write_all(b"\n")?;

            for frag in &self.text_fragments {
                frag.write_to(w)?;
            }
        }

        Ok(())
    }

    /// The file as git diff bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out)
            .expect("writing to a Vec cannot fail");
        out
    }
}

impl TextFragment {
    /// Write the fragment header and body.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.header())?;
        w.write_all(b"\n")?;

        for line in &self.lines {
            w.write_all(&[line.prefix()])?;
            w.write_all(line.text())?;
            if line.text().last() != Some(&b'\n') {
                w.write_all(b"\n\\ No newline at end of file\n")?;
            }
        }
        Ok(())
    }

    /// The `@@ -old +new @@[ comment]` header line, without a newline. Range
    /// counts of 1 are omitted.
    pub fn header(&self) -> BString {
        let mut out = BString::from("@@ -");
        write_range(&mut out, self.old_position, self.old_lines);
        out.push_str(" +");
        write_range(&mut out, self.new_position, self.new_lines);
        out.push_str(" @@");
        if !self.comment.is_empty() {
            out.push_byte(b' ');
            out.push_str(&self.comment);
        }
        out
    }
}

impl BinaryFragment {
    /// Write the fragment header, deflated base85-encoded data lines, and the
    /// blank terminator.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self.method {
            BinaryPatchMethod::Literal => writeln!(w, "literal {}", self.size)?,
            BinaryPatchMethod::Delta => writeln!(w, "delta {}", self.size)?,
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.data)?;
        let deflated = encoder.finish()?;

        let mut line = Vec::new();
        for chunk in deflated.chunks(BINARY_LINE_BYTES) {
            let n = chunk.len();
            let length_byte = if n <= 26 {
                b'A' + (n as u8 - 1)
            } else {
                b'a' + (n as u8 - 27)
            };

            line.resize(base85::encoded_len(n), 0);
            base85::encode(&mut line, chunk);

            w.write_all(&[length_byte])?;
            w.write_all(&line)?;
            w.write_all(b"\n")?;
        }
        w.write_all(b"\n")
    }
}

fn write_prefixed_name(out: &mut BString, prefix: &str, name: &BStr) {
    let mut full = BString::from(prefix);
    full.push_str(name);
    write_quoted_name(out, full.as_bstr());
}

fn write_name_line<W: Write>(w: &mut W, prefix: &str, name: &BStr) -> io::Result<()> {
    let mut line = BString::from(prefix);
    write_quoted_name(&mut line, name);
    line.push_byte(b'\n');
    w.write_all(&line)
}

fn write_range(out: &mut BString, start: i64, lines: i64) {
    out.push_str(start.to_string());
    if lines != 1 {
        out.push_str(format!(",{lines}"));
    }
}
