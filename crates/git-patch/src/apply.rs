//! Strict patch application.
//!
//! Applies parsed files and fragments to a random-access source. Text
//! application is strict: every context and delete line must byte-match the
//! source at the expected position, and any divergence is a conflict with a
//! precise location. Binary application writes literal data or interprets a
//! git delta opcode stream against the source.

use std::io::{self, Write};

use bstr::{BString, ByteSlice};

use crate::io::{LineReaderAt, ReadAt};
use crate::{BinaryFragment, BinaryPatchMethod, File, Line, PatchError, TextFragment};

/// An apply failed because the patch does not match the source content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("conflict: {0}")]
pub struct Conflict(pub String);

/// The underlying reason an apply failed.
#[derive(Debug, thiserror::Error)]
pub enum ApplyCause {
    #[error(transparent)]
    Conflict(#[from] Conflict),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An apply failure with location information. Positions are 1-indexed;
/// 0 means the position is not known.
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct ApplyError {
    /// Line in the source data where the failure occurred.
    pub line: u64,
    /// Fragment of the file being applied.
    pub fragment: u64,
    /// Line within that fragment.
    pub fragment_line: u64,
    pub cause: ApplyCause,
}

impl ApplyError {
    fn new(cause: impl Into<ApplyCause>) -> Self {
        ApplyError {
            line: 0,
            fragment: 0,
            fragment_line: 0,
            cause: cause.into(),
        }
    }

    fn conflict(msg: impl Into<String>) -> Self {
        ApplyError::new(Conflict(msg.into()))
    }

    fn corrupt(msg: impl Into<String>) -> Self {
        ApplyError::new(PatchError::InvalidFragment {
            reason: msg.into(),
        })
    }

    fn io(err: io::Error) -> Self {
        ApplyError::new(err)
    }

    /// Position the error at a zero-indexed source line.
    fn at_line(mut self, line: u64) -> Self {
        self.line = line + 1;
        self
    }

    /// Position the error at a zero-indexed fragment line.
    fn at_fragment_line(mut self, line: usize) -> Self {
        self.fragment_line = line as u64 + 1;
        self
    }

    /// Position the error at a zero-indexed fragment.
    fn at_fragment(mut self, fragment: usize) -> Self {
        self.fragment = fragment as u64 + 1;
        self
    }

    /// True if the failure was a content conflict rather than a malformed
    /// fragment or an I/O problem.
    pub fn is_conflict(&self) -> bool {
        matches!(self.cause, ApplyCause::Conflict(_))
    }
}

impl From<PatchError> for ApplyError {
    fn from(err: PatchError) -> Self {
        ApplyError::new(err)
    }
}

/// Applies fragments of one file against a random-access source.
///
/// Text fragments are applied in input order; a consumed-line watermark
/// rejects fragments that reach back over already-applied lines. The applier holds the source's line index for
/// the duration of the file and is discarded afterwards.
pub struct Applier<R> {
    lines: LineReaderAt<R>,
    next_line: u64,
}

impl<R: ReadAt> Applier<R> {
    pub fn new(src: R) -> Self {
        Applier {
            lines: LineReaderAt::new(src),
            next_line: 0,
        }
    }

    /// Apply all fragments of `file` and write the patched result to `dst`.
    ///
    /// On failure, partial output may have been written.
    pub fn apply_file<W: Write>(&mut self, dst: &mut W, file: &File) -> Result<(), ApplyError> {
        if file.is_binary && !file.text_fragments.is_empty() {
            return Err(ApplyError::corrupt("binary file contains text fragments"));
        }
        if !file.is_binary && file.binary_fragment.is_some() {
            return Err(ApplyError::corrupt("text file contains a binary fragment"));
        }

        if let Some(fragment) = &file.binary_fragment {
            return self.apply_binary_fragment(dst, fragment);
        }

        for (i, fragment) in file.text_fragments.iter().enumerate() {
            self.apply_text_fragment(dst, fragment)
                .map_err(|e| e.at_fragment(i))?;
        }

        self.flush(dst)
    }

    /// Apply a single text fragment, writing unmodified source lines before
    /// it and the fragment's result to `dst`. After a successful apply the
    /// next fragment continues from the first line past this one.
    pub fn apply_text_fragment<W: Write>(
        &mut self,
        dst: &mut W,
        fragment: &TextFragment,
    ) -> Result<(), ApplyError> {
        // application assumes the fragment's counts are consistent
        fragment.validate()?;

        // lines are 0-indexed, positions are 1-indexed
        let frag_start = if fragment.old_position > 0 {
            fragment.old_position as u64 - 1
        } else {
            0
        };
        let frag_end = frag_start + fragment.old_lines as u64;

        let start = self.next_line;
        if frag_start < start {
            return Err(ApplyError::conflict(
                "fragment overlaps with an applied fragment",
            ));
        }

        if fragment.old_position == 0 {
            let mut probe = [0u8; 1];
            let n = self
                .lines
                .source()
                .read_at(&mut probe, 0)
                .map_err(ApplyError::io)?;
            if n > 0 {
                return Err(ApplyError::conflict(
                    "cannot create new file from non-empty src",
                ));
            }
        }

        let want = (frag_end - start) as usize;
        let (preimage, hit_eof) = self
            .lines
            .read_lines_at(want, start)
            .map_err(ApplyError::io)?;
        if preimage.len() < want {
            // EOF is only acceptable when the fragment's last line is the
            // last line of the source and has no trailing newline
            debug_assert!(hit_eof);
            return Err(ApplyError::io(io::ErrorKind::UnexpectedEof.into())
                .at_line(start + preimage.len() as u64));
        }

        // copy unmodified lines between the watermark and the fragment
        let skip = (frag_start - start) as usize;
        for (i, line) in preimage[..skip].iter().enumerate() {
            dst.write_all(line)
                .map_err(|e| ApplyError::io(e).at_line(start + i as u64))?;
        }
        let preimage = &preimage[skip..];

        let mut used: usize = 0;
        for (i, line) in fragment.lines.iter().enumerate() {
            apply_text_line(dst, line, preimage, used)
                .map_err(|e| e.at_line(frag_start + used as u64).at_fragment_line(i))?;
            if line.is_old() {
                used += 1;
            }
        }

        self.next_line = frag_end;
        Ok(())
    }

    /// Write the source lines after the last applied fragment to `dst`.
    pub fn flush<W: Write>(&mut self, dst: &mut W) -> Result<(), ApplyError> {
        loop {
            let (lines, hit_eof) = self
                .lines
                .read_lines_at(64, self.next_line)
                .map_err(ApplyError::io)?;
            for line in &lines {
                dst.write_all(line)
                    .map_err(|e| ApplyError::io(e).at_line(self.next_line))?;
                self.next_line += 1;
            }
            if hit_eof {
                return Ok(());
            }
        }
    }

    /// Apply a binary fragment: write literal data, or interpret a delta
    /// opcode stream against the source.
    pub fn apply_binary_fragment<W: Write>(
        &mut self,
        dst: &mut W,
        fragment: &BinaryFragment,
    ) -> Result<(), ApplyError> {
        match fragment.method {
            BinaryPatchMethod::Literal => dst.write_all(&fragment.data).map_err(ApplyError::io),
            BinaryPatchMethod::Delta => apply_binary_delta(dst, self.lines.source(), &fragment.data),
        }
    }
}

fn apply_text_line<W: Write>(
    dst: &mut W,
    line: &Line,
    preimage: &[BString],
    i: usize,
) -> Result<(), ApplyError> {
    if line.is_old() && preimage[i].as_bstr() != line.text() {
        return Err(ApplyError::conflict("fragment line does not match src line"));
    }
    if line.is_new() {
        dst.write_all(line.text()).map_err(ApplyError::io)?;
    }
    Ok(())
}

/// Interpret a git delta opcode stream.
///
/// The stream is `[source_size: varint] [result_size: varint]` followed by
/// instructions: copy (high bit set, low bits select which offset and size
/// bytes follow, all-zero size means 0x10000) and add (low bits give the
/// count of literal bytes that follow). Opcode 0 is reserved.
fn apply_binary_delta<W: Write, R: ReadAt>(
    dst: &mut W,
    src: &R,
    delta: &[u8],
) -> Result<(), ApplyError> {
    let (src_size, delta) = read_delta_size(delta);
    check_binary_src_size(src, src_size)?;

    let (dst_size, mut delta) = read_delta_size(delta);

    let mut written: u64 = 0;
    while let Some((&op, rest)) = delta.split_first() {
        if op == 0 {
            return Err(ApplyError::corrupt("invalid delta opcode 0"));
        }

        if op & 0x80 != 0 {
            let (n, rest) = apply_delta_copy(dst, src, op, rest)?;
            written += n;
            delta = rest;
        } else {
            let size = op as usize;
            if rest.len() < size {
                return Err(ApplyError::corrupt("corrupt binary delta: incomplete add"));
            }
            dst.write_all(&rest[..size]).map_err(ApplyError::io)?;
            written += size as u64;
            delta = &rest[size..];
        }
    }

    if written != dst_size {
        return Err(ApplyError::corrupt(
            "corrupt binary delta: insufficient or extra data",
        ));
    }
    Ok(())
}

/// Read a variable-length size: 7 bits per byte, little-endian, the high bit
/// marking continuation. Returns the size and the remaining data.
fn read_delta_size(data: &[u8]) -> (u64, &[u8]) {
    let mut size: u64 = 0;
    let mut shift = 0;
    for (i, &b) in data.iter().enumerate() {
        size |= ((b & 0x7f) as u64) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return (size, &data[i + 1..]);
        }
    }
    (size, &[])
}

/// Apply one copy instruction. The low seven bits of `op` select, in
/// little-endian order, which of four offset bytes and three size bytes
/// follow. Returns the bytes written and the remaining delta data.
fn apply_delta_copy<'d, W: Write, R: ReadAt>(
    dst: &mut W,
    src: &R,
    op: u8,
    delta: &'d [u8],
) -> Result<(u64, &'d [u8]), ApplyError> {
    let mut delta = delta;
    let mut take = |bit: u8| -> Result<u64, ApplyError> {
        if op & bit == 0 {
            return Ok(0);
        }
        let Some((&b, rest)) = delta.split_first() else {
            return Err(ApplyError::corrupt("corrupt binary delta: incomplete copy"));
        };
        delta = rest;
        Ok(b as u64)
    };

    let mut offset: u64 = 0;
    offset |= take(0x01)?;
    offset |= take(0x02)? << 8;
    offset |= take(0x04)? << 16;
    offset |= take(0x08)? << 24;

    let mut size: u64 = 0;
    size |= take(0x10)?;
    size |= take(0x20)? << 8;
    size |= take(0x40)? << 16;
    if size == 0 {
        size = 0x10000;
    }

    let mut buf = vec![0u8; size as usize];
    let n = src.read_at(&mut buf, offset).map_err(ApplyError::io)?;
    if n < buf.len() {
        return Err(ApplyError::io(io::ErrorKind::UnexpectedEof.into()));
    }

    dst.write_all(&buf).map_err(ApplyError::io)?;
    Ok((size, delta))
}

/// Verify the source is exactly `size` bytes long by probing one byte before
/// the claimed end.
fn check_binary_src_size<R: ReadAt>(src: &R, size: u64) -> Result<(), ApplyError> {
    let start = size.saturating_sub(1);
    let mut probe = [0u8; 2];
    let n = src.read_at(&mut probe, start).map_err(ApplyError::io)?;

    let ok = if size == 0 { n == 0 } else { n == 1 };
    if !ok {
        return Err(ApplyError::conflict(
            "fragment src size does not match actual src size",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn single_fragment(patch: &str) -> (File, TextFragment) {
        let parsed = parse(patch.as_bytes()).unwrap();
        assert_eq!(parsed.files.len(), 1);
        let file = parsed.files[0].clone();
        let frag = file.text_fragments[0].clone();
        (file, frag)
    }

    const MODIFY_PATCH: &str = "diff --git a/f b/f\n\
                                --- a/f\n\
                                +++ b/f\n\
                                @@ -1,3 +1,3 @@ ctx\n \
                                ctx\n\
                                -old\n\
                                +new\n \
                                ctx\n";

    #[test]
    fn apply_text_modify() {
        let (_, frag) = single_fragment(MODIFY_PATCH);
        let src = b"ctx\nold\nctx\n";
        let mut out = Vec::new();
        let mut applier = Applier::new(&src[..]);
        applier.apply_text_fragment(&mut out, &frag).unwrap();
        applier.flush(&mut out).unwrap();
        assert_eq!(out.as_bstr(), "ctx\nnew\nctx\n");
    }

    #[test]
    fn apply_text_conflict_positions() {
        let (file, _) = single_fragment(MODIFY_PATCH);
        let src = b"ctx\nXXX\nctx\n";
        let mut out = Vec::new();
        let mut applier = Applier::new(&src[..]);
        let err = applier.apply_file(&mut out, &file).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.line, 2);
        assert_eq!(err.fragment, 1);
        assert_eq!(err.fragment_line, 2);
        assert!(err.to_string().contains("does not match src line"));
    }

    #[test]
    fn apply_file_copies_surrounding_lines() {
        let patch = "diff --git a/f b/f\n\
                     --- a/f\n\
                     +++ b/f\n\
                     @@ -3,3 +3,3 @@\n \
                     three\n\
                     -four\n\
                     +FOUR\n \
                     five\n";
        let (file, _) = single_fragment(patch);
        let src = b"one\ntwo\nthree\nfour\nfive\nsix\n";
        let mut out = Vec::new();
        Applier::new(&src[..]).apply_file(&mut out, &file).unwrap();
        assert_eq!(out.as_bstr(), "one\ntwo\nthree\nFOUR\nfive\nsix\n");
    }

    #[test]
    fn apply_creation_fragment() {
        let patch = "diff --git a/f b/f\n\
                     new file mode 100644\n\
                     --- /dev/null\n\
                     +++ b/f\n\
                     @@ -0,0 +1,2 @@\n\
                     +hello\n\
                     +world\n";
        let (file, _) = single_fragment(patch);
        let mut out = Vec::new();
        Applier::new(&b""[..]).apply_file(&mut out, &file).unwrap();
        assert_eq!(out.as_bstr(), "hello\nworld\n");
    }

    #[test]
    fn creation_against_non_empty_src_conflicts() {
        let patch = "diff --git a/f b/f\n\
                     new file mode 100644\n\
                     --- /dev/null\n\
                     +++ b/f\n\
                     @@ -0,0 +1 @@\n\
                     +hello\n";
        let (_, frag) = single_fragment(patch);
        let src = b"existing\n";
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_text_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("cannot create new file"));
    }

    #[test]
    fn overlapping_fragments_conflict() {
        let (_, frag) = single_fragment(MODIFY_PATCH);
        let src = b"ctx\nold\nctx\n";
        let mut out = Vec::new();
        let mut applier = Applier::new(&src[..]);
        applier.apply_text_fragment(&mut out, &frag).unwrap();
        let err = applier.apply_text_fragment(&mut out, &frag).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn delete_conflict_is_reported() {
        let patch = "diff --git a/f b/f\n\
                     --- a/f\n\
                     +++ b/f\n\
                     @@ -1,2 +1 @@\n\
                     -gone\n \
                     kept\n";
        let (_, frag) = single_fragment(patch);
        let src = b"different\nkept\n";
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_text_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.line, 1);
        assert_eq!(err.fragment_line, 1);
    }

    #[test]
    fn short_source_is_unexpected_eof() {
        let (_, frag) = single_fragment(MODIFY_PATCH);
        let src = b"ctx\n";
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_text_fragment(&mut out, &frag)
            .unwrap_err();
        match err.cause {
            ApplyCause::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected cause: {other}"),
        }
    }

    #[test]
    fn apply_preserves_missing_final_newline() {
        let patch = "diff --git a/f b/f\n\
                     --- a/f\n\
                     +++ b/f\n\
                     @@ -1,2 +1,2 @@\n \
                     keep\n\
                     -old\n\
                     \\ No newline at end of file\n\
                     +new\n\
                     \\ No newline at end of file\n";
        let (file, _) = single_fragment(patch);
        let src = b"keep\nold";
        let mut out = Vec::new();
        Applier::new(&src[..]).apply_file(&mut out, &file).unwrap();
        assert_eq!(out.as_bstr(), "keep\nnew");
    }

    #[test]
    fn invalid_fragment_is_rejected_before_apply() {
        let (_, mut frag) = single_fragment(MODIFY_PATCH);
        frag.old_lines = 99;
        let src = b"ctx\nold\nctx\n";
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_text_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(!err.is_conflict());
        assert!(matches!(err.cause, ApplyCause::Patch(_)));
    }

    #[test]
    fn apply_binary_literal() {
        let frag = BinaryFragment {
            method: BinaryPatchMethod::Literal,
            size: 4,
            data: vec![1, 2, 3, 4],
        };
        let mut out = Vec::new();
        Applier::new(&b"ignored"[..])
            .apply_binary_fragment(&mut out, &frag)
            .unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    fn varint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value > 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                return out;
            }
        }
    }

    fn delta(src_size: u64, dst_size: u64, instructions: &[u8]) -> BinaryFragment {
        let mut data = varint(src_size);
        data.extend_from_slice(&varint(dst_size));
        data.extend_from_slice(instructions);
        BinaryFragment {
            method: BinaryPatchMethod::Delta,
            size: data.len() as u64,
            data,
        }
    }

    // copy `size` bytes from `offset`, with all offset and size bytes present
    fn copy_op(offset: u32, size: u32) -> Vec<u8> {
        let mut out = vec![0x80 | 0x0f | 0x70];
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes()[..3]);
        out
    }

    fn add_op(data: &[u8]) -> Vec<u8> {
        let mut out = vec![data.len() as u8];
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn apply_binary_delta_copy_and_add() {
        let src = b"Hello, World!";
        let mut instructions = copy_op(0, 5);
        instructions.extend_from_slice(&add_op(b" brave new "));
        instructions.extend_from_slice(&copy_op(7, 5));

        let frag = delta(src.len() as u64, 21, &instructions);
        let mut out = Vec::new();
        Applier::new(&src[..])
            .apply_binary_fragment(&mut out, &frag)
            .unwrap();
        assert_eq!(out.as_bstr(), "Hello brave new World");
    }

    #[test]
    fn delta_src_size_mismatch_conflicts() {
        let src = b"Hello";
        let frag = delta(100, 5, &copy_op(0, 5));
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_binary_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("src size"));
    }

    #[test]
    fn delta_dst_size_mismatch_is_corrupt() {
        let src = b"Hello";
        let frag = delta(5, 10, &copy_op(0, 5));
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_binary_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(err.to_string().contains("insufficient or extra data"));
    }

    #[test]
    fn delta_opcode_zero_is_invalid() {
        let src = b"Hello";
        let frag = delta(5, 5, &[0x00]);
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_binary_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(err.to_string().contains("invalid delta opcode 0"));
    }

    #[test]
    fn delta_incomplete_add_is_corrupt() {
        let src = b"Hello";
        let frag = delta(5, 5, &[0x05, b'a', b'b']);
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_binary_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(err.to_string().contains("incomplete add"));
    }

    #[test]
    fn delta_incomplete_copy_is_corrupt() {
        let src = b"Hello";
        let frag = delta(5, 5, &[0x80 | 0x01]);
        let mut out = Vec::new();
        let err = Applier::new(&src[..])
            .apply_binary_fragment(&mut out, &frag)
            .unwrap_err();
        assert!(err.to_string().contains("incomplete copy"));
    }

    #[test]
    fn binary_file_with_text_fragments_is_rejected() {
        let file = File {
            is_binary: true,
            text_fragments: vec![TextFragment::default()],
            ..Default::default()
        };
        let mut out = Vec::new();
        let err = Applier::new(&b""[..]).apply_file(&mut out, &file).unwrap_err();
        assert!(err.to_string().contains("binary file contains text fragments"));
    }

    #[test]
    fn binary_marker_only_copies_source() {
        let file = File {
            is_binary: true,
            ..Default::default()
        };
        let src = b"raw\nbytes\n";
        let mut out = Vec::new();
        Applier::new(&src[..]).apply_file(&mut out, &file).unwrap();
        assert_eq!(out.as_bstr(), "raw\nbytes\n");
    }
}
