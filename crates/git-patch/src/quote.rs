//! C-style quoting of path names, as emitted and consumed by git.
//!
//! Output quoting matches C git's `quote_c_style`: a name is wrapped in
//! double quotes only if it contains a byte that needs escaping. Input
//! unquoting is a byte state machine that handles letter escapes and octal
//! escapes and never crosses a newline.

use bstr::{BStr, BString, ByteVec};

/// Escape lookup matching C git's `cq_lookup` table.
/// Positive non-letter: always octal-escape. Letter value: escape as
/// `\<letter>`. Negative: printable, never escaped.
fn cq_lookup(c: u8) -> i16 {
    match c {
        0x00..=0x06 => 1,
        0x07 => b'a' as i16,
        0x08 => b'b' as i16,
        0x09 => b't' as i16,
        0x0a => b'n' as i16,
        0x0b => b'v' as i16,
        0x0c => b'f' as i16,
        0x0d => b'r' as i16,
        0x0e..=0x1f => 1,
        0x22 => b'"' as i16,  // "
        0x5c => b'\\' as i16, // backslash
        0x7f..=0xff => 1,
        _ => -1, // printable ASCII
    }
}

fn must_quote(c: u8) -> bool {
    cq_lookup(c) > 0
}

/// True if `name` contains a byte that requires quoting.
pub fn needs_quoting(name: &BStr) -> bool {
    name.iter().any(|&b| must_quote(b))
}

/// Append `name` to `out`, quoting it with C-style escapes if necessary.
pub fn write_quoted_name(out: &mut BString, name: &BStr) {
    if !needs_quoting(name) {
        out.push_str(name);
        return;
    }

    out.push_byte(b'"');
    for &b in name.iter() {
        let lookup = cq_lookup(b);
        if lookup < 0 {
            out.push_byte(b);
        } else if lookup > 1 {
            out.push_byte(b'\\');
            out.push_byte(lookup as u8);
        } else {
            out.push_byte(b'\\');
            out.push_byte(b'0' + ((b >> 6) & 0o3));
            out.push_byte(b'0' + ((b >> 3) & 0o7));
            out.push_byte(b'0' + (b & 0o7));
        }
    }
    out.push_byte(b'"');
}

/// Decode a quoted name starting at the opening `"` in `s`. Returns the
/// decoded bytes and the input length consumed, including both quotes.
pub fn unquote_name(s: &BStr) -> Result<(BString, usize), String> {
    debug_assert_eq!(s.first(), Some(&b'"'));

    let mut out = BString::default();
    let mut i = 1;
    loop {
        let &b = s.get(i).ok_or("invalid quoted name")?;
        match b {
            b'"' => break,
            b'\n' => return Err("invalid quoted name".into()),
            b'\\' => {
                i += 1;
                let &esc = s.get(i).ok_or("invalid quoted name")?;
                match esc {
                    b'a' => out.push_byte(0x07),
                    b'b' => out.push_byte(0x08),
                    b't' => out.push_byte(b'\t'),
                    b'n' => out.push_byte(b'\n'),
                    b'v' => out.push_byte(0x0b),
                    b'f' => out.push_byte(0x0c),
                    b'r' => out.push_byte(b'\r'),
                    b'"' => out.push_byte(b'"'),
                    b'\\' => out.push_byte(b'\\'),
                    b'\'' => out.push_byte(b'\''),
                    b'0'..=b'7' => {
                        // one to three octal digits
                        let mut value: u16 = (esc - b'0') as u16;
                        for _ in 0..2 {
                            match s.get(i + 1) {
                                Some(&d @ b'0'..=b'7') => {
                                    value = value * 8 + (d - b'0') as u16;
                                    i += 1;
                                }
                                _ => break,
                            }
                        }
                        if value > 0xff {
                            return Err("invalid quoted name".into());
                        }
                        out.push_byte(value as u8);
                    }
                    _ => return Err("invalid quoted name".into()),
                }
                i += 1;
            }
            _ => {
                out.push_byte(b);
                i += 1;
            }
        }
    }

    if out.is_empty() {
        return Err("missing name".into());
    }
    Ok((out, i + 1))
}
