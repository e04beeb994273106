//! Git's base85 codec.
//!
//! Binary patch data lines use the alphabet defined by `base85.c` in the
//! git source tree, which matches neither RFC 1924 nor ascii85. Five
//! characters encode four bytes, big-endian.

const ALPHABET: &[u8; 85] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";

const INVALID: u8 = 0xff;

const DECODE: [u8; 256] = {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Number of characters needed to encode `n` bytes.
pub fn encoded_len(n: usize) -> usize {
    (n + 3) / 4 * 5
}

/// Decode base85 data from `src` into `dst`. `src` must hold complete
/// 5-character sequences carrying at least `dst.len()` bytes; padding bytes
/// beyond `dst.len()` are discarded.
pub fn decode(dst: &mut [u8], src: &[u8]) -> Result<(), String> {
    let mut v: u32 = 0;
    let mut n = 0;
    let mut ndst = 0;

    for (i, &b) in src.iter().enumerate() {
        let d = DECODE[b as usize];
        if d == INVALID {
            return Err(format!("invalid base85 byte at index {i}: 0x{b:x}"));
        }
        v = v.wrapping_mul(85).wrapping_add(d as u32);
        n += 1;

        if n == 5 {
            let rem = dst.len() - ndst;
            let take = rem.min(4);
            for _ in 0..take {
                dst[ndst] = (v >> 24) as u8;
                ndst += 1;
                v <<= 8;
            }
            v = 0;
            n = 0;
        }
    }

    if n > 0 {
        return Err("base85 data terminated by underpadded sequence".into());
    }
    if ndst < dst.len() {
        return Err(format!("base85 data is too short: {ndst} < {}", dst.len()));
    }
    Ok(())
}

/// Encode `src` into `dst`, which must hold `encoded_len(src.len())` bytes.
/// A final partial group is zero-padded before encoding.
pub fn encode(dst: &mut [u8], src: &[u8]) {
    let mut di = 0;
    let mut si = 0;

    let mut put = |di: usize, v: u32| {
        dst[di] = ALPHABET[(v / (85 * 85 * 85 * 85) % 85) as usize];
        dst[di + 1] = ALPHABET[(v / (85 * 85 * 85) % 85) as usize];
        dst[di + 2] = ALPHABET[(v / (85 * 85) % 85) as usize];
        dst[di + 3] = ALPHABET[(v / 85 % 85) as usize];
        dst[di + 4] = ALPHABET[(v % 85) as usize];
    };

    while si + 4 <= src.len() {
        let v = u32::from_be_bytes([src[si], src[si + 1], src[si + 2], src[si + 3]]);
        put(di, v);
        si += 4;
        di += 5;
    }

    if si < src.len() {
        let mut v: u32 = 0;
        for i in 0..4 {
            v <<= 8;
            if si + i < src.len() {
                v |= src[si + i] as u32;
            }
        }
        put(di, v);
    }
}
