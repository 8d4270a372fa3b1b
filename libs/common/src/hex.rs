//! Hex text for frame dumps in logs and frames written out in tests

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Bytes as space separated uppercase pairs, `[0x12, 0xAB]` -> `"12 AB"`
pub fn frame_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for &byte in data {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push(char::from(DIGITS[usize::from(byte >> 4)]));
        out.push(char::from(DIGITS[usize::from(byte & 0x0F)]));
    }
    out
}

/// Bytes from hex text; whitespace between digits is ignored
pub fn decode(text: &str) -> Result<Vec<u8>, String> {
    let nibbles = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| format!("'{}' is not a hex digit", c))
        })
        .collect::<Result<Vec<u8>, String>>()?;
    if nibbles.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{}'", text));
    }
    Ok(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}
