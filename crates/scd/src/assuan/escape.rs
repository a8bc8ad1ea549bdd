//! Percent escaping used on the Assuan wire

/// Escape `%`, CR and LF (and any other control byte) for a data line
pub fn escape_data(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if b == b'%' || b < 0x20 {
            out.extend_from_slice(format!("%{b:02X}").as_bytes());
        } else {
            out.push(b);
        }
    }
    out
}

/// Reverse `%XX` escaping; invalid sequences are kept verbatim
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'%' && i + 2 < data.len() {
            if let Ok(byte) = hex::decode(&data[i + 1..i + 3]) {
                out.push(byte[0]);
                i += 3;
                continue;
            }
        }
        out.push(data[i]);
        i += 1;
    }
    out
}

/// Encode an attribute value for `SCD SETATTR`
///
/// Spaces become `+`; `+`, `%`, control characters and non-ASCII bytes are
/// percent escaped so the value stays a single ASCII token.
pub fn percent_plus_escape(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    for &b in value {
        match b {
            b' ' => out.push('+'),
            b'+' | b'%' | b'"' | b':' => out.push_str(&format!("%{b:02X}")),
            b if b < 0x20 || b >= 0x80 => out.push_str(&format!("%{b:02X}")),
            b => out.push(char::from(b)),
        }
    }
    out
}
