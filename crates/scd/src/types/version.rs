/// Format a version packed one component per byte (`0x01020304` is `1.2.3.4`)
///
/// Leading zero components are dropped and negative values mean "no version".
pub fn format_version(value: i64) -> String {
    if value < 0 {
        return String::new();
    }

    let a = (value >> 24) & 0xff;
    let b = (value >> 16) & 0xff;
    let c = (value >> 8) & 0xff;
    let d = value & 0xff;

    if a != 0 {
        format!("{a}.{b}.{c}.{d}")
    } else if b != 0 {
        format!("{b}.{c}.{d}")
    } else if c != 0 {
        format!("{c}.{d}")
    } else {
        d.to_string()
    }
}

/// Parse a hex encoded packed version tuple, -1 if it is not valid hex
pub fn parse_hex_version(value: &str) -> i64 {
    u32::from_str_radix(value.trim(), 16).map_or(-1, i64::from)
}

/// Parse a decimal version the forgiving way: leading digits only, 0 if none
pub fn parse_decimal_version(value: &str) -> i64 {
    let value = value.trim_start();
    let (sign, digits) = match value.as_bytes().first() {
        Some(b'-') => (-1, &value[1..]),
        Some(b'+') => (1, &value[1..]),
        _ => (1, value),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map_or(0, |v| sign * v)
}
