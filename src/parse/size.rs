use crate::error::{Error, Result};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;

/// Budget value meaning "never rotate".
pub const UNLIMITED: u64 = 0;

/*
    @@@
    @parse_size();
    . Converts "50MB", "1KB", "3GB" or a bare "4096" into a byte count.
    . Suffixes are case-sensitive, the body must be plain base-10 digits (no sign, no whitespace).
    . The result must fit in a signed 64-bit count, anything larger is rejected.
*/
pub fn parse_size(input: &str) -> Result<u64> {
    let (body, multiplier) = if let Some(body) = input.strip_suffix("KB") {
        (body, KB)
    } else if let Some(body) = input.strip_suffix("MB") {
        (body, MB)
    } else if let Some(body) = input.strip_suffix("GB") {
        (body, GB)
    } else {
        (input, 1)
    };

    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::BadSize(input.to_string()));
    }

    body.parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|n| *n <= i64::MAX as u64)
        .ok_or_else(|| Error::BadSize(input.to_string()))
}

/// Renders a byte count with the largest suffix that divides it exactly.
pub fn format_size(bytes: u64) -> String {
    match bytes {
        UNLIMITED => "0".to_string(),
        n if n % GB == 0 => format!("{}GB", n / GB),
        n if n % MB == 0 => format!("{}MB", n / MB),
        n if n % KB == 0 => format!("{}KB", n / KB),
        n => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes() {
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("50MB").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn bare_number_is_bytes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("7").unwrap(), 7);
        assert_eq!(parse_size("0").unwrap(), UNLIMITED);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "KB", "-1", "-1KB", "1kb", "1TB", "1 KB", " 10", "10 ", "1.5MB", "+3"] {
            assert!(
                matches!(parse_size(bad), Err(Error::BadSize(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_size("9223372036854775807").is_ok());
        assert!(parse_size("9223372036854775808").is_err());
        assert!(parse_size("9999999999GB").is_err());
    }

    #[test]
    fn format_is_a_fixed_point() {
        for s in ["0", "1KB", "50MB", "3GB", "1000", "1536"] {
            let n = parse_size(s).unwrap();
            assert_eq!(format_size(n), s);
            assert_eq!(parse_size(&format_size(n)).unwrap(), n);
        }
        assert_eq!(format_size(1024 * 1024), "1MB");
    }
}
