//! The two physical forms a shard takes: a mutable SQL table (`rw`) while
//! it's being written to, and an immutable perfect-hash image (`ro`) once
//! it has been packed.

pub mod ro;
pub mod rw;

/// Validate a shard name: first character alphabetic, the rest hex digits.
/// Shard names become SQL identifiers (`shard_<name>`) and pool image
/// names, so they're checked once here rather than trusted at every call
/// site.
pub fn valid_shard_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_hexdigit())
}

/// SQL table name for a shard's RW form.
pub fn table_name(shard_name: &str) -> String {
    assert!(valid_shard_name(shard_name), "invalid shard name: {shard_name:?}");
    format!("shard_{}", shard_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_shard_name() {
        assert!(valid_shard_name("i0123456789abcdef0123456789abcdef"));
        assert!(!valid_shard_name("0123456789abcdef"));
        assert!(!valid_shard_name("izzzz"));
        assert!(!valid_shard_name(""));
    }

    #[test]
    fn test_table_name() {
        assert_eq!(table_name("iabc"), "shard_iabc");
    }
}
