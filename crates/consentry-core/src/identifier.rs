//! Visitor and session identifiers (random UUID v4).

use uuid::{Uuid, Variant};

/// Generate a fresh random identifier
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Check the canonical hyphenated form with version 4 and RFC 4122 variant.
///
/// `Uuid::try_parse` also accepts simple, braced and URN forms, so the
/// 36-character hyphenated layout is checked separately.
pub fn is_valid_id(value: &str) -> bool {
    if value.len() != 36 {
        return false;
    }
    let hyphens_ok = value
        .char_indices()
        .all(|(i, c)| matches!(i, 8 | 13 | 18 | 23) == (c == '-'));
    if !hyphens_ok {
        return false;
    }
    match Uuid::try_parse(value) {
        Ok(id) => id.get_version_num() == 4 && id.get_variant() == Variant::RFC4122,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid() {
        for _ in 0..32 {
            let id = generate_id();
            assert!(is_valid_id(&id), "{id}");
        }
    }

    #[test]
    fn test_rejects_wrong_version_and_variant() {
        // version nibble 1
        assert!(!is_valid_id("6fa459ea-ee8a-1ca4-894e-db77e160355e"));
        // variant nibble c
        assert!(!is_valid_id("6fa459ea-ee8a-4ca4-c94e-db77e160355e"));
        assert!(is_valid_id("6fa459ea-ee8a-4ca4-894e-db77e160355e"));
    }

    #[test]
    fn test_rejects_other_layouts() {
        assert!(!is_valid_id("6fa459eaee8a4ca4894edb77e160355e"));
        assert!(!is_valid_id("{6fa459ea-ee8a-4ca4-894e-db77e160355e}"));
        assert!(!is_valid_id("6fa459ea-ee8a-4ca4-894e-db77e160355"));
        assert!(!is_valid_id("zfa459ea-ee8a-4ca4-894e-db77e160355e"));
        assert!(!is_valid_id(""));
    }
}
