//! Identifier minting (spec §2.2): short internal ids and 10-char public
//! codes. All ids are string-typed (spec §6).

use nanoid::nanoid;

const PUBLIC_CODE_ALPHABET: [char; 36] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Mint a prefixed internal id, e.g. `new_id("case")` -> `"case_3f1a9c..."`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Mint a 10-character uppercase alphanumeric public code, URL-safe by
/// construction (spec §6: "guaranteed to be URL-safe").
pub fn new_public_code() -> String {
    nanoid!(10, &PUBLIC_CODE_ALPHABET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_code_is_ten_uppercase_alphanumeric_chars() {
        let code = new_public_code();
        assert_eq!(code.len(), 10);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn ids_carry_their_prefix_and_are_unique() {
        let a = new_id("case");
        let b = new_id("case");
        assert!(a.starts_with("case_"));
        assert_ne!(a, b);
    }
}
