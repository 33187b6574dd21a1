//! Validation for the ref-safe identifier grammar and canonical writer-id
//! generation.

use rand::RngCore;

use crate::error::{Result, WarpError};

const CROCKFORD_ALPHABET: &[u8] = b"0123456789abcdefghjkmnpqrstvwxyz";

fn is_ref_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Validates a graph name: alphanumeric plus `._-`, no leading `-`, and no
/// path-traversal sequence.
pub fn validate_graph_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('-') || name.contains("..") || !name.chars().all(is_ref_safe_char) {
        return Err(WarpError::InvalidGraphName(name.to_string()));
    }
    Ok(())
}

/// Validates a writer id: alphanumeric plus `._-`, no leading `-`, no `/`.
pub fn validate_writer_id(id: &str) -> Result<()> {
    if id.is_empty() || id.starts_with('-') || id.contains('/') || !id.chars().all(is_ref_safe_char) {
        return Err(WarpError::InvalidWriterId(id.to_string()));
    }
    Ok(())
}

/// Validates an object id: 4-64 hex characters.
pub fn validate_oid(oid: &str) -> Result<()> {
    let len = oid.len();
    if !(4..=64).contains(&len) || !oid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WarpError::InvalidOid(oid.to_string()));
    }
    Ok(())
}

/// Validates a ref path against the conservative grammar: forbids a leading
/// `-`, `;`, `..`, and any character outside `[A-Za-z0-9._/-]`.
pub fn validate_ref(r: &str) -> Result<()> {
    let ok_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-');
    if r.is_empty()
        || r.starts_with('-')
        || r.contains(';')
        || r.contains("..")
        || !r.chars().all(ok_char)
    {
        return Err(WarpError::InvalidRef(r.to_string()));
    }
    Ok(())
}

/// Generates a canonical writer id: `w_` followed by 26 lowercase Crockford
/// Base32 characters (excluding `i`, `l`, `o`, `u`), derived from 128 bits
/// of CSPRNG entropy.
pub fn generate_writer_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut bits: u128 = 0;
    for b in bytes {
        bits = (bits << 8) | b as u128;
    }
    // 128 bits packed into 26 base-32 symbols (130 bits of capacity);
    // left-pad with zero bits so the encoding is fixed-width.
    let mut symbols = [0u8; 26];
    for i in (0..26).rev() {
        let idx = (bits & 0x1f) as usize;
        symbols[i] = CROCKFORD_ALPHABET[idx];
        bits >>= 5;
    }
    let mut id = String::with_capacity(28);
    id.push_str("w_");
    id.push_str(std::str::from_utf8(&symbols).expect("crockford alphabet is ascii"));
    id
}

/// Ref paths for a given graph.
pub mod refs {
    pub fn writer_tip(graph: &str, writer: &str) -> String {
        format!("refs/warp/{graph}/writers/{writer}")
    }

    pub fn checkpoint_head(graph: &str) -> String {
        format!("refs/warp/{graph}/checkpoints/head")
    }

    pub fn coverage_head(graph: &str) -> String {
        format!("refs/warp/{graph}/coverage/head")
    }

    pub fn writers_prefix(graph: &str) -> String {
        format!("refs/warp/{graph}/writers/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_leading_dash() {
        assert!(validate_graph_name("-g").is_err());
        assert!(validate_writer_id("-w").is_err());
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(validate_graph_name("a/../b").is_err());
    }

    #[test]
    fn rejects_slash_in_writer_id() {
        assert!(validate_writer_id("a/b").is_err());
    }

    #[test]
    fn accepts_well_formed_names() {
        assert!(validate_graph_name("my-graph.v2").is_ok());
        assert!(validate_writer_id("writer_1").is_ok());
        assert!(validate_oid("abcd1234").is_ok());
    }

    #[test]
    fn generated_writer_id_is_well_formed() {
        let id = generate_writer_id();
        assert!(id.starts_with("w_"));
        assert_eq!(id.len(), 28);
        assert!(validate_writer_id(&id).is_ok());
        for c in id.chars().skip(2) {
            assert!(!matches!(c, 'i' | 'l' | 'o' | 'u'));
        }
    }
}
