//! Canonical NUL-delimited string encodings shared by the CRDT state, the
//! patch op payloads, and the bitmap index.

const EDGE_PROP_SENTINEL: &str = "E";

/// Encodes an edge's identity as `from\0to\0label`.
pub fn encode_edge_key(from: &str, to: &str, label: &str) -> String {
    format!("{from}\0{to}\0{label}")
}

/// Splits an encoded edge key back into `(from, to, label)`. Returns `None`
/// if the key does not have exactly three NUL-delimited segments.
pub fn decode_edge_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.split('\0');
    let from = parts.next()?;
    let to = parts.next()?;
    let label = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((from, to, label))
}

/// Encodes a node property key as `nodeId\0propKey`.
pub fn encode_node_prop_key(node_id: &str, prop_key: &str) -> String {
    format!("{node_id}\0{prop_key}")
}

/// Encodes an edge property key as `E\0from\0to\0label\0propKey`.
pub fn encode_edge_prop_key(from: &str, to: &str, label: &str, prop_key: &str) -> String {
    format!("{EDGE_PROP_SENTINEL}\0{from}\0{to}\0{label}\0{prop_key}")
}

/// True when a property key was encoded by [`encode_edge_prop_key`].
pub fn is_edge_prop_key(key: &str) -> bool {
    key.starts_with("E\0")
}

/// Recovers the owning edge key (`from\0to\0label`) from an edge property
/// key, without the property-key suffix.
pub fn edge_key_of_prop(key: &str) -> Option<String> {
    let rest = key.strip_prefix("E\0")?;
    let mut parts = rest.splitn(4, '\0');
    let from = parts.next()?;
    let to = parts.next()?;
    let label = parts.next()?;
    // the fourth part (prop key) is discarded; it may itself contain NULs
    // in degenerate cases, which is fine since we don't need it here.
    Some(encode_edge_key(from, to, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_key_round_trips() {
        let key = encode_edge_key("a", "b", "knows");
        assert_eq!(decode_edge_key(&key), Some(("a", "b", "knows")));
    }

    #[test]
    fn edge_prop_key_is_tagged_and_recoverable() {
        let key = encode_edge_prop_key("a", "b", "knows", "weight");
        assert!(is_edge_prop_key(&key));
        assert_eq!(edge_key_of_prop(&key), Some(encode_edge_key("a", "b", "knows")));
    }

    #[test]
    fn node_prop_key_is_not_tagged_as_edge() {
        let key = encode_node_prop_key("n1", "k");
        assert!(!is_edge_prop_key(&key));
    }
}
