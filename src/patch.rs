//! Patch ops, the patch blob (schema 2), and the commit-message trailer
//! codec that ties a commit to its patch blob.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarpError};
use crate::model::clock::{Dot, VersionVector};
use crate::model::value::PropertyValue;

/// Schema version stamped on every patch and checkpoint commit.
pub const SCHEMA_VERSION: u32 = 2;

/// What a `PropSet` op targets: a node property or an edge property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PropScope {
    Node { node: String },
    Edge { from: String, to: String, label: String },
}

/// A single mutation within a patch. Tagged union with an explicit
/// discriminant on the wire (`type`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Op {
    NodeAdd { node: String, dot: Dot },
    NodeRemove { node: String, observed_dots: Vec<Dot> },
    EdgeAdd { from: String, to: String, label: String, dot: Dot },
    EdgeRemove { from: String, to: String, label: String, observed_dots: Vec<Dot> },
    PropSet { scope: PropScope, key: String, value: PropertyValue },
}

/// A decoded patch: the ordered ops a single writer committed at one
/// Lamport tick, together with the context vector it was built against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub schema: u32,
    pub writer: String,
    pub lamport: u64,
    pub context: VersionVector,
    pub ops: Vec<Op>,
}

impl Patch {
    /// Encodes the patch body as CBOR, the format stored in the patch blob.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| WarpError::Serialization(format!("patch encode failed: {e}")))?;
        Ok(buf)
    }

    /// Decodes a patch blob previously produced by [`Patch::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| WarpError::Serialization(format!("patch decode failed: {e}")))
    }
}

/// A decoded patch annotated with the SHA of the commit it was read from;
/// the unit the join reducer operates over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPatch {
    pub sha: String,
    pub patch: Patch,
}

/// The parsed trailer of a patch commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTrailer {
    pub graph: String,
    pub writer: String,
    pub lamport: u64,
    pub patch_oid: String,
    pub schema: u32,
}

impl PatchTrailer {
    /// Renders the commit message: `warp:patch`, a blank line, then the
    /// `eg-*` trailer fields.
    pub fn render(&self) -> String {
        format!(
            "warp:patch\n\neg-kind: patch\neg-graph: {}\neg-writer: {}\neg-lamport: {}\neg-patch-oid: {}\neg-schema: {}\n",
            self.graph, self.writer, self.lamport, self.patch_oid, self.schema
        )
    }

    /// Parses a commit message previously produced by [`Self::render`].
    pub fn parse(message: &str) -> Result<Self> {
        let fields = parse_trailer_fields(message, "warp:patch", "patch")?;
        Ok(Self {
            graph: field(&fields, "eg-graph")?,
            writer: field(&fields, "eg-writer")?,
            lamport: field(&fields, "eg-lamport")?.parse().map_err(|_| {
                WarpError::MalformedPatch {
                    sha: String::new(),
                    reason: "eg-lamport is not a valid u64".to_string(),
                }
            })?,
            patch_oid: field(&fields, "eg-patch-oid")?,
            schema: field(&fields, "eg-schema")?.parse().unwrap_or(SCHEMA_VERSION),
        })
    }
}

/// The parsed trailer of a checkpoint commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTrailer {
    pub graph: String,
    pub state_hash: String,
    pub frontier_oid: String,
    pub index_oid: Option<String>,
    pub schema: u32,
}

impl CheckpointTrailer {
    pub fn render(&self) -> String {
        let mut out = format!(
            "warp:checkpoint\n\neg-kind: checkpoint\neg-graph: {}\neg-state-hash: {}\neg-frontier-oid: {}\n",
            self.graph, self.state_hash, self.frontier_oid
        );
        if let Some(index_oid) = &self.index_oid {
            out.push_str(&format!("eg-index-oid: {index_oid}\n"));
        }
        out.push_str(&format!("eg-schema: {}\n", self.schema));
        out
    }

    pub fn parse(message: &str) -> Result<Self> {
        let fields = parse_trailer_fields(message, "warp:checkpoint", "checkpoint")?;
        Ok(Self {
            graph: field(&fields, "eg-graph")?,
            state_hash: field(&fields, "eg-state-hash")?,
            frontier_oid: field(&fields, "eg-frontier-oid")?,
            index_oid: fields.iter().find(|(k, _)| k == "eg-index-oid").map(|(_, v)| v.clone()),
            schema: field(&fields, "eg-schema")?.parse().unwrap_or(SCHEMA_VERSION),
        })
    }
}

fn parse_trailer_fields(message: &str, first_line: &str, kind: &str) -> Result<Vec<(String, String)>> {
    let mut lines = message.lines();
    if lines.next() != Some(first_line) {
        return Err(WarpError::MalformedPatch {
            sha: String::new(),
            reason: format!("commit message does not start with {first_line:?}"),
        });
    }
    let mut fields = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        fields.push((k.trim().to_string(), v.trim().to_string()));
    }
    let actual_kind = fields.iter().find(|(k, _)| k == "eg-kind").map(|(_, v)| v.as_str());
    if actual_kind != Some(kind) {
        return Err(WarpError::MalformedPatch {
            sha: String::new(),
            reason: format!("eg-kind mismatch: expected {kind:?}, got {actual_kind:?}"),
        });
    }
    Ok(fields)
}

fn field(fields: &[(String, String)], key: &str) -> Result<String> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .ok_or_else(|| WarpError::MalformedPatch {
            sha: String::new(),
            reason: format!("missing trailer field {key}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_trailer_round_trips() {
        let trailer = PatchTrailer {
            graph: "g".to_string(),
            writer: "w1".to_string(),
            lamport: 7,
            patch_oid: "a".repeat(40),
            schema: SCHEMA_VERSION,
        };
        let rendered = trailer.render();
        assert!(rendered.starts_with("warp:patch\n\n"));
        let parsed = PatchTrailer::parse(&rendered).unwrap();
        assert_eq!(parsed, trailer);
    }

    #[test]
    fn checkpoint_trailer_round_trips_with_optional_index() {
        let trailer = CheckpointTrailer {
            graph: "g".to_string(),
            state_hash: "b".repeat(64),
            frontier_oid: "c".repeat(40),
            index_oid: Some("d".repeat(40)),
            schema: SCHEMA_VERSION,
        };
        let parsed = CheckpointTrailer::parse(&trailer.render()).unwrap();
        assert_eq!(parsed, trailer);
    }

    #[test]
    fn patch_encode_decode_round_trips() {
        let patch = Patch {
            schema: SCHEMA_VERSION,
            writer: "w1".to_string(),
            lamport: 1,
            context: VersionVector::new(),
            ops: vec![Op::NodeAdd {
                node: "n1".to_string(),
                dot: Dot::new("w1", 1),
            }],
        };
        let bytes = patch.encode().unwrap();
        assert_eq!(Patch::decode(&bytes).unwrap(), patch);
    }

    #[test]
    fn rejects_wrong_kind() {
        let message = "warp:patch\n\neg-kind: checkpoint\n";
        assert!(PatchTrailer::parse(message).is_err());
    }
}
