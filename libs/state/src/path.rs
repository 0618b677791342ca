//! Hierarchical paths into the state tree

use std::fmt;
use types::ActorId;

/// A path made of opaque byte segments
///
/// Ordering is segment-wise, so all paths of one actor sort together.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatePath {
    segments: Vec<Vec<u8>>,
}

impl StatePath {
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    /// Path of an actor's record root
    pub fn actor(id: &ActorId) -> Self {
        Self {
            segments: vec![id.as_bytes().to_vec()],
        }
    }

    /// Append one segment
    pub fn join(mut self, segment: impl AsRef<[u8]>) -> Self {
        self.segments.push(segment.as_ref().to_vec());
        self
    }

    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// True when `self` is `prefix` or lies below it
    pub fn starts_with(&self, prefix: &StatePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Length-prefixed encoding, unambiguous for arbitrary segment bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.segments.iter().map(|s| s.len() + 4).sum());
        for segment in &self.segments {
            out.extend_from_slice(&(segment.len() as u32).to_le_bytes());
            out.extend_from_slice(segment);
        }
        out
    }
}

impl Default for StatePath {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .segments
            .iter()
            .map(|s| match std::str::from_utf8(s) {
                Ok(text) if !text.is_empty() && text.chars().all(|c| c.is_ascii_graphic()) => {
                    text.to_string()
                }
                _ => format!("0x{}", hex_prefix(s)),
            })
            .collect();
        write!(f, "/{}", rendered.join("/"))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}
