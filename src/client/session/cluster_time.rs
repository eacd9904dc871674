use std::cmp::Ordering;

use bson::{Bson, Document, Timestamp};

/// A cluster time gossiped by the server on every reply.
///
/// The raw document is retained so the gossip can be re-emitted exactly as it
/// was received (the signature must survive byte-for-byte); it is only decoded
/// when two cluster times need to be ordered.
#[derive(Clone, Debug)]
pub struct ClusterTime {
    doc: Document,
}

impl ClusterTime {
    /// The raw gossip document, suitable for re-emission in a `$clusterTime`
    /// field.
    pub fn as_document(&self) -> &Document {
        &self.doc
    }

    /// The logical timestamp carried in the required `clusterTime` field, or
    /// `None` when the document does not contain one of timestamp type.
    pub(crate) fn timestamp(&self) -> Option<Timestamp> {
        match self.doc.get("clusterTime") {
            Some(Bson::Timestamp(ts)) => Some(*ts),
            _ => {
                tracing::warn!(cluster_time = %self.doc, "cannot parse cluster time");
                None
            }
        }
    }
}

impl From<Document> for ClusterTime {
    fn from(doc: Document) -> Self {
        Self { doc }
    }
}

impl PartialEq for ClusterTime {
    fn eq(&self, other: &ClusterTime) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for ClusterTime {
    /// Lexicographic order on `(timestamp, increment)`. Two cluster times are
    /// incomparable when either fails to parse, so an unparseable incoming
    /// value never displaces a stored one.
    fn partial_cmp(&self, other: &ClusterTime) -> Option<Ordering> {
        let lhs = self.timestamp()?;
        let rhs = other.timestamp()?;
        Some((lhs.time, lhs.increment).cmp(&(rhs.time, rhs.increment)))
    }
}
