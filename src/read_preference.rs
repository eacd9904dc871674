//! Contains the `ReadPreference` type, which determines how the driver routes
//! read operations to the members of a deployment.

use std::{collections::HashMap, time::Duration};

use bson::{doc, Bson, Document};

/// Specifies how the driver should route a read operation to members of a
/// replica set.
///
/// If applicable, `tag_sets` can be used to target specific nodes in a
/// replica set, and `max_staleness` specifies the maximum lag behind the
/// primary that a secondary can have to be considered for the given read
/// operation. Read preferences are opaque to the session core: they are
/// stored, merged, and handed back to the dispatcher.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct ReadPreference {
    /// Which servers are eligible for the read.
    pub mode: Mode,

    /// The maximum lag behind the primary that a secondary can have and still
    /// be eligible.
    pub max_staleness: Option<Duration>,
}

/// The server-type component of a [`ReadPreference`].
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub enum Mode {
    /// Only route this operation to the primary.
    #[default]
    Primary,

    /// Only route this operation to a secondary whose tags match one of the
    /// given tag sets.
    Secondary(Vec<TagSet>),

    /// Route this operation to the primary if it's available, but fall back
    /// to the secondaries if not.
    PrimaryPreferred(Vec<TagSet>),

    /// Route this operation to a secondary if one is available, but fall back
    /// to the primary if not.
    SecondaryPreferred(Vec<TagSet>),

    /// Route this operation to the node with the least network latency
    /// regardless of server type.
    Nearest(Vec<TagSet>),
}

/// A set of tags used to match eligible servers.
pub type TagSet = HashMap<String, String>;

impl ReadPreference {
    /// A read preference targeting the primary.
    pub fn primary() -> Self {
        ReadPreference {
            mode: Mode::Primary,
            ..Default::default()
        }
    }

    /// A read preference targeting a secondary matching one of the tag sets.
    pub fn secondary(tag_sets: Option<Vec<TagSet>>) -> Self {
        ReadPreference {
            mode: Mode::Secondary(tag_sets.unwrap_or_default()),
            ..Default::default()
        }
    }

    /// A read preference preferring the primary but allowing secondaries.
    pub fn primary_preferred(tag_sets: Option<Vec<TagSet>>) -> Self {
        ReadPreference {
            mode: Mode::PrimaryPreferred(tag_sets.unwrap_or_default()),
            ..Default::default()
        }
    }

    /// A read preference preferring a secondary but allowing the primary.
    pub fn secondary_preferred(tag_sets: Option<Vec<TagSet>>) -> Self {
        ReadPreference {
            mode: Mode::SecondaryPreferred(tag_sets.unwrap_or_default()),
            ..Default::default()
        }
    }

    /// A read preference targeting whichever eligible node is nearest.
    pub fn nearest(tag_sets: Option<Vec<TagSet>>) -> Self {
        ReadPreference {
            mode: Mode::Nearest(tag_sets.unwrap_or_default()),
            ..Default::default()
        }
    }

    /// Whether this read preference only targets the primary.
    pub fn is_primary(&self) -> bool {
        matches!(self.mode, Mode::Primary)
    }

    pub(crate) fn mode_str(&self) -> &'static str {
        match self.mode {
            Mode::Primary => "primary",
            Mode::Secondary(_) => "secondary",
            Mode::PrimaryPreferred(_) => "primaryPreferred",
            Mode::SecondaryPreferred(_) => "secondaryPreferred",
            Mode::Nearest(_) => "nearest",
        }
    }

    fn tag_sets(&self) -> Option<&Vec<TagSet>> {
        match self.mode {
            Mode::Primary => None,
            Mode::Secondary(ref tag_sets)
            | Mode::PrimaryPreferred(ref tag_sets)
            | Mode::SecondaryPreferred(ref tag_sets)
            | Mode::Nearest(ref tag_sets) => Some(tag_sets),
        }
    }

    /// The wire form of this read preference, as embedded in a
    /// `$readPreference` field.
    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "mode": self.mode_str() };

        if let Some(tag_sets) = self.tag_sets() {
            if !tag_sets.is_empty() {
                let tags: Vec<Bson> = tag_sets
                    .iter()
                    .map(|tag_set| {
                        Bson::Document(
                            tag_set
                                .iter()
                                .map(|(k, v)| (k.clone(), Bson::String(v.clone())))
                                .collect(),
                        )
                    })
                    .collect();
                doc.insert("tags", tags);
            }
        }

        if let Some(max_staleness) = self.max_staleness {
            doc.insert("maxStalenessSeconds", max_staleness.as_secs() as i64);
        }

        doc
    }
}
