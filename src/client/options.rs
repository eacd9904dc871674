use typed_builder::TypedBuilder;

use crate::{
    concern::{ReadConcern, WriteConcern},
    read_preference::ReadPreference,
};

/// Contains the options that can be used for a transaction.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct TransactionOptions {
    /// The read concern to use for the transaction.
    pub read_concern: Option<ReadConcern>,

    /// The write concern to use when committing or aborting a transaction.
    pub write_concern: Option<WriteConcern>,

    /// The preferred server targeting for read operations in the transaction.
    pub read_preference: Option<ReadPreference>,
}

impl TransactionOptions {
    /// Overlays every field of `other` that is present onto `self`, leaving
    /// the rest untouched.
    pub(crate) fn apply(&mut self, other: &TransactionOptions) {
        if other.read_concern.is_some() {
            self.read_concern = other.read_concern.clone();
        }
        if other.write_concern.is_some() {
            self.write_concern = other.write_concern.clone();
        }
        if other.read_preference.is_some() {
            self.read_preference = other.read_preference.clone();
        }
    }
}

/// Contains the options that can be used to create a new
/// [`ClientSession`](crate::ClientSession).
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct SessionOptions {
    /// Whether operations within the session observe causally consistent
    /// reads.
    ///
    /// Defaults to true.
    #[builder(default = true)]
    pub causal_consistency: bool,

    /// The default options to use for transactions started on this session.
    ///
    /// Fields left unset here are inherited from the client associated with
    /// the session.
    #[builder(default)]
    pub default_transaction_options: Option<TransactionOptions>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            causal_consistency: true,
            default_transaction_options: None,
        }
    }
}
