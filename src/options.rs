//! Contains the options structs exposed by the session core.

pub use crate::{client::options::*, concern::*, read_preference::*};
