//! Versioned shared objects.
//!
//! A shared object is any record whose ownership and history must be
//! agreed on by both VASPs in a channel (currently only [`PaymentObject`](crate::payment::PaymentObject)).
//! Each new version records the version it was derived from, so dependency
//! chains can be checked by the [`Executor`](crate::executor::Executor)
//! without a central counter.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// An opaque version identifier, unique within a channel.
pub type Version = String;

/// How many random characters make up a freshly generated [`Version`].
/// Matches the reference implementation's use of a random hex string for
/// `previous_versions`/`version`-style object identifiers.
const VERSION_LEN: usize = 24;

/// Generates a fresh, globally-unique version identifier.
#[must_use]
pub fn random_version() -> Version {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERSION_LEN)
        .map(char::from)
        .collect()
}

/// Version bookkeeping shared by every versioned object in the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedObject {
    /// This object's own version.
    pub version: Version,
    /// The versions this object was derived from (empty for a freshly
    /// created object).
    pub previous_versions: Vec<Version>,
}

impl SharedObject {
    /// Creates the version metadata for a brand-new object.
    #[must_use]
    pub fn new(version: impl Into<Version>) -> Self {
        Self {
            version: version.into(),
            previous_versions: Vec::new(),
        }
    }

    /// Derives the version metadata for the next version of this object,
    /// minting a fresh random version id so concurrent updates can never
    /// collide on the same version string.
    #[must_use]
    pub fn new_version(&self) -> Self {
        Self {
            version: random_version(),
            previous_versions: vec![self.version.clone()],
        }
    }
}
