//! Friends (first half of spec component D): other accounts known to this
//! one, referenced by their public key.

use crate::error::Result;
use crate::identity::{Fingerprint, KeyPair};

/// A known public key belonging to another account. The "followed" bit
/// itself is not stored here: it's derived from the presence of the
/// friend's mirror directory, so it's kept on [`crate::account::Account`]
/// where that directory lives.
#[derive(Clone)]
pub struct Friend {
    public_key: KeyPair,
}

impl Friend {
    pub(crate) fn new(public_key: KeyPair) -> Self {
        Self { public_key }
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        self.public_key.fingerprint()
    }

    pub fn public_key(&self) -> &KeyPair {
        &self.public_key
    }
}
