//! Identity, account store, friend graph and file addressing for mau.
//!
//! Everything a `mau-node` server or sync client needs that doesn't touch
//! the network lives here.

pub mod account;
pub mod addressing;
pub mod error;
pub mod file;
pub mod friend;
pub mod identity;

pub use account::Account;
pub use error::{Error, Result};
pub use file::File;
pub use friend::Friend;
pub use identity::{Fingerprint, KeyPair, RsaBits};
