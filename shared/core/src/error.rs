//! Error kinds shared across the identity, account and addressing layers.
//!
//! `mau-node` reuses this enum rather than defining its own, so that a
//! transport failure and a passphrase failure surface through the same type
//! all the way up to the CLI.

/// The canonical error kinds from the system's error handling design: each
/// variant is a *kind*, not a wrapper around a specific downstream type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a non-empty passphrase is required")]
    PassphraseRequired,

    #[error("incorrect passphrase")]
    BadPassphrase,

    #[error("an account already exists at this path")]
    AccountAlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("friend is not followed")]
    FriendNotFollowed,

    #[error("couldn't find friend")]
    CantFindFriend,

    #[error("incorrect peer certificate")]
    IncorrectPeerCertificate,

    #[error("unsupported public key algorithm")]
    UnsupportedAlgorithm,

    #[error("integrity check failed: {0}")]
    IntegrityError(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("openpgp error: {0}")]
    Pgp(String),
}

pub type Result<T> = std::result::Result<T, Error>;
