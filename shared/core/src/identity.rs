//! Key material and fingerprints.
//!
//! Backed by `sequoia-openpgp`: an account's `KeyPair` is a `Cert` carrying
//! an RSA primary signing key and an RSA transport-encryption subkey.

use std::fmt;
use std::io;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::RngCore;
use zeroize::Zeroize;
use sequoia_openpgp as openpgp;
use openpgp::cert::{Cert, CertBuilder, CipherSuite};
use openpgp::parse::Parse;
use openpgp::serialize::Serialize as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 20-byte OpenPGP v4 fingerprint, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::Pgp("fingerprint must be 20 bytes".into()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn from_openpgp(fpr: &openpgp::Fingerprint) -> Result<Self> {
        Self::from_bytes(&fpr.as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Pgp(format!("invalid fingerprint: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Supported RSA key sizes, threaded through explicitly rather than via a
/// process-global (the original source's `rsaKeyLength` variable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaBits {
    B1024,
    B2048,
    B3072,
    B4096,
}

impl Default for RsaBits {
    fn default() -> Self {
        RsaBits::B2048
    }
}

impl RsaBits {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            1024 => Ok(RsaBits::B1024),
            2048 => Ok(RsaBits::B2048),
            3072 => Ok(RsaBits::B3072),
            4096 => Ok(RsaBits::B4096),
            other => Err(Error::Pgp(format!("unsupported rsa_bits value: {other}"))),
        }
    }

    /// sequoia has no 1024-bit RSA cipher suite; test fixtures that ask for
    /// it get the smallest one sequoia offers instead.
    fn cipher_suite(self) -> CipherSuite {
        match self {
            RsaBits::B1024 | RsaBits::B2048 => CipherSuite::RSA2k,
            RsaBits::B3072 => CipherSuite::RSA3k,
            RsaBits::B4096 => CipherSuite::RSA4k,
        }
    }
}

/// An account's asymmetric keypair: an OpenPGP certificate with secret key
/// material loaded into memory.
#[derive(Clone)]
pub struct KeyPair {
    cert: Cert,
}

impl KeyPair {
    /// Generates a fresh keypair bound to `"<name> <<email>>"`.
    pub fn generate(name: &str, email: &str, passphrase: &str, bits: RsaBits) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::PassphraseRequired);
        }

        let user_id = format!("{name} <{email}>");
        let (cert, _revocation) = CertBuilder::new()
            .add_userid(user_id.as_str())
            .add_signing_subkey()
            .add_transport_encryption_subkey()
            .set_cipher_suite(bits.cipher_suite())
            .generate()
            .map_err(|e| Error::Pgp(format!("key generation failed: {e}")))?;

        Ok(Self { cert })
    }

    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Fingerprint::from_openpgp(&self.cert.fingerprint())
    }

    /// The `"<Name> <<email>>"` identity string carried in the primary user ID.
    pub fn identity(&self) -> Result<String> {
        let userid = self
            .cert
            .userids()
            .next()
            .ok_or_else(|| Error::Pgp("certificate has no user id".into()))?;
        Ok(String::from_utf8_lossy(userid.userid().value()).into_owned())
    }

    pub fn name(&self) -> Result<String> {
        let userid = self
            .cert
            .userids()
            .next()
            .ok_or_else(|| Error::Pgp("certificate has no user id".into()))?;
        userid
            .userid()
            .name()
            .map_err(|e| Error::Pgp(format!("{e}")))?
            .ok_or_else(|| Error::Pgp("user id has no name component".into()))
    }

    pub fn email(&self) -> Result<String> {
        let userid = self
            .cert
            .userids()
            .next()
            .ok_or_else(|| Error::Pgp("certificate has no user id".into()))?;
        userid
            .userid()
            .email()
            .map_err(|e| Error::Pgp(format!("{e}")))?
            .ok_or_else(|| Error::Pgp("user id has no email component".into()))
    }

    /// Exports a shareable public-key blob (ASCII-armored, no secret material).
    pub fn export_public(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut writer = openpgp::armor::Writer::new(&mut buf, openpgp::armor::Kind::PublicKey)
            .map_err(|e| Error::Pgp(format!("armor writer failed: {e}")))?;
        self.cert
            .serialize(&mut writer)
            .map_err(|e| Error::Pgp(format!("cert serialization failed: {e}")))?;
        writer
            .finalize()
            .map_err(|e| Error::Pgp(format!("armor finalize failed: {e}")))?;
        Ok(buf)
    }

    /// Seals the private key for at-rest storage. This does not use
    /// OpenPGP's own S2K secret-key protection; it armors the transferable
    /// secret key and wraps the result in an AES-256-GCM envelope keyed by
    /// an Argon2id-derived key.
    pub fn lock(&self, passphrase: &str) -> Result<Vec<u8>> {
        if passphrase.is_empty() {
            return Err(Error::PassphraseRequired);
        }

        let mut tsk_buf = Vec::new();
        let mut writer = openpgp::armor::Writer::new(&mut tsk_buf, openpgp::armor::Kind::SecretKey)
            .map_err(|e| Error::Pgp(format!("armor writer failed: {e}")))?;
        self.cert
            .as_tsk()
            .serialize(&mut writer)
            .map_err(|e| Error::Pgp(format!("tsk serialization failed: {e}")))?;
        writer
            .finalize()
            .map_err(|e| Error::Pgp(format!("armor finalize failed: {e}")))?;

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let mut key = derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Pgp(format!("cipher init failed: {e}")))?;
        key.zeroize();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, tsk_buf.as_slice())
            .map_err(|e| Error::Pgp(format!("lock failed: {e}")))?;
        tsk_buf.zeroize();

        let mut out = Vec::with_capacity(salt.len() + nonce_bytes.len() + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverses [`KeyPair::lock`]. Fails with [`Error::BadPassphrase`] when
    /// the passphrase is wrong (the AEAD tag won't verify) or the envelope
    /// is malformed.
    pub fn unlock(locked: &[u8], passphrase: &str) -> Result<Self> {
        if locked.len() < 16 + 12 {
            return Err(Error::BadPassphrase);
        }
        let (salt, rest) = locked.split_at(16);
        let (nonce_bytes, ciphertext) = rest.split_at(12);

        let mut key = derive_key(passphrase, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Pgp(format!("cipher init failed: {e}")))?;
        key.zeroize();
        let nonce = Nonce::from_slice(nonce_bytes);
        let tsk_buf = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::BadPassphrase)?;

        let cert = Cert::from_reader(io::Cursor::new(tsk_buf))
            .map_err(|e| Error::Pgp(format!("failed to parse unlocked key: {e}")))?;
        Ok(Self { cert })
    }

    /// Parses a public-key-only blob, e.g. a friend's exported key.
    pub fn from_public_bytes(bytes: &[u8]) -> Result<Self> {
        let cert = Cert::from_reader(io::Cursor::new(bytes))
            .map_err(|e| Error::Pgp(format!("failed to parse public key: {e}")))?;
        Ok(Self { cert })
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| Error::Pgp(format!("key derivation failed: {e}")))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_requires_passphrase() {
        let err = KeyPair::generate("A", "a@example.com", "", RsaBits::B1024).unwrap_err();
        assert!(matches!(err, Error::PassphraseRequired));
    }

    #[test]
    fn lock_unlock_roundtrip() {
        let kp = KeyPair::generate("Ahmed Mohamed", "ahmed@example.com", "strong password", RsaBits::B1024).unwrap();
        let locked = kp.lock("strong password").unwrap();
        let unlocked = KeyPair::unlock(&locked, "strong password").unwrap();
        assert_eq!(kp.fingerprint().unwrap(), unlocked.fingerprint().unwrap());
    }

    #[test]
    fn unlock_wrong_passphrase_fails() {
        let kp = KeyPair::generate("Ahmed Mohamed", "ahmed@example.com", "strong password", RsaBits::B1024).unwrap();
        let locked = kp.lock("strong password").unwrap();
        let err = KeyPair::unlock(&locked, "wrong password").unwrap_err();
        assert!(matches!(err, Error::BadPassphrase));
    }

    #[test]
    fn fingerprint_stable_across_lock_cycle() {
        let kp = KeyPair::generate("Ahmed Mohamed", "ahmed@example.com", "pw", RsaBits::B1024).unwrap();
        let fpr_before = kp.fingerprint().unwrap();
        let locked = kp.lock("pw").unwrap();
        let unlocked = KeyPair::unlock(&locked, "pw").unwrap();
        assert_eq!(fpr_before, unlocked.fingerprint().unwrap());
    }

    #[test]
    fn distinct_generations_have_distinct_fingerprints() {
        let a = KeyPair::generate("A", "a@example.com", "pw", RsaBits::B1024).unwrap();
        let b = KeyPair::generate("A", "a@example.com", "pw", RsaBits::B1024).unwrap();
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn export_public_fingerprint_matches() {
        let kp = KeyPair::generate("Ahmed Mohamed", "ahmed@example.com", "pw", RsaBits::B1024).unwrap();
        let exported = kp.export_public().unwrap();
        let imported = KeyPair::from_public_bytes(&exported).unwrap();
        assert_eq!(kp.fingerprint().unwrap(), imported.fingerprint().unwrap());
    }

    #[test]
    fn identity_string_matches_name_and_email() {
        let kp = KeyPair::generate("Ahmed Mohamed", "ahmed@example.com", "pw", RsaBits::B1024).unwrap();
        assert_eq!(kp.identity().unwrap(), "Ahmed Mohamed <ahmed@example.com>");
        assert_eq!(kp.name().unwrap(), "Ahmed Mohamed");
        assert_eq!(kp.email().unwrap(), "ahmed@example.com");
    }
}
