//! Encryption addressing (second half of spec component D): wrapping a
//! plaintext stream so that it is decryptable by a specific set of
//! certificates, and inspecting, without decrypting, which key IDs a
//! ciphertext is addressed to.
//!
//! Built on sequoia-openpgp's multi-recipient streaming encryptor.

use std::io::{self, Write};

use sequoia_openpgp as openpgp;
use openpgp::cert::Cert;
use openpgp::packet::{PKESK, SKESK};
use openpgp::parse::stream::{
    DecryptionHelper, DecryptorBuilder, MessageStructure, VerificationHelper,
};
use openpgp::parse::{PacketParser, PacketParserResult, Parse};
use openpgp::policy::{Policy, StandardPolicy};
use openpgp::serialize::stream::{Encryptor2, LiteralWriter, Message};
use openpgp::types::SymmetricAlgorithm;
use openpgp::{KeyHandle, KeyID, Packet};

use crate::error::{Error, Result};
use crate::identity::KeyPair;

static POLICY: StandardPolicy<'static> = StandardPolicy::new();

fn policy() -> &'static dyn Policy {
    &POLICY
}

/// Encrypts `plaintext` so that every certificate in `targets` can decrypt
/// it. Callers are responsible for including the author's own certificate
/// in `targets` when the author should be able to read the result back;
/// this function has no notion of "self".
pub fn encrypt_for(plaintext: &[u8], targets: &[&Cert]) -> Result<Vec<u8>> {
    let recipient_keys: Vec<_> = targets
        .iter()
        .flat_map(|cert| {
            cert.keys()
                .with_policy(policy(), None)
                .supported()
                .alive()
                .revoked(false)
                .for_transport_encryption()
                .map(|ka| ka.key().clone())
        })
        .collect();

    if recipient_keys.is_empty() {
        return Err(Error::Pgp("no suitable encryption recipients".into()));
    }

    let mut sink = Vec::new();
    let message = Message::new(&mut sink);
    let message = Encryptor2::for_recipients(message, recipient_keys.iter())
        .build()
        .map_err(|e| Error::Pgp(format!("encryptor build failed: {e}")))?;
    let mut message = LiteralWriter::new(message)
        .build()
        .map_err(|e| Error::Pgp(format!("literal writer build failed: {e}")))?;

    message
        .write_all(plaintext)
        .map_err(|e| Error::Pgp(format!("write failed: {e}")))?;
    message
        .finalize()
        .map_err(|e| Error::Pgp(format!("finalize failed: {e}")))?;

    Ok(sink)
}

/// Decrypts `ciphertext` using `key`'s transport-encryption subkey. Fails
/// if `key` is not among the addressed recipients.
pub fn decrypt_with(key: &KeyPair, ciphertext: &[u8]) -> Result<Vec<u8>> {
    struct Helper<'a> {
        cert: &'a Cert,
        policy: &'static dyn Policy,
    }

    impl<'a> DecryptionHelper for Helper<'a> {
        fn decrypt<D>(
            &mut self,
            pkesks: &[PKESK],
            _skesks: &[SKESK],
            sym_algo: Option<SymmetricAlgorithm>,
            mut decrypt: D,
        ) -> openpgp::Result<Option<openpgp::Fingerprint>>
        where
            D: FnMut(SymmetricAlgorithm, &openpgp::crypto::SessionKey) -> bool,
        {
            let keys: Vec<_> = self
                .cert
                .keys()
                .with_policy(self.policy, None)
                .supported()
                .alive()
                .revoked(false)
                .for_transport_encryption()
                .secret()
                .collect();

            for pkesk in pkesks {
                for key in &keys {
                    let mut keypair = key
                        .key()
                        .clone()
                        .into_keypair()
                        .map_err(|e| openpgp::Error::InvalidOperation(format!("{e}")))?;
                    if let Some((algo, session_key)) = pkesk.decrypt(&mut keypair, sym_algo) {
                        if decrypt(algo, &session_key) {
                            return Ok(Some(key.fingerprint()));
                        }
                    }
                }
            }

            Err(openpgp::Error::InvalidOperation("decryption failed".to_string()).into())
        }
    }

    impl<'a> VerificationHelper for Helper<'a> {
        fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
            Ok(vec![self.cert.clone()])
        }

        fn check(&mut self, _structure: MessageStructure) -> openpgp::Result<()> {
            Ok(())
        }
    }

    let helper = Helper {
        cert: key.cert(),
        policy: policy(),
    };
    let mut plaintext = Vec::new();
    let mut decryptor = DecryptorBuilder::from_bytes(ciphertext)
        .map_err(|e| Error::Pgp(format!("decryptor build failed: {e}")))?
        .with_policy(policy(), None, helper)
        .map_err(|_| Error::IntegrityError("decryption failed".into()))?;

    io::copy(&mut decryptor, &mut plaintext)
        .map_err(|_| Error::IntegrityError("decryption failed".into()))?;

    Ok(plaintext)
}

/// Lists the key IDs a ciphertext's PKESK packets are addressed to,
/// without decrypting anything. Used by the server to filter a file
/// listing down to files the requesting peer can actually read.
pub fn recipient_key_ids(ciphertext: &[u8]) -> Result<Vec<KeyID>> {
    let mut ids = Vec::new();
    let mut ppr = PacketParser::from_bytes(ciphertext)
        .map_err(|e| Error::Pgp(format!("failed to parse ciphertext: {e}")))?;

    while let PacketParserResult::Some(pp) = ppr {
        if let Packet::PKESK(pkesk) = &pp.packet {
            ids.push(pkesk.recipient().clone());
        }
        let (_packet, next_ppr) = pp
            .recurse()
            .map_err(|e| Error::Pgp(format!("failed to parse ciphertext: {e}")))?;
        ppr = next_ppr;
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RsaBits;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let alice = KeyPair::generate("Alice", "alice@example.com", "pw", RsaBits::B1024).unwrap();
        let ciphertext = encrypt_for(b"Hello world!", &[alice.cert()]).unwrap();
        let plaintext = decrypt_with(&alice, &ciphertext).unwrap();
        assert_eq!(plaintext, b"Hello world!");
    }

    #[test]
    fn non_recipient_cannot_decrypt() {
        let alice = KeyPair::generate("Alice", "alice@example.com", "pw", RsaBits::B1024).unwrap();
        let mallory = KeyPair::generate("Mallory", "mallory@example.com", "pw", RsaBits::B1024).unwrap();
        let ciphertext = encrypt_for(b"Secret", &[alice.cert()]).unwrap();
        assert!(decrypt_with(&mallory, &ciphertext).is_err());
    }

    #[test]
    fn recipient_key_ids_matches_encryption_subkey() {
        let alice = KeyPair::generate("Alice", "alice@example.com", "pw", RsaBits::B1024).unwrap();
        let ciphertext = encrypt_for(b"Secret", &[alice.cert()]).unwrap();
        let ids = recipient_key_ids(&ciphertext).unwrap();
        assert_eq!(ids.len(), 1);

        let expected = alice
            .cert()
            .keys()
            .with_policy(policy(), None)
            .supported()
            .for_transport_encryption()
            .next()
            .unwrap()
            .keyid();
        assert_eq!(ids[0], expected);
    }

    #[test]
    fn multi_recipient_each_can_decrypt() {
        let alice = KeyPair::generate("Alice", "alice@example.com", "pw", RsaBits::B1024).unwrap();
        let bob = KeyPair::generate("Bob", "bob@example.com", "pw", RsaBits::B1024).unwrap();
        let ciphertext = encrypt_for(b"shared secret", &[alice.cert(), bob.cert()]).unwrap();

        assert_eq!(decrypt_with(&alice, &ciphertext).unwrap(), b"shared secret");
        assert_eq!(decrypt_with(&bob, &ciphertext).unwrap(), b"shared secret");
    }
}
