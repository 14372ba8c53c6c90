//! Mutually-authenticated transport: a TLS channel in which both sides
//! present a self-signed certificate built directly from their mau
//! identity keypair, and each side pins the other's certificate to an
//! expected OpenPGP-style fingerprint instead of walking a CA chain.

use std::sync::Arc;
use std::time::SystemTime;

use der::{Decode, Encode};
use mau_core::{Error, Fingerprint, KeyPair, Result};
use rsa::traits::PublicKeyParts;
use rsa::BigUint;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use sequoia_openpgp as openpgp;
use sha1::{Digest, Sha1};
use x509_cert::Certificate as X509Certificate;

const RSA_KEY_USAGE_OID_ALG: &str = "1.2.840.113549.1.1.1"; // rsaEncryption

/// A self-signed TLS certificate + key pair derived from a mau identity.
pub struct TlsIdentity {
    pub cert_der: CertificateDer<'static>,
    pub key_der: PrivatePkcs8KeyDer<'static>,
}

/// Builds a self-signed TLS certificate whose embedded RSA public key is
/// exactly the account's OpenPGP primary key, with `not_before` pinned to
/// the primary key's creation time so that re-deriving an OpenPGP-style
/// fingerprint from the certificate reproduces the account's real
/// fingerprint.
pub fn build_identity(keypair: &KeyPair) -> Result<TlsIdentity> {
    let cert = keypair.cert();
    let primary = cert
        .primary_key()
        .key()
        .clone()
        .parts_into_secret()
        .map_err(|e| Error::Pgp(format!("primary key has no secret material: {e}")))?;

    let created = primary.creation_time();

    let openpgp::crypto::mpi::PublicKey::RSA { e, n } = primary.mpis().clone() else {
        return Err(Error::UnsupportedAlgorithm);
    };

    let openpgp::packet::key::SecretKeyMaterial::Unencrypted(unencrypted) = primary.secret() else {
        return Err(Error::Pgp("primary key secret material is still encrypted".into()));
    };

    let mut pkcs8_der = None;
    unencrypted.map(|mpis| {
        if let openpgp::crypto::mpi::SecretKeyMaterial::RSA { d, p, q, .. } = mpis {
            pkcs8_der = rsa_pkcs8_der(
                n.value(),
                e.value(),
                d.value(),
                p.value(),
                q.value(),
            )
            .ok();
        }
    });
    let pkcs8_der = pkcs8_der.ok_or(Error::UnsupportedAlgorithm)?;

    let key_pair = rcgen::KeyPair::from_der_and_sign_algo(&pkcs8_der, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| Error::Pgp(format!("rcgen key import failed: {e}")))?;

    let mut params = rcgen::CertificateParams::new(Vec::<String>::new())
        .map_err(|e| Error::Pgp(format!("certificate params failed: {e}")))?;
    params.not_before = system_time_to_offset(created);
    params.not_after = params.not_before + time::Duration::days(365 * 20);

    let rcgen_cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Pgp(format!("self-signed certificate failed: {e}")))?;

    Ok(TlsIdentity {
        cert_der: rcgen_cert.der().clone(),
        key_der: PrivatePkcs8KeyDer::from(pkcs8_der),
    })
}

fn system_time_to_offset(time: SystemTime) -> time::OffsetDateTime {
    let secs = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    time::OffsetDateTime::from_unix_timestamp(secs).unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
}

fn rsa_pkcs8_der(n: &[u8], e: &[u8], d: &[u8], p: &[u8], q: &[u8]) -> Result<Vec<u8>> {
    use pkcs8::EncodePrivateKey;

    let key = rsa::RsaPrivateKey::from_components(
        BigUint::from_bytes_be(n),
        BigUint::from_bytes_be(e),
        BigUint::from_bytes_be(d),
        vec![BigUint::from_bytes_be(p), BigUint::from_bytes_be(q)],
    )
    .map_err(|e| Error::Pgp(format!("invalid rsa key material: {e}")))?;

    let doc = key
        .to_pkcs8_der()
        .map_err(|e| Error::Pgp(format!("pkcs8 encoding failed: {e}")))?;
    Ok(doc.as_bytes().to_vec())
}

/// Derives the OpenPGP v4 fingerprint an RSA public key (n, e) plus a
/// creation timestamp would have, the same construction the original
/// Go implementation used (`packet.NewRSAPublicKey(notBefore, pubkey)`).
fn rsa_v4_fingerprint(n: &[u8], e: &[u8], created: SystemTime) -> Fingerprint {
    let created_secs = created
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let mut body = Vec::new();
    body.push(4u8);
    body.extend_from_slice(&created_secs.to_be_bytes());
    body.push(1u8); // RSA (Encrypt or Sign)
    body.extend_from_slice(&mpi_encode(n));
    body.extend_from_slice(&mpi_encode(e));

    let mut hasher = Sha1::new();
    hasher.update([0x99]);
    hasher.update((body.len() as u16).to_be_bytes());
    hasher.update(&body);
    let digest = hasher.finalize();

    Fingerprint::from_bytes(&digest).expect("sha1 digest is 20 bytes")
}

fn mpi_encode(bytes: &[u8]) -> Vec<u8> {
    let trimmed: Vec<u8> = {
        let mut iter = bytes.iter().skip_while(|&&b| b == 0);
        iter.by_ref().cloned().collect()
    };
    let bits = if trimmed.is_empty() {
        0
    } else {
        trimmed.len() * 8 - trimmed[0].leading_zeros() as usize
    };
    let mut out = Vec::with_capacity(2 + trimmed.len());
    out.extend_from_slice(&(bits as u16).to_be_bytes());
    out.extend_from_slice(&trimmed);
    out
}

/// Parses a leaf certificate and derives the OpenPGP-style fingerprint of
/// its embedded RSA public key. Fails with [`Error::UnsupportedAlgorithm`]
/// if the certificate's key is not RSA. Exposed to [`crate::server`] so the
/// listing handler can recover the authenticated peer's fingerprint from
/// the already-verified client certificate.
pub(crate) fn peer_fingerprint_from_der(der: &CertificateDer<'_>) -> Result<Fingerprint> {
    let cert = X509Certificate::from_der(der.as_ref())
        .map_err(|e| Error::Pgp(format!("failed to parse peer certificate: {e}")))?;

    let spki = &cert.tbs_certificate.subject_public_key_info;
    if spki.algorithm.oid.to_string() != RSA_KEY_USAGE_OID_ALG {
        return Err(Error::UnsupportedAlgorithm);
    }

    let spki_der = spki
        .to_der()
        .map_err(|e| Error::Pgp(format!("failed to re-encode spki: {e}")))?;
    let public_key = {
        use pkcs8::DecodePublicKey;
        rsa::RsaPublicKey::from_public_key_der(&spki_der).map_err(|_| Error::UnsupportedAlgorithm)?
    };

    let not_before = cert
        .tbs_certificate
        .validity
        .not_before
        .to_system_time();

    Ok(rsa_v4_fingerprint(
        &public_key.n().to_bytes_be(),
        &public_key.e().to_bytes_be(),
        not_before,
    ))
}

fn supported_algorithms() -> WebPkiSupportedAlgorithms {
    rustls::crypto::ring::default_provider().signature_verification_algorithms
}

/// The client-side verifier: pins the server's certificate to exactly one
/// expected friend fingerprint.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    expected: Fingerprint,
    algs: WebPkiSupportedAlgorithms,
}

impl PinnedServerVerifier {
    pub fn new(expected: Fingerprint) -> Arc<Self> {
        Arc::new(Self {
            expected,
            algs: supported_algorithms(),
        })
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let fingerprint = peer_fingerprint_from_der(end_entity)
            .map_err(|_| rustls::Error::General("unsupported peer public key algorithm".into()))?;
        if fingerprint != self.expected {
            return Err(rustls::Error::General("peer certificate fingerprint mismatch".into()));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algs.supported_schemes()
    }
}

/// The server-side verifier: accepts any client certificate whose derived
/// fingerprint is in the account's known-friend set, re-evaluated on every
/// handshake since the friend set can grow at runtime.
#[derive(Debug)]
pub struct FriendSetVerifier {
    allowed: Box<dyn Fn(Fingerprint) -> bool + Send + Sync>,
    algs: WebPkiSupportedAlgorithms,
}

impl FriendSetVerifier {
    pub fn new(allowed: impl Fn(Fingerprint) -> bool + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            allowed: Box::new(allowed),
            algs: supported_algorithms(),
        })
    }
}

impl ClientCertVerifier for FriendSetVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let fingerprint = peer_fingerprint_from_der(end_entity)
            .map_err(|_| rustls::Error::General("unsupported peer public key algorithm".into()))?;
        if !(self.allowed)(fingerprint) {
            return Err(rustls::Error::General("peer certificate fingerprint not recognized".into()));
        }
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algs.supported_schemes()
    }
}

/// Builds the server-side `rustls::ServerConfig`: presents `identity` and
/// requires the client to present a certificate whose fingerprint
/// `allowed` accepts.
pub fn server_tls_config(
    identity: &TlsIdentity,
    allowed: impl Fn(Fingerprint) -> bool + Send + Sync + 'static,
) -> Result<rustls::ServerConfig> {
    let verifier = FriendSetVerifier::new(allowed);
    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            vec![identity.cert_der.clone()],
            identity.key_der.clone_key().into(),
        )
        .map_err(|e| Error::Pgp(format!("tls server config failed: {e}")))?;
    Ok(config)
}

/// Builds the client-side `rustls::ClientConfig`: presents `identity` and
/// pins the server's certificate to `expected`.
pub fn client_tls_config(
    identity: &TlsIdentity,
    expected: Fingerprint,
) -> Result<rustls::ClientConfig> {
    let verifier = PinnedServerVerifier::new(expected);
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(
            vec![identity.cert_der.clone()],
            identity.key_der.clone_key().into(),
        )
        .map_err(|e| Error::Pgp(format!("tls client config failed: {e}")))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpi_encode_matches_known_bit_length() {
        let encoded = mpi_encode(&[0x01, 0x00]);
        assert_eq!(u16::from_be_bytes([encoded[0], encoded[1]]), 9);
    }

    #[test]
    fn mpi_encode_strips_leading_zero_bytes() {
        let encoded = mpi_encode(&[0x00, 0x00, 0xFF]);
        assert_eq!(&encoded[2..], &[0xFF]);
    }
}
