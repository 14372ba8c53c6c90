//! Node configuration (ambient stack): replaces the original implementation's
//! process-global `rsaKeyLength` with an explicit value threaded through key
//! generation, per spec.md §9's "Global mutable state" redesign note.

use std::env;
use std::path::PathBuf;

use mau_core::RsaBits;

/// Runtime configuration for the `mau` node service.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The account's home directory.
    pub dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub rsa_bits: RsaBits,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let dir = env::var("MAU_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".mau-data"));
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(7342);
        let rsa_bits = match env::var("MAU_RSA_BITS").ok() {
            Some(bits) => RsaBits::from_bits(bits.parse()?)?,
            None => RsaBits::default(),
        };

        Ok(Self {
            dir,
            host,
            port,
            rsa_bits,
        })
    }
}
