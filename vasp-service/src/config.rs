//! VASP node configuration.
//!
//! A `clap` derive struct, parsed from CLI flags with environment-variable
//! fallbacks (optionally loaded from a `.env` file by [`main`](crate) before
//! parsing), matching `r402-facilitator/src/config.rs`'s role but without a
//! TOML file — a VASP node's configuration surface is small enough that
//! flags/env vars cover it, and peer base URLs are registered at startup
//! rather than discovered on-chain.

use std::collections::HashMap;
use std::net::IpAddr;

use clap::Parser;
use vasp_core::config::CoreConfig;

use crate::error::ServiceError;

/// Full runtime configuration for one VASP node process.
#[derive(Debug, Clone, Parser)]
#[command(name = "vasp-service", about = "Bilateral off-chain VASP payment protocol node")]
pub struct ServiceConfig {
    /// Server bind address.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Server bind port.
    #[arg(long, env = "PORT", default_value_t = 3443)]
    pub port: u16,

    /// This node's own Bech32-encoded address.
    #[arg(long, env = "LOCAL_ADDRESS")]
    pub local_address: String,

    /// Channel/executor tunables, shared with `vasp-core`.
    #[command(flatten)]
    pub core: CoreConfig,

    /// Counterparty base URLs as `address=base_url` pairs, comma-separated,
    /// e.g. `tlb1...=https://vasp-b.example.com,tlb1...=https://vasp-c.example.com`.
    #[arg(long, env = "PEERS", default_value = "")]
    pub peers: String,
}

impl ServiceConfig {
    /// Parses configuration from CLI flags and environment variables.
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }

    /// Parses the `peers` flag into an address-to-base-URL map.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError::Config`] if an entry is not of the form
    /// `address=base_url`.
    pub fn parse_peers(&self) -> Result<HashMap<String, String>, ServiceError> {
        parse_peers(&self.peers)
    }
}

fn parse_peers(raw: &str) -> Result<HashMap<String, String>, ServiceError> {
    let mut peers = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (address, base_url) = entry.split_once('=').ok_or_else(|| {
            ServiceError::Config(format!("malformed PEERS entry '{entry}', expected 'address=base_url'"))
        })?;
        peers.insert(address.to_owned(), base_url.to_owned());
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_peer_entries() {
        let peers = parse_peers("addr-a=https://a.example.com, addr-b=https://b.example.com").unwrap();
        assert_eq!(peers.get("addr-a").unwrap(), "https://a.example.com");
        assert_eq!(peers.get("addr-b").unwrap(), "https://b.example.com");
    }

    #[test]
    fn rejects_entry_without_equals() {
        assert!(parse_peers("not-a-pair").is_err());
    }

    #[test]
    fn empty_string_yields_no_peers() {
        assert!(parse_peers("").unwrap().is_empty());
    }
}
