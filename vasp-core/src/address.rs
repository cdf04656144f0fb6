//! Bech32-encoded VASP addresses.
//!
//! The encoding is a fixed-layout variant of Bech32 (not BIP-173 compatible
//! — the checksum generator constants and target are specific to this
//! protocol) carrying a 16-byte on-chain address and an 8-byte sub-address.

use crate::error::StructureError;

const CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const SEPARATOR: char = '1';
const CHECKSUM_LEN: usize = 6;

const ONCHAIN_LEN: usize = 16;
const SUBADDRESS_LEN: usize = 8;
const VERSION: u8 = 1;
const ENCODED_LEN: usize = 50;

const GENERATOR: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];

/// Which network an address belongs to, encoded as the Bech32 human-readable part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Mainnet, HRP `lbr`.
    Mainnet,
    /// Testnet, HRP `tlb`.
    Testnet,
}

impl Network {
    fn hrp(self) -> &'static str {
        match self {
            Self::Mainnet => "lbr",
            Self::Testnet => "tlb",
        }
    }

    fn from_hrp(hrp: &str) -> Option<Self> {
        match hrp {
            "lbr" => Some(Self::Mainnet),
            "tlb" => Some(Self::Testnet),
            _ => None,
        }
    }
}

/// A VASP address: a 16-byte on-chain identifier plus an 8-byte sub-address.
///
/// Equality and hashing consider the on-chain bytes, the sub-address bytes,
/// and the network together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    onchain: [u8; ONCHAIN_LEN],
    subaddress: [u8; SUBADDRESS_LEN],
}

impl Address {
    /// Builds an address from raw bytes. `subaddress` defaults to all zeros
    /// when `None`, matching the reference encoder.
    #[must_use]
    pub fn from_bytes(
        network: Network,
        onchain: [u8; ONCHAIN_LEN],
        subaddress: Option<[u8; SUBADDRESS_LEN]>,
    ) -> Self {
        Self {
            network,
            onchain,
            subaddress: subaddress.unwrap_or([0u8; SUBADDRESS_LEN]),
        }
    }

    /// Returns the on-chain address bytes.
    #[must_use]
    pub const fn onchain_bytes(&self) -> &[u8; ONCHAIN_LEN] {
        &self.onchain
    }

    /// Returns the sub-address bytes.
    #[must_use]
    pub const fn subaddress_bytes(&self) -> &[u8; SUBADDRESS_LEN] {
        &self.subaddress
    }

    /// Returns this address's on-chain part with its sub-address zeroed out.
    #[must_use]
    pub fn onchain_only(&self) -> Self {
        Self {
            network: self.network,
            onchain: self.onchain,
            subaddress: [0u8; SUBADDRESS_LEN],
        }
    }

    /// The lowest bit of the last on-chain byte, used to elect the client
    /// role between two channel participants.
    #[must_use]
    pub const fn last_bit(&self) -> bool {
        self.onchain[ONCHAIN_LEN - 1] & 1 != 0
    }

    /// Lexicographic comparison of the on-chain bytes only.
    #[must_use]
    pub fn onchain_greater_or_equal(&self, other: &Self) -> bool {
        self.onchain >= other.onchain
    }

    /// Encodes this address as a Bech32 string.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(ONCHAIN_LEN + SUBADDRESS_LEN);
        payload.extend_from_slice(&self.onchain);
        payload.extend_from_slice(&self.subaddress);

        let mut five_bit = convert_bits(&payload, 8, 5, true).expect("8->5 conversion always fits");
        let mut data = Vec::with_capacity(1 + five_bit.len());
        data.push(u32::from(VERSION));
        data.append(&mut five_bit);

        bech32_encode(self.network.hrp(), &data)
    }

    /// Decodes a Bech32-encoded VASP address.
    ///
    /// # Errors
    ///
    /// Returns a [`StructureError`] if the string has the wrong length, an
    /// invalid human-readable part, mixed case, an unsupported version, or
    /// a bad checksum.
    pub fn decode(encoded: &str) -> Result<Self, StructureError> {
        if encoded.chars().count() != ENCODED_LEN {
            return Err(StructureError::new(format!(
                "expected {ENCODED_LEN} characters, got {}",
                encoded.chars().count()
            )));
        }

        let lower = encoded.to_lowercase();
        let upper = encoded.to_uppercase();
        if encoded != lower && encoded != upper {
            return Err(StructureError::new("mixed-case address is not allowed"));
        }
        let encoded = lower;

        let hrp = &encoded[..3];
        let network = Network::from_hrp(hrp)
            .ok_or_else(|| StructureError::new(format!("unknown network prefix '{hrp}'")))?;

        if encoded.as_bytes()[3] != SEPARATOR as u8 {
            return Err(StructureError::new("missing bech32 separator"));
        }

        let data_part = &encoded[4..];
        let values: Vec<u32> = data_part
            .chars()
            .map(|c| {
                CHARSET
                    .iter()
                    .position(|&b| b == c as u8)
                    .map(|i| i as u32)
                    .ok_or_else(|| StructureError::new(format!("invalid bech32 character '{c}'")))
            })
            .collect::<Result<_, _>>()?;

        let version = values[0];
        if version != u32::from(VERSION) {
            return Err(StructureError::new(format!(
                "unsupported address version {version}"
            )));
        }

        if !verify_checksum(hrp, &values) {
            return Err(StructureError::new("bech32 checksum mismatch"));
        }

        let payload_5bit = &values[1..values.len() - CHECKSUM_LEN];
        let decoded = convert_bits(payload_5bit, 5, 8, false)
            .ok_or_else(|| StructureError::new("invalid base32 payload"))?;

        if decoded.len() != ONCHAIN_LEN + SUBADDRESS_LEN {
            return Err(StructureError::new(format!(
                "expected {} decoded bytes, got {}",
                ONCHAIN_LEN + SUBADDRESS_LEN,
                decoded.len()
            )));
        }

        let mut onchain = [0u8; ONCHAIN_LEN];
        onchain.copy_from_slice(&decoded[..ONCHAIN_LEN]);
        let mut subaddress = [0u8; SUBADDRESS_LEN];
        subaddress.copy_from_slice(&decoded[ONCHAIN_LEN..]);

        Ok(Self {
            network,
            onchain,
            subaddress,
        })
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn hrp_expand(hrp: &str) -> Vec<u32> {
    let mut out: Vec<u32> = hrp.bytes().map(|b| u32::from(b) >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|b| u32::from(b) & 31));
    out
}

fn polymod(values: &[u32]) -> u32 {
    let mut chk: u32 = 1;
    for &value in values {
        let top = chk >> 25;
        chk = (chk & 0x01ff_ffff) << 5 ^ value;
        for (i, &gen) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 != 0 {
                chk ^= gen;
            }
        }
    }
    chk
}

fn verify_checksum(hrp: &str, data: &[u32]) -> bool {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    polymod(&values) == 1
}

fn create_checksum(hrp: &str, data: &[u32]) -> [u32; CHECKSUM_LEN] {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    let polymod_value = polymod(&values) ^ 1;
    let mut checksum = [0u32; CHECKSUM_LEN];
    for (i, slot) in checksum.iter_mut().enumerate() {
        *slot = (polymod_value >> (5 * (5 - i))) & 31;
    }
    checksum
}

fn bech32_encode(hrp: &str, data: &[u32]) -> String {
    let checksum = create_checksum(hrp, data);
    let mut out = String::with_capacity(ENCODED_LEN);
    out.push_str(hrp);
    out.push(SEPARATOR);
    for &d in data.iter().chain(checksum.iter()) {
        out.push(CHARSET[d as usize] as char);
    }
    out
}

fn convert_bits(data: &[u32], from_bits: u32, to_bits: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to_bits) - 1;
    let max_acc: u32 = (1 << (from_bits + to_bits - 1)) - 1;
    let mut ret = Vec::new();

    for &value in data {
        if (value >> from_bits) != 0 {
            return None;
        }
        acc = ((acc << from_bits) | value) & max_acc;
        bits += from_bits;
        while bits >= to_bits {
            bits -= to_bits;
            ret.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad {
        if bits != 0 {
            ret.push(((acc << (to_bits - bits)) & maxv) as u8);
        }
    } else if bits >= from_bits || ((acc << (to_bits - bits)) & maxv) != 0 {
        return None;
    }

    Some(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Address {
        let mut onchain = [0u8; ONCHAIN_LEN];
        onchain[ONCHAIN_LEN - 1] = 0x2a;
        Address::from_bytes(Network::Mainnet, onchain, None)
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let addr = sample();
        let encoded = addr.encode();
        assert_eq!(encoded.len(), ENCODED_LEN);
        assert_eq!(Address::decode(&encoded).unwrap(), addr);
    }

    #[test]
    fn rejects_mixed_case() {
        let addr = sample();
        let mut encoded = addr.encode();
        encoded.replace_range(4..5, "A");
        assert!(Address::decode(&encoded).is_err());
    }

    #[test]
    fn last_bit_reflects_final_onchain_byte() {
        assert!(sample().last_bit());
        let mut onchain = [0u8; ONCHAIN_LEN];
        onchain[ONCHAIN_LEN - 1] = 0x2c;
        let addr = Address::from_bytes(Network::Mainnet, onchain, None);
        assert!(!addr.last_bit());
    }

    #[test]
    fn onchain_only_zeroes_subaddress() {
        let mut sub = [0u8; SUBADDRESS_LEN];
        sub[0] = 7;
        let addr = Address::from_bytes(Network::Testnet, [1u8; ONCHAIN_LEN], Some(sub));
        let onchain = addr.onchain_only();
        assert_eq!(onchain.subaddress_bytes(), &[0u8; SUBADDRESS_LEN]);
        assert_eq!(onchain.onchain_bytes(), addr.onchain_bytes());
    }
}
