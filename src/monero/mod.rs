pub mod wallet;

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use curve25519_dalek::scalar::Scalar;
use rand::RngCore as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use wallet::{MoneroWallet, SweepResult, TransferStatus, WalletRpcClient};

pub const PICONERO_PER_XMR: u64 = 1_000_000_000_000;

/// Monero amount in piconero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_piconero(piconero: u64) -> Self {
        Self(piconero)
    }

    pub fn as_piconero(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / PICONERO_PER_XMR;
        let frac = self.0 % PICONERO_PER_XMR;
        write!(f, "{whole}.{frac:012} XMR")
    }
}

/// Absolute Monero chain height.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct BlockHeight(pub u64);

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of a Monero transaction, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid monero address: {0}")]
pub struct InvalidAddress(String);

/// A Monero address in its base58 string form.
///
/// Only shape is validated here; whether the address belongs to the right
/// network is checked by the wallet when it is first used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let len = s.len();
        if !(95..=106).contains(&len) {
            return Err(InvalidAddress(format!("unexpected length {len}")));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidAddress("non-base58 characters".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ed25519 scalar: a Monero private key or key share.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PrivateKey(Scalar);

impl PrivateKey {
    pub fn random() -> Self {
        let mut wide = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut wide);
        Self(Scalar::from_bytes_mod_order_wide(&wide))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Scalar::from_bytes_mod_order(bytes))
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Compressed public point of this key, hex encoded.
    pub fn public_key_hex(&self) -> String {
        let point = curve25519_dalek::edwards::EdwardsPoint::mul_base(&self.0);
        hex::encode(point.compress().to_bytes())
    }

    /// Recover the masked scalar from a value published on chain:
    /// `published = secret + mask`, so `secret = published - mask`.
    pub fn unmask(published: [u8; 32], mask: [u8; 32]) -> Self {
        let published = Scalar::from_bytes_mod_order(published);
        let mask = Scalar::from_bytes_mod_order(mask);
        Self(published - mask)
    }
}

impl Add for PrivateKey {
    type Output = PrivateKey;

    fn add(self, rhs: PrivateKey) -> PrivateKey {
        PrivateKey(self.0 + rhs.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.write_str("PrivateKey(..)")
    }
}

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("private key must be 32 bytes"))?;
        Ok(Self::from_bytes(bytes))
    }
}

/// Proof of the seller's Monero lock transfer: the transaction hash plus the
/// per-transaction key that lets Bob verify the amount paid to the shared
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProof {
    pub tx_hash: TxHash,
    pub tx_key: PrivateKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_display_in_xmr() {
        let amount = Amount::from_piconero(1_234_000_000_000);
        assert_eq!(amount.to_string(), "1.234000000000 XMR");
    }

    #[test]
    fn address_shape_is_validated() {
        assert!(Address::from_str("4").is_err());
        assert!(Address::from_str(&"4".repeat(95)).is_ok());
        assert!(Address::from_str(&format!("{}!", "4".repeat(95))).is_err());
    }

    #[test]
    fn unmask_recovers_masked_scalar() {
        let secret = PrivateKey::random();
        let mask = PrivateKey::random();
        let published = (secret + mask).to_bytes();

        assert_eq!(PrivateKey::unmask(published, mask.to_bytes()), secret);
    }

    #[test]
    fn key_share_addition_is_commutative() {
        let a = PrivateKey::random();
        let b = PrivateKey::random();
        assert_eq!(a + b, b + a);
    }
}
