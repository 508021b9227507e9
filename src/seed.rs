use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use ::bitcoin::hashes::{Hash as _, HashEngine as _, sha256};
use rand::RngCore as _;
use uuid::Uuid;

use crate::monero;

pub const SEED_LENGTH: usize = 32;
const SEED_FILE: &str = "seed.hex";

/// Root entropy of this installation. All per-swap key material is derived
/// from it, which makes swap secrets recoverable from the seed file plus the
/// database.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed([u8; SEED_LENGTH]);

impl Seed {
    pub fn random() -> Self {
        let mut bytes = [0u8; SEED_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Load the seed from `data_dir`, creating one on first run.
    pub fn from_file_or_generate(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(SEED_FILE);
        if path.exists() {
            return Self::from_file(&path);
        }

        tracing::debug!(path = %path.display(), "no seed file found, creating one");

        fs::create_dir_all(data_dir)
            .with_context(|| format!("create data dir {}", data_dir.display()))?;
        let seed = Self::random();
        fs::write(&path, hex::encode(seed.0))
            .with_context(|| format!("write seed file {}", path.display()))?;

        Ok(seed)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read seed file {}", path.display()))?;
        let bytes = hex::decode(content.trim()).context("seed file is not valid hex")?;
        let bytes: [u8; SEED_LENGTH] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("seed file must contain {SEED_LENGTH} bytes"))?;
        Ok(Self(bytes))
    }

    /// Derive a scoped sub-seed.
    pub fn derive(&self, scope: &[u8]) -> Self {
        let mut engine = sha256::Hash::engine();
        engine.input(&self.0);
        engine.input(scope);
        Self(sha256::Hash::from_engine(engine).to_byte_array())
    }

    /// Bob's Monero spend-key share for one swap, derived deterministically
    /// so it can be recomputed after a crash from seed + swap id alone.
    pub fn derive_monero_spend_share(&self, swap_id: Uuid) -> monero::PrivateKey {
        let derived = self.derive(b"MONERO_SPEND_SHARE").derive(swap_id.as_bytes());
        monero::PrivateKey::from_bytes(derived.0)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(..)")
    }
}
