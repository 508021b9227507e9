pub mod chain;
pub mod timelock;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use ::bitcoin::{Address, Amount, Network, Txid};

pub use chain::{BitcoinChainClient, ConfirmationUpdate, CoreRpcClient, NodePool, TxSpend, TxStatus};
pub use timelock::{TimelockEvent, TimelockMonitor};

/// Absolute Bitcoin chain height.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct BlockHeight(pub u32);

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of blocks after the lock transaction confirms at which Bob may
/// unilaterally cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTimelock(u32);

impl CancelTimelock {
    pub fn blocks(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CancelTimelock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} blocks", self.0)
    }
}

/// Number of blocks after the lock transaction confirms at which the seller
/// may punish an inactive Bob. Always strictly greater than the cancel
/// timelock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishTimelock(u32);

impl PunishTimelock {
    pub fn blocks(self) -> u32 {
        self.0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidTimelocks {
    #[error("cancel timelock must be > 0")]
    ZeroCancel,
    #[error("punish timelock ({punish}) must be strictly greater than cancel timelock ({cancel})")]
    PunishNotAfterCancel { cancel: u32, punish: u32 },
}

/// The two deadlines of a swap, both counted in confirmations of the lock
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timelocks {
    cancel: CancelTimelock,
    punish: PunishTimelock,
}

impl Timelocks {
    pub fn new(cancel: u32, punish: u32) -> Result<Self, InvalidTimelocks> {
        if cancel == 0 {
            return Err(InvalidTimelocks::ZeroCancel);
        }
        if punish <= cancel {
            return Err(InvalidTimelocks::PunishNotAfterCancel { cancel, punish });
        }
        Ok(Self {
            cancel: CancelTimelock(cancel),
            punish: PunishTimelock(punish),
        })
    }

    pub fn cancel(&self) -> CancelTimelock {
        self.cancel
    }

    pub fn punish(&self) -> PunishTimelock {
        self.punish
    }
}

/// Where the current chain tip sits relative to a swap's timelocks.
///
/// Derived from chain observations only. Expiry is a trigger for the state
/// machine, never authoritative state: a reorg may flip this back to an
/// earlier variant and observers must cope with that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum ExpiredTimelocks {
    None { blocks_left: u32 },
    Cancel { blocks_left: u32 },
    Punish,
}

/// Compute the timelock status for a lock transaction confirmed at
/// `lock_height`. An unconfirmed lock transaction has not started either
/// clock.
pub fn expired_timelocks(
    tip: BlockHeight,
    lock_height: Option<BlockHeight>,
    timelocks: Timelocks,
) -> ExpiredTimelocks {
    let Some(lock_height) = lock_height else {
        return ExpiredTimelocks::None {
            blocks_left: timelocks.cancel().blocks(),
        };
    };

    // The confirming block counts as the first confirmation.
    let confirmations = tip.0.saturating_sub(lock_height.0).saturating_add(1);

    if confirmations < timelocks.cancel().blocks() {
        ExpiredTimelocks::None {
            blocks_left: timelocks.cancel().blocks() - confirmations,
        }
    } else if confirmations < timelocks.punish().blocks() {
        ExpiredTimelocks::Cancel {
            blocks_left: timelocks.punish().blocks() - confirmations,
        }
    } else {
        ExpiredTimelocks::Punish
    }
}

/// A fully signed transaction produced during the swap setup, ready to
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub txid: Txid,
    pub tx_hex: String,
}

/// Bob's adaptor signature over the seller's redeem transaction.
///
/// `payload` is the opaque wire encoding handed to the seller. `mask` is the
/// adaptor secret: the scalar published inside the redeem witness minus the
/// mask yields the seller's Monero spend-key share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSignature {
    pub payload: Vec<u8>,
    pub mask: [u8; 32],
}

/// Serde helper for `bitcoin::Address`, persisting the display form.
///
/// Network correctness is enforced at the command boundary before an address
/// ever reaches a persisted state.
pub mod address_serde {
    use std::str::FromStr as _;

    use ::bitcoin::Address;
    use ::bitcoin::address::NetworkUnchecked;
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&address.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let s = String::deserialize(deserializer)?;
        let unchecked: Address<NetworkUnchecked> =
            Address::from_str(&s).map_err(serde::de::Error::custom)?;
        Ok(unchecked.assume_checked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_punish_not_after_cancel() {
        assert_eq!(
            Timelocks::new(72, 72).unwrap_err(),
            InvalidTimelocks::PunishNotAfterCancel {
                cancel: 72,
                punish: 72
            }
        );
        assert_eq!(Timelocks::new(0, 72).unwrap_err(), InvalidTimelocks::ZeroCancel);
        assert!(Timelocks::new(72, 144).is_ok());
    }

    #[test]
    fn timelock_status_follows_tip() {
        let timelocks = Timelocks::new(48, 96).unwrap();
        let lock = Some(BlockHeight(100));

        assert_eq!(
            expired_timelocks(BlockHeight(100), lock, timelocks),
            ExpiredTimelocks::None { blocks_left: 47 }
        );
        assert_eq!(
            expired_timelocks(BlockHeight(146), lock, timelocks),
            ExpiredTimelocks::None { blocks_left: 1 }
        );
        assert_eq!(
            expired_timelocks(BlockHeight(147), lock, timelocks),
            ExpiredTimelocks::Cancel { blocks_left: 48 }
        );
        assert_eq!(
            expired_timelocks(BlockHeight(195), lock, timelocks),
            ExpiredTimelocks::Punish
        );
    }

    #[test]
    fn unconfirmed_lock_keeps_full_timelock() {
        let timelocks = Timelocks::new(48, 96).unwrap();
        assert_eq!(
            expired_timelocks(BlockHeight(500), None, timelocks),
            ExpiredTimelocks::None { blocks_left: 48 }
        );
    }
}
