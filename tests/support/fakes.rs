use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::{Address, Network, OutPoint, Txid};
use uuid::Uuid;

use btc_xmr_swap::bitcoin::{
    BitcoinChainClient, BlockHeight, EncryptedSignature, SignedTx, TxSpend, TxStatus,
};
use btc_xmr_swap::monero::{
    self, MoneroWallet, PrivateKey, SweepResult, TransferProof, TransferStatus, TxHash,
};
use btc_xmr_swap::network::{
    BidQuote, Seller, SellerClient, SellerTransport, SetupRequest, SetupResponse,
};

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub fn signed_tx(n: u8) -> SignedTx {
    SignedTx {
        txid: txid(n),
        tx_hex: format!("02000000{n:02x}"),
    }
}

pub fn monero_address() -> monero::Address {
    "4".repeat(95).parse().expect("valid monero address shape")
}

/// The standard regtest P2WPKH example address.
pub fn test_address() -> Address {
    "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080"
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .expect("valid address")
        .require_network(Network::Regtest)
        .expect("regtest address")
}

/// A consistent set of protocol artifacts for one scripted swap: the setup
/// response, the seller's key share, and the redeem witness publishing it.
pub struct Scenario {
    pub seller_spend_share: PrivateKey,
    pub response: SetupResponse,
    pub redeem_witness: Vec<Vec<u8>>,
    pub proof: TransferProof,
}

impl Scenario {
    pub fn new(cancel_timelock: u32, punish_timelock: u32) -> Self {
        let seller_spend_share = PrivateKey::random();
        let mask_key = PrivateKey::random();
        let published = (seller_spend_share + mask_key).to_bytes();

        let response = SetupResponse {
            xmr: monero::Amount::from_piconero(1_000_000_000_000),
            cancel_timelock,
            punish_timelock,
            xmr_lock_address: monero_address(),
            view_key: PrivateKey::random(),
            tx_lock: signed_tx(1),
            tx_cancel: signed_tx(2),
            tx_refund: signed_tx(3),
            encrypted_signature: EncryptedSignature {
                payload: vec![0xee; 64],
                mask: mask_key.to_bytes(),
            },
        };

        let proof = TransferProof {
            tx_hash: TxHash("c0ffee".repeat(10)),
            tx_key: PrivateKey::random(),
        };

        Self {
            seller_spend_share,
            response,
            redeem_witness: vec![vec![0x51], published.to_vec()],
            proof,
        }
    }

    pub fn tx_lock_txid(&self) -> Txid {
        self.response.tx_lock.txid
    }

    pub fn tx_cancel_txid(&self) -> Txid {
        self.response.tx_cancel.txid
    }

    pub fn tx_refund_txid(&self) -> Txid {
        self.response.tx_refund.txid
    }

    pub fn lock_outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.tx_lock_txid(),
            vout: 0,
        }
    }

    pub fn cancel_outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.tx_cancel_txid(),
            vout: 0,
        }
    }
}

#[derive(Default)]
struct ChainState {
    tip: u32,
    confirmed: HashMap<Txid, u32>,
    mempool: Vec<Txid>,
    broadcasts: Vec<Txid>,
    spends: HashMap<OutPoint, TxSpend>,
    balance_sat: u64,
    auto_confirm: bool,
}

/// In-memory Bitcoin chain double. Broadcasts auto-confirm at the current
/// tip (unless turned off); registered spends become visible once their
/// spending transaction is confirmed, matching what a real scan sees.
pub struct FakeBitcoinChain {
    state: Mutex<ChainState>,
}

impl FakeBitcoinChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                tip: 100,
                balance_sat: 100_000_000,
                auto_confirm: true,
                ..ChainState::default()
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().expect("chain mutex poisoned")
    }

    pub fn set_tip(&self, tip: u32) {
        self.lock().tip = tip;
    }

    pub fn tip(&self) -> u32 {
        self.lock().tip
    }

    pub fn set_balance_sat(&self, sat: u64) {
        self.lock().balance_sat = sat;
    }

    pub fn set_auto_confirm(&self, on: bool) {
        self.lock().auto_confirm = on;
    }

    pub fn confirm(&self, txid: Txid, height: u32) {
        self.lock().confirmed.insert(txid, height);
    }

    pub fn register_spend(&self, outpoint: OutPoint, spend_txid: Txid, witness: Vec<Vec<u8>>) {
        self.lock().spends.insert(
            outpoint,
            TxSpend {
                txid: spend_txid,
                witness,
            },
        );
    }

    pub fn broadcasts(&self) -> Vec<Txid> {
        self.lock().broadcasts.clone()
    }

    pub fn has_broadcast(&self, txid: Txid) -> bool {
        self.lock().broadcasts.contains(&txid)
    }
}

#[async_trait]
impl BitcoinChainClient for FakeBitcoinChain {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn tip_height(&self) -> Result<BlockHeight> {
        Ok(BlockHeight(self.lock().tip))
    }

    async fn tx_status(&self, txid: Txid) -> Result<TxStatus> {
        let state = self.lock();
        if let Some(height) = state.confirmed.get(&txid) {
            return Ok(TxStatus::Confirmed {
                height: BlockHeight(*height),
                confirmations: state.tip.saturating_sub(*height).saturating_add(1),
            });
        }
        if state.mempool.contains(&txid) {
            return Ok(TxStatus::InMempool);
        }
        Ok(TxStatus::NotFound)
    }

    async fn broadcast(&self, tx: &SignedTx) -> Result<Txid> {
        let mut state = self.lock();
        state.broadcasts.push(tx.txid);
        if state.auto_confirm {
            let tip = state.tip;
            state.confirmed.insert(tx.txid, tip);
        } else {
            state.mempool.push(tx.txid);
        }
        Ok(tx.txid)
    }

    async fn find_spend(
        &self,
        outpoint: OutPoint,
        _from_height: BlockHeight,
    ) -> Result<Option<TxSpend>> {
        let state = self.lock();
        Ok(state
            .spends
            .get(&outpoint)
            .filter(|spend| state.confirmed.contains_key(&spend.txid))
            .cloned())
    }

    async fn balance(&self) -> Result<bitcoin::Amount> {
        Ok(bitcoin::Amount::from_sat(self.lock().balance_sat))
    }

    async fn fresh_address(&self) -> Result<Address> {
        Ok(test_address())
    }

    async fn send_to_address(
        &self,
        _address: Address,
        _amount: Option<bitcoin::Amount>,
    ) -> Result<Txid> {
        let mut state = self.lock();
        let n = state.broadcasts.len() as u8;
        let txid = txid(0xf0u8.wrapping_add(n));
        state.broadcasts.push(txid);
        Ok(txid)
    }
}

#[derive(Default)]
struct MoneroState {
    height: u64,
    /// tx hash -> (confirmations, received piconero)
    transfers: HashMap<String, (u64, u64)>,
    sweeps: Vec<monero::Address>,
    balance_piconero: u64,
}

pub struct FakeMoneroWallet {
    state: Mutex<MoneroState>,
}

impl FakeMoneroWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MoneroState {
                height: 3_000_000,
                ..MoneroState::default()
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MoneroState> {
        self.state.lock().expect("monero mutex poisoned")
    }

    pub fn set_transfer(&self, tx_hash: &TxHash, confirmations: u64, received_piconero: u64) {
        self.lock()
            .transfers
            .insert(tx_hash.0.clone(), (confirmations, received_piconero));
    }

    pub fn sweeps(&self) -> Vec<monero::Address> {
        self.lock().sweeps.clone()
    }
}

#[async_trait]
impl MoneroWallet for FakeMoneroWallet {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn height(&self) -> Result<monero::BlockHeight> {
        Ok(monero::BlockHeight(self.lock().height))
    }

    async fn check_transfer(
        &self,
        proof: &TransferProof,
        _lock_address: &monero::Address,
        expected: monero::Amount,
    ) -> TransferStatus {
        let state = self.lock();
        match state.transfers.get(&proof.tx_hash.0) {
            Some((confirmations, received)) => {
                if *received < expected.as_piconero() {
                    TransferStatus::AmountMismatch {
                        received: monero::Amount::from_piconero(*received),
                    }
                } else {
                    TransferStatus::Valid {
                        confirmations: *confirmations,
                    }
                }
            }
            None => TransferStatus::Unknown,
        }
    }

    async fn sweep(
        &self,
        _spend_key: &PrivateKey,
        _view_key: &PrivateKey,
        _lock_address: &monero::Address,
        _restore_height: monero::BlockHeight,
        to: &monero::Address,
    ) -> Result<SweepResult> {
        self.lock().sweeps.push(to.clone());
        Ok(SweepResult {
            tx_hashes: vec![TxHash("feed".repeat(16))],
        })
    }

    async fn balance(&self) -> Result<monero::Amount> {
        Ok(monero::Amount::from_piconero(self.lock().balance_piconero))
    }
}

/// Scripted seller. The transfer proof is withheld until the test provides
/// it; encrypted signatures can be made to fail like an unreachable peer.
pub struct FakeSeller {
    quote: Mutex<BidQuote>,
    response: Mutex<SetupResponse>,
    proof: Mutex<Option<TransferProof>>,
    accept_enc_sig: AtomicBool,
    enc_sigs: Mutex<Vec<Uuid>>,
}

impl FakeSeller {
    pub fn new(scenario: &Scenario) -> Arc<Self> {
        Arc::new(Self {
            quote: Mutex::new(BidQuote {
                price: bitcoin::Amount::from_sat(5_000_000),
                min_quantity: bitcoin::Amount::from_sat(1_000),
                max_quantity: bitcoin::Amount::from_sat(1_000_000_000),
            }),
            response: Mutex::new(scenario.response.clone()),
            proof: Mutex::new(None),
            accept_enc_sig: AtomicBool::new(true),
            enc_sigs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_quote(&self, quote: BidQuote) {
        *self.quote.lock().expect("quote mutex poisoned") = quote;
    }

    /// Make the lock transfer proof available to the waiting swap.
    pub fn provide_proof(&self, proof: TransferProof) {
        *self.proof.lock().expect("proof mutex poisoned") = Some(proof);
    }

    pub fn refuse_enc_sig(&self) {
        self.accept_enc_sig.store(false, Ordering::SeqCst);
    }

    pub fn received_enc_sigs(&self) -> Vec<Uuid> {
        self.enc_sigs.lock().expect("enc sig mutex poisoned").clone()
    }
}

#[async_trait]
impl SellerClient for FakeSeller {
    async fn quote(&self) -> Result<BidQuote> {
        Ok(*self.quote.lock().expect("quote mutex poisoned"))
    }

    async fn setup_swap(&self, _request: SetupRequest) -> Result<SetupResponse> {
        Ok(self.response.lock().expect("response mutex poisoned").clone())
    }

    async fn wait_for_transfer_proof(&self, _swap_id: Uuid) -> Result<TransferProof> {
        loop {
            let proof = self.proof.lock().expect("proof mutex poisoned").clone();
            if let Some(proof) = proof {
                return Ok(proof);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn send_encrypted_signature(
        &self,
        swap_id: Uuid,
        _signature: EncryptedSignature,
    ) -> Result<()> {
        if !self.accept_enc_sig.load(Ordering::SeqCst) {
            anyhow::bail!("peer unreachable");
        }
        self.enc_sigs
            .lock()
            .expect("enc sig mutex poisoned")
            .push(swap_id);
        Ok(())
    }
}

pub struct FakeTransport(pub Arc<FakeSeller>);

#[async_trait]
impl SellerTransport for FakeTransport {
    async fn connect(&self, _seller: &Seller) -> Result<Arc<dyn SellerClient>> {
        Ok(self.0.clone())
    }
}
