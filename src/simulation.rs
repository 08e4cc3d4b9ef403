//! In-process host network used by the daemon and the integration tests.
//!
//! One [`SimulatedNetwork`] plays every external collaborator: the host
//! database, the negotiation protocol, the wallet and the fee oracle. Failures
//! can be scripted per host.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use tokio::{select, sync::Mutex, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    contractor::Dependencies,
    currency::Currency,
    hostdb::HostDb,
    negotiation::{NegotiationError, Negotiator},
    persist::Persister,
    types::{
        ContractId, ContractParams, HostEntry, HostPublicKey, RecoverableContract,
        RenterContract, ScoreBreakdown,
    },
    wallet::{FeeOracle, TransactionBuilder, Wallet},
};

pub const DEFAULT_SCORE: Currency = Currency::new(1_000_000);
pub const DEFAULT_MIN_FEE: Currency = Currency::new(1);
pub const DEFAULT_MAX_FEE: Currency = Currency::new(10);

/// A cheap, online host with a unique /24 address range.
pub fn host(i: usize) -> HostEntry {
    HostEntry::builder()
        .public_key(HostPublicKey::new(format!("ed25519:host-{}", i)))
        .net_address(format!("10.{}.{}.1:9982", i / 256, i % 256))
        .storage_price(Currency::new(1))
        .upload_bandwidth_price(Currency::new(1))
        .download_bandwidth_price(Currency::new(1))
        .contract_price(Currency::new(100))
        .max_collateral(Currency::coins(10))
        .build()
}

/// Address range of a host, the net address minus its last octet and port.
fn address_range(net_address: &str) -> &str {
    net_address
        .rsplit_once('.')
        .map_or(net_address, |(range, _)| range)
}

#[derive(Default)]
struct Inner {
    hosts: IndexMap<HostPublicKey, HostEntry>,
    scores: HashMap<HostPublicKey, Currency>,
    renew_failures: HashMap<HostPublicKey, NegotiationError>,
    form_failures: HashMap<HostPublicKey, NegotiationError>,
    ip_violations: HashSet<HostPublicKey>,
    recoverable: HashMap<ContractId, RenterContract>,
    fee_oracle_down: bool,
    shuffle: bool,
    negotiation_delay: Duration,
    nonce: u64,
    next_txn: u64,
    next_address: u64,
    dropped_txns: Vec<TransactionBuilder>,
    renew_log: Vec<ContractId>,
    form_log: Vec<HostPublicKey>,
}

#[derive(Default)]
pub struct SimulatedNetwork {
    inner: Mutex<Inner>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A network of `n` hosts built by [`host`].
    pub async fn with_hosts(n: usize) -> Self {
        let network = Self::new();
        for i in 0..n {
            network.add_host(host(i)).await;
        }
        network
    }

    /// Returns random hosts in random order instead of insertion order.
    pub async fn shuffled(self) -> Self {
        self.inner.lock().await.shuffle = true;
        self
    }

    pub fn dependencies(self: &Arc<Self>, persister: Arc<dyn Persister>) -> Dependencies {
        Dependencies {
            hdb: self.clone(),
            negotiator: self.clone(),
            wallet: self.clone(),
            fee_oracle: self.clone(),
            persister,
        }
    }

    pub async fn add_host(&self, host: HostEntry) {
        self.inner
            .lock()
            .await
            .hosts
            .insert(host.public_key.clone(), host);
    }

    pub async fn remove_host(&self, public_key: &HostPublicKey) {
        self.inner.lock().await.hosts.shift_remove(public_key);
    }

    pub async fn update_host(&self, public_key: &HostPublicKey, f: impl FnOnce(&mut HostEntry)) {
        if let Some(host) = self.inner.lock().await.hosts.get_mut(public_key) {
            f(host);
        }
    }

    pub async fn set_score(&self, public_key: &HostPublicKey, score: Currency) {
        self.inner
            .lock()
            .await
            .scores
            .insert(public_key.clone(), score);
    }

    /// Every renewal with `public_key` fails with `error` until cleared.
    pub async fn fail_renewals(&self, public_key: &HostPublicKey, error: NegotiationError) {
        self.inner
            .lock()
            .await
            .renew_failures
            .insert(public_key.clone(), error);
    }

    pub async fn clear_renewal_failures(&self, public_key: &HostPublicKey) {
        self.inner.lock().await.renew_failures.remove(public_key);
    }

    pub async fn fail_formations(&self, public_key: &HostPublicKey, error: NegotiationError) {
        self.inner
            .lock()
            .await
            .form_failures
            .insert(public_key.clone(), error);
    }

    /// Makes every formation and renewal take at least `delay`.
    pub async fn set_negotiation_delay(&self, delay: Duration) {
        self.inner.lock().await.negotiation_delay = delay;
    }

    pub async fn set_fee_oracle_down(&self, down: bool) {
        self.inner.lock().await.fee_oracle_down = down;
    }

    pub async fn add_ip_violation(&self, public_key: &HostPublicKey) {
        self.inner
            .lock()
            .await
            .ip_violations
            .insert(public_key.clone());
    }

    /// Lets the host hand `contract` back on recovery.
    pub async fn add_recoverable(&self, contract: RenterContract) {
        self.inner
            .lock()
            .await
            .recoverable
            .insert(contract.id, contract);
    }

    /// Ids of every contract a renewal was attempted for, in order.
    pub async fn renew_log(&self) -> Vec<ContractId> {
        self.inner.lock().await.renew_log.clone()
    }

    /// Hosts of every attempted formation, in order.
    pub async fn form_log(&self) -> Vec<HostPublicKey> {
        self.inner.lock().await.form_log.clone()
    }

    pub async fn dropped_transactions(&self) -> Vec<TransactionBuilder> {
        self.inner.lock().await.dropped_txns.clone()
    }

    async fn negotiate(&self, cancel_token: &CancellationToken) -> Result<(), NegotiationError> {
        let delay = self.inner.lock().await.negotiation_delay;
        if !delay.is_zero() {
            select! {
                _ = sleep(delay) => {}
                _ = cancel_token.cancelled() => {}
            }
        }
        if cancel_token.is_cancelled() {
            return Err(NegotiationError::other("cancelled"));
        }
        Ok(())
    }

    fn sign(inner: &mut Inner, params: &ContractParams) -> RenterContract {
        inner.nonce += 1;
        let seed = format!(
            "{}:{}:{}",
            params.host.public_key, params.start_height, inner.nonce
        );
        let contract_price = params.host.contract_price;
        RenterContract::builder()
            .id(ContractId::derive(seed.as_bytes()))
            .host_public_key(params.host.public_key.clone())
            .start_height(params.start_height)
            .end_height(params.end_height)
            .renter_funds(params.funding.saturating_sub(contract_price))
            .total_cost(params.funding)
            .contract_fee(contract_price)
            .build()
    }
}

#[async_trait]
impl HostDb for SimulatedNetwork {
    async fn host(&self, public_key: &HostPublicKey) -> Option<HostEntry> {
        self.inner.lock().await.hosts.get(public_key).cloned()
    }

    async fn random_hosts(
        &self,
        n: usize,
        exclude: &[HostPublicKey],
        address_exclude: &[HostPublicKey],
    ) -> Result<Vec<HostEntry>> {
        let inner = self.inner.lock().await;
        let excluded_ranges: HashSet<&str> = address_exclude
            .iter()
            .filter_map(|pk| inner.hosts.get(pk))
            .map(|h| address_range(&h.net_address))
            .collect();
        let mut candidates: Vec<HostEntry> = inner
            .hosts
            .values()
            .filter(|h| !h.filtered)
            .filter(|h| !exclude.contains(&h.public_key))
            .filter(|h| !excluded_ranges.contains(address_range(&h.net_address)))
            .cloned()
            .collect();
        if inner.shuffle {
            candidates.shuffle(&mut rand::rng());
        }
        candidates.truncate(n);
        Ok(candidates)
    }

    async fn score_breakdown(&self, host: &HostEntry) -> Result<ScoreBreakdown> {
        let score = self
            .inner
            .lock()
            .await
            .scores
            .get(&host.public_key)
            .copied()
            .unwrap_or(DEFAULT_SCORE);
        Ok(ScoreBreakdown { score })
    }

    async fn check_for_ip_violations(&self, hosts: &[HostPublicKey]) -> Vec<HostPublicKey> {
        let inner = self.inner.lock().await;
        hosts
            .iter()
            .filter(|pk| inner.ip_violations.contains(*pk))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Negotiator for SimulatedNetwork {
    async fn form_contract(
        &self,
        params: ContractParams,
        _txn: TransactionBuilder,
        cancel_token: CancellationToken,
    ) -> Result<RenterContract, NegotiationError> {
        self.negotiate(&cancel_token).await?;
        let mut inner = self.inner.lock().await;
        inner.form_log.push(params.host.public_key.clone());
        if let Some(e) = inner.form_failures.get(&params.host.public_key) {
            return Err(e.clone());
        }
        Ok(Self::sign(&mut inner, &params))
    }

    async fn renew_contract(
        &self,
        contract: &RenterContract,
        params: ContractParams,
        _txn: TransactionBuilder,
        cancel_token: CancellationToken,
    ) -> Result<RenterContract, NegotiationError> {
        self.negotiate(&cancel_token).await?;
        let mut inner = self.inner.lock().await;
        inner.renew_log.push(contract.id);
        if let Some(e) = inner.renew_failures.get(&contract.host_public_key) {
            return Err(e.clone());
        }
        let mut renewed = Self::sign(&mut inner, &params);
        renewed.size = contract.size;
        Ok(renewed)
    }

    async fn recover_contract(
        &self,
        contract: &RecoverableContract,
        _cancel_token: CancellationToken,
    ) -> Result<RenterContract, NegotiationError> {
        self.inner
            .lock()
            .await
            .recoverable
            .get(&contract.id)
            .cloned()
            .ok_or_else(|| NegotiationError::host_fault("host does not know the contract"))
    }
}

#[async_trait]
impl Wallet for SimulatedNetwork {
    async fn next_address(&self) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.next_address += 1;
        Ok(format!("addr-{}", inner.next_address))
    }

    async fn start_transaction(&self) -> Result<TransactionBuilder> {
        let mut inner = self.inner.lock().await;
        inner.next_txn += 1;
        Ok(TransactionBuilder(inner.next_txn))
    }

    async fn drop_transaction(&self, txn: TransactionBuilder) {
        self.inner.lock().await.dropped_txns.push(txn);
    }
}

#[async_trait]
impl FeeOracle for SimulatedNetwork {
    async fn fee_estimation(&self) -> Result<(Currency, Currency)> {
        if self.inner.lock().await.fee_oracle_down {
            return Err(anyhow!("fee oracle unavailable"));
        }
        Ok((DEFAULT_MIN_FEE, DEFAULT_MAX_FEE))
    }
}
