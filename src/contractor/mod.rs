//! Contract lifecycle and renewal maintenance.
//!
//! A maintenance pass runs cleanup, classifies every contract's utility,
//! plans renewals and refreshes, executes them within the allowance budget
//! and finally forms new contracts until the allowance's host count is met.

mod cleanup;
pub mod estimator;
mod formation;
mod maintenance;
pub mod planner;
mod renew;
pub mod state;
pub mod utility;

use std::{
    collections::HashSet,
    sync::{
        Arc, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use backon::ExponentialBuilder;
use scopeguard::defer;
use tokio::{
    select,
    sync::{Mutex, RwLock},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use maintenance::MaintenanceReport;
pub use planner::{FileContractRenewal, WorkPlan};
pub use renew::RenewalOutcome;
pub use state::ContractorState;

use crate::{
    contract_set::ContractSet,
    currency::Currency,
    error::{Error, Result},
    hostdb::HostDb,
    negotiation::Negotiator,
    persist::{Persister, Snapshot},
    policy::Policy,
    retry::{new_backoff_limited, retry},
    sessions::{Session, SessionKind, SessionRegistry},
    types::{
        Allowance, BlockHeight, ContractId, ContractUtility, HostPublicKey, PeriodSpending,
        RecoverableContract, RenterContract,
    },
    wallet::{FeeOracle, Wallet},
};

/// External collaborators of the contractor.
#[derive(Clone)]
pub struct Dependencies {
    pub hdb: Arc<dyn HostDb>,
    pub negotiator: Arc<dyn Negotiator>,
    pub wallet: Arc<dyn Wallet>,
    pub fee_oracle: Arc<dyn FeeOracle>,
    pub persister: Arc<dyn Persister>,
}

pub struct Contractor {
    state: RwLock<ContractorState>,
    contracts: ContractSet,
    sessions: SessionRegistry,

    hdb: Arc<dyn HostDb>,
    negotiator: Arc<dyn Negotiator>,
    wallet: Arc<dyn Wallet>,
    fee_oracle: Arc<dyn FeeOracle>,
    persister: Arc<dyn Persister>,

    policy: Policy,
    backoff: ExponentialBuilder,
    maintenance_lock: Mutex<()>,
    pending_interrupts: AtomicUsize,
    /// Child of `cancel_token` for the running pass, cancelled on interrupt.
    pass_token: std::sync::Mutex<Option<CancellationToken>>,
    /// Contracts with a renewal in flight; no new sessions may open on them.
    /// Updated while holding the state write lock, cleared on drop.
    renewing: std::sync::Mutex<HashSet<ContractId>>,
    cancel_token: CancellationToken,
}

impl Contractor {
    pub fn new(deps: Dependencies, policy: Policy, cancel_token: CancellationToken) -> Self {
        Self {
            state: RwLock::new(ContractorState::default()),
            contracts: ContractSet::new(),
            sessions: SessionRegistry::new(),
            hdb: deps.hdb,
            negotiator: deps.negotiator,
            wallet: deps.wallet,
            fee_oracle: deps.fee_oracle,
            persister: deps.persister,
            policy,
            backoff: new_backoff_limited(),
            maintenance_lock: Mutex::new(()),
            pending_interrupts: AtomicUsize::new(0),
            pass_token: std::sync::Mutex::new(None),
            renewing: std::sync::Mutex::new(HashSet::new()),
            cancel_token,
        }
    }

    /// Rebuilds a contractor from persisted state. The pubkey index is
    /// reconstructed from the live contracts.
    pub async fn from_snapshot(
        deps: Dependencies,
        policy: Policy,
        cancel_token: CancellationToken,
        snapshot: Snapshot,
    ) -> Self {
        let contractor = Self::new(deps, policy, cancel_token);
        {
            let mut state = contractor.state.write().await;
            state.allowance = snapshot.allowance;
            state.block_height = snapshot.block_height;
            state.current_period = snapshot.current_period;
            for contract in snapshot.old_contracts {
                state.history.archive(contract);
            }
            for (old, new) in snapshot.renewals {
                if let Err(e) = state.history.link(old, new) {
                    error!("Dropping inconsistent renewal link {} -> {}: {}", old, new, e);
                }
            }
            for contract in &snapshot.contracts {
                state
                    .pubkeys_to_contract_id
                    .insert(contract.host_public_key.clone(), contract.id);
            }
            for contract in snapshot.recoverable_contracts {
                state.recoverable_contracts.insert(contract.id, contract);
            }
        }
        for contract in snapshot.contracts {
            contractor.contracts.insert(contract).await;
        }
        info!(
            "Loaded contractor at height {} with {} contracts",
            snapshot.block_height,
            contractor.contracts.len().await
        );
        contractor
    }

    /// Replaces the backoff used when retrying the fee oracle and the
    /// persister.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub async fn allowance(&self) -> Allowance {
        self.state.read().await.allowance
    }

    pub async fn block_height(&self) -> BlockHeight {
        self.state.read().await.block_height
    }

    pub async fn current_period(&self) -> BlockHeight {
        self.state.read().await.current_period
    }

    /// Replaces the allowance. Any running maintenance pass is interrupted;
    /// the caller is expected to start a fresh one.
    pub async fn set_allowance(&self, allowance: Allowance) -> Result<()> {
        if allowance.hosts == 0 {
            return Err(Error::InvalidAllowance("hosts must be non-zero"));
        }
        if allowance.period == 0 {
            return Err(Error::InvalidAllowance("period must be non-zero"));
        }
        if allowance.renew_window >= allowance.period {
            return Err(Error::InvalidAllowance(
                "renew window must be less than period",
            ));
        }
        if allowance.funds.is_zero() {
            return Err(Error::InvalidAllowance("funds must be non-zero"));
        }

        self.interrupt_maintenance().await;
        {
            let mut state = self.state.write().await;
            if !state.allowance.is_set() {
                state.current_period = state.block_height;
            }
            state.allowance = allowance;
            let height = state.block_height;
            state.set_block_height(height);
        }
        info!(
            "Allowance set: {} across {} hosts, period {}, renew window {}",
            allowance.funds, allowance.hosts, allowance.period, allowance.renew_window
        );
        self.save().await;
        Ok(())
    }

    pub async fn process_block(&self, height: BlockHeight) {
        self.state.write().await.set_block_height(height);
        self.save().await;
    }

    /// Moves the height back after a chain reorganization. The billing
    /// period is left where it is.
    pub async fn rollback(&self, height: BlockHeight) {
        self.state.write().await.block_height = height;
        self.save().await;
    }

    pub async fn contracts(&self) -> Vec<RenterContract> {
        self.contracts.view_all().await
    }

    pub async fn contract(&self, id: &ContractId) -> Option<RenterContract> {
        self.contracts.view(id).await
    }

    pub async fn old_contracts(&self) -> Vec<RenterContract> {
        let mut contracts: Vec<_> = self
            .state
            .read()
            .await
            .history
            .old_contracts()
            .cloned()
            .collect();
        contracts.sort_by_key(|c| (c.start_height, c.id));
        contracts
    }

    pub async fn old_contract(&self, id: &ContractId) -> Option<RenterContract> {
        self.state.read().await.history.old_contract(id).cloned()
    }

    pub async fn contract_utility(&self, id: &ContractId) -> Option<ContractUtility> {
        self.contracts.view(id).await.map(|c| c.utility)
    }

    pub async fn contract_by_host(&self, host: &HostPublicKey) -> Option<ContractId> {
        self.state
            .read()
            .await
            .pubkeys_to_contract_id
            .get(host)
            .copied()
    }

    pub async fn renewed_from(&self, id: &ContractId) -> Option<ContractId> {
        self.state.read().await.history.renewed_from(id)
    }

    pub async fn renewed_to(&self, id: &ContractId) -> Option<ContractId> {
        self.state.read().await.history.renewed_to(id)
    }

    pub async fn failed_renewals(&self, id: &ContractId) -> u64 {
        self.state
            .read()
            .await
            .num_failed_renews
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_renewing(&self, id: &ContractId) -> bool {
        let _state = self.state.read().await;
        self.renewing_set().contains(id)
    }

    /// Inserts a contract obtained outside of maintenance, e.g. imported
    /// from another renter.
    pub async fn add_contract(&self, contract: RenterContract) -> bool {
        let host = contract.host_public_key.clone();
        let id = contract.id;
        if !self.contracts.insert(contract).await {
            return false;
        }
        self.state
            .write()
            .await
            .pubkeys_to_contract_id
            .insert(host, id);
        self.save().await;
        true
    }

    /// Registers a contract that the store lost track of but that the host
    /// may still hold.
    pub async fn add_recoverable_contract(&self, contract: RecoverableContract) {
        self.state
            .write()
            .await
            .recoverable_contracts
            .insert(contract.id, contract);
        self.save().await;
    }

    pub async fn recoverable_contracts(&self) -> Vec<RecoverableContract> {
        self.state
            .read()
            .await
            .recoverable_contracts
            .values()
            .cloned()
            .collect()
    }

    /// Opens an upload, download or edit session against a live contract.
    /// Refused while the contract is being renewed.
    pub async fn open_session(&self, id: ContractId, kind: SessionKind) -> Result<Session> {
        if self.contracts.view(&id).await.is_none() {
            return Err(Error::ContractNotFound(id));
        }
        let state = self.state.read().await;
        if self.renewing_set().contains(&id) {
            return Err(Error::ContractRenewing(id));
        }
        let session = self.sessions.register(id, kind).await;
        drop(state);
        Ok(session)
    }

    /// Spending attributed to the current billing period.
    pub async fn period_spending(&self) -> PeriodSpending {
        let contracts = self.contracts.view_all().await;
        let state = self.state.read().await;
        let mut spending = PeriodSpending::default();
        let in_period = state
            .history
            .old_contracts()
            .filter(|c| c.start_height >= state.current_period);
        for contract in contracts.iter().chain(in_period) {
            spending.total_allocated += contract.total_cost;
            spending.contract_fees += contract.contract_fee + contract.txn_fee + contract.tax_fee;
            spending.upload_spending += contract.upload_spending;
            spending.download_spending += contract.download_spending;
            spending.storage_spending += contract.storage_spending;
        }
        spending.unspent = state
            .allowance
            .funds
            .saturating_sub(spending.total_allocated);
        spending
    }

    pub async fn snapshot(&self) -> Snapshot {
        let contracts = self.contracts.view_all().await;
        let state = self.state.read().await;
        let mut old_contracts: Vec<_> = state.history.old_contracts().cloned().collect();
        old_contracts.sort_by_key(|c| c.id);
        Snapshot {
            allowance: state.allowance,
            block_height: state.block_height,
            current_period: state.current_period,
            contracts,
            old_contracts,
            renewals: state.history.links(),
            recoverable_contracts: state.recoverable_contracts.values().cloned().collect(),
        }
    }

    /// Persists the current state. Failures are logged; in-memory state
    /// remains authoritative and the next save retries.
    pub async fn save(&self) {
        let snapshot = self.snapshot().await;
        let result = retry(
            || self.persister.save(&snapshot),
            "save contractor",
            self.backoff.clone(),
            self.retry_token(),
        )
        .await;
        if let Err(e) = result {
            error!("Failed to save the contractor: {}", e);
        }
    }

    /// Marks a contract as terminally useless.
    pub async fn cancel_contract(&self, id: &ContractId) -> Result<()> {
        self.update_contract_utility(id, ContractUtility::CANCELED)
            .await?;
        self.save().await;
        info!("Canceled contract {}", id);
        Ok(())
    }

    /// Stops any running maintenance pass and waits until it has released the
    /// maintenance lock. Safe to call from several tasks at once.
    pub async fn interrupt_maintenance(&self) {
        self.pending_interrupts.fetch_add(1, Ordering::SeqCst);
        defer! {
            self.pending_interrupts.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(token) = self.pass_slot().as_ref() {
            token.cancel();
        }
        select! {
            _ = self.maintenance_lock.lock() => {}
            _ = self.cancel_token.cancelled() => {}
        }
    }

    fn maintenance_interrupted(&self) -> bool {
        self.cancel_token.is_cancelled() || self.pending_interrupts.load(Ordering::SeqCst) > 0
    }

    /// Installs the token of a new pass. It starts cancelled when an
    /// interrupt is already waiting.
    fn begin_pass(&self) {
        let mut slot = self.pass_slot();
        let token = self.cancel_token.child_token();
        if self.pending_interrupts.load(Ordering::SeqCst) > 0 {
            token.cancel();
        }
        *slot = Some(token);
    }

    fn end_pass(&self) {
        *self.pass_slot() = None;
    }

    /// Token for retried collaborator calls. Inside a pass it also fires on
    /// interrupt.
    fn retry_token(&self) -> CancellationToken {
        self.pass_slot()
            .clone()
            .unwrap_or_else(|| self.cancel_token.clone())
    }

    fn pass_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.pass_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn renewing_set(&self) -> MutexGuard<'_, HashSet<ContractId>> {
        self.renewing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn update_contract_utility(
        &self,
        id: &ContractId,
        utility: ContractUtility,
    ) -> Result<ContractUtility> {
        let acquired = self
            .contracts
            .acquire(id, &self.cancel_token)
            .await
            .ok_or(Error::ContractNotFound(*id))?;
        Ok(acquired.update_utility(utility).await)
    }

    async fn total_allocated(&self) -> Currency {
        self.period_spending().await.total_allocated
    }
}
