//! Fixtures shared by the integration tests.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use backon::ExponentialBuilder;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::{
    contractor::Contractor,
    currency::Currency,
    database::{DATABASE_FILE_NAME, Reader, Writer},
    persist::{NoopPersister, Persister},
    policy::Policy,
    simulation::SimulatedNetwork,
    types::{Allowance, BlockHeight, ContractId, ContractUtility, HostEntry, RenterContract},
};

pub async fn new_test_db() -> Result<(Reader, Writer, TempDir)> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(DATABASE_FILE_NAME);
    let writer = Writer::new(&path).await?;
    let reader = Reader::new(&path).await?;
    Ok((reader, writer, temp_dir))
}

/// A single quick attempt, so unavailable collaborators fail fast.
pub fn fast_backoff() -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_min_delay(Duration::from_millis(1))
        .with_max_times(1)
}

/// Default tunables with blocking maintenance for deterministic passes.
pub fn test_policy() -> Policy {
    Policy {
        blocking_maintenance: true,
        ..Policy::default()
    }
}

/// An allowance with a 100 block period and a 20 block renew window.
pub fn test_allowance(funds: Currency, hosts: u64) -> Allowance {
    Allowance {
        funds,
        hosts,
        period: 100,
        renew_window: 20,
    }
}

/// A good contract with `host`. `renter_funds` is what remains of
/// `total_cost`.
pub fn test_contract(
    host: &HostEntry,
    start_height: BlockHeight,
    end_height: BlockHeight,
    total_cost: Currency,
    renter_funds: Currency,
) -> RenterContract {
    let seed = format!("{}:{}:{}", host.public_key, start_height, end_height);
    RenterContract::builder()
        .id(ContractId::derive(seed.as_bytes()))
        .host_public_key(host.public_key.clone())
        .start_height(start_height)
        .end_height(end_height)
        .total_cost(total_cost)
        .renter_funds(renter_funds)
        .utility(ContractUtility::GOOD)
        .build()
}

pub struct TestContractor {
    pub contractor: Arc<Contractor>,
    pub network: Arc<SimulatedNetwork>,
    pub cancel_token: CancellationToken,
}

pub async fn new_test_contractor(hosts: usize) -> TestContractor {
    new_test_contractor_with(hosts, test_policy(), Arc::new(NoopPersister)).await
}

pub async fn new_test_contractor_with(
    hosts: usize,
    policy: Policy,
    persister: Arc<dyn Persister>,
) -> TestContractor {
    let network = Arc::new(SimulatedNetwork::with_hosts(hosts).await);
    let cancel_token = CancellationToken::new();
    let contractor = Contractor::new(
        network.dependencies(persister),
        policy,
        cancel_token.clone(),
    )
    .with_backoff(fast_backoff());
    TestContractor {
        contractor: Arc::new(contractor),
        network,
        cancel_token,
    }
}
