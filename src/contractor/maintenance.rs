use std::sync::Arc;

use scopeguard::defer;
use tokio::{select, sync::MutexGuard, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    Contractor, RenewalOutcome,
    planner::{FileContractRenewal, WorkPlan},
};
use crate::{
    error::{Error, Result},
    types::ContractId,
};

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub plan: WorkPlan,
    /// Work items handed to the renewal executor, in order.
    pub attempted: Vec<ContractId>,
    /// `(old, new)` for every committed renewal.
    pub renewed: Vec<(ContractId, ContractId)>,
    /// Work items skipped because they did not fit the remaining funds.
    pub skipped: Vec<ContractId>,
    pub formed: usize,
    /// The pass stopped early because of an interrupt or shutdown.
    pub interrupted: bool,
}

enum Step {
    Continue,
    Stop,
}

impl Contractor {
    async fn acquire_maintenance_lock(&self) -> Result<Option<MutexGuard<'_, ()>>> {
        if self.policy.blocking_maintenance {
            return select! {
                guard = self.maintenance_lock.lock() => Ok(Some(guard)),
                _ = self.cancel_token.cancelled() => Err(Error::Cancelled),
            };
        }
        Ok(self.maintenance_lock.try_lock().ok())
    }

    /// Runs one maintenance pass. Returns `Ok(None)` without doing anything
    /// when another pass is already running.
    pub async fn run_maintenance(&self) -> Result<Option<MaintenanceReport>> {
        let Some(_guard) = self.acquire_maintenance_lock().await? else {
            debug!("Maintenance pass already in progress");
            return Ok(None);
        };
        self.begin_pass();
        defer! {
            self.end_pass();
        }
        let mut report = MaintenanceReport::default();

        self.cleanup().await;
        self.mark_contracts_utility().await?;

        let (allowance, block_height, end_height) = {
            let state = self.state.read().await;
            (state.allowance, state.block_height, state.contract_end_height())
        };
        if !allowance.is_set() || allowance.hosts == 0 {
            debug!("No allowance set, skipping renewals and formation");
            return Ok(Some(report));
        }

        report.plan = match self.plan_renewals(&allowance, block_height).await {
            Ok(plan) => plan,
            Err(e) if self.maintenance_interrupted() => {
                debug!("Planning interrupted: {}", e);
                report.interrupted = true;
                return Ok(Some(report));
            }
            Err(e) => return Err(e),
        };
        {
            let mut state = self.state.write().await;
            let plan = &report.plan;
            state.num_failed_renews.retain(|id, _| plan.contains(id));
        }

        let mut funds_remaining = allowance
            .funds
            .saturating_sub(self.total_allocated().await);
        let work: Vec<FileContractRenewal> = report
            .plan
            .renew_set
            .iter()
            .chain(&report.plan.refresh_set)
            .copied()
            .collect();
        for item in &work {
            if self.maintenance_interrupted() {
                report.interrupted = true;
                break;
            }
            if item.amount > funds_remaining {
                debug!(
                    "Skipping contract {}: needs {} but only {} remains",
                    item.id, item.amount, funds_remaining
                );
                report.skipped.push(item.id);
                continue;
            }
            report.attempted.push(item.id);
            let outcome = self
                .renew_contract(item, &allowance, block_height, end_height)
                .await;
            funds_remaining = funds_remaining.saturating_sub(outcome.spent());
            if let Step::Stop = Self::record_outcome(&mut report, item, outcome) {
                report.interrupted = true;
                break;
            }
        }

        if !report.interrupted && !self.maintenance_interrupted() {
            let (formed, _) = self.fill_host_gap(&allowance, funds_remaining).await?;
            report.formed = formed;
        }
        if self.maintenance_interrupted() {
            report.interrupted = true;
        }

        info!(
            "Maintenance pass done: {} renewed, {} skipped, {} formed{}",
            report.renewed.len(),
            report.skipped.len(),
            report.formed,
            if report.interrupted { " (interrupted)" } else { "" }
        );
        Ok(Some(report))
    }

    fn record_outcome(
        report: &mut MaintenanceReport,
        item: &FileContractRenewal,
        outcome: RenewalOutcome,
    ) -> Step {
        match outcome {
            RenewalOutcome::Committed { new_id, .. } => {
                report.renewed.push((item.id, new_id));
                Step::Continue
            }
            RenewalOutcome::Failed {
                error: Error::Cancelled,
                ..
            } => Step::Stop,
            RenewalOutcome::Failed { error, permanent } => {
                if permanent {
                    warn!("Giving up on contract {}: {}", item.id, error);
                } else {
                    debug!("Renewal of {} will be retried: {}", item.id, error);
                }
                Step::Continue
            }
        }
    }

    /// Runs a maintenance pass in the background.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let contractor = self.clone();
        tokio::spawn(async move {
            match contractor.run_maintenance().await {
                Ok(Some(report)) => debug!("Maintenance report: {:?}", report),
                Ok(None) => {}
                Err(e) => warn!("Maintenance pass aborted: {}", e),
            }
        })
    }
}
