use anyhow::Result;
use contractor::{
    contractor::{FileContractRenewal, RenewalOutcome},
    currency::Currency,
    error::Error,
    negotiation::NegotiationError,
    simulation::host,
    test_utils::{TestContractor, new_test_contractor, test_allowance, test_contract},
    types::{ContractId, ContractUtility, RenterContract},
};

/// One contract with host-0 ending at 100, allowance hosts 1, at `height`.
async fn expiring_contract(height: u64) -> Result<(TestContractor, RenterContract)> {
    let t = new_test_contractor(10).await;
    t.contractor
        .set_allowance(test_allowance(Currency::coins(1_000), 1))
        .await?;
    let contract = test_contract(&host(0), 0, 100, Currency::coins(10), Currency::coins(9));
    t.contractor.add_contract(contract.clone()).await;
    t.contractor.process_block(height).await;
    Ok((t, contract))
}

#[tokio::test]
async fn test_successful_renewal_links_history() -> Result<()> {
    let (t, old) = expiring_contract(85).await?;

    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.renewed.len(), 1);
    let (renewed, new_id) = report.renewed[0];
    assert_eq!(renewed, old.id);
    assert_ne!(new_id, old.id);

    assert_eq!(t.contractor.renewed_to(&old.id).await, Some(new_id));
    assert_eq!(t.contractor.renewed_from(&new_id).await, Some(old.id));
    assert!(t.contractor.contract(&old.id).await.is_none());

    let historic = t.contractor.old_contract(&old.id).await.unwrap();
    assert_eq!(historic.utility, ContractUtility::CANCELED);

    let new = t.contractor.contract(&new_id).await.unwrap();
    assert_eq!(new.utility, ContractUtility::GOOD);
    assert_eq!(new.host_public_key, old.host_public_key);
    // The period rolled over at 85, so the renewal ends a full period later.
    assert_eq!(new.end_height, 220);
    assert_eq!(
        t.contractor.contract_by_host(&old.host_public_key).await,
        Some(new_id)
    );
    assert!(!t.contractor.is_renewing(&old.id).await);
    Ok(())
}

#[tokio::test]
async fn test_repeated_host_faults_lock_the_contract() -> Result<()> {
    // 95 + 20 / 2 >= 100: second half of the renew window.
    let (t, contract) = expiring_contract(95).await?;
    t.network
        .fail_renewals(&host(0).public_key, NegotiationError::host_fault("timeout"))
        .await;

    for failures in 1..=5 {
        let report = t.contractor.run_maintenance().await?.unwrap();
        assert_eq!(report.attempted, vec![contract.id]);
        assert!(report.renewed.is_empty());
        if failures < 5 {
            assert_eq!(t.contractor.failed_renewals(&contract.id).await, failures);
        }
    }
    assert_eq!(
        t.contractor.contract_utility(&contract.id).await,
        Some(ContractUtility::CANCELED)
    );

    // Never planned again, even once the host recovers.
    t.network.clear_renewal_failures(&host(0).public_key).await;
    for _ in 0..2 {
        let report = t.contractor.run_maintenance().await?.unwrap();
        assert!(!report.plan.contains(&contract.id));
        assert_eq!(
            t.contractor.contract_utility(&contract.id).await,
            Some(ContractUtility::CANCELED)
        );
    }
    assert_eq!(t.network.renew_log().await.len(), 5);
    assert_eq!(t.contractor.failed_renewals(&contract.id).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_host_faults_early_in_window_keep_retrying() -> Result<()> {
    // 85 + 20 / 2 < 100: first half of the renew window.
    let (t, contract) = expiring_contract(85).await?;
    t.network
        .fail_renewals(&host(0).public_key, NegotiationError::host_fault("timeout"))
        .await;

    for _ in 0..6 {
        t.contractor.run_maintenance().await?;
    }
    assert_eq!(t.contractor.failed_renewals(&contract.id).await, 6);
    let utility = t.contractor.contract_utility(&contract.id).await.unwrap();
    assert!(utility.good_for_renew);
    assert!(!utility.locked);
    Ok(())
}

#[tokio::test]
async fn test_other_failures_do_not_count() -> Result<()> {
    let (t, contract) = expiring_contract(95).await?;
    t.network
        .fail_renewals(&host(0).public_key, NegotiationError::other("wallet locked"))
        .await;

    for _ in 0..6 {
        let report = t.contractor.run_maintenance().await?.unwrap();
        assert_eq!(report.attempted, vec![contract.id]);
    }
    assert_eq!(t.contractor.failed_renewals(&contract.id).await, 0);
    assert!(
        t.contractor
            .contract_utility(&contract.id)
            .await
            .unwrap()
            .good_for_renew
    );
    // Every failed negotiation returned its transaction to the wallet.
    assert_eq!(t.network.dropped_transactions().await.len(), 6);
    Ok(())
}

#[tokio::test]
async fn test_renewing_a_missing_contract_is_transient() -> Result<()> {
    let (t, contract) = expiring_contract(85).await?;
    let allowance = t.contractor.allowance().await;
    let renewal = FileContractRenewal {
        id: contract.id,
        amount: Currency::coins(1),
    };
    t.contractor.cancel_contract(&contract.id).await?;

    let outcome = t
        .contractor
        .renew_contract(&renewal, &allowance, 85, 220)
        .await;
    assert!(matches!(
        outcome,
        RenewalOutcome::Failed {
            error: Error::NotGoodForRenew(_),
            permanent: false
        }
    ));

    let missing = FileContractRenewal {
        id: ContractId([42; 32]),
        amount: Currency::coins(1),
    };
    let outcome = t
        .contractor
        .renew_contract(&missing, &allowance, 85, 220)
        .await;
    assert!(matches!(
        outcome,
        RenewalOutcome::Failed {
            error: Error::ContractNotFound(_),
            permanent: false
        }
    ));
    assert!(t.network.renew_log().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_expensive_host_is_skipped() -> Result<()> {
    let (t, contract) = expiring_contract(85).await?;
    let max = t.contractor.policy().max_storage_price;
    t.network
        .update_host(&host(0).public_key, |h| {
            h.storage_price = Currency::new(max.0 + 1)
        })
        .await;

    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.attempted, vec![contract.id]);
    assert!(report.renewed.is_empty());
    assert!(t.network.renew_log().await.is_empty());
    assert_eq!(t.contractor.failed_renewals(&contract.id).await, 0);
    Ok(())
}
