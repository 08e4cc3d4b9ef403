use anyhow::Result;
use contractor::{
    currency::Currency,
    error::Error,
    simulation::host,
    test_utils::{new_test_contractor, test_allowance, test_contract},
    types::{ContractId, ContractUtility, RecoverableContract},
};

#[tokio::test]
async fn test_forms_contracts_up_to_host_count() -> Result<()> {
    let t = new_test_contractor(10).await;
    t.contractor
        .set_allowance(test_allowance(Currency::coins(1_000), 5))
        .await?;

    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.formed, 5);
    assert!(!report.interrupted);

    let contracts = t.contractor.contracts().await;
    assert_eq!(contracts.len(), 5);
    for contract in &contracts {
        assert_eq!(contract.utility, ContractUtility::GOOD);
        assert_eq!(contract.end_height, 120);
        assert_eq!(
            t.contractor.contract_by_host(&contract.host_public_key).await,
            Some(contract.id)
        );
    }

    // Nothing left to do.
    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.formed, 0);
    assert!(report.plan.is_empty());
    assert_eq!(t.network.form_log().await.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_formation_excludes_contracted_and_recoverable_hosts() -> Result<()> {
    let t = new_test_contractor(4).await;
    t.contractor
        .set_allowance(test_allowance(Currency::coins(1_000), 3))
        .await?;
    t.contractor
        .add_contract(test_contract(
            &host(0),
            0,
            100,
            Currency::coins(10),
            Currency::coins(9),
        ))
        .await;
    t.contractor
        .add_recoverable_contract(RecoverableContract {
            id: ContractId([9; 32]),
            host_public_key: host(1).public_key,
            start_height: 0,
            end_height: 100,
        })
        .await;

    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.formed, 2);
    let formed_with = t.network.form_log().await;
    assert!(!formed_with.contains(&host(0).public_key));
    assert!(!formed_with.contains(&host(1).public_key));
    Ok(())
}

#[tokio::test]
async fn test_budget_skips_items_that_do_not_fit() -> Result<()> {
    let t = new_test_contractor(10).await;
    // Renewals are funded with the floor: 100 * 0.15 / 4 = 3.75 coins.
    t.contractor
        .set_allowance(test_allowance(Currency::coins(100), 4))
        .await?;
    for i in 0..4 {
        t.contractor
            .add_contract(test_contract(
                &host(i),
                0,
                100,
                Currency::coins(24),
                Currency::coins(20),
            ))
            .await;
    }
    t.contractor.process_block(85).await;

    // 96 of 100 coins are allocated, so only one renewal fits.
    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.plan.renew_set.len(), 4);
    assert_eq!(report.attempted.len(), 1);
    assert_eq!(report.renewed.len(), 1);
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(t.network.renew_log().await, report.attempted);
    // The remaining funds cannot cover a new contract either.
    assert_eq!(report.formed, 0);

    let spending = t.contractor.period_spending().await;
    assert!(spending.total_allocated <= Currency::coins(100));
    Ok(())
}

#[tokio::test]
async fn test_renewals_are_funded_before_refreshes() -> Result<()> {
    let t = new_test_contractor(10).await;
    t.contractor
        .set_allowance(test_allowance(Currency::coins(52), 2))
        .await?;
    // Out of funds but far from expiry: refreshed with 2 * 4 = 8 coins.
    let refresh = test_contract(
        &host(1),
        0,
        300,
        Currency::coins(4),
        Currency::new(Currency::coins(4).0 / 50),
    );
    // Inside the renew window: renewed with 52 * 0.15 / 2 = 3.9 coins.
    let renew = test_contract(&host(0), 0, 100, Currency::coins(40), Currency::coins(30));
    t.contractor.add_contract(refresh.clone()).await;
    t.contractor.add_contract(renew.clone()).await;
    t.contractor.process_block(85).await;

    // 8 coins remain: enough for either item, but not both.
    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.plan.renew_set.len(), 1);
    assert_eq!(report.plan.refresh_set.len(), 1);
    assert_eq!(report.plan.refresh_set[0].amount, Currency::coins(8));
    assert_eq!(report.attempted, vec![renew.id]);
    assert_eq!(report.skipped, vec![refresh.id]);
    Ok(())
}

#[tokio::test]
async fn test_planner_is_idempotent() -> Result<()> {
    let t = new_test_contractor(10).await;
    let allowance = test_allowance(Currency::coins(1_000), 4);
    t.contractor.set_allowance(allowance).await?;
    t.contractor
        .add_contract(test_contract(
            &host(0),
            0,
            100,
            Currency::coins(10),
            Currency::coins(9),
        ))
        .await;
    t.contractor
        .add_contract(test_contract(
            &host(1),
            0,
            300,
            Currency::coins(10),
            Currency::new(1),
        ))
        .await;
    t.contractor
        .add_contract(test_contract(
            &host(2),
            0,
            300,
            Currency::coins(10),
            Currency::coins(9),
        ))
        .await;

    let first = t.contractor.plan_renewals(&allowance, 85).await?;
    let second = t.contractor.plan_renewals(&allowance, 85).await?;
    assert_eq!(first, second);
    assert_eq!(first.renew_set.len(), 1);
    assert_eq!(first.refresh_set.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fee_oracle_failure_aborts_the_pass() -> Result<()> {
    let t = new_test_contractor(10).await;
    t.contractor
        .set_allowance(test_allowance(Currency::coins(1_000), 1))
        .await?;
    t.contractor
        .add_contract(test_contract(
            &host(0),
            0,
            100,
            Currency::coins(10),
            Currency::coins(9),
        ))
        .await;
    t.contractor.process_block(85).await;
    t.network.set_fee_oracle_down(true).await;

    let result = t.contractor.run_maintenance().await;
    assert!(matches!(result, Err(Error::FeeEstimation(_))));
    assert!(t.network.renew_log().await.is_empty());

    t.network.set_fee_oracle_down(false).await;
    let report = t.contractor.run_maintenance().await?.unwrap();
    assert_eq!(report.renewed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_without_allowance_nothing_is_formed() -> Result<()> {
    let t = new_test_contractor(10).await;
    let report = t.contractor.run_maintenance().await?.unwrap();
    assert!(report.plan.is_empty());
    assert_eq!(report.formed, 0);
    assert!(t.network.form_log().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_low_score_and_filtered_hosts_lose_utility() -> Result<()> {
    // The score sample is the first 53 hosts, so host-59 is judged against
    // the others.
    let t = new_test_contractor(60).await;
    t.contractor
        .set_allowance(test_allowance(Currency::coins(1_000), 3))
        .await?;
    let low = test_contract(&host(59), 0, 300, Currency::coins(10), Currency::coins(9));
    let filtered = test_contract(&host(1), 0, 300, Currency::coins(10), Currency::coins(9));
    let healthy = test_contract(&host(2), 0, 300, Currency::coins(10), Currency::coins(9));
    for contract in [&low, &filtered, &healthy] {
        t.contractor.add_contract(contract.clone()).await;
    }
    t.network.set_score(&host(59).public_key, Currency::new(1)).await;
    t.network
        .update_host(&host(1).public_key, |h| h.filtered = true)
        .await;

    t.contractor.mark_contracts_utility().await?;
    let none = ContractUtility::default();
    assert_eq!(t.contractor.contract_utility(&low.id).await, Some(none));
    assert_eq!(t.contractor.contract_utility(&filtered.id).await, Some(none));
    assert_eq!(
        t.contractor.contract_utility(&healthy.id).await,
        Some(ContractUtility::GOOD)
    );
    Ok(())
}

#[tokio::test]
async fn test_second_contract_with_a_host_reports_its_cost() -> Result<()> {
    let t = new_test_contractor(1).await;
    t.contractor
        .set_allowance(test_allowance(Currency::coins(1_000), 1))
        .await?;
    let existing = test_contract(&host(0), 0, 120, Currency::coins(10), Currency::coins(9));
    t.contractor.add_contract(existing.clone()).await;

    let (duplicate, spent) = match t
        .contractor
        .new_contract(host(0), Currency::coins(7), 120)
        .await
    {
        Err(Error::DuplicateHost { host, spent }) => (host, spent),
        other => panic!("expected a duplicate host error, got {:?}", other),
    };
    assert_eq!(duplicate, host(0).public_key);

    let formed_id = t
        .contractor
        .contract_by_host(&host(0).public_key)
        .await
        .unwrap();
    assert_ne!(formed_id, existing.id);
    let formed = t.contractor.contract(&formed_id).await.unwrap();
    assert_eq!(spent, formed.total_cost);
    assert_eq!(spent, Currency::coins(7));
    Ok(())
}
