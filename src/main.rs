use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use contractor::{
    config::Config,
    contractor::Contractor,
    database, logging,
    reactor::{self, Event},
    simulation::SimulatedNetwork,
    stopper,
};
use tokio::{select, sync::mpsc, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::try_parse()?;
    logging::setup(config.log_format);
    info!("Contractor");
    info!("{:#?}", config);

    let cancel_token = CancellationToken::new();
    let mut handles = vec![];
    handles.push(stopper::run(cancel_token.clone())?);

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let db_path = config.data_dir.join(database::DATABASE_FILE_NAME);
    let reader = database::Reader::new(&db_path).await?;
    let writer = database::Writer::new(&db_path).await?;

    let network = Arc::new(
        SimulatedNetwork::with_hosts(config.simulated_hosts)
            .await
            .shuffled()
            .await,
    );
    let deps = network.dependencies(Arc::new(writer));
    let contractor = Arc::new(match reader.load().await? {
        Some(snapshot) => {
            Contractor::from_snapshot(deps, config.policy(), cancel_token.clone(), snapshot).await
        }
        None => Contractor::new(deps, config.policy(), cancel_token.clone()),
    });

    let (tx, rx) = mpsc::channel(10);
    handles.push(reactor::run(cancel_token.clone(), contractor.clone(), rx));
    tx.send(Event::Allowance(config.allowance())).await?;

    let mut height = contractor.block_height().await;
    let block_interval = Duration::from_millis(config.block_interval_ms);
    handles.push(tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            let mut ticker = interval(block_interval);
            ticker.tick().await;
            loop {
                select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        height += 1;
                        if tx.send(Event::Block(height)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Block producer exited");
        }
    }));

    for handle in handles {
        let _ = handle.await;
    }
    contractor.save().await;
    info!("Goodbye.");
    Ok(())
}
