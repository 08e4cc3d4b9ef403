use std::sync::Arc;

use tokio::{select, sync::mpsc::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    contractor::Contractor,
    types::{Allowance, BlockHeight},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Block(BlockHeight),
    Rollback(BlockHeight),
    Allowance(Allowance),
}

/// Feeds chain and allowance events into the contractor, starting a
/// maintenance pass after each one.
pub fn run(
    cancel_token: CancellationToken,
    contractor: Arc<Contractor>,
    mut rx: Receiver<Event>,
) -> JoinHandle<()> {
    tokio::spawn({
        let mut option_last_height: Option<BlockHeight> = None;
        async move {
            loop {
                select! {
                    _ = cancel_token.cancelled() => {
                        info!("Reactor cancelled");
                        break;
                    }
                    option_event = rx.recv() => {
                        match option_event {
                            Some(event) => {
                                match event {
                                    Event::Block(height) => {
                                        if let Some(last_height) = option_last_height {
                                            if height != last_height + 1 {
                                                warn!(
                                                    "Block {} does not follow {}",
                                                    height, last_height
                                                );
                                            }
                                        }
                                        option_last_height = Some(height);
                                        contractor.process_block(height).await;
                                        info!("Block {}", height);
                                    },
                                    Event::Rollback(height) => {
                                        contractor.rollback(height).await;
                                        option_last_height = Some(height);
                                        info!("Rollback {}", height);
                                    },
                                    Event::Allowance(allowance) => {
                                        if let Err(e) = contractor.set_allowance(allowance).await {
                                            error!("Rejected allowance: {}", e);
                                            continue;
                                        }
                                    },
                                }
                                contractor.spawn_maintenance();
                            },
                            None => {
                                info!("Received None event, exiting");
                                break;
                            },
                        }
                    }
                }
            }

            rx.close();
            while rx.recv().await.is_some() {}

            info!("Exited");
        }
    })
}
