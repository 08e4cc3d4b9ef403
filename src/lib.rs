pub mod config;
pub mod contract_set;
pub mod contractor;
pub mod currency;
pub mod database;
pub mod error;
pub mod history;
pub mod hostdb;
pub mod logging;
pub mod negotiation;
pub mod persist;
pub mod policy;
pub mod reactor;
pub mod retry;
pub mod sessions;
pub mod simulation;
pub mod stopper;
pub mod test_utils;
pub mod types;
pub mod wallet;
