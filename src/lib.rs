//! Concurrent in-memory ledger with ordered lock regions and
//! timed-acquisition deadlock recovery.

pub mod config;
pub mod domain;
pub mod ledger;

pub use config::LedgerConfig;
pub use domain::{Account, AccountId, Error, Result};
pub use ledger::Ledger;
