pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod io;
pub mod notify;
pub mod rates;
pub mod storage;
pub mod telemetry;

pub use application::{AccountLedger, LedgerError};
pub use domain::*;
pub use storage::{LedgerStore, SqliteStore};
