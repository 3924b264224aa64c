pub mod api;
pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod io;
pub mod logging;
pub mod plugin;
pub mod storage;

pub use api::{EconomyAccount, EconomyApi, EconomyError};
pub use application::{LedgerError, LedgerService};
pub use domain::*;
pub use plugin::{Aconomy, PluginLifecycle};
