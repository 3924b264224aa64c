//! Economy API adapter.
//!
//! Exposes the ledger under the external economy contract: decimal amounts
//! in the configured currency, account handles and a flat error type. No
//! business rule lives here.

mod economy;
mod error;

pub use economy::*;
pub use error::*;
