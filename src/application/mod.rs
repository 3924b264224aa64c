// Application layer - ledger use cases and orchestration.
// LedgerService is the only component allowed to mutate balances; the
// repository, lock registry and event bus are its collaborators.

pub mod error;
pub mod events;
pub mod intent;
pub mod locks;
pub mod repository;
pub mod service;

pub use error::*;
pub use events::*;
pub use intent::*;
pub use locks::*;
pub use repository::*;
pub use service::*;
