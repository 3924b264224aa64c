mod account;
mod currency;
mod money;

pub use account::*;
pub use currency::*;
pub use money::*;
