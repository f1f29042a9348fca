pub mod account;
pub mod error;

pub use account::{Account, AccountId};
pub use error::{Error, Result};
