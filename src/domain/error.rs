use rust_decimal::Decimal;

use crate::domain::AccountId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("account {0} does not exist")]
    AccountNotFound(AccountId),

    #[error("invalid amount {0}")]
    InvalidAmount(Decimal),

    #[error("account {account} has insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("gave up acquiring ledger locks after {attempts} timed-out attempts")]
    LockTimeout { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
