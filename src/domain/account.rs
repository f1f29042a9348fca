use rust_decimal::Decimal;

/// Sequential account identifier, unique for the lifetime of a ledger.
pub type AccountId = u32;

/// A single account record.
///
/// `Account` carries no synchronization of its own. Mutation is only safe
/// while the owning ledger holds its account-table lock; `credit` and
/// `debit` perform no validation, that is the caller's job.
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    balance: Decimal,
}

impl Account {
    pub fn new(id: AccountId, initial_balance: Decimal) -> Self {
        Self {
            id,
            balance: initial_balance,
        }
    }

    pub fn credit(&mut self, amount: Decimal) {
        self.balance += amount;
    }

    pub fn debit(&mut self, amount: Decimal) {
        self.balance -= amount;
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn id(&self) -> AccountId {
        self.id
    }
}
