//! Shared-state ledger with ordered lock regions and timed acquisition.
//!
//! Four mutually exclusive regions guard the shared state: the account
//! registry, the account table, and the two aggregate counters. Every
//! operation takes the regions it needs in one fixed global order
//! (registry, accounts, deposit counter, withdraw counter), so no pair of
//! operations can circular-wait. Each acquisition is bounded; a timeout is
//! treated as contention, all guards held so far are dropped, and the whole
//! sequence restarts after a delay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::LedgerConfig;
use crate::domain::{Account, AccountId, Error, Result};

/// Which aggregate counters an operation must hold in addition to the
/// registry and the account table.
#[derive(Debug, Clone, Copy)]
enum CounterSet {
    Deposit,
    Withdraw,
    Both,
}

impl CounterSet {
    fn deposit(self) -> bool {
        matches!(self, CounterSet::Deposit | CounterSet::Both)
    }

    fn withdraw(self) -> bool {
        matches!(self, CounterSet::Withdraw | CounterSet::Both)
    }
}

/// The full set of guards an operation runs its validate and apply phases
/// under. Dropping it releases every region, so no exit path can leak a
/// held lock.
struct RegionGuards<'a> {
    registry: MutexGuard<'a, Vec<AccountId>>,
    accounts: MutexGuard<'a, HashMap<AccountId, Account>>,
    deposited: Option<MutexGuard<'a, Decimal>>,
    withdrawn: Option<MutexGuard<'a, Decimal>>,
}

impl RegionGuards<'_> {
    fn check_exists(&self, account: AccountId) -> Result<()> {
        if self.registry.contains(&account) {
            Ok(())
        } else {
            warn!(account, "transaction rejected: unknown account");
            Err(Error::AccountNotFound(account))
        }
    }

    fn account_mut(&mut self, account: AccountId) -> Result<&mut Account> {
        self.accounts
            .get_mut(&account)
            .ok_or(Error::AccountNotFound(account))
    }

    fn record_deposit(&mut self, amount: Decimal) {
        if let Some(total) = self.deposited.as_deref_mut() {
            *total += amount;
        }
    }

    fn record_withdrawal(&mut self, amount: Decimal) {
        if let Some(total) = self.withdrawn.as_deref_mut() {
            *total += amount;
        }
    }
}

/// Concurrent ledger owning the account table and the aggregate counters.
#[derive(Debug)]
pub struct Ledger {
    registry: Mutex<Vec<AccountId>>,
    accounts: Mutex<HashMap<AccountId, Account>>,
    total_deposited: Mutex<Decimal>,
    total_withdrawn: Mutex<Decimal>,
    next_id: AtomicU32,
    config: LedgerConfig,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            registry: Mutex::new(Vec::new()),
            accounts: Mutex::new(HashMap::new()),
            total_deposited: Mutex::new(Decimal::ZERO),
            total_withdrawn: Mutex::new(Decimal::ZERO),
            next_id: AtomicU32::new(0),
            config,
        }
    }

    /// Register a new account and return its id.
    ///
    /// Intended for setup, before worker threads start issuing
    /// transactions; it still takes the table locks, so a late call cannot
    /// corrupt the tables.
    pub fn add_account(&self, initial_balance: Decimal) -> AccountId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.lock();
        let mut accounts = self.accounts.lock();
        registry.push(id);
        accounts.insert(id, Account::new(id, initial_balance));
        id
    }

    /// Credit `amount` to `account`.
    pub fn deposit(&self, account: AccountId, amount: Decimal) -> Result<()> {
        let mut guards = self.acquire(CounterSet::Deposit)?;

        guards.check_exists(account)?;
        check_amount(amount)?;

        guards.account_mut(account)?.credit(amount);
        guards.record_deposit(amount);
        debug!(account, %amount, "deposit committed");
        Ok(())
    }

    /// Debit `amount` from `account`, rejecting overdrafts.
    pub fn withdraw(&self, account: AccountId, amount: Decimal) -> Result<()> {
        let mut guards = self.acquire(CounterSet::Withdraw)?;

        guards.check_exists(account)?;
        check_amount(amount)?;

        let entry = guards.account_mut(account)?;
        let balance = entry.balance();
        if balance < amount {
            warn!(account, %amount, %balance, "withdrawal rejected: overdraft");
            return Err(Error::InsufficientFunds {
                account,
                balance,
                requested: amount,
            });
        }
        entry.debit(amount);

        guards.record_withdrawal(amount);
        debug!(account, %amount, "withdrawal committed");
        Ok(())
    }

    /// Move `amount` from `sender` to `receiver` under the combined lock
    /// set. Both aggregate counters are bumped by the transferred amount.
    pub fn transfer(&self, sender: AccountId, receiver: AccountId, amount: Decimal) -> Result<()> {
        let mut guards = self.acquire(CounterSet::Both)?;

        guards.check_exists(sender)?;
        guards.check_exists(receiver)?;
        check_amount(amount)?;

        let from = guards.account_mut(sender)?;
        let balance = from.balance();
        if balance < amount {
            warn!(sender, %amount, %balance, "transfer rejected: overdraft");
            return Err(Error::InsufficientFunds {
                account: sender,
                balance,
                requested: amount,
            });
        }
        from.debit(amount);
        guards.account_mut(receiver)?.credit(amount);

        guards.record_withdrawal(amount);
        guards.record_deposit(amount);
        debug!(sender, receiver, %amount, "transfer committed");
        Ok(())
    }

    /// Ids of all registered accounts, in registration order.
    pub fn account_ids(&self) -> Vec<AccountId> {
        self.registry.lock().clone()
    }

    pub fn balance(&self, account: AccountId) -> Result<Decimal> {
        self.accounts
            .lock()
            .get(&account)
            .map(Account::balance)
            .ok_or(Error::AccountNotFound(account))
    }

    /// Running total of all successful deposits (transfers included).
    pub fn total_deposited(&self) -> Decimal {
        *self.total_deposited.lock()
    }

    /// Running total of all successful withdrawals (transfers included).
    pub fn total_withdrawn(&self) -> Decimal {
        *self.total_withdrawn.lock()
    }

    /// Take every region the operation needs, restarting the whole ordered
    /// sequence whenever any single acquisition times out.
    ///
    /// A timeout is read as contention (possibly a deadlock) rather than a
    /// failure: the guards taken so far are dropped and, after the retry
    /// delay, the sequence starts over from the first region. With
    /// `max_retries` unset this loops until it succeeds.
    fn acquire(&self, counters: CounterSet) -> Result<RegionGuards<'_>> {
        let mut attempts: u32 = 0;
        loop {
            if let Some(guards) = self.try_acquire(counters) {
                return Ok(guards);
            }

            attempts += 1;
            warn!(
                attempts,
                timeout_ms = self.config.lock_timeout_ms,
                "lock acquisition timed out, assuming contention and retrying"
            );
            if let Some(max) = self.config.max_retries {
                if attempts >= max {
                    return Err(Error::LockTimeout { attempts });
                }
            }
            thread::sleep(self.config.retry_delay());
        }
    }

    /// One pass over the lock order. `None` means some region timed out;
    /// any guards taken earlier in the pass are released on return.
    fn try_acquire(&self, counters: CounterSet) -> Option<RegionGuards<'_>> {
        let timeout = self.config.lock_timeout();

        let registry = self.registry.try_lock_for(timeout)?;
        let accounts = self.accounts.try_lock_for(timeout)?;
        let deposited = if counters.deposit() {
            Some(self.total_deposited.try_lock_for(timeout)?)
        } else {
            None
        };
        let withdrawn = if counters.withdraw() {
            Some(self.total_withdrawn.try_lock_for(timeout)?)
        } else {
            None
        };

        Some(RegionGuards {
            registry,
            accounts,
            deposited,
            withdrawn,
        })
    }
}

fn check_amount(amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        warn!(%amount, "transaction rejected: negative amount");
        return Err(Error::InvalidAmount(amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn ledger_with_balances(balances: &[i64]) -> (Ledger, Vec<AccountId>) {
        let ledger = Ledger::default();
        let ids = balances
            .iter()
            .map(|b| ledger.add_account(Decimal::from(*b)))
            .collect();
        (ledger, ids)
    }

    #[test]
    fn sequential_ids() {
        let (ledger, ids) = ledger_with_balances(&[100, 200, 300]);
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(ledger.account_ids(), ids);
    }

    #[test]
    fn deposit_credits_balance_and_counter() {
        let (ledger, ids) = ledger_with_balances(&[1000]);
        ledger.deposit(ids[0], Decimal::from(250)).unwrap();
        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(1250));
        assert_eq!(ledger.total_deposited(), Decimal::from(250));
        assert_eq!(ledger.total_withdrawn(), Decimal::ZERO);
    }

    #[test]
    fn withdraw_debits_balance_and_counter() {
        let (ledger, ids) = ledger_with_balances(&[1000]);
        ledger.withdraw(ids[0], Decimal::from(400)).unwrap();
        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(600));
        assert_eq!(ledger.total_withdrawn(), Decimal::from(400));
    }

    #[test]
    fn overdraft_is_rejected_without_mutation() {
        let (ledger, ids) = ledger_with_balances(&[100]);
        let err = ledger.withdraw(ids[0], Decimal::from(101)).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(100));
        assert_eq!(ledger.total_withdrawn(), Decimal::ZERO);
    }

    #[test]
    fn transfer_conserves_sum() {
        let (ledger, ids) = ledger_with_balances(&[500, 500]);
        ledger.transfer(ids[0], ids[1], Decimal::from(200)).unwrap();
        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(300));
        assert_eq!(ledger.balance(ids[1]).unwrap(), Decimal::from(700));
        assert_eq!(
            ledger.balance(ids[0]).unwrap() + ledger.balance(ids[1]).unwrap(),
            Decimal::from(1000)
        );
    }

    #[test]
    fn transfer_overdraft_leaves_both_accounts_untouched() {
        let (ledger, ids) = ledger_with_balances(&[100, 100]);
        let err = ledger
            .transfer(ids[0], ids[1], Decimal::from(150))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds { account: 0, .. }
        ));
        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(100));
        assert_eq!(ledger.balance(ids[1]).unwrap(), Decimal::from(100));
    }

    #[test]
    fn unknown_account_is_rejected() {
        let (ledger, ids) = ledger_with_balances(&[100]);
        assert!(matches!(
            ledger.deposit(99, Decimal::from(10)),
            Err(Error::AccountNotFound(99))
        ));
        assert!(matches!(
            ledger.withdraw(99, Decimal::from(10)),
            Err(Error::AccountNotFound(99))
        ));
        assert!(matches!(
            ledger.transfer(ids[0], 99, Decimal::from(10)),
            Err(Error::AccountNotFound(99))
        ));
        assert!(matches!(
            ledger.transfer(99, ids[0], Decimal::from(10)),
            Err(Error::AccountNotFound(99))
        ));
        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(100));
        assert_eq!(ledger.total_deposited(), Decimal::ZERO);
    }

    #[test]
    fn negative_amount_is_rejected_everywhere() {
        let (ledger, ids) = ledger_with_balances(&[100, 100]);
        let minus = Decimal::from(-5);
        assert!(matches!(
            ledger.deposit(ids[0], minus),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.withdraw(ids[0], minus),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.transfer(ids[0], ids[1], minus),
            Err(Error::InvalidAmount(_))
        ));
        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(100));
        assert_eq!(ledger.total_deposited(), Decimal::ZERO);
        assert_eq!(ledger.total_withdrawn(), Decimal::ZERO);
    }

    #[test]
    fn mixed_sequence_matches_expected_totals() {
        let (ledger, ids) = ledger_with_balances(&[10_000, 20_000, 30_000]);

        ledger.deposit(ids[0], Decimal::from(500)).unwrap();
        ledger.withdraw(ids[1], Decimal::from(5000)).unwrap();
        ledger
            .transfer(ids[2], ids[0], Decimal::from(1000))
            .unwrap();

        assert_eq!(ledger.balance(ids[0]).unwrap(), Decimal::from(11_500));
        assert_eq!(ledger.balance(ids[1]).unwrap(), Decimal::from(15_000));
        assert_eq!(ledger.balance(ids[2]).unwrap(), Decimal::from(29_000));
        assert_eq!(ledger.total_deposited(), Decimal::from(1500));
        // Transfers count toward both totals.
        assert_eq!(ledger.total_withdrawn(), Decimal::from(6000));
    }

    #[test]
    fn gives_up_after_bounded_retries() {
        let config = LedgerConfig {
            lock_timeout_ms: 10,
            retry_delay_ms: 5,
            max_retries: Some(3),
        };
        let ledger = Ledger::new(config);
        let id = ledger.add_account(Decimal::from(100));

        // Hold the account table so every acquisition pass times out.
        let _held = ledger.accounts.lock();

        let err = ledger.deposit(id, Decimal::from(10)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { attempts: 3 }));
    }

    #[test]
    fn retries_until_contended_lock_is_released() {
        let config = LedgerConfig {
            lock_timeout_ms: 20,
            retry_delay_ms: 10,
            max_retries: None,
        };
        let ledger = Arc::new(Ledger::new(config));
        let id = ledger.add_account(Decimal::from(100));

        let (held_tx, held_rx) = mpsc::channel();
        let holder = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let guard = ledger.accounts.lock();
                held_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(150));
                drop(guard);
            })
        };

        held_rx.recv().unwrap();
        ledger.deposit(id, Decimal::from(10)).unwrap();
        assert_eq!(ledger.balance(id).unwrap(), Decimal::from(110));

        holder.join().unwrap();
    }
}
