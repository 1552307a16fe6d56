use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use thiserror::Error;

#[derive(Copy, Clone, Default, PartialEq, Debug, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(u32);
impl From<u32> for AccountId {
    fn from(v: u32) -> Self {
        AccountId(v)
    }
}
impl Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl AccountId {
    /// Id after the last one in use, or the lowest gap once `u32::MAX`
    /// is taken. `used` must be in ascending order.
    pub(crate) fn allocate<'a>(used: impl DoubleEndedIterator<Item = &'a AccountId>) -> Option<Self> {
        free_id(used.map(|id| id.0)).map(AccountId)
    }
}

#[derive(Copy, Clone, Default, PartialEq, Debug, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BankId(u32);
impl From<u32> for BankId {
    fn from(v: u32) -> Self {
        BankId(v)
    }
}
impl Display for BankId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl BankId {
    pub(crate) fn allocate<'a>(used: impl DoubleEndedIterator<Item = &'a BankId>) -> Option<Self> {
        free_id(used.map(|id| id.0)).map(BankId)
    }
}

fn free_id(mut used: impl DoubleEndedIterator<Item = u32>) -> Option<u32> {
    match used.next_back() {
        None => Some(1),
        Some(last) => last.checked_add(1).or_else(|| lowest_gap(used.chain([last]))),
    }
}

fn lowest_gap(used: impl Iterator<Item = u32>) -> Option<u32> {
    let mut candidate = 1u32;
    for id in used {
        if id > candidate {
            return Some(candidate);
        }
        if id == candidate {
            candidate = candidate.checked_add(1)?;
        }
    }
    Some(candidate)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient balance")]
    InsufficientBalance,
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error("Balance overflow")]
    Overflow,
    #[error("No free id left")]
    IdsExhausted,
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),
    #[error("Unknown bank: {0}")]
    UnknownBank(BankId),
}

/// A named balance. Two accounts are equal when name, balance and the
/// balance's scale match (`500.00` is not `500`). The bank reference does
/// not take part in equality.
#[derive(Clone, Debug)]
pub struct Account {
    name: String,
    balance: Decimal,
    bank: Option<BankId>,
}

impl Account {
    /// Initial balance is taken as is, negative included.
    pub fn new(name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            name: name.into(),
            balance,
            bank: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into()
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn bank(&self) -> Option<BankId> {
        self.bank
    }

    /// Does not enroll the account anywhere, see [`Banking::add_account`].
    pub fn set_bank(&mut self, bank: Option<BankId>) {
        self.bank = bank
    }

    /// Subtracts `amount`, refusing to go below zero. On error the balance
    /// is left as it was.
    pub fn debit(&mut self, amount: Decimal) -> Result<(), AccountError> {
        check_amount(amount)?;
        let balance = self
            .balance
            .checked_sub(amount)
            .ok_or(AccountError::Overflow)?;
        if balance < Decimal::ZERO {
            return Err(AccountError::InsufficientBalance);
        }
        self.balance = balance;
        Ok(())
    }

    pub fn credit(&mut self, amount: Decimal) -> Result<(), AccountError> {
        check_amount(amount)?;
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(AccountError::Overflow)?;
        Ok(())
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.balance == other.balance
            && self.balance.scale() == other.balance.scale()
    }
}

fn check_amount(amount: Decimal) -> Result<(), AccountError> {
    match amount < Decimal::ZERO {
        true => Err(AccountError::InvalidAmount(amount)),
        false => Ok(()),
    }
}

#[derive(Clone, Debug, Default)]
pub struct Bank {
    name: Option<String>,
    accounts: Vec<AccountId>,
}

impl Bank {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name
    }

    /// Enrolled accounts in insertion order, duplicates included.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }
}

/// Storage for accounts and banks, addressed by id.
pub trait Ledger {
    fn get_account(&self, id: AccountId) -> Option<&Account>;
    fn get_account_mut(&mut self, id: AccountId) -> Option<&mut Account>;
    /// Inserts or replaces the account stored under `id`.
    fn put_account(&mut self, id: AccountId, account: Account);
    /// Stores the account under the next free id.
    fn insert_account(&mut self, account: Account) -> Result<AccountId, AccountError>;
    fn accounts<'q>(&'q self) -> Box<dyn Iterator<Item = (AccountId, &'q Account)> + 'q>;
    fn get_bank(&self, id: BankId) -> Option<&Bank>;
    fn get_bank_mut(&mut self, id: BankId) -> Option<&mut Bank>;
    fn put_bank(&mut self, id: BankId, bank: Bank);
    fn insert_bank(&mut self, bank: Bank) -> Result<BankId, AccountError>;
    fn banks<'q>(&'q self) -> Box<dyn Iterator<Item = (BankId, &'q Bank)> + 'q>;
}

impl Debug for dyn Ledger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Ledger")
    }
}

/// Account and bank operations over any [`Ledger`].
pub trait Banking: Ledger {
    fn open_account(
        &mut self,
        name: impl Into<String>,
        balance: Decimal,
    ) -> Result<AccountId, AccountError> {
        let id = self.insert_account(Account::new(name, balance))?;
        tracing::debug!(account = %id, %balance, "account opened");
        Ok(id)
    }

    fn open_bank(&mut self, name: Option<String>) -> Result<BankId, AccountError> {
        let mut bank = Bank::new();
        bank.set_name(name);
        self.insert_bank(bank)
    }

    fn balance_of(&self, id: AccountId) -> Result<Decimal, AccountError> {
        self.get_account(id)
            .map(Account::balance)
            .ok_or(AccountError::UnknownAccount(id))
    }

    fn debit(&mut self, id: AccountId, amount: Decimal) -> Result<(), AccountError> {
        let account = self
            .get_account_mut(id)
            .ok_or(AccountError::UnknownAccount(id))?;
        account.debit(amount)?;
        tracing::debug!(account = %id, %amount, balance = %account.balance(), "debit");
        Ok(())
    }

    fn credit(&mut self, id: AccountId, amount: Decimal) -> Result<(), AccountError> {
        let account = self
            .get_account_mut(id)
            .ok_or(AccountError::UnknownAccount(id))?;
        account.credit(amount)?;
        tracing::debug!(account = %id, %amount, balance = %account.balance(), "credit");
        Ok(())
    }

    /// Appends `account` to the bank and points the account back at it.
    /// Neither duplicates nor a previous bank are checked.
    fn add_account(&mut self, bank: BankId, account: AccountId) -> Result<(), AccountError> {
        if self.get_account(account).is_none() {
            return Err(AccountError::UnknownAccount(account));
        }
        self.get_bank_mut(bank)
            .ok_or(AccountError::UnknownBank(bank))?
            .accounts
            .push(account);
        if let Some(acc) = self.get_account_mut(account) {
            acc.set_bank(Some(bank));
        }
        tracing::debug!(%bank, %account, "account enrolled");
        Ok(())
    }

    /// Debits `origin`, then credits `target`. Credit is not attempted if
    /// the debit fails. Origin and target may be the same account.
    fn transfer(
        &mut self,
        bank: BankId,
        origin: AccountId,
        target: AccountId,
        amount: Decimal,
    ) -> Result<(), AccountError> {
        if self.get_bank(bank).is_none() {
            return Err(AccountError::UnknownBank(bank));
        }
        if self.get_account(target).is_none() {
            return Err(AccountError::UnknownAccount(target));
        }
        self.debit(origin, amount)?;
        if let Err(err) = self.credit(target, amount) {
            // restores a balance that existed a moment ago, cannot overflow
            let restored = self.credit(origin, amount);
            debug_assert!(restored.is_ok(), "rollback of {origin} failed: {restored:?}");
            return Err(err);
        }
        tracing::debug!(%bank, %origin, %target, %amount, "transfer");
        Ok(())
    }

    fn bank_of(&self, account: AccountId) -> Option<&Bank> {
        self.get_account(account)
            .and_then(Account::bank)
            .and_then(|bank| self.get_bank(bank))
    }

    /// First account enrolled in `bank` under `name`.
    fn find_account(&self, bank: BankId, name: &str) -> Option<AccountId> {
        self.get_bank(bank)?
            .accounts()
            .iter()
            .copied()
            .find(|&id| self.get_account(id).map_or(false, |acc| acc.name() == name))
    }
}

impl<T: Ledger + ?Sized> Banking for T {}

#[cfg(test)]
use rust_decimal_macros::dec;

#[test]
fn test_debit_keeps_scale() -> Result<(), AccountError> {
    let mut account = Account::new("Juan Antonio", dec!(1000.12345));
    account.debit(dec!(100))?;
    assert_eq!(account.balance(), dec!(900.12345));
    assert_eq!(account.balance().to_string(), "900.12345");
    Ok(())
}

#[test]
fn test_credit_keeps_scale() -> Result<(), AccountError> {
    let mut account = Account::new("Juan Antonio", dec!(1000.12345));
    account.credit(dec!(100))?;
    assert_eq!(account.balance().to_string(), "1100.12345");
    Ok(())
}

#[test]
fn test_debit_whole_balance() -> Result<(), AccountError> {
    let mut account = Account::new("test", dec!(500.00));
    account.debit(dec!(500))?;
    assert!(account.balance().is_zero());
    Ok(())
}

#[test]
fn test_insufficient_balance() {
    let mut account = Account::new("test", dec!(500.00));
    let err = account.debit(dec!(600)).unwrap_err();
    assert_eq!(err, AccountError::InsufficientBalance);
    assert_eq!(err.to_string(), "Insufficient balance");
    assert_eq!(account.balance().to_string(), "500.00");
}

#[test]
fn test_negative_amount_rejected() {
    let mut account = Account::new("test", dec!(10));
    assert_eq!(
        account.debit(dec!(-5)),
        Err(AccountError::InvalidAmount(dec!(-5)))
    );
    assert_eq!(
        account.credit(dec!(-5)),
        Err(AccountError::InvalidAmount(dec!(-5)))
    );
    assert_eq!(account.balance(), dec!(10));
    assert_eq!(account.credit(dec!(0)), Ok(()));
}

#[test]
fn test_negative_initial_balance_accepted() {
    let mut account = Account::new("overdrawn", dec!(-1));
    assert_eq!(account.balance(), dec!(-1));
    assert_eq!(account.debit(dec!(0)), Err(AccountError::InsufficientBalance));
    assert_eq!(account.credit(dec!(1)), Ok(()));
    assert!(account.balance().is_zero());
}

#[test]
fn test_credit_overflow() {
    let mut account = Account::new("max", Decimal::MAX);
    assert_eq!(account.credit(dec!(1)), Err(AccountError::Overflow));
    assert_eq!(account.balance(), Decimal::MAX);
}

#[test]
fn test_account_equality() {
    let a = Account::new("Test1", dec!(9000.00007));
    let mut b = Account::new("Test1", dec!(9000.00007));
    b.set_bank(Some(BankId::from(3)));
    assert_eq!(a, b);
    assert_ne!(Account::new("x", dec!(500.00)), Account::new("x", dec!(500)));
    assert_eq!(Account::new("x", dec!(500.00)), Account::new("x", dec!(500.00)));
    assert_ne!(a, Account::new("Test2", dec!(9000.00007)));
    assert_ne!(a, Account::new("Test1", dec!(9000.00008)));
    b.set_name("Other");
    assert_ne!(a, b);
}

#[test]
fn test_set_bank_does_not_enroll() {
    let mut account = Account::new("lonely", dec!(1));
    account.set_bank(Some(BankId::from(1)));
    assert_eq!(account.bank(), Some(BankId::from(1)));
    let bank = Bank::new();
    assert!(bank.accounts().is_empty());
    assert_eq!(bank.name(), None);
}

#[test]
fn test_account_equality_after_arithmetic() -> Result<(), AccountError> {
    let mut a = Account::new("x", dec!(500));
    a.credit(dec!(0.00))?;
    assert_eq!(a.balance().to_string(), "500.00");
    assert_eq!(a, Account::new("x", dec!(500.00)));
    assert_ne!(a, Account::new("x", dec!(500)));
    Ok(())
}

#[test]
fn test_free_id() {
    assert_eq!(free_id([].into_iter()), Some(1));
    assert_eq!(free_id([1, 7].into_iter()), Some(8));
    assert_eq!(free_id([1, 2, u32::MAX].into_iter()), Some(3));
    assert_eq!(free_id([0, 2, u32::MAX].into_iter()), Some(1));
    assert_eq!(free_id([u32::MAX].into_iter()), Some(1));
    assert_eq!(lowest_gap([1, 2, 3].into_iter()), Some(4));
    assert_eq!(lowest_gap([u32::MAX - 1, u32::MAX].into_iter()), Some(1));
}
