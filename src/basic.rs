use crate::common::*;
use std::collections::BTreeMap;

/// In-memory ledger. Ordered maps keep iteration in id order.
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    accounts: BTreeMap<AccountId, Account>,
    banks: BTreeMap<BankId, Bank>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Ledger for MemoryLedger {
    fn get_account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }
    fn get_account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.get_mut(&id)
    }
    fn put_account(&mut self, id: AccountId, account: Account) {
        self.accounts.insert(id, account);
    }
    fn insert_account(&mut self, account: Account) -> Result<AccountId, AccountError> {
        let id = AccountId::allocate(self.accounts.keys()).ok_or(AccountError::IdsExhausted)?;
        self.accounts.insert(id, account);
        Ok(id)
    }
    fn accounts<'q>(&'q self) -> Box<dyn Iterator<Item = (AccountId, &'q Account)> + 'q> {
        Box::new(self.accounts.iter().map(|(id, acc)| (*id, acc)))
    }
    fn get_bank(&self, id: BankId) -> Option<&Bank> {
        self.banks.get(&id)
    }
    fn get_bank_mut(&mut self, id: BankId) -> Option<&mut Bank> {
        self.banks.get_mut(&id)
    }
    fn put_bank(&mut self, id: BankId, bank: Bank) {
        self.banks.insert(id, bank);
    }
    fn insert_bank(&mut self, bank: Bank) -> Result<BankId, AccountError> {
        let id = BankId::allocate(self.banks.keys()).ok_or(AccountError::IdsExhausted)?;
        self.banks.insert(id, bank);
        Ok(id)
    }
    fn banks<'q>(&'q self) -> Box<dyn Iterator<Item = (BankId, &'q Bank)> + 'q> {
        Box::new(self.banks.iter().map(|(id, bank)| (*id, bank)))
    }
}

#[cfg(test)]
use crate::libcsv::{dump_accounts, execute_csv, validate_accounts, ExecError};
#[cfg(test)]
use rust_decimal_macros::dec;

#[cfg(test)]
pub const SCRIPT: &str = r#"# CSV sample
op,       bank, account, target, amount,     name
bank,     1,    ,        ,       ,           Imagic Bank
open,     ,     1,       ,       2500,       User1
open,     ,     2,       ,       1500.12345, User2
open,     ,     3,       ,       500.00,     test
enroll,   1,    1
enroll,   1,    2
transfer, 1,    2,       1,      500
# 1 -> 3000, 2 -> 1000.12345
debit,    ,     3,       ,       600
# rejected
credit,   ,     3,       ,       -1
# rejected
debit,    ,     3,       ,       0.5
# 3 -> 499.50
rename,   ,     3,       ,       ,           Tester
"#;

#[cfg(test)]
pub const ACCOUNTS: &str = r#"
account, name,   balance,    bank
1,       User1,  3000,       1
2,       User2,  1000.12345, 1
3,       Tester, 499.50,
"#;

#[test]
fn test_csv_processing() -> Result<(), ExecError> {
    let mut ledger = MemoryLedger::new();
    execute_csv(std::io::Cursor::new(SCRIPT.as_bytes()), &mut ledger)?;
    validate_accounts(std::io::Cursor::new(ACCOUNTS.as_bytes()), &ledger)
}

#[test]
fn test_dump_is_validatable() -> Result<(), ExecError> {
    let mut ledger = MemoryLedger::new();
    execute_csv(std::io::Cursor::new(SCRIPT.as_bytes()), &mut ledger)?;
    let mut out = Vec::new();
    dump_accounts(&mut out, &ledger)?;
    let text = String::from_utf8(out).map_err(|e| ExecError::StringError(e.to_string()))?;
    assert_eq!(
        text.lines().collect::<Vec<_>>(),
        [
            "account,name,balance,bank",
            "1,User1,3000,1",
            "2,User2,1000.12345,1",
            "3,Tester,499.50,",
        ]
    );
    validate_accounts(std::io::Cursor::new(text.as_bytes()), &ledger)
}

#[test]
fn test_insert_allocates_after_last_id() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    assert_eq!(ledger.open_account("a", dec!(1))?, AccountId::from(1));
    ledger.put_account(AccountId::from(7), Account::new("b", dec!(2)));
    assert_eq!(ledger.open_account("c", dec!(3))?, AccountId::from(8));
    let names: Vec<_> = ledger.accounts().map(|(_, acc)| acc.name()).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert_eq!(ledger.open_bank(None)?, BankId::from(1));
    assert_eq!(ledger.banks().count(), 1);
    Ok(())
}

#[test]
fn test_insert_after_max_id_keeps_existing() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let max = AccountId::from(u32::MAX);
    ledger.put_account(max, Account::new("first", dec!(1)));
    ledger.put_account(AccountId::from(1), Account::new("one", dec!(1)));
    let second = ledger.open_account("second", dec!(2))?;
    assert_eq!(second, AccountId::from(2));
    let names: Vec<_> = ledger.accounts().map(|(_, acc)| acc.name()).collect();
    assert_eq!(names, ["one", "second", "first"]);

    ledger.put_bank(BankId::from(u32::MAX), Bank::new());
    assert_eq!(ledger.open_bank(None)?, BankId::from(1));
    assert_eq!(ledger.banks().count(), 2);
    Ok(())
}

#[test]
fn test_transfer() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let user1 = ledger.open_account("User1", dec!(2500))?;
    let user2 = ledger.open_account("User2", dec!(1500.12345))?;
    let bank = ledger.open_bank(None)?;
    ledger.transfer(bank, user2, user1, dec!(500))?;
    assert_eq!(ledger.balance_of(user2)?.to_string(), "1000.12345");
    assert_eq!(ledger.balance_of(user1)?.to_string(), "3000");
    assert!(ledger.bank_of(user1).is_none());
    Ok(())
}

#[test]
fn test_failed_transfer_credits_nothing() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let origin = ledger.open_account("origin", dec!(10))?;
    let target = ledger.open_account("target", dec!(0))?;
    let bank = ledger.open_bank(None)?;
    assert_eq!(
        ledger.transfer(bank, origin, target, dec!(10.01)),
        Err(AccountError::InsufficientBalance)
    );
    assert_eq!(ledger.balance_of(origin)?, dec!(10));
    assert_eq!(ledger.balance_of(target)?, dec!(0));
    Ok(())
}

#[test]
fn test_transfer_unknown_ids() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let origin = ledger.open_account("origin", dec!(10))?;
    let bank = ledger.open_bank(None)?;
    let missing = AccountId::from(99);
    assert_eq!(
        ledger.transfer(bank, origin, missing, dec!(1)),
        Err(AccountError::UnknownAccount(missing))
    );
    assert_eq!(
        ledger.transfer(BankId::from(5), origin, origin, dec!(1)),
        Err(AccountError::UnknownBank(BankId::from(5)))
    );
    assert_eq!(ledger.balance_of(origin)?, dec!(10));
    Ok(())
}

#[test]
fn test_transfer_overflow_restores_origin() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let origin = ledger.open_account("origin", dec!(10))?;
    let target = ledger.open_account("target", rust_decimal::Decimal::MAX)?;
    let bank = ledger.open_bank(None)?;
    assert_eq!(
        ledger.transfer(bank, origin, target, dec!(1)),
        Err(AccountError::Overflow)
    );
    assert_eq!(ledger.balance_of(origin)?, dec!(10));
    Ok(())
}

#[test]
fn test_self_transfer() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let acc = ledger.open_account("self", dec!(100))?;
    let bank = ledger.open_bank(None)?;
    ledger.transfer(bank, acc, acc, dec!(100))?;
    assert_eq!(ledger.balance_of(acc)?, dec!(100));
    assert_eq!(
        ledger.transfer(bank, acc, acc, dec!(100.01)),
        Err(AccountError::InsufficientBalance)
    );
    Ok(())
}

#[test]
fn test_bank_relationship() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let user1 = ledger.open_account("User1", dec!(2500))?;
    let user2 = ledger.open_account("User2", dec!(1500.12345))?;
    let bank = ledger.open_bank(None)?;
    ledger.add_account(bank, user1)?;
    ledger.add_account(bank, user2)?;
    if let Some(b) = ledger.get_bank_mut(bank) {
        b.set_name(Some("Imagic Bank".into()));
    }
    ledger.transfer(bank, user2, user1, dec!(500))?;

    assert_eq!(ledger.balance_of(user2)?.to_string(), "1000.12345");
    assert_eq!(ledger.balance_of(user1)?.to_string(), "3000");
    assert_eq!(ledger.get_bank(bank).map(|b| b.accounts().len()), Some(2));
    assert_eq!(
        ledger.bank_of(user1).and_then(Bank::name),
        Some("Imagic Bank")
    );
    assert_eq!(ledger.find_account(bank, "User1"), Some(user1));
    assert_eq!(ledger.find_account(bank, "User2"), Some(user2));
    assert_eq!(ledger.find_account(bank, "User3"), None);
    Ok(())
}

#[test]
fn test_add_account_keeps_duplicates_and_old_membership() -> Result<(), AccountError> {
    let mut ledger = MemoryLedger::new();
    let acc = ledger.open_account("moving", dec!(1))?;
    let first = ledger.open_bank(Some("First".into()))?;
    let second = ledger.open_bank(Some("Second".into()))?;
    ledger.add_account(first, acc)?;
    ledger.add_account(first, acc)?;
    ledger.add_account(second, acc)?;
    assert_eq!(ledger.get_bank(first).map(Bank::accounts), Some(&[acc, acc][..]));
    assert_eq!(ledger.bank_of(acc).and_then(Bank::name), Some("Second"));
    assert_eq!(
        ledger.add_account(first, AccountId::from(42)),
        Err(AccountError::UnknownAccount(AccountId::from(42)))
    );
    assert_eq!(
        ledger.add_account(BankId::from(42), acc),
        Err(AccountError::UnknownBank(BankId::from(42)))
    );
    assert_eq!(ledger.get_bank(first).map(|b| b.accounts().len()), Some(2));
    Ok(())
}
