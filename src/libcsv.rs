use crate::common::{Account, AccountError, AccountId, Bank, BankId, Banking, Ledger};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Bank,
    Open,
    Enroll,
    Debit,
    Credit,
    Transfer,
    Rename,
}

#[derive(Deserialize)]
struct OpRequest {
    op: Op,
    bank: Option<BankId>,
    account: Option<AccountId>,
    target: Option<AccountId>,
    amount: Option<Decimal>,
    name: Option<String>,
}

#[derive(Deserialize, Serialize)]
struct AccountState {
    account: AccountId,
    name: String,
    balance: Decimal,
    bank: Option<BankId>,
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{0}")]
    StringError(String),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    CSVError(#[from] csv::Error),
    #[error(transparent)]
    AccountError(#[from] AccountError),
}

fn required<T>(value: Option<T>, op: Op, field: &str) -> Result<T, ExecError> {
    value.ok_or_else(|| ExecError::StringError(format!("{op:?} has no {field}")))
}

fn reader<R: std::io::Read>(rd: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b',')
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(rd)
}

pub fn execute_csv_file(path: impl AsRef<Path>, ledger: &mut dyn Ledger) -> Result<(), ExecError> {
    let mut f = std::fs::File::open(path)?;
    execute_csv(&mut f, ledger)
}

/// Replays a script of banking operations. Rows the model refuses
/// (overdraft, negative amount) are logged and skipped, anything else
/// stops the replay.
pub fn execute_csv(rd: impl std::io::Read, ledger: &mut dyn Ledger) -> Result<(), ExecError> {
    let mut rdr = reader(rd);
    for result in rdr.deserialize() {
        let r: OpRequest = result?;
        let op = r.op;
        let status = match op {
            Op::Bank => {
                let id = required(r.bank, op, "bank")?;
                if ledger.get_bank(id).is_some() {
                    return Err(ExecError::StringError(format!("bank {id} already exists")));
                }
                let mut bank = Bank::new();
                bank.set_name(r.name);
                ledger.put_bank(id, bank);
                Ok(())
            }
            Op::Open => {
                let id = required(r.account, op, "account")?;
                if ledger.get_account(id).is_some() {
                    return Err(ExecError::StringError(format!(
                        "account {id} already exists"
                    )));
                }
                let name = required(r.name, op, "name")?;
                let balance = required(r.amount, op, "amount")?;
                ledger.put_account(id, Account::new(name, balance));
                Ok(())
            }
            Op::Enroll => ledger.add_account(
                required(r.bank, op, "bank")?,
                required(r.account, op, "account")?,
            ),
            Op::Debit => ledger.debit(
                required(r.account, op, "account")?,
                required(r.amount, op, "amount")?,
            ),
            Op::Credit => ledger.credit(
                required(r.account, op, "account")?,
                required(r.amount, op, "amount")?,
            ),
            Op::Transfer => ledger.transfer(
                required(r.bank, op, "bank")?,
                required(r.account, op, "account")?,
                required(r.target, op, "target")?,
                required(r.amount, op, "amount")?,
            ),
            Op::Rename => {
                let id = required(r.account, op, "account")?;
                let name = required(r.name, op, "name")?;
                ledger
                    .get_account_mut(id)
                    .ok_or(AccountError::UnknownAccount(id))
                    .map(|acc| acc.set_name(name))
            }
        };
        match status {
            Err(e @ (AccountError::InsufficientBalance | AccountError::InvalidAmount(_))) => {
                tracing::warn!(?op, error = %e, "operation rejected");
                Ok(())
            }
            s => s,
        }?;
    }
    Ok(())
}

pub fn validate_accounts_file(path: impl AsRef<Path>, ledger: &dyn Ledger) -> Result<(), ExecError> {
    let mut f = std::fs::File::open(path)?;
    validate_accounts(&mut f, ledger)
}

pub fn validate_accounts(rd: impl std::io::Read, ledger: &dyn Ledger) -> Result<(), ExecError> {
    let mut rdr = reader(rd);
    for result in rdr.deserialize() {
        let r: AccountState = result?;
        match ledger.get_account(r.account) {
            None => Err(ExecError::StringError(format!(
                "account {} does not exist",
                r.account
            ))),
            Some(acc)
                if acc.name() == r.name && acc.balance() == r.balance && acc.bank() == r.bank =>
            {
                Ok(())
            }
            Some(acc) => Err(ExecError::StringError(format!(
                "account {} is {}/{}/{:?}, expected {}/{}/{:?}",
                r.account,
                acc.name(),
                acc.balance(),
                acc.bank(),
                r.name,
                r.balance,
                r.bank
            ))),
        }?
    }
    Ok(())
}

pub fn dump_accounts(wr: impl std::io::Write, ledger: &dyn Ledger) -> Result<(), ExecError> {
    let mut wrr = csv::WriterBuilder::new().delimiter(b',').from_writer(wr);
    for (account, state) in ledger.accounts() {
        wrr.serialize(AccountState {
            account,
            name: state.name().to_string(),
            balance: state.balance(),
            bank: state.bank(),
        })?
    }
    wrr.flush()?;
    Ok(())
}

#[cfg(test)]
use crate::basic::MemoryLedger;

#[test]
fn test_missing_amount_stops_replay() {
    let mut ledger = MemoryLedger::new();
    let script = "op, account, name\nopen, 1, nobody\n";
    match execute_csv(std::io::Cursor::new(script.as_bytes()), &mut ledger) {
        Err(ExecError::StringError(msg)) => assert_eq!(msg, "Open has no amount"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(ledger.get_account(AccountId::from(1)).is_none());
}

#[test]
fn test_unknown_account_stops_replay() {
    let mut ledger = MemoryLedger::new();
    let script = "op, account, amount\ncredit, 4, 10\n";
    match execute_csv(std::io::Cursor::new(script.as_bytes()), &mut ledger) {
        Err(ExecError::AccountError(AccountError::UnknownAccount(id))) => {
            assert_eq!(id, AccountId::from(4))
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_duplicate_open_stops_replay() {
    let mut ledger = MemoryLedger::new();
    let script = "op, account, amount, name\nopen, 1, 1, a\nopen, 1, 2, b\n";
    assert!(execute_csv(std::io::Cursor::new(script.as_bytes()), &mut ledger).is_err());
    assert_eq!(ledger.get_account(AccountId::from(1)).map(Account::name), Some("a"));
}

#[test]
fn test_validate_detects_mismatch() -> Result<(), ExecError> {
    let mut ledger = MemoryLedger::new();
    let script = "op, account, amount, name\nopen, 1, 10.5, a\n";
    execute_csv(std::io::Cursor::new(script.as_bytes()), &mut ledger)?;
    let good = "account, name, balance, bank\n1, a, 10.50,\n";
    validate_accounts(std::io::Cursor::new(good.as_bytes()), &ledger)?;
    let bad = "account, name, balance, bank\n1, a, 10.51,\n";
    assert!(validate_accounts(std::io::Cursor::new(bad.as_bytes()), &ledger).is_err());
    let missing = "account, name, balance, bank\n2, a, 10.5,\n";
    assert!(validate_accounts(std::io::Cursor::new(missing.as_bytes()), &ledger).is_err());
    Ok(())
}
