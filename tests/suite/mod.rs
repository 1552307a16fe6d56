use cucumber::{gherkin::Step, given, then, when, World as _};
use futures::FutureExt as _;
use minibank::common::{AccountError, AccountId, BankId, Banking, Ledger};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Debug;

/// Scenarios tagged `@extended` only run when this variable is set.
pub const EXTENDED_ENV: &str = "MINIBANK_EXTENDED";

pub type DynLedger = Box<dyn Ledger>;

pub trait Factory {
    fn new() -> DynLedger;
}

/// Accounts and banks are referred to by label in the steps.
#[derive(cucumber::World, Default)]
pub struct Test {
    ledger: Option<DynLedger>,
    accounts: HashMap<String, AccountId>,
    banks: HashMap<String, BankId>,
    last: Option<Result<(), AccountError>>,
}

impl Debug for Test {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Test")
    }
}

impl Test {
    fn ledger(&mut self) -> &mut dyn Ledger {
        match self.ledger.as_deref_mut() {
            Some(ledger) => ledger,
            None => panic!("ledger is not selected"),
        }
    }

    fn account(&self, label: &str) -> AccountId {
        match self.accounts.get(label) {
            Some(&id) => id,
            None => panic!("no account labelled {label}"),
        }
    }

    fn bank(&self, label: &str) -> BankId {
        match self.banks.get(label) {
            Some(&id) => id,
            None => panic!("no bank labelled {label}"),
        }
    }

    fn open(&mut self, label: String, name: String, balance: &str) {
        let id = self.ledger().open_account(name, decimal(balance)).unwrap();
        self.accounts.insert(label, id);
    }
}

fn decimal(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap()
}

#[given(regex = r#"^an account "([^"]*)" with balance (-?\d*\.?\d+)$"#)]
fn open_account(w: &mut Test, name: String, balance: String) {
    w.open(name.clone(), name, &balance)
}

#[given(regex = r#"^an account "([^"]*)" named "([^"]*)" with balance (-?\d*\.?\d+)$"#)]
fn open_labelled_account(w: &mut Test, label: String, name: String, balance: String) {
    w.open(label, name, &balance)
}

#[given(regex = r#"^a bank "([^"]*)"$"#)]
fn open_bank(w: &mut Test, name: String) {
    let id = w.ledger().open_bank(Some(name.clone())).unwrap();
    w.banks.insert(name, id);
}

#[when(regex = r#"^(-?\d*\.?\d+) is debited from "([^"]*)"$"#)]
fn debit(w: &mut Test, amount: String, label: String) {
    let id = w.account(&label);
    w.last = Some(w.ledger().debit(id, decimal(&amount)));
}

#[when(regex = r#"^(-?\d*\.?\d+) is credited to "([^"]*)"$"#)]
fn credit(w: &mut Test, amount: String, label: String) {
    let id = w.account(&label);
    w.last = Some(w.ledger().credit(id, decimal(&amount)));
}

#[when(regex = r#"^"([^"]*)" transfers (-?\d*\.?\d+) from "([^"]*)" to "([^"]*)"$"#)]
fn transfer(w: &mut Test, bank: String, amount: String, origin: String, target: String) {
    let (bank, origin, target) = (w.bank(&bank), w.account(&origin), w.account(&target));
    w.last = Some(w.ledger().transfer(bank, origin, target, decimal(&amount)));
}

#[when(regex = r#"^"([^"]*)" transfers (\d*\.?\d+) from "([^"]*)" to "([^"]*)" (\d+) times$"#)]
fn transfer_repeatedly(
    w: &mut Test,
    bank: String,
    amount: String,
    origin: String,
    target: String,
    times: usize,
) {
    let (bank, origin, target) = (w.bank(&bank), w.account(&origin), w.account(&target));
    let amount = decimal(&amount);
    let status = (0..times).try_for_each(|_| w.ledger().transfer(bank, origin, target, amount));
    w.last = Some(status);
}

#[when(regex = r#"^"([^"]*)" enrolls "([^"]*)"$"#)]
fn enroll(w: &mut Test, bank: String, label: String) {
    let (bank, id) = (w.bank(&bank), w.account(&label));
    w.last = Some(w.ledger().add_account(bank, id));
}

#[when(regex = r#"^"([^"]*)" is renamed to "([^"]*)"$"#)]
fn rename(w: &mut Test, label: String, name: String) {
    let id = w.account(&label);
    if let Some(acc) = w.ledger().get_account_mut(id) {
        acc.set_name(name)
    }
}

#[then("the operation succeeds")]
fn succeeds(w: &mut Test) {
    assert_eq!(w.last.take(), Some(Ok(())));
}

#[then(regex = r#"^the operation fails with "([^"]*)"$"#)]
fn fails_with(w: &mut Test, message: String) {
    match w.last.take() {
        Some(Err(e)) => assert_eq!(e.to_string(), message),
        other => panic!("expected failure \"{message}\", got {other:?}"),
    }
}

#[then(regex = r#"^the balance of "([^"]*)" is "([^"]*)"$"#)]
fn balance_is(w: &mut Test, label: String, expected: String) {
    let id = w.account(&label);
    let balance = w.ledger().balance_of(id).unwrap();
    assert_eq!(balance.to_string(), expected);
}

#[then(regex = r#"^the balance of "([^"]*)" is positive$"#)]
fn balance_is_positive(w: &mut Test, label: String) {
    let id = w.account(&label);
    let balance = w.ledger().balance_of(id).unwrap();
    assert!(balance > Decimal::ZERO, "balance {balance} is not positive");
}

#[then(regex = r#"^"([^"]*)" is named "([^"]*)"$"#)]
fn is_named(w: &mut Test, label: String, name: String) {
    let id = w.account(&label);
    let acc = w.ledger().get_account(id).unwrap();
    assert_eq!(acc.name(), name);
}

#[then(regex = r#"^"([^"]*)" (equals|does not equal) "([^"]*)"$"#)]
fn compare(w: &mut Test, left: String, relation: String, right: String) {
    let (left, right) = (w.account(&left), w.account(&right));
    let ledger = w.ledger();
    let equal = ledger.get_account(left) == ledger.get_account(right);
    assert_eq!(equal, relation == "equals");
}

#[then(regex = r#"^"([^"]*)" has (\d+) accounts?$"#)]
fn bank_has(w: &mut Test, bank: String, count: usize) {
    let id = w.bank(&bank);
    let bank = w.ledger().get_bank(id).unwrap();
    assert_eq!(bank.accounts().len(), count);
}

#[then(regex = r#"^"([^"]*)" lists "([^"]*)"$"#)]
fn bank_lists(w: &mut Test, bank: String, labels: String) {
    let expected: Vec<AccountId> = labels.split(',').map(|l| w.account(l.trim())).collect();
    let id = w.bank(&bank);
    let bank = w.ledger().get_bank(id).unwrap();
    assert_eq!(bank.accounts(), &expected[..]);
}

#[then(regex = r#"^"([^"]*)" finds "([^"]*)" by name "([^"]*)"$"#)]
fn bank_finds(w: &mut Test, bank: String, label: String, name: String) {
    let (bank, expected) = (w.bank(&bank), w.account(&label));
    assert_eq!(w.ledger().find_account(bank, &name), Some(expected));
}

#[then(regex = r#"^"([^"]*)" finds nothing by name "([^"]*)"$"#)]
fn bank_finds_nothing(w: &mut Test, bank: String, name: String) {
    let bank = w.bank(&bank);
    assert_eq!(w.ledger().find_account(bank, &name), None);
}

#[then(regex = r#"^"([^"]*)" belongs to "([^"]*)"$"#)]
fn belongs_to(w: &mut Test, label: String, bank: String) {
    let id = w.account(&label);
    let name = w.ledger().bank_of(id).and_then(|b| b.name().map(String::from));
    assert_eq!(name.as_deref(), Some(bank.as_str()));
}

#[then(regex = r#"^"([^"]*)" belongs to no bank$"#)]
fn belongs_to_none(w: &mut Test, label: String) {
    let id = w.account(&label);
    assert!(w.ledger().bank_of(id).is_none());
}

#[when("execute csv")]
fn execute_csv(w: &mut Test, step: &Step) {
    let x = step.docstring.clone().unwrap();
    if let Err(e) = minibank::libcsv::execute_csv(std::io::Cursor::new(x.as_bytes()), w.ledger()) {
        panic!("error occurred: {e}")
    }
}

#[then("validate accounts")]
fn validate_accounts(w: &mut Test, step: &Step) {
    let x = step.docstring.clone().unwrap();
    if let Err(e) = minibank::libcsv::validate_accounts(std::io::Cursor::new(x.as_bytes()), w.ledger()) {
        panic!("error occurred: {e}")
    }
}

fn is_extended(tags: &[String]) -> bool {
    tags.iter().any(|t| t == "extended")
}

// `cargo test <name>` passes the filter positionally, plus libtest flags
// the cucumber parser does not know. These are accepted here and the
// positional one filters scenarios by name.
#[derive(clap::Args)]
struct CustomCli {
    testname: Option<String>,
    #[arg(long)]
    format: Option<String>,
    #[arg(short = 'Z')]
    z: Option<String>,
    #[arg(long = "show-output")]
    show_output: bool,
    #[arg(long)]
    nocapture: bool,
    #[arg(long)]
    exact: bool,
}

/// Runs the features with a fresh ledger per scenario and exits non-zero
/// on failure.
pub fn run_and_exit<F: Factory + 'static>(features: &str) {
    let extended = std::env::var_os(EXTENDED_ENV).is_some();
    let cli = cucumber::cli::Opts::<_, _, _, CustomCli>::parsed();
    let testname = cli.custom.testname.clone();
    let cucumber = Test::cucumber().with_cli(cli).before(|_, _, _, w| {
        w.ledger = Some(F::new());
        async {}.boxed_local()
    });
    futures::executor::block_on(cucumber.filter_run_and_exit(
        features,
        move |feature, _, scenario| {
            let selected = testname.as_deref().map_or(true, |n| scenario.name.contains(n));
            selected && (extended || !(is_extended(&feature.tags) || is_extended(&scenario.tags)))
        },
    ));
}
