//! Behaviour-driven step definitions driving the sync and list commands.

use super::helpers::{Workspace, decode, names};
use super::*;
use crate::list::{ListConfig, run_list_with};
use crate::sync::{RegisterSource, SyncConfig, run_sync_with};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;
use sponsor_data::PageRequest;
use std::cell::RefCell;

const STAFFCO_ROW: &str = "StaffCo,Leeds,,Worker (A rating),Skilled Worker";
const BREW_ROW: &str = "Brew Ltd,York,North Yorkshire,Worker (B rating),Skilled Worker";

/// Aggregates command scenario state so each step takes a single world
/// argument.
#[derive(Debug)]
struct CommandWorld {
    workspace: Workspace,
    last_output: RefCell<Option<Result<Value, CliError>>>,
}

impl CommandWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::new(),
            last_output: RefCell::new(None),
        }
    }

    fn record(&self, outcome: Result<Vec<u8>, CliError>) {
        let decoded = outcome.map(|bytes| decode(&bytes));
        self.last_output.replace(Some(decoded));
    }

    fn output(&self) -> Value {
        let borrowed = self.last_output.borrow();
        match borrowed.as_ref().expect("a command ran") {
            Ok(value) => value.clone(),
            Err(err) => panic!("command failed: {err}"),
        }
    }
}

#[fixture]
fn world() -> CommandWorld {
    CommandWorld::new()
}

#[given("a register file listing StaffCo in Leeds and Brew Ltd in York")]
fn register_with_two(#[from(world)] world: &CommandWorld) {
    world.workspace.write_register(&[STAFFCO_ROW, BREW_ROW]);
}

#[when("the register file drops Brew Ltd")]
fn register_drops_brew(#[from(world)] world: &CommandWorld) {
    world.workspace.write_register(&[STAFFCO_ROW]);
}

#[when("I run the sync command against the register file")]
fn run_sync_command(#[from(world)] world: &CommandWorld) {
    let config = SyncConfig {
        database: world.workspace.database(),
        source: RegisterSource::File(world.workspace.register()),
    };
    let mut output = Vec::new();
    let outcome = run_sync_with(&config, &mut output).map(|()| output);
    world.record(outcome);
}

#[when("I list positions {from} to {to}")]
fn run_list_command(#[from(world)] world: &CommandWorld, from: u32, to: u32) {
    let config = ListConfig {
        database: world.workspace.database(),
        request: PageRequest::new(from, to, "").expect("valid page"),
    };
    let mut output = Vec::new();
    let outcome = run_list_with(&config, &mut output).map(|()| output);
    world.record(outcome);
}

#[then("the sync output reports a bootstrap pass with {count} new organisations")]
fn bootstrap_reported(#[from(world)] world: &CommandWorld, count: u64) {
    let stats = world.output();
    assert_eq!(stats["bootstrap"], true);
    assert_eq!(stats["new_organisations"], count);
}

#[then("the sync output reports {count} closed organisation")]
fn closure_reported(#[from(world)] world: &CommandWorld, count: u64) {
    let stats = world.output();
    assert_eq!(stats["bootstrap"], false);
    assert_eq!(stats["closed_organisations"], count);
    assert_eq!(stats["new_organisations"], 0);
}

#[then("the listing shows \"{expected}\"")]
fn listing_shows(#[from(world)] world: &CommandWorld, expected: String) {
    let snapshot = world.output();
    let expected: Vec<&str> = expected.split(", ").collect();
    assert_eq!(names(&snapshot), expected);
}

#[then("the command reports that the database is missing")]
fn database_missing(#[from(world)] world: &CommandWorld) {
    let borrowed = world.last_output.borrow();
    match borrowed.as_ref().expect("a command ran") {
        Err(CliError::MissingDatabase { path }) => {
            assert_eq!(*path, world.workspace.database());
        }
        other => panic!("expected MissingDatabase, found {other:?}"),
    }
}

macro_rules! register_command_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/sponsor_commands.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: CommandWorld) {
            let _ = world;
        }
    };
}

register_command_scenario!(
    sync_then_list,
    "synchronising a register file and listing it"
);
register_command_scenario!(
    leaving_sponsor_is_not_listed,
    "a sponsor that leaves the register is no longer listed"
);
register_command_scenario!(
    listing_before_sync,
    "listing before any synchronisation"
);
