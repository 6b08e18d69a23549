mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::script;
use predicates::prelude::*;
use rideshare_engine::interfaces::script::label_id;
use std::process::Command;

#[test]
fn test_malformed_rows_are_skipped() {
    let file = script(&[
        "trip,t1,,dana,3,0.01,10",
        // unknown command
        "teleport,x,,dana",
        // seats is not a number
        "book,b1,t1,riley,two",
        "book,b2,t1,riley,1",
    ])
    .unwrap();
    let trip = label_id("trip", "t1");
    let b1 = label_id("booking", "b1");
    let b2 = label_id("booking", "b2");

    let mut cmd = Command::new(cargo_bin!("rideshare-engine"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("malformed command row"))
        .stdout(predicate::str::contains(format!("{trip},dana,3,2,active")))
        .stdout(predicate::str::contains(format!("{b2},{trip},riley,1,0.100000,pending,")))
        .stdout(predicate::str::contains(b1.to_string()).not());
}

#[test]
fn test_failed_commands_do_not_stop_the_run() {
    let file = script(&[
        // missing seats column
        "trip,t0,,dana,,0.01,10",
        // no such trip
        "book,b0,nowhere,riley,1",
        // driver booking their own trip
        "trip,t1,,dana,2,0.01,10",
        "book,b1,t1,dana,1",
        // paying without a wallet
        "book,b2,t1,riley,1",
        "pay,,b2,riley",
    ])
    .unwrap();
    let trip = label_id("trip", "t1");
    let b2 = label_id("booking", "b2");

    let mut cmd = Command::new(cargo_bin!("rideshare-engine"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("kind=Validation"))
        .stderr(predicate::str::contains("kind=NotFound"))
        .stderr(predicate::str::contains("kind=SelfBooking"))
        .stderr(predicate::str::contains("kind=MissingWallet"))
        .stdout(predicate::str::contains(format!("{trip},dana,2,1,active")))
        .stdout(predicate::str::contains(format!("{b2},{trip},riley,1,0.100000,pending,")));
}

#[test]
fn test_invalid_config_file_fails() {
    let file = script(&[]).unwrap();
    let mut config = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut config, b"{\"settlement\": {\"policy\": \"barter\"}}").unwrap();

    let mut cmd = Command::new(cargo_bin!("rideshare-engine"));
    cmd.arg(file.path()).arg("--config").arg(config.path());
    cmd.assert().failure();
}
