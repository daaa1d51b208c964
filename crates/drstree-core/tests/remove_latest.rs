//! Integration tests for `remove` and `latest` on published trees.

#![cfg(unix)]

mod common;

use common::{latest_links, version_entries, version_of, Fixture};
use drstree_core::{Action, Command, TraceSink};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

/// v1 holds tas and hur; v2 holds a corrected tas only.
fn two_versions() -> Fixture {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.incoming_file("hur_Amon.nc", b"humidity");
    fixture.publish("1");

    fixture.clear_incoming();
    fixture.incoming_file("tas_Amon.nc", b"corrected");
    let mut options = fixture.make_options(
        Action::Upgrade,
        drstree_core::MigrationMode::Copy,
        "2",
    );
    options.upgrade_from_latest = true;
    fixture.make(options, &TraceSink::memory()).unwrap();
    fixture
}

#[test]
fn test_removing_only_version_clears_latest() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.publish("1");

    let options = fixture.dataset_options(Command::Remove, Action::Upgrade);
    let report = fixture.run(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 1);
    assert_eq!(report.exit_code(), 0);

    let ds = fixture.dataset_dir();
    assert!(latest_links(&ds).is_empty());
    assert!(ds.join("latest/tas_Amon.nc").symlink_metadata().is_err());
    assert!(!ds.join("v1").exists());
    assert!(fixture.root.exists());
}

#[test]
fn test_removing_newest_version_falls_back() {
    let fixture = two_versions();
    let ds = fixture.dataset_dir();
    assert_eq!(
        latest_links(&ds)["tas_Amon.nc"],
        PathBuf::from("../v2/tas_Amon.nc")
    );

    let options = fixture.dataset_options(Command::Remove, Action::Upgrade);
    fixture.run(options, &TraceSink::memory()).unwrap();

    assert!(!ds.join("v2").exists());
    assert!(!ds.join("files/d2").exists());
    let links = latest_links(&ds);
    assert_eq!(links["tas_Amon.nc"], PathBuf::from("../v1/tas_Amon.nc"));
    assert_eq!(links["hur_Amon.nc"], PathBuf::from("../v1/hur_Amon.nc"));
    assert_eq!(fs::read(ds.join("latest/tas_Amon.nc")).unwrap(), b"12345");
}

#[test]
fn test_removing_older_version_keeps_latest() {
    let fixture = two_versions();
    let ds = fixture.dataset_dir();

    let mut options = fixture.dataset_options(Command::Remove, Action::Upgrade);
    options.version = Some(version_of("1"));
    fixture.run(options, &TraceSink::memory()).unwrap();

    assert!(!ds.join("v1").exists());
    assert_eq!(version_entries(&ds, "2"), vec!["tas_Amon.nc"]);
    let links = latest_links(&ds);
    assert_eq!(links.len(), 1);
    assert_eq!(links["tas_Amon.nc"], PathBuf::from("../v2/tas_Amon.nc"));
}

#[test]
fn test_remove_todo_lists_commands() {
    let fixture = two_versions();
    let ds = fixture.dataset_dir();

    let sink = TraceSink::memory();
    let options = fixture.dataset_options(Command::Remove, Action::Todo);
    fixture.run(options, &sink).unwrap();

    let lines = sink.lines();
    assert!(lines.contains(&format!("rm -f {}", ds.join("files/d2/tas_Amon.nc").display())));
    assert!(lines.contains(&format!("rm -f {}", ds.join("v2/tas_Amon.nc").display())));
    assert!(lines.contains(&format!(
        "ln -s ../v1/tas_Amon.nc {}",
        ds.join("latest/tas_Amon.nc").display()
    )));
    assert!(ds.join("v2/tas_Amon.nc").exists());
}

#[test]
fn test_remove_unknown_version_is_counted() {
    let fixture = two_versions();
    let mut options = fixture.dataset_options(Command::Remove, Action::Upgrade);
    options.version = Some(version_of("7"));
    let report = fixture.run(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(version_entries(&fixture.dataset_dir(), "2"), vec!["tas_Amon.nc"]);
}

#[test]
fn test_repair_latest_is_idempotent() {
    let fixture = two_versions();
    let ds = fixture.dataset_dir();
    let expected = latest_links(&ds);

    fs::remove_file(ds.join("latest/tas_Amon.nc")).unwrap();
    fs::remove_file(ds.join("latest/hur_Amon.nc")).unwrap();
    symlink("../v1/tas_Amon.nc", ds.join("latest/tas_Amon.nc")).unwrap();
    symlink("../v1/gone_Amon.nc", ds.join("latest/gone_Amon.nc")).unwrap();

    let options = fixture.dataset_options(Command::Latest, Action::Upgrade);
    let report = fixture.run(options.clone(), &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 1);
    let repaired = latest_links(&ds);
    assert_eq!(repaired, expected);

    let report = fixture.run(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 0);
    assert_eq!(report.skips, 1);
    assert_eq!(latest_links(&ds), repaired);
}

#[test]
fn test_list_remove_table() {
    let fixture = two_versions();
    let sink = TraceSink::memory();
    let options = fixture.dataset_options(Command::Remove, Action::List);
    fixture.run(options, &sink).unwrap();

    let lines = sink.lines();
    assert!(lines[0].starts_with("Publication level"));
    assert!(lines
        .iter()
        .any(|l| l.contains("cmip6/Amon") && l.contains("<-") && l.contains("v2")));
}
