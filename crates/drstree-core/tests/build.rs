//! Integration tests for building dataset versions with `make`.

#![cfg(unix)]

mod common;

use common::{latest_links, snapshot, version_entries, Fixture, DATASET};
use drstree_core::drs::checksum;
use drstree_core::{Action, ChecksumAlgorithm, DrsError, MigrationMode, ScratchCache, TraceSink};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

#[test]
fn test_first_version_in_symlink_mode() {
    let fixture = Fixture::new();
    let source = fixture.incoming_file("tas_Amon.nc", b"12345");

    let options = fixture.make_options(Action::Upgrade, MigrationMode::Symlink, "20250401");
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 1);
    assert_eq!(report.exit_code(), 0);

    let ds = fixture.dataset_dir();
    let data = ds.join("files/d20250401/tas_Amon.nc");
    let metadata = fs::metadata(&data).unwrap();
    assert!(metadata.is_file());
    assert_eq!(metadata.len(), 5);
    assert_eq!(fs::read_link(&data).unwrap(), source);

    assert_eq!(
        fs::read_link(ds.join("v20250401/tas_Amon.nc")).unwrap(),
        PathBuf::from("../files/d20250401/tas_Amon.nc")
    );
    assert_eq!(
        fs::read_link(ds.join("latest/tas_Amon.nc")).unwrap(),
        PathBuf::from("../v20250401/tas_Amon.nc")
    );
}

#[test]
fn test_version_entry_resolves_to_identical_bytes() {
    let fixture = Fixture::new();
    let contents = b"surface air temperature".to_vec();
    fixture.incoming_file("tas_Amon.nc", &contents);
    fixture.incoming_file("pr_Amon.nc", b"precipitation");
    fixture.publish("1");

    let ds = fixture.dataset_dir();
    assert_eq!(fs::read(ds.join("v1/tas_Amon.nc")).unwrap(), contents);
    assert_eq!(fs::read(ds.join("latest/tas_Amon.nc")).unwrap(), contents);
    assert_eq!(version_entries(&ds, "1"), vec!["pr_Amon.nc", "tas_Amon.nc"]);
    // copy mode leaves the incoming file in place
    assert!(fixture.incoming.join("tas_Amon.nc").exists());
}

#[test]
fn test_first_version_never_duplicated() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    let options = fixture.make_options(Action::List, MigrationMode::Copy, "20250401");
    let sink = TraceSink::memory();
    let report = fixture.make(options, &sink).unwrap();
    assert_eq!(report.successes, 1);

    let lines = sink.lines();
    assert!(lines.iter().any(|l| l.contains(DATASET) && l.contains("Initial")));
    assert!(!fixture.dataset_dir().exists());
}

#[test]
fn test_unchanged_resubmission_is_duplicated_dataset() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.publish("20250401");

    let options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "20250402");
    let result = fixture.make(options, &TraceSink::memory());
    assert!(matches!(result, Err(DrsError::DuplicatedDataset { .. })));
    assert!(!fixture.dataset_dir().join("v20250402").exists());
}

#[test]
fn test_upgrade_from_latest_publishes_only_new_files() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.publish("20250401");

    fixture.incoming_file("hur_Amon.nc", b"relative humidity");
    let mut options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "20250402");
    options.upgrade_from_latest = true;
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 2);

    let ds = fixture.dataset_dir();
    assert_eq!(version_entries(&ds, "20250402"), vec!["hur_Amon.nc"]);
    let links = latest_links(&ds);
    assert_eq!(links["tas_Amon.nc"], PathBuf::from("../v20250401/tas_Amon.nc"));
    assert_eq!(links["hur_Amon.nc"], PathBuf::from("../v20250402/hur_Amon.nc"));
}

#[test]
fn test_changed_file_moves_latest() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.publish("1");

    fixture.incoming_file("tas_Amon.nc", b"54321-corrected");
    fixture.publish("2");

    let ds = fixture.dataset_dir();
    assert_eq!(
        latest_links(&ds)["tas_Amon.nc"],
        PathBuf::from("../v2/tas_Amon.nc")
    );
    assert_eq!(fs::read(ds.join("v1/tas_Amon.nc")).unwrap(), b"12345");
    assert_eq!(fs::read(ds.join("latest/tas_Amon.nc")).unwrap(), b"54321-corrected");
}

#[test]
fn test_older_upgrade_is_rejected() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.publish("20250402");

    fixture.incoming_file("tas_Amon.nc", b"other");
    let options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "20250401");
    let result = fixture.make(options, &TraceSink::memory());
    assert!(matches!(result, Err(DrsError::OlderUpgrade { .. })));
}

#[test]
fn test_move_mode_drops_duplicates_from_incoming() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.incoming_file("hur_Amon.nc", b"humidity");
    fixture.publish("1");

    fixture.incoming_file("hur_Amon.nc", b"humidity-v2");
    let options = fixture.make_options(Action::Upgrade, MigrationMode::Move, "2");
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.exit_code(), 0);

    let ds = fixture.dataset_dir();
    assert_eq!(version_entries(&ds, "2"), vec!["hur_Amon.nc"]);
    assert!(!fixture.incoming.join("tas_Amon.nc").exists());
    assert!(!fixture.incoming.join("hur_Amon.nc").exists());
    let links = latest_links(&ds);
    assert_eq!(links["tas_Amon.nc"], PathBuf::from("../v1/tas_Amon.nc"));
    assert_eq!(links["hur_Amon.nc"], PathBuf::from("../v2/hur_Amon.nc"));
}

#[test]
fn test_todo_prints_trace_without_touching_disk() {
    let fixture = Fixture::new();
    let source = fixture.incoming_file("tas_Amon.nc", b"12345");
    let options = fixture.make_options(Action::Todo, MigrationMode::Copy, "3");
    let sink = TraceSink::memory();
    fixture.make(options, &sink).unwrap();

    let ds = fixture.dataset_dir();
    let lines = sink.lines();
    assert_eq!(
        lines,
        vec![
            format!("mkdir -p {}", ds.join("files/d3").display()),
            format!(
                "cp {} {}",
                source.display(),
                ds.join("files/d3/tas_Amon.nc").display()
            ),
            format!("mkdir -p {}", ds.join("v3").display()),
            format!(
                "ln -s ../files/d3/tas_Amon.nc {}",
                ds.join("v3/tas_Amon.nc").display()
            ),
            format!("mkdir -p {}", ds.join("latest").display()),
            format!("ln -s ../v3/tas_Amon.nc {}", ds.join("latest/tas_Amon.nc").display()),
        ]
    );
    assert!(!ds.exists());
}

#[test]
fn test_unresolvable_file_is_counted_and_skipped() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.incoming_file("README.nc", b"notes");
    let options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "1");
    let report = fixture.make(options, &TraceSink::memory()).unwrap();

    assert_eq!(report.successes, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(version_entries(&fixture.dataset_dir(), "1"), vec!["tas_Amon.nc"]);
}

#[test]
fn test_ignore_list_skips_files() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.incoming_file("pr_Amon.nc", b"rain");
    let ignore = fixture.temp.path().join("ignore.txt");
    fs::write(&ignore, "pr_Amon.nc\n").unwrap();

    let mut options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "1");
    options.ignore_from_incoming = Some(ignore);
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.skips, 1);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(version_entries(&fixture.dataset_dir(), "1"), vec!["tas_Amon.nc"]);
}

#[test]
fn test_commands_file_is_not_overwritten() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    let commands = fixture.temp.path().join("commands.sh");

    let mut options = fixture.make_options(Action::Todo, MigrationMode::Copy, "1");
    options.commands_file = Some(commands.clone());
    fixture.make(options.clone(), &TraceSink::memory()).unwrap();
    let written = fs::read_to_string(&commands).unwrap();
    assert!(written.contains("ln -s ../v1/tas_Amon.nc"));

    let result = fixture.make(options.clone(), &TraceSink::memory());
    assert!(matches!(result, Err(DrsError::Config { .. })));

    options.overwrite_commands_file = true;
    fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(fs::read_to_string(&commands).unwrap(), written);
}

#[test]
fn test_scratch_cache_reused_until_rescan() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    let cache = fixture.temp.path().join("cache.json");

    let mut options = fixture.make_options(Action::Todo, MigrationMode::Copy, "1");
    options.cache_path = Some(cache.clone());
    let first = fixture.make(options.clone(), &TraceSink::memory()).unwrap();
    assert_eq!(first.successes, 1);
    assert!(cache.exists());

    fixture.clear_incoming();
    let cached = fixture.make(options.clone(), &TraceSink::memory()).unwrap();
    assert_eq!(cached.successes, 1);

    options.rescan = true;
    let rescanned = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(rescanned.successes, 0);
}

#[test]
fn test_size_only_detection_without_checksum() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.publish("1");

    // same size, different content: indistinguishable without a checksum
    fixture.incoming_file("tas_Amon.nc", b"54321");
    let mut options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "2");
    options.checksum = None;
    let result = fixture.make(options, &TraceSink::memory());
    assert!(matches!(result, Err(DrsError::DuplicatedDataset { .. })));
}

#[test]
fn test_directory_latest_link_is_refused() {
    let fixture = Fixture::new();
    let ds = fixture.dataset_dir();
    fs::create_dir_all(ds.join("files/d1")).unwrap();
    fs::create_dir_all(ds.join("v1")).unwrap();
    fs::write(ds.join("files/d1/tas_Amon.nc"), b"12345").unwrap();
    symlink("../files/d1/tas_Amon.nc", ds.join("v1/tas_Amon.nc")).unwrap();
    symlink("v1", ds.join("latest")).unwrap();
    let before = snapshot(&fixture.root);

    fixture.incoming_file("tas_Amon.nc", b"corrected");
    let options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "2");
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 0);
    assert_eq!(report.errors, 1);
    assert_eq!(report.exit_code(), 1);

    assert_eq!(snapshot(&fixture.root), before);
    assert_eq!(
        fs::read_link(ds.join("v1/tas_Amon.nc")).unwrap(),
        PathBuf::from("../files/d1/tas_Amon.nc")
    );
    assert_eq!(fs::read_link(ds.join("latest")).unwrap(), PathBuf::from("v1"));
    assert!(!ds.join("v2").exists());
}

#[test]
fn test_same_file_name_from_two_directories_is_counted() {
    let fixture = Fixture::new();
    fs::create_dir_all(fixture.incoming.join("a")).unwrap();
    fs::create_dir_all(fixture.incoming.join("b")).unwrap();
    let first = fixture.incoming_file("a/tas_Amon.nc", b"from a");
    let second = fixture.incoming_file("b/tas_Amon.nc", b"from b");

    let options = fixture.make_options(Action::Upgrade, MigrationMode::Move, "1");
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.exit_code(), 1);

    // the skipped file stays in incoming, the other one is published
    let published = fs::read(fixture.dataset_dir().join("v1/tas_Amon.nc")).unwrap();
    match (first.exists(), second.exists()) {
        (false, true) => assert_eq!(published, b"from a"),
        (true, false) => assert_eq!(published, b"from b"),
        other => panic!("expected exactly one file moved, got {:?}", other),
    }
}

#[test]
fn test_checksum_salted_with_file_name() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.publish("1");

    let source = fixture.incoming_file("tas_Amon.nc", b"54321");
    let cache = fixture.temp.path().join("cache.json");
    let mut options = fixture.make_options(Action::Todo, MigrationMode::Copy, "2");
    options.checksum_filename = true;
    options.cache_path = Some(cache.clone());
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.successes, 1);

    let cached = ScratchCache::new(cache).load().unwrap();
    assert!(cached.arguments.checksum_filename);
    let record = cached
        .index
        .datasets()
        .flat_map(|state| state.files.iter())
        .find(|record| record.source.as_deref() == Some(source.as_path()))
        .unwrap();
    let salted = checksum(&source, ChecksumAlgorithm::Sha256, true).unwrap();
    assert_eq!(record.checksum.as_deref(), Some(salted.as_str()));
    assert_ne!(salted, checksum(&source, ChecksumAlgorithm::Sha256, false).unwrap());
}

#[test]
fn test_ignore_from_latest_drops_listed_entries() {
    let fixture = Fixture::new();
    fixture.incoming_file("tas_Amon.nc", b"12345");
    fixture.incoming_file("hur_Amon.nc", b"humidity");
    fixture.publish("1");

    fixture.clear_incoming();
    fixture.incoming_file("tas_Amon.nc", b"corrected");
    let ignore = fixture.temp.path().join("ignore-latest.txt");
    fs::write(&ignore, "hur_Amon.nc\n").unwrap();
    let mut options = fixture.make_options(Action::Upgrade, MigrationMode::Copy, "2");
    options.ignore_from_latest = Some(ignore);
    let report = fixture.make(options, &TraceSink::memory()).unwrap();
    assert_eq!(report.exit_code(), 0);

    let ds = fixture.dataset_dir();
    let links = latest_links(&ds);
    assert_eq!(links.len(), 1);
    assert_eq!(links["tas_Amon.nc"], PathBuf::from("../v2/tas_Amon.nc"));
    assert_eq!(version_entries(&ds, "1"), vec!["hur_Amon.nc", "tas_Amon.nc"]);
}
