use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn coload_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("coload");
    path
}

const HEADER: &str = "CompanyName, CompanyNumber,RegAddress.AddressLine1,RegAddress.PostTown,\
RegAddress.PostCode,CompanyStatus,IncorporationDate,SICCode.SicText_1,PreviousName_1.CompanyName";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let mut extract = String::from(HEADER);
    extract.push('\n');
    extract.push_str("ACME WIDGETS LIMITED,00000001,1 Mill Lane,LEEDS,LS1 1AA,Active,05/03/2021,\"25990 - Manufacture of other fabricated metal products n.e.c.\",ACME HOLDINGS LIMITED\n");
    extract.push_str("BLUEBELL BAKERY LTD,00000002,2 Church Road,YORK,YO1 7HH,Dissolved,14/11/1998,10710 - Manufacture of bread,\n");
    extract.push_str("NO NUMBER LTD,,3 Nowhere,BATH,BA1 1AA,Active,01/01/2000,,\n");
    extract.push_str("ODD STATUS LTD,00000004,4 Side Street,HULL,HU1 1AA,Bespoke-Unknown,not a date,,\n");
    fs::write(data_dir.join("BasicCompanyData.csv"), extract).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/database/companies.db"

[import]
batch_size = 2
progress_interval = 1
expected_total = 4
"#,
        root.display()
    );

    let config_path = config_dir.join("coload.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn data_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("data")
}

fn run_coload(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = coload_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run coload binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_coload(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_coload(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_coload(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_directory_prints_summary() {
    let (_tmp, config_path) = setup_test_env();
    let data = data_dir(&config_path);

    let (stdout, stderr, success) = run_coload(
        &config_path,
        &["import", data.to_str().unwrap(), "--progress", "off"],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed: 4"), "{}", stdout);
    assert!(stdout.contains("inserted: 3"), "{}", stdout);
    assert!(stdout.contains("skipped: 1"), "{}", stdout);
    assert!(stdout.contains("missing_company_number: 1"), "{}", stdout);
    assert!(stdout.contains("field_parse:date_of_creation: 1"), "{}", stdout);
    assert!(stdout.contains("search mirror: rebuilt (3 rows)"), "{}", stdout);
    assert!(stdout.contains("unmapped statuses:"), "{}", stdout);
    assert!(stdout.contains("\"Bespoke-Unknown\": 1"), "{}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_import_twice_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();
    let data = data_dir(&config_path);

    for _ in 0..2 {
        let (_, stderr, success) = run_coload(
            &config_path,
            &["import", data.to_str().unwrap(), "--progress", "off"],
        );
        assert!(success, "import failed: {}", stderr);
    }

    let (stdout, stderr, success) = run_coload(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Companies:       3"), "{}", stdout);
    assert!(stdout.contains("consistent"), "{}", stdout);
    assert!(stdout.contains("bespoke-unknown"), "{}", stdout);
    assert!(stdout.contains("BasicCompanyData.csv"), "{}", stdout);
}

#[test]
fn test_json_progress_on_stderr() {
    let (_tmp, config_path) = setup_test_env();
    let data = data_dir(&config_path);

    let (stdout, stderr, success) = run_coload(
        &config_path,
        &["import", data.to_str().unwrap(), "--progress", "json"],
    );
    assert!(success, "import failed: {}", stderr);
    assert!(stderr.contains("\"event\":\"progress\""), "{}", stderr);
    assert!(!stdout.contains("\"event\""));
}

#[test]
fn test_continue_after_complete_run_processes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    let data = data_dir(&config_path);
    let data = data.to_str().unwrap();

    run_coload(&config_path, &["import", data, "--progress", "off"]);
    let (stdout, stderr, success) =
        run_coload(&config_path, &["import", data, "--continue", "--progress", "off"]);
    assert!(success, "continue failed: {}", stderr);
    assert!(stdout.contains("resumed at: 4"), "{}", stdout);
    assert!(stdout.contains("processed: 0"), "{}", stdout);
}

#[test]
fn test_search_finds_previous_name() {
    let (_tmp, config_path) = setup_test_env();
    let data = data_dir(&config_path);

    run_coload(&config_path, &["import", data.to_str().unwrap(), "--progress", "off"]);

    let (stdout, stderr, success) = run_coload(&config_path, &["search", "acme holdings"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("00000001"), "{}", stdout);

    let (stdout, _, _) = run_coload(&config_path, &["search", "leeds"]);
    assert!(stdout.contains("ACME WIDGETS LIMITED"), "{}", stdout);

    let (stdout, _, _) = run_coload(&config_path, &["search", "nonexistentword"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_reindex_reports_counts() {
    let (_tmp, config_path) = setup_test_env();
    let data = data_dir(&config_path);

    run_coload(
        &config_path,
        &["import", data.to_str().unwrap(), "--strategy", "incremental", "--progress", "off"],
    );
    let (stdout, stderr, success) = run_coload(&config_path, &["reindex"]);
    assert!(success, "reindex failed: {}", stderr);
    assert!(stdout.contains("companies: 3"), "{}", stdout);
    assert!(stdout.contains("mirror rows: 3"), "{}", stdout);
    assert!(stdout.contains("mismatched: 0"), "{}", stdout);
}

#[test]
fn test_missing_source_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_coload(&config_path, &["import", "/nonexistent/extract.csv"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "{}", stderr);
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[import]\nbatch_size = 0\n").unwrap();

    let (_, stderr, success) = run_coload(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("batch_size"), "{}", stderr);
}
