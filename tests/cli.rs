use beatcop::error::exit;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Could not create temp file");
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn beatcop(args: &[&str]) -> i32 {
    let status = Command::new(env!("CARGO_BIN_EXE_beatcop"))
        .args(args)
        .env_remove("RUST_LOG")
        .status()
        .expect("Could not run beatcop");
    status.code().expect("beatcop was killed by a signal")
}

#[test]
fn test_missing_argument_is_usage_error() {
    assert_eq!(beatcop(&[]), exit::USAGE);
}

#[test]
fn test_conflicting_topology_is_config_error() {
    let file = config(
        r#"
[redis]
host = "127.0.0.1"
startup_nodes = ["127.0.0.1:7000"]

[beatcop]
command = "true"
timeout = 1000
"#,
    );
    assert_eq!(beatcop(&[file.path().to_str().unwrap()]), exit::CONFIG);
}

#[test]
fn test_missing_config_file_is_config_error() {
    assert_eq!(beatcop(&["/nonexistent/beatcop.toml"]), exit::CONFIG);
}

#[test]
fn test_unreachable_backend() {
    // Nothing listens on port 1
    let file = config(
        r#"
[redis]
host = "127.0.0.1"
port = 1

[beatcop]
command = "true"
timeout = 1000
"#,
    );
    assert_eq!(beatcop(&[file.path().to_str().unwrap()]), exit::NO_HOST);
}
