use std::process::Command;

fn sr_bin() -> String {
    env!("CARGO_BIN_EXE_sr").to_string()
}

#[test]
fn version_prints_crate_version() {
    let out = Command::new(sr_bin()).arg("--version").output().unwrap();
    assert!(out.status.success());
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(s.starts_with("sr "));
}

#[test]
fn help_lists_subcommands() {
    let out = Command::new(sr_bin()).arg("--help").output().unwrap();
    assert!(out.status.success());
    let s = String::from_utf8_lossy(&out.stderr);
    assert!(s.contains("sample"));
    assert!(s.contains("corpus take"));
}

#[test]
fn sample_help_runs() {
    let out = Command::new(sr_bin())
        .args(["sample", "--help"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("sr sample"));
}

#[test]
fn unknown_command_fails() {
    let out = Command::new(sr_bin()).arg("train").output().unwrap();
    assert!(!out.status.success());
}

#[test]
fn sample_requires_config() {
    let out = Command::new(sr_bin()).arg("sample").output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--config"));
}

#[test]
fn degenerate_window_is_rejected_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("cfg.yaml");
    std::fs::write(
        &cfg,
        "sampler:\n  n_workers: 1\n  env_per_worker: 2\n  worker_steps: 5\n  weight_sync_per_epoch: 2\n",
    )
    .unwrap();
    let out = Command::new(sr_bin())
        .args(["sample", "--config", cfg.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid config"));
}
