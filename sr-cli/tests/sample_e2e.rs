use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn sr(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sr"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn assert_ok(out: &Output) {
    assert!(
        out.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
}

fn write_config(dir: &Path, corpus: Option<&Path>) -> String {
    let board = match corpus {
        Some(p) => format!("  board_file: {}\n  board_ratio: 1.0\n", p.display()),
        None => String::new(),
    };
    let yaml = format!(
        "sampler:\n  n_workers: 2\n  env_per_worker: 3\n  worker_steps: 5\n  weight_sync_per_epoch: 1\n  seed: 17\n\
         training:\n  n_update_per_epoch: 1\n  mini_batch_size: 30\n\
         curriculum:\n{board}  chunk_records: 4\n"
    );
    let path = dir.join("cfg.yaml");
    fs::write(&path, yaml).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn sample_writes_batches_and_prints_stats() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), None);
    let out_dir = dir.path().join("batches");

    let out = sr(&[
        "sample",
        "--config",
        &cfg,
        "--rollouts",
        "2",
        "--out",
        out_dir.to_str().unwrap(),
    ]);
    assert_ok(&out);

    let stdout = String::from_utf8_lossy(&out.stdout);
    let stat_lines: Vec<&str> = stdout.lines().filter(|l| l.starts_with("rollout ")).collect();
    assert_eq!(stat_lines.len(), 2);
    assert!(stat_lines[0].contains("\"maxk\""));

    assert!(out_dir.join("batch_000000.safetensors").exists());
    assert!(out_dir.join("batch_000001.safetensors").exists());
    let meta: serde_json::Value =
        serde_json::from_slice(&fs::read(out_dir.join("batch_000001.meta.json")).unwrap()).unwrap();
    assert_eq!(meta["rows"], 30);
    assert_eq!(meta["window"], 5);
    assert_eq!(meta["envs"], 6);
    assert_eq!(meta["obs_schema_id"], "stacker");
    assert!(meta["config_hash"].as_str().is_some_and(|h| h.len() == 64));
}

#[test]
fn single_corpus_record_is_consumed_once_across_worker_processes() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("boards.bin");
    assert_ok(&sr(&[
        "corpus",
        "append",
        corpus.to_str().unwrap(),
        "--random",
        "1",
        "--seed",
        "2",
    ]));
    let cfg = write_config(dir.path(), Some(&corpus));

    let out = sr(&["sample", "--config", &cfg, "--rollouts", "400"]);
    assert_ok(&out);

    let offset = fs::read_to_string(dir.path().join("boards.bin.offset")).unwrap();
    assert_eq!(offset, "1\n");
}

#[test]
fn failed_batch_write_still_releases_shared_memory() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), None);
    let out_dir = dir.path().join("batches");
    // A directory where the first tensor tmp file should go makes that write fail.
    fs::create_dir_all(out_dir.join("batch_000000.safetensors.tmp")).unwrap();

    let child = Command::new(env!("CARGO_BIN_EXE_sr"))
        .args(["sample", "--config", &cfg, "--rollouts", "3"])
        .arg("--out")
        .arg(&out_dir)
        .env("RUST_LOG", "warn")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let pid = child.id();
    let out = child.wait_with_output().unwrap();

    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Failed to write batch"), "{stderr}");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(!stdout.contains("rollout 1:"), "{stdout}");

    let prefix = format!("sr-{pid}-");
    let leaked: Vec<String> = fs::read_dir("/dev/shm")
        .unwrap()
        .filter_map(|e| e.ok()?.file_name().into_string().ok())
        .filter(|n| n.starts_with(&prefix))
        .collect();
    assert!(leaked.is_empty(), "{leaked:?}");
}
