//! sr: command line for the stackrl experience sampler.
//!
//! Subcommands:
//! - sample
//! - worker (spawned by `sample`, not for interactive use)
//! - corpus info | append | take

use std::env;
use std::fmt::Display;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sr_batch::{BatchWriter, BatchWriterConfig};
use sr_coordinator::{Coordinator, Launcher, UniformPolicy};
use sr_curriculum::{append_records, read_offset, record_count, CorpusReader, CorpusRecord};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Unwrap or print `what: err` and exit 1.
fn or_exit<T, E: Display>(r: Result<T, E>, what: &str) -> T {
    r.unwrap_or_else(|e| {
        eprintln!("{what}: {e}");
        process::exit(1);
    })
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    args.get(i + 1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            eprintln!("Invalid or missing {flag} value");
            process::exit(1);
        })
}

fn print_help() {
    eprintln!(
        r#"sr - experience sampler for block-stacking RL

USAGE:
    sr <COMMAND> [OPTIONS]

COMMANDS:
    sample              Run rollout windows and write training batches
    corpus info         Print record count and persisted offset of a board corpus
    corpus append       Append random playable records to a board corpus
    corpus take         Read one chunk from a board corpus, advancing its offset
    worker              Serve one worker slot over stdin/stdout (spawned by sample)

OPTIONS:
    -h, --help          Print this help message
    -V, --version       Print version
"#
    );
}

fn print_version() {
    println!("sr {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_worker() {
    init_logging();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut r = stdin.lock();
    let mut w = BufWriter::new(stdout.lock());
    if let Err(e) = sr_worker::run_worker(&mut r, &mut w) {
        // Already logged with slot context by the worker.
        log::debug!("worker exiting: {e}");
        process::exit(1);
    }
}

fn cmd_sample(args: &[String]) {
    let mut config_path: Option<String> = None;
    let mut out: Option<String> = None;
    let mut rollouts: u32 = 1;
    let mut seed: Option<u64> = None;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!(
                    r#"sr sample

USAGE:
    sr sample --config cfg.yaml [--rollouts N] [--out DIR] [--seed S]

OPTIONS:
    --config PATH    Path to YAML config (required)
    --rollouts N     Rollout windows to sample (default: 1)
    --out DIR        Write batch_<idx>.safetensors files here
    --seed S         Override sampler.seed
"#
                );
                return;
            }
            "--config" => {
                config_path = Some(parse_value(args, i, "--config"));
                i += 2;
            }
            "--out" => {
                out = Some(parse_value(args, i, "--out"));
                i += 2;
            }
            "--rollouts" => {
                rollouts = parse_value(args, i, "--rollouts");
                i += 2;
            }
            "--seed" => {
                seed = Some(parse_value(args, i, "--seed"));
                i += 2;
            }
            other => {
                eprintln!("Unknown option for `sr sample`: {other}");
                eprintln!("Run `sr sample --help` for usage.");
                process::exit(1);
            }
        }
    }
    let config_path = config_path.unwrap_or_else(|| {
        eprintln!("Missing --config");
        process::exit(1);
    });

    init_logging();
    let config_bytes = or_exit(std::fs::read(&config_path), "Failed to read config file");
    let mut cfg = or_exit(sr_core::Config::load(&config_path), "Failed to load config");
    if seed.is_some() {
        cfg.sampler.seed = seed;
    }
    let config_hash = sr_logging::hash_config_bytes(&config_bytes);
    let kernel = cfg.sampler.kernel.clone();

    let num_actions = or_exit(sr_sim::kernel_by_name(&kernel, 0), "Unknown kernel").num_actions();
    let mut writer = out.map(|dir| {
        or_exit(
            BatchWriter::new(BatchWriterConfig {
                out_dir: PathBuf::from(dir),
                obs_schema_id: kernel.clone(),
                config_hash: Some(config_hash.clone()),
            }),
            "Failed to open batch dir",
        )
    });

    let launcher = or_exit(Launcher::current_exe(), "Failed to locate sr executable");
    let mut coordinator = or_exit(
        Coordinator::new(cfg, &launcher, Box::new(UniformPolicy::new(num_actions))),
        "Failed to start sampler",
    );

    let mut failed = None;
    for epoch in 0..rollouts {
        let rollout = match coordinator.sample(epoch) {
            Ok(r) => r,
            Err(e) => {
                failed = Some(e.to_string());
                break;
            }
        };
        if let Some(w) = writer.as_mut() {
            match w.write(&rollout.batch) {
                Ok(path) => log::info!("wrote {}", path.display()),
                Err(e) => {
                    failed = Some(format!("Failed to write batch: {e}"));
                    break;
                }
            }
        }
        match serde_json::to_string(&rollout.stats) {
            Ok(stats) => println!("rollout {}: {}", epoch + 1, stats),
            Err(e) => {
                failed = Some(format!("Failed to encode stats: {e}"));
                break;
            }
        }
    }

    // Close before any exit so workers are reaped and the shared segments unlinked.
    let exits = or_exit(coordinator.close(), "Failed to shut down sampler");
    if let Some(e) = failed {
        eprintln!("Sampling failed: {e}");
        process::exit(1);
    }
    if let Some(bad) = exits.iter().find(|e| !e.ok) {
        eprintln!(
            "worker {} exited {}: {}",
            bad.worker,
            bad.status(),
            bad.error.as_deref().unwrap_or("-")
        );
        process::exit(1);
    }
}

const CORPUS_USAGE: &str = r#"sr corpus

USAGE:
    sr corpus info <file>
    sr corpus append <file> --random N [--seed S]
    sr corpus take <file> [--count N]
"#;

fn cmd_corpus(args: &[String]) {
    if args.first().is_some_and(|a| a == "--help" || a == "-h") {
        println!("{CORPUS_USAGE}");
        return;
    }
    if args.len() < 2 {
        eprintln!("{CORPUS_USAGE}");
        process::exit(1);
    }
    let file = PathBuf::from(&args[1]);
    let rest = &args[2..];
    match args[0].as_str() {
        "info" => {
            let records = or_exit(record_count(&file), "Failed to read corpus");
            let offset = or_exit(read_offset(&file), "Failed to read corpus offset");
            println!("records: {records}");
            println!("offset: {offset}");
        }
        "append" => {
            let mut count: Option<usize> = None;
            let mut seed: u64 = 0;
            let mut i = 0usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--random" => {
                        count = Some(parse_value(rest, i, "--random"));
                        i += 2;
                    }
                    "--seed" => {
                        seed = parse_value(rest, i, "--seed");
                        i += 2;
                    }
                    other => {
                        eprintln!("Unknown option for `sr corpus append`: {other}");
                        process::exit(1);
                    }
                }
            }
            let count = count.unwrap_or_else(|| {
                eprintln!("Missing --random");
                process::exit(1);
            });
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let records: Vec<CorpusRecord> =
                (0..count).map(|_| CorpusRecord::random(&mut rng)).collect();
            or_exit(append_records(&file, &records), "Failed to append records");
            println!("appended {count} records to {}", file.display());
        }
        "take" => {
            let mut count: usize = 1;
            let mut i = 0usize;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--count" => {
                        count = parse_value(rest, i, "--count");
                        i += 2;
                    }
                    other => {
                        eprintln!("Unknown option for `sr corpus take`: {other}");
                        process::exit(1);
                    }
                }
            }
            if count == 0 {
                eprintln!("--count must be > 0");
                process::exit(1);
            }
            let chunk = or_exit(CorpusReader::new(&file, count).read_chunk(), "Failed to read corpus");
            for r in chunk {
                let board: String = r.board.as_bytes().iter().map(|b| format!("{b:02x}")).collect();
                println!("{board} piece={} level={}", r.piece, r.level);
            }
        }
        other => {
            eprintln!("Unknown corpus subcommand: {other}");
            process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        process::exit(0);
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => print_help(),
        "-V" | "--version" => print_version(),
        "worker" => cmd_worker(),
        "sample" => cmd_sample(&args[2..]),
        "corpus" => cmd_corpus(&args[2..]),
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            process::exit(1);
        }
    }
}
