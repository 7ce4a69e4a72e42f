//! Command-line front end: argument parsing and command dispatch.

use crate::config::VdiskConfig;
use crate::response::ApiResponse;
use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde_json::json;
use std::path::PathBuf;
use vdisk_storage::{AllocationStrategy, DiskEngine, FileId, FileSnapshotStore};

/// Command-line interface of the `vdisk` binary.
#[derive(Parser, Debug)]
#[command(name = "vdisk")]
#[command(about = "Simulated block device: allocation, defragmentation, fault injection", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json).
    #[arg(short, long, env = "VDISK_CONFIG", default_value = "vdisk.toml")]
    pub config: PathBuf,

    /// Override the snapshot path from the configuration.
    #[arg(short, long)]
    pub snapshot: Option<PathBuf>,

    /// Override the fault simulation seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// One operation per invocation.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Allocate consecutive blocks in the first run that is long enough.
    AllocContiguous {
        /// Blocks to allocate.
        size: usize,
    },
    /// Allocate the first free blocks regardless of adjacency.
    AllocFragmented {
        /// Blocks to allocate.
        size: usize,
    },
    /// Allocate using a hole-selection strategy.
    AllocCustom {
        /// Blocks to allocate.
        size: usize,
        /// first-fit, best-fit or worst-fit.
        #[arg(long, default_value = "first-fit")]
        strategy: String,
    },
    /// Compact used blocks toward the start of the device.
    Defragment,
    /// Mark random free blocks bad.
    MarkBad {
        /// Blocks to mark.
        count: usize,
    },
    /// Repair bad blocks with probability one half each.
    Repair,
    /// Reinitialize the device.
    Reset,
    /// Logically delete a file.
    Delete {
        /// File id.
        id: u64,
    },
    /// Restore the most recently deleted file.
    Undelete,
    /// Per-block view.
    State,
    /// Utilization and fragmentation summary.
    Stats,
    /// Active files with sizes.
    Files,
    /// Activity log.
    Logs,
    /// Free-space holes and summary.
    Holes,
}

impl Cli {
    /// Resolves the effective configuration from file plus flag overrides.
    pub fn resolve_config(&self) -> Result<VdiskConfig> {
        let mut config = VdiskConfig::load_or_default(&self.config)?;
        if let Some(path) = &self.snapshot {
            config.snapshot_path = path.clone();
        }
        if self.seed.is_some() {
            config.rng_seed = self.seed;
        }
        Ok(config)
    }

    /// Opens the engine, runs the command, and saves a final snapshot.
    pub fn run(&self) -> Result<ApiResponse> {
        let config = self.resolve_config()?;
        let engine = open_engine(&config)?;
        let response = execute(&engine, &self.command);
        if let Err(e) = engine.shutdown() {
            tracing::warn!("Final snapshot write failed: {}", e);
        }
        Ok(response)
    }
}

/// Builds an engine backed by the configured snapshot file.
pub fn open_engine(config: &VdiskConfig) -> Result<DiskEngine> {
    let store = FileSnapshotStore::new(config.snapshot_path.clone(), config.snapshot_format);
    let rng = match config.rng_seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };
    let engine = DiskEngine::open(config.engine.clone(), Box::new(store), Box::new(rng))?;
    Ok(engine)
}

/// Runs one command against `engine`.
pub fn execute(engine: &DiskEngine, command: &Command) -> ApiResponse {
    match command {
        Command::AllocContiguous { size } => ApiResponse::from_result(
            engine
                .allocate_contiguous(*size)
                .map(|a| json!({ "fileId": a.file_id, "start": a.start })),
        ),
        Command::AllocFragmented { size } => ApiResponse::from_result(
            engine
                .allocate_fragmented(*size)
                .map(|a| json!({ "fileId": a.file_id })),
        ),
        Command::AllocCustom { size, strategy } => ApiResponse::from_result(
            strategy
                .parse::<AllocationStrategy>()
                .and_then(|s| engine.allocate_custom(*size, s))
                .map(|a| json!({ "fileId": a.file_id, "strategy": a.strategy, "start": a.start })),
        ),
        Command::Defragment => ApiResponse::ok(&engine.defragment()),
        Command::MarkBad { count } => ApiResponse::ok(&engine.mark_bad(*count)),
        Command::Repair => ApiResponse::ok(&engine.repair()),
        Command::Reset => {
            engine.reset();
            ApiResponse::empty()
        }
        Command::Delete { id } => ApiResponse::from_result(engine.delete_file(FileId(*id))),
        Command::Undelete => ApiResponse::from_result(engine.undelete_last()),
        Command::State => ApiResponse::ok(&json!({ "blocks": engine.disk_state() })),
        Command::Stats => ApiResponse::ok(&engine.stats()),
        Command::Files => ApiResponse::ok(&json!({ "files": engine.list_files() })),
        Command::Logs => ApiResponse::ok(&json!({ "logs": engine.logs() })),
        Command::Holes => ApiResponse::ok(&json!({
            "holes": engine.holes(),
            "summary": engine.free_space_report(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vdisk_storage::{EngineConfig, ErrorKind};

    fn test_engine() -> DiskEngine {
        DiskEngine::in_memory(
            EngineConfig {
                block_count: 32,
                log_capacity: 100,
            },
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["vdisk", "alloc-custom", "4", "--strategy", "best-fit"]).unwrap();
        assert_eq!(
            cli.command,
            Command::AllocCustom {
                size: 4,
                strategy: "best-fit".to_string()
            }
        );

        let cli = Cli::try_parse_from(["vdisk", "--seed", "3", "mark-bad", "5"]).unwrap();
        assert_eq!(cli.seed, Some(3));
        assert_eq!(cli.command, Command::MarkBad { count: 5 });

        assert!(Cli::try_parse_from(["vdisk", "alloc-contiguous", "-3"]).is_err());
    }

    #[test]
    fn test_execute_allocate_and_stats() {
        let engine = test_engine();
        let resp = execute(&engine, &Command::AllocContiguous { size: 10 });
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["fileId"], 1);

        let stats = execute(&engine, &Command::Stats).data.unwrap();
        assert_eq!(stats["used"], 10);
        assert_eq!(stats["free"], 22);
        assert_eq!(stats["badSectors"], 0);
    }

    #[test]
    fn test_execute_unknown_strategy() {
        let engine = test_engine();
        let resp = execute(
            &engine,
            &Command::AllocCustom {
                size: 2,
                strategy: "next-fit".to_string(),
            },
        );
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().kind, ErrorKind::InvalidInput);
        assert_eq!(engine.stats().used, 0);
    }

    #[test]
    fn test_execute_custom_reports_strategy() {
        let engine = test_engine();
        let data = execute(
            &engine,
            &Command::AllocCustom {
                size: 2,
                strategy: "worst-fit".to_string(),
            },
        )
        .data
        .unwrap();
        assert_eq!(data["strategy"], "worst-fit");
        assert_eq!(data["start"], 0);
    }

    #[test]
    fn test_execute_reset_and_logs() {
        let engine = test_engine();
        execute(&engine, &Command::AllocFragmented { size: 3 });
        let resp = execute(&engine, &Command::Reset);
        assert!(resp.success);
        assert!(resp.data.is_none());
        let logs = execute(&engine, &Command::Logs).data.unwrap();
        assert_eq!(logs["logs"], json!(["disk_reset: disk reinitialized"]));
    }

    #[test]
    fn test_run_persists_between_invocations() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("state.json");
        let args = |cmd: &[&str]| {
            let mut argv = vec![
                "vdisk",
                "--config",
                "/nonexistent/vdisk.toml",
                "--snapshot",
                snapshot.to_str().unwrap(),
            ];
            argv.extend_from_slice(cmd);
            Cli::try_parse_from(argv).unwrap()
        };

        assert!(args(&["alloc-contiguous", "5"]).run().unwrap().success);
        let files = args(&["files"]).run().unwrap().data.unwrap();
        assert_eq!(files["files"][0]["id"], 1);
        assert_eq!(files["files"][0]["size"], 5);
        assert_eq!(files["files"][0]["status"], "active");
        assert!(snapshot.exists());
    }
}
