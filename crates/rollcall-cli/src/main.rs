use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_hw::camera::probe;
use rollcall_hw::NetworkOpener;
use rollcall_store::paths::{default_config_path, default_db_path};
use rollcall_store::{parse_utc_offset, Ledger, OutBeforeIn, Store};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Daemon configuration file to take the database and time zone from
    /// (default: $XDG_CONFIG_HOME/rollcall/rollcalld.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configured `db_path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Reporting time zone offset, overriding `reporting_utc_offset`
    #[arg(long, global = true)]
    utc_offset: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled identities and their poses
    Identities,
    /// Show the attendance summary for a date range
    Attendance {
        /// First day (YYYY-MM-DD, default: today)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day (YYYY-MM-DD, default: same as --from)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 500)]
        limit: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Deactivate an identity so it is no longer recognized
    Deactivate {
        /// Identity ID
        id: String,
    },
    /// Delete attendance rows older than the retention window
    Cleanup {
        /// Days of attendance to keep
        #[arg(long, default_value_t = 365)]
        days: u32,
    },
    /// Open a camera stream and read one frame
    Probe {
        /// Stream URL, e.g. http://10.0.0.5/mjpeg
        address: String,
    },
}

/// The daemon settings the CLI shares. Other keys in the file are ignored.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct SharedConfig {
    db_path: PathBuf,
    reporting_utc_offset: String,
    out_before_in: OutBeforeIn,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            reporting_utc_offset: "+05:30".to_string(),
            out_before_in: OutBeforeIn::default(),
        }
    }
}

impl SharedConfig {
    /// Same precedence as the daemon: file, then `ROLLCALL_*` variables.
    /// Command-line flags are applied on top by the caller.
    fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            SharedConfig::default()
        };
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_REPORTING_UTC_OFFSET") {
            config.reporting_utc_offset = v;
        }
        Ok(config)
    }
}

async fn open(cli: &Cli) -> Result<(Store, Ledger)> {
    let mut config = SharedConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(offset) = &cli.utc_offset {
        config.reporting_utc_offset = offset.clone();
    }

    tracing::debug!(path = %config.db_path.display(), offset = %config.reporting_utc_offset, "opening database");
    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let offset = parse_utc_offset(&config.reporting_utc_offset)
        .with_context(|| format!("invalid offset: {}", config.reporting_utc_offset))?;
    let ledger = Ledger::new(store.clone(), offset, config.out_before_in);
    Ok((store, ledger))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Probe { address } => {
            let address = address.clone();
            let report = tokio::task::spawn_blocking(move || probe(&NetworkOpener::default(), &address)).await??;
            println!(
                "{}: {}x{} (first frame in {} ms)",
                report.address,
                report.width,
                report.height,
                report.elapsed.as_millis()
            );
        }
        Commands::Identities => {
            let (store, _) = open(&cli).await?;
            let identities = store.identity_summaries().await?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for identity in identities {
                let poses: Vec<&str> = identity.poses.iter().map(|p| p.as_str()).collect();
                println!(
                    "{:<10} {:<24} {:<16} {}{} poses: {}",
                    identity.id,
                    identity.name,
                    identity.department,
                    identity.pose_count(),
                    if identity.is_active { "" } else { " (inactive)" },
                    poses.join(", ")
                );
            }
        }
        Commands::Attendance { from, to, limit, json } => {
            let (_, ledger) = open(&cli).await?;
            let from = from.unwrap_or_else(|| ledger.today());
            let to = to.unwrap_or(from);
            let rows = ledger.summary(from, to, *limit).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No attendance between {from} and {to}");
            } else {
                for row in rows {
                    let fmt = |t: Option<chrono::NaiveTime>| t.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
                    println!(
                        "{} {:<10} {:<24} in {:<8} out {:<8} {}",
                        row.day,
                        row.identity_id,
                        row.name,
                        fmt(row.first_in),
                        fmt(row.last_out),
                        row.duration.unwrap_or_default()
                    );
                }
            }
        }
        Commands::Deactivate { id } => {
            let (store, _) = open(&cli).await?;
            if store.deactivate_identity(id).await? {
                println!("Deactivated {id}");
            } else {
                println!("No identity with id {id}");
            }
        }
        Commands::Cleanup { days } => {
            let (_, ledger) = open(&cli).await?;
            let deleted = ledger.cleanup_before(ledger.today(), *days).await?;
            println!("Deleted {deleted} attendance rows older than {days} days");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_config_reads_daemon_file() {
        let config: SharedConfig = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:9000"
            db_path = "/srv/rollcall/attendance.db"
            reporting_utc_offset = "-04:00"
            out_before_in = "ignore"

            [[cameras]]
            label = "lobby"
            id = "lobby_camera"
            address = "http://10.0.0.7/mjpeg"
            purpose = "IN"
            "#,
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/rollcall/attendance.db"));
        assert_eq!(config.reporting_utc_offset, "-04:00");
        assert_eq!(config.out_before_in, OutBeforeIn::Ignore);
    }

    #[test]
    fn test_shared_config_defaults_match_daemon() {
        let config: SharedConfig = toml::from_str("frame_skip = 2").unwrap();
        assert_eq!(config.db_path, default_db_path());
        assert_eq!(config.reporting_utc_offset, "+05:30");
        assert_eq!(config.out_before_in, OutBeforeIn::TreatAsIn);
    }

    #[test]
    fn test_flags_are_optional_overrides() {
        let cli = Cli::try_parse_from(["rollcall", "identities"]).unwrap();
        assert!(cli.db.is_none());
        assert!(cli.utc_offset.is_none());
        let cli = Cli::try_parse_from(["rollcall", "--utc-offset", "Z", "cleanup", "--days", "30"]).unwrap();
        assert_eq!(cli.utc_offset.as_deref(), Some("Z"));
        assert!(matches!(cli.command, Commands::Cleanup { days: 30 }));
    }
}
