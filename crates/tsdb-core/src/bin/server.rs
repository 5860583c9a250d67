//! Server entry point (spec §6's CLI surface). The socket dispatcher that
//! decodes the length-prefixed JSON wire framing onto [`tsdb_core::db::Database`]
//! methods is an external collaborator out of scope for this crate (spec
//! §1); this binary owns only process lifecycle -- argument parsing,
//! logging setup, opening the database, and a graceful-shutdown wait --
//! so the core engine has somewhere to boot from.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tsdb_core::db::Database;
use tsdb_core::schema::Schema;

#[derive(Parser, Debug)]
#[command(name = "tsdb-server", about = "Networked time-series database server")]
struct Args {
    /// Fixed length of every time series stored in this database.
    #[arg(long, default_value_t = 100)]
    ts_length: u32,

    /// Logical database name; state lives under `data_dir/db_name`.
    #[arg(long, default_value = "default")]
    db_name: String,

    /// Directory holding all per-database state files.
    #[arg(long, default_value = "db_files")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut db = match Database::open(&args.data_dir, &args.db_name, args.ts_length, Schema::new()) {
        Ok(db) => db,
        Err(err) => {
            tracing::error!(error = %err, "failed to open database");
            std::process::exit(1);
        }
    };

    tracing::info!(
        db_name = %args.db_name,
        data_dir = %args.data_dir.display(),
        ts_length = args.ts_length,
        "database ready"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::process::exit(1);
    }

    tracing::info!("shutting down, flushing index logs");
    if let Err(err) = db.commit() {
        tracing::error!(error = %err, "failed to flush state during shutdown");
        std::process::exit(1);
    }
}
