//! Admin CLI for a LakeSoul metadata catalog: migrate the Postgres
//! schema, run a compaction pass, or sweep TTL-expired partitions/files.
//!
//! Grounded in `telemetry-admin-cli`'s subcommand-per-maintenance-task
//! shape, down to reading connection settings from the environment
//! before dispatching on `Commands`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lakesoul_metadata::catalog::postgres::{migrate, PostgresCatalog};
use lakesoul_metadata::catalog::CatalogClient;
use lakesoul_metadata::compaction::{self, planner::CompactionThresholds};
use lakesoul_metadata::config::Config;
use lakesoul_metadata::io::ObjectStoreParquetIo;
use lakesoul_metadata::snapshot::SnapshotCache;
use lakesoul_metadata::ttl;
use lakesoul_metadata::TableId;

#[derive(Parser, Debug)]
#[clap(name = "LakeSoul Metadata Admin")]
#[clap(about = "CLI to administer a LakeSoul metadata catalog", version, author)]
#[clap(arg_required_else_help(true))]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the Postgres metadata schema.
    Migrate,

    /// Run one compaction pass over every partition of a table.
    Compact { table_id: uuid::Uuid },

    /// Tombstone partitions past `partition_ttl_days` and record
    /// pre-barrier files past `compaction_ttl_days` for deletion.
    TtlSweep { table_id: uuid::Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let config = Config::from_env().with_context(|| "reading configuration")?;

    let db_uri = match &config.catalog {
        lakesoul_metadata::config::CatalogBackend::Postgres { db_uri } => db_uri.clone(),
        other => anyhow::bail!("admin CLI requires a Postgres catalog, got {other:?}"),
    };

    match args.command {
        Commands::Migrate => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .connect(&db_uri)
                .await
                .with_context(|| "connecting to lakesoul metadata database")?;
            migrate(pool).await?;
            tracing::info!("schema up to date");
        }
        Commands::Compact { table_id } => {
            let catalog = PostgresCatalog::connect(&db_uri).await?;
            run_compaction(&catalog, TableId(table_id)).await?;
        }
        Commands::TtlSweep { table_id } => {
            let catalog = PostgresCatalog::connect(&db_uri).await?;
            let snapshots = SnapshotCache::new(config.snapshot_cache_ttl);
            let tombstoned = ttl::sweep_partition_ttl(&catalog, &snapshots, TableId(table_id)).await?;
            let discarded = ttl::sweep_compaction_ttl(&catalog, TableId(table_id)).await?;
            tracing::info!(
                tombstoned = tombstoned.len(),
                discarded,
                "ttl sweep complete"
            );
        }
    }
    Ok(())
}

async fn run_compaction(catalog: &dyn CatalogClient, table_id: TableId) -> Result<()> {
    let table = catalog.get_table_info(table_id).await?;
    let thresholds = CompactionThresholds::from_table(&table);
    let io = ObjectStoreParquetIo::from_table_path(&table.path)
        .with_context(|| format!("opening object store for table path {}", table.path))?;

    for partition in catalog.list_partitions(table_id).await? {
        let files = lakesoul_metadata::resolver::resolve(
            catalog,
            table_id,
            &partition,
            lakesoul_metadata::time::ReadType::Full,
        )
        .await?;
        let candidates = compaction::select_candidates(files, thresholds, false);
        if candidates.is_empty() {
            continue;
        }
        let outcome = compaction::execute(
            catalog,
            &io,
            table.clone(),
            partition.partition_desc.clone(),
            partition,
            candidates,
            thresholds.level_max_file_size,
            "compacted",
        )
        .await?;
        tracing::info!(?outcome, "compaction pass complete for partition");
    }
    Ok(())
}
