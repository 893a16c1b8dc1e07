//! Datalayer CLI - operator tool for the jobs-monitor data layer
//!
//! Runs one command against the configured backends and prints JSON to
//! stdout. Logs go to stderr so output can be piped.
//!
//! # Usage
//!
//! ```bash
//! # Run a query (primary preferred, cached)
//! datalayer query "SELECT COUNT(*) FROM system.lakeflow.jobs"
//!
//! # Named parameters, straight to the warehouse
//! datalayer query "SELECT * FROM system.billing.usage WHERE usage_date >= :since" \
//!     --param since=2024-06-01 --fallback-only
//!
//! # Which source tables are reachable
//! datalayer tables
//!
//! # Lakebase vs warehouse latency
//! datalayer compare
//!
//! # Verbose logging
//! RUST_LOG=datalayer_core=debug datalayer status
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Cancel the running command; the data layer is
//!   still closed before exit

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use datalayer_core::config::{self, ConfigOverrides, DataLayerConfig};
use datalayer_core::{QueryOptions, QueryParams, UnifiedDataLayer};

/// Datalayer - query the jobs-monitor data layer from the command line
#[derive(Parser, Debug)]
#[command(name = "datalayer")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "DATALAYER_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Workspace host (overrides config and DATABRICKS_HOST)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// SQL warehouse ID (overrides config and WAREHOUSE_ID)
    #[arg(long, value_name = "ID")]
    warehouse_id: Option<String>,

    /// Disable the Lakebase primary for this run
    #[arg(long)]
    no_lakebase: bool,

    /// Result cache TTL in seconds (overrides config and CACHE_TTL)
    #[arg(long, value_name = "SECS")]
    cache_ttl: Option<u64>,

    /// Logical catalog of the custom tables (requires --schema)
    #[arg(long, value_name = "NAME", requires = "schema")]
    catalog: Option<String>,

    /// Logical schema of the custom tables (requires --catalog)
    #[arg(long, value_name = "NAME", requires = "catalog")]
    schema: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "DATALAYER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a SQL query and print the result
    Query {
        /// SQL text; reference parameters as `:name`
        sql: String,

        /// Named parameter, repeatable (values parse as JSON, else string)
        #[arg(
            short = 'p',
            long = "param",
            value_name = "NAME=VALUE",
            value_parser = parse_param
        )]
        params: Vec<(String, Value)>,

        /// Bypass the result cache
        #[arg(long)]
        no_cache: bool,

        /// Skip the Lakebase primary
        #[arg(long)]
        fallback_only: bool,

        /// Print rows as column-keyed objects
        #[arg(long)]
        records: bool,
    },

    /// Check access to the tables the dashboard reads
    Tables,

    /// Compare Lakebase and warehouse latency on a fixed query
    Compare,

    /// Show routing, circuit breaker and cache state
    Status,
}

/// `name=value`; the value is JSON when it parses as JSON
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;

    let name = name.trim().trim_start_matches(':');
    if name.is_empty() {
        return Err(format!("parameter name is empty in {raw:?}"));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("datalayer={level},datalayer_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Resolve configuration: file, then environment, then flags
fn load_config(args: &Args) -> Result<DataLayerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
            config::load_config_from_path(Some(path.clone()))
        }
        None => config::load_config(),
    }
    .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref host) = args.host {
        overrides = overrides.with_host(host.clone());
    }
    if let Some(ref id) = args.warehouse_id {
        overrides = overrides.with_warehouse_id(id.clone());
    }
    if args.no_lakebase {
        overrides = overrides.with_lakebase_enabled(false);
    }
    if let Some(secs) = args.cache_ttl {
        overrides = overrides.with_cache_ttl_secs(secs);
    }
    if let (Some(catalog), Some(schema)) = (&args.catalog, &args.schema) {
        overrides = overrides.with_namespace(catalog.clone(), schema.clone());
    }
    overrides.apply(&mut config);

    debug!(source = %config.source(), ?config, "Configuration resolved");
    Ok(config)
}

async fn run(layer: &UnifiedDataLayer, command: Command) -> Result<Value> {
    match command {
        Command::Query {
            sql,
            params,
            no_cache,
            fallback_only,
            records,
        } => {
            let params: QueryParams = params.into_iter().collect();
            let mut options = QueryOptions::default();
            if no_cache {
                options = options.no_cache();
            }
            if fallback_only {
                options = options.fallback_only();
            }

            let params = (!params.is_empty()).then_some(&params);
            let result = layer.execute_query(&sql, params, options).await?;
            info!(
                source = %result.source(),
                rows = result.row_count(),
                elapsed_ms = result.execution_time_ms(),
                "Query finished"
            );

            if records {
                Ok(json!({
                    "source": result.source(),
                    "execution_time_ms": result.execution_time_ms(),
                    "from_cache": result.from_cache(),
                    "rows": result.to_records(),
                }))
            } else {
                Ok(serde_json::to_value(&result)?)
            }
        }
        Command::Tables => Ok(serde_json::to_value(layer.check_table_access().await)?),
        Command::Compare => Ok(serde_json::to_value(
            layer.get_performance_comparison().await,
        )?),
        Command::Status => Ok(serde_json::to_value(layer.status())?),
    }
}

/// Resolves on Ctrl-C or SIGTERM
///
/// If the handlers cannot be installed this never resolves, so the command
/// still runs to completion.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
                return;
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let config = load_config(&args)?;
    let layer = UnifiedDataLayer::connect(&config).context("Failed to build data layer")?;

    let outcome = tokio::select! {
        result = run(&layer, args.command) => result,
        () = shutdown_signal() => {
            info!("Interrupted, cancelling command");
            Err(anyhow::anyhow!("Interrupted"))
        }
    };

    layer.close().await;

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_param_values() {
        assert_eq!(parse_param("days=30").unwrap(), ("days".into(), json!(30)));
        assert_eq!(parse_param("flag=true").unwrap(), ("flag".into(), json!(true)));
        assert_eq!(
            parse_param(":since=2024-06-01").unwrap(),
            ("since".into(), json!("2024-06-01"))
        );
        assert_eq!(
            parse_param("expr=a=b").unwrap(),
            ("expr".into(), json!("a=b"))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=5").is_err());
    }

    #[test]
    fn test_query_subcommand_parses() {
        let args = Args::try_parse_from([
            "datalayer",
            "--no-lakebase",
            "query",
            "SELECT :n",
            "--param",
            "n=1",
            "-p",
            "name=etl",
            "--no-cache",
        ])
        .unwrap();

        assert!(args.no_lakebase);
        match args.command {
            Command::Query {
                sql,
                params,
                no_cache,
                fallback_only,
                ..
            } => {
                assert_eq!(sql, "SELECT :n");
                assert_eq!(params.len(), 2);
                assert!(no_cache);
                assert!(!fallback_only);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[workspace]\nhost = \"file.example.com\"\n\n[warehouse]\nid = \"file-wh\"\n"
        )
        .unwrap();

        let args = Args::try_parse_from([
            "datalayer",
            "--config",
            file.path().to_str().unwrap(),
            "--warehouse-id",
            "cli-wh",
            "--no-lakebase",
            "status",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.warehouse_id.as_deref(), Some("cli-wh"));
        assert!(!config.lakebase_enabled);
    }

    #[test]
    fn test_cache_and_namespace_flags_override_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[workspace]\nhost = \"h\"\n\n[warehouse]\nid = \"w\"\n\n[cache]\nttl_secs = 300\n"
        )
        .unwrap();

        let args = Args::try_parse_from([
            "datalayer",
            "--config",
            file.path().to_str().unwrap(),
            "--cache-ttl",
            "30",
            "--catalog",
            "main",
            "--schema",
            "finops",
            "status",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.cache_ttl, std::time::Duration::from_secs(30));
        assert_eq!(config.catalog, "main");
        assert_eq!(config.schema, "finops");
    }

    #[test]
    fn test_catalog_requires_schema() {
        let parsed = Args::try_parse_from(["datalayer", "--catalog", "main", "status"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let args = Args::try_parse_from([
            "datalayer",
            "--config",
            "/nonexistent/datalayer.toml",
            "status",
        ])
        .unwrap();

        assert!(load_config(&args).is_err());
    }
}
