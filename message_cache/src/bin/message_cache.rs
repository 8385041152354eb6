use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use message_cache::config::{CacheConfig, load_config_path};
use message_cache::store::{CacheStore, database_name, meta::MetaDatabase};
use message_cache::{CacheReader, CacheWriter, telemetry};
use message_source::MessageSource;
use message_source::models::{progress::Progress, time::from_offset_ns};
use message_source::providers::jsonl::JsonlSource;
use tracing::{debug, info};

#[derive(Parser)]
#[command(version, about = "Time-ranged message cache CLI")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Overrides `cache_dir` from the configuration and the environment.
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Read a range of a JSON-lines recording through the cache.
    Fetch(FetchCmd),
    /// Print the stored coverage of a cache database.
    Coverage {
        /// Recording id the cache was created with.
        #[arg(long)]
        id: String,
    },
    /// List cache databases, most recently used first.
    Databases,
}

#[derive(Args)]
struct FetchCmd {
    /// Recording file, one JSON message per line.
    #[arg(long, value_name = "FILE")]
    recording: PathBuf,
    /// Cache id; defaults to the recording path.
    #[arg(long)]
    id: Option<String>,
    /// Topics to read (repeatable).
    #[arg(long = "topic", required = true)]
    topics: Vec<String>,
    /// Start offset in nanoseconds from the recording start.
    #[arg(long = "start", value_name = "NS", default_value_t = 0)]
    start_ns: i64,
    /// Inclusive end offset in nanoseconds; defaults to the end of the recording.
    #[arg(long = "end", value_name = "NS")]
    end_ns: Option<i64>,
}

fn load_config(cli: &Cli) -> Result<CacheConfig> {
    let config = match &cli.config {
        Some(path) => load_config_path(path)?,
        None => CacheConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn fetch(config: CacheConfig, cmd: FetchCmd) -> Result<()> {
    let id = cmd
        .id
        .unwrap_or_else(|| cmd.recording.to_string_lossy().to_string());
    let upstream = JsonlSource::open(&cmd.recording)
        .await
        .with_context(|| format!("opening {}", cmd.recording.display()))?;
    let writer = CacheWriter::new(id.clone(), Arc::new(upstream), config.clone());
    let reader = CacheReader::new(id, Arc::new(writer), config);

    let init = reader
        .initialize(Arc::new(|p: Progress| {
            debug!(loaded = ?p.fully_loaded_fraction_ranges, "progress");
        }))
        .await?;
    let start = from_offset_ns(init.start, cmd.start_ns)?;
    let end = match cmd.end_ns {
        Some(end_ns) => from_offset_ns(init.start, end_ns)?,
        None => init.end,
    };
    if end < start {
        bail!("end ({end}) precedes start ({start})");
    }

    let messages = reader.get_messages(start, end, &cmd.topics).await?;
    for m in &messages {
        let offset = m.receive_time.signed_duration_since(init.start);
        println!(
            "{}\t{}\t{} bytes",
            offset.num_nanoseconds().unwrap_or(i64::MAX),
            m.topic,
            m.data.len()
        );
    }
    info!(messages = messages.len(), "fetch complete");
    reader.close().await?;
    Ok(())
}

fn coverage(config: &CacheConfig, id: &str) -> Result<()> {
    let name = database_name(id);
    let mut meta = MetaDatabase::open(&config.cache_dir)?;
    if !meta.contains(&name)? {
        bail!("no cache database for id {id:?} in {}", config.cache_dir.display());
    }
    let store = CacheStore::open_unregistered(&config.cache_dir, &name)?;
    print!("{}", store.load_coverage()?);
    println!("messages: {}", store.message_count()?);
    Ok(())
}

fn databases(config: &CacheConfig) -> Result<()> {
    let mut meta = MetaDatabase::open(&config.cache_dir)?;
    for entry in meta.list()? {
        println!("{}\t{}\t{}", entry.access_seq, entry.last_access, entry.name);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("info")?;
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.cmd {
        Cmd::Fetch(cmd) => fetch(config, cmd).await?,
        Cmd::Coverage { id } => coverage(&config, &id)?,
        Cmd::Databases => databases(&config)?,
    }

    Ok(())
}
