//! code_stats - track repository traffic and CI build counts
//!
//! ## Usage
//!
//! ```bash
//! code_stats add github prisms-center/phaseField dftfeDevelopers/dftfe
//! code_stats set-token github ghp_xxx
//! code_stats sync
//! code_stats report --metric unique_clones --exclude-builds \
//!     --merge prisms-center/pbs=prisms-center/prisms_jobs \
//!     --order prisms-center/phaseField,prisms-center/plasticity --json weekly.json
//! ```
//!
//! ## Environment Variables
//!
//! - CODE_STATS_DIR - Credentials directory (default: ~/.code_stats)
//! - CODE_STATS_DATA_DIR - Database directory (default: data)
//! - GITHUB_API_URL / TRAVIS_API_URL - API base URLs
//! - HTTP_TIMEOUT_SECS - Request timeout (default: 10)
//! - WEEK_ANCHOR - Weekday each week ends on (default: fri)
//! - CODE_STATS_OVERRIDES - JSON file of estimation rules (default: built-in)
//! - RUST_LOG - Logging level (optional, default: info)

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use code_stats::aggregate::{default_rules, load_rules, TrailingWeek};
use code_stats::providers::{sync_all, GithubProvider, StatsProvider, TravisProvider};
use code_stats::report::{weekly_boundaries_for, weekly_report, ReportOptions};
use code_stats::store::{ProviderSchema, GITHUB_SCHEMA, TRAVIS_SCHEMA};
use code_stats::{legacy, AppConfig, CredentialsDocument, RecordStore};

#[derive(Parser, Debug)]
#[command(name = "code_stats", version, about = "Track repository traffic and CI build counts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register repositories with a provider
    Add {
        provider: ProviderArg,
        /// Repository names, e.g. org/repo
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Remove repositories and all of their recorded history
    Remove {
        provider: ProviderArg,
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List registered repositories
    List {
        #[arg(default_value = "all")]
        provider: ProviderArg,
    },

    /// Store an API token in the credentials file
    SetToken { provider: ProviderArg, token: String },

    /// Fetch new statistics from the providers
    Sync {
        #[arg(default_value = "all")]
        provider: ProviderArg,
    },

    /// Print cumulative totals and optionally export the weekly table
    Report {
        /// GitHub metric to report
        #[arg(short, long, default_value = "unique_clones")]
        metric: String,

        /// Report raw counts without outage estimates
        #[arg(long)]
        no_estimate: bool,

        /// Subtract weekly Travis build counts from the metric
        #[arg(long)]
        exclude_builds: bool,

        /// Fold one repository into another, as FROM=INTO
        #[arg(long, value_parser = parse_merge)]
        merge: Vec<(String, String)>,

        /// Repositories to list first, comma separated
        #[arg(long, value_delimiter = ',')]
        order: Vec<String>,

        /// Handling of the week still open when the data ends
        #[arg(long, default_value = "flush", value_parser = parse_trailing)]
        trailing: TrailingWeek,

        /// Export cumulative instead of weekly values
        #[arg(long)]
        cumulative: bool,

        /// Write the table as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Import a historical plain-text traffic dump into the GitHub store
    ImportLegacy {
        /// Organisation the dump's section headers are relative to
        #[arg(long)]
        org: String,

        #[arg(long)]
        file: PathBuf,

        /// Repositories to import (full org/repo names)
        #[arg(long = "repo", required = true)]
        repos: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderArg {
    Github,
    Travis,
    All,
}

impl ProviderArg {
    fn schemas(self) -> Vec<ProviderSchema> {
        match self {
            ProviderArg::Github => vec![GITHUB_SCHEMA],
            ProviderArg::Travis => vec![TRAVIS_SCHEMA],
            ProviderArg::All => vec![GITHUB_SCHEMA, TRAVIS_SCHEMA],
        }
    }
}

fn parse_merge(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((from, into)) if !from.is_empty() && !into.is_empty() => {
            Ok((from.to_string(), into.to_string()))
        }
        _ => Err(format!("expected FROM=INTO, got {s:?}")),
    }
}

fn parse_trailing(s: &str) -> Result<TrailingWeek, String> {
    TrailingWeek::from_str(s).ok_or_else(|| format!("expected flush or drop, got {s:?}"))
}

fn open_store(config: &AppConfig, schema: ProviderSchema) -> Result<RecordStore> {
    RecordStore::open_in_dir(&config.data_dir, schema)
        .with_context(|| format!("failed to open {} store in {}", schema.provider, config.data_dir.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env if present
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    log::debug!("{:?}", config);

    match cli.command {
        Command::Add { provider, names } => {
            for schema in provider.schemas() {
                let mut store = open_store(&config, schema)?;
                for name in &names {
                    store.register(name)?;
                }
            }
        }

        Command::Remove { provider, names } => {
            for schema in provider.schemas() {
                let mut store = open_store(&config, schema)?;
                for name in &names {
                    let removed = store
                        .remove_entity(name)
                        .with_context(|| format!("cannot remove {name} from {}", schema.provider))?;
                    println!("{}: removed {} ({} daily records)", schema.provider, name, removed);
                }
            }
        }

        Command::List { provider } => {
            for schema in provider.schemas() {
                let store = open_store(&config, schema)?;
                println!("{}:", schema.provider);
                for entity in store.entities()? {
                    let attributes: Vec<String> = entity
                        .attributes
                        .iter()
                        .map(|(k, v)| match v {
                            Some(v) => format!("{k}={v}"),
                            None => format!("{k}=-"),
                        })
                        .collect();
                    println!(
                        "  {:>4}  {}  {} record(s) {}",
                        entity.identity,
                        entity.name,
                        store.record_count(entity.identity)?,
                        attributes.join(" ")
                    );
                }
            }
        }

        Command::SetToken { provider, token } => {
            let mut credentials = CredentialsDocument::load_or_create(config.credentials_path())?;
            for schema in provider.schemas() {
                credentials.set_token(schema.provider, token.clone());
            }
            credentials.save()?;
            log::info!("🔑 Token saved to {}", credentials.path().display());
        }

        Command::Sync { provider } => {
            let credentials = CredentialsDocument::load_or_create(config.credentials_path())?;

            for schema in provider.schemas() {
                let Some(token) = credentials.token(schema.provider) else {
                    bail!(
                        "no {} token in {}; run `code_stats set-token {} <token>`",
                        schema.provider,
                        credentials.path().display(),
                        schema.provider
                    );
                };
                let token = Some(token.to_string());
                let adapter: Box<dyn StatsProvider> = if schema == GITHUB_SCHEMA {
                    Box::new(GithubProvider::new(&config.github_api_url, token, config.http_timeout)?)
                } else {
                    Box::new(TravisProvider::new(&config.travis_api_url, token, config.http_timeout)?)
                };

                let mut store = open_store(&config, schema)?;
                sync_all(&mut store, adapter.as_ref()).await?;
            }
        }

        Command::Report {
            metric,
            no_estimate,
            exclude_builds,
            merge,
            order,
            trailing,
            cumulative,
            json,
        } => {
            let rules = match &config.overrides_path {
                Some(path) => load_rules(path)?,
                None => default_rules()?,
            };
            let options = ReportOptions {
                trailing,
                overrides: (!no_estimate).then_some(rules.as_slice()),
            };

            let github = open_store(&config, GITHUB_SCHEMA)?;
            if !github.schema().has_metric(&metric) {
                bail!("unknown GitHub metric {metric:?}");
            }
            let Some(dates) = weekly_boundaries_for(&github, config.week_anchor)? else {
                bail!("no GitHub data recorded yet; run `code_stats sync` first");
            };

            let travis = if exclude_builds {
                Some(open_store(&config, TRAVIS_SCHEMA)?)
            } else {
                None
            };
            let table = weekly_report(
                &github,
                travis.as_ref(),
                &dates,
                &metric,
                &options,
                &merge,
                &order,
            )?;

            let output = if cumulative { table.cumulative() } else { table.clone() };
            if let Some(path) = json {
                std::fs::write(&path, output.to_json()?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                log::info!("💾 Wrote {} week(s) to {}", dates.len(), path.display());
            }

            if let Some(summary) = table.summary() {
                println!("{summary}");
            }
        }

        Command::ImportLegacy { org, file, repos } => {
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("failed to open {}", file.display()))?,
            );
            let mut store = open_store(&config, GITHUB_SCHEMA)?;
            let summary = legacy::import(reader, &org, &repos, &mut store)?;
            println!(
                "{}: {} row(s) imported, {} zero row(s) skipped, {} unlisted",
                org, summary.rows_imported, summary.zero_rows_skipped, summary.rows_unlisted
            );
        }
    }

    Ok(())
}
