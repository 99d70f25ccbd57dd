use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_spatial_features::config::{ConfigLoader, SourceConfig, StoreConfig};
use kira_spatial_features::domain::Category;
use kira_spatial_features::error::FeatureError;
use kira_spatial_features::output::{
    FeatureListResult, HumanOutput, JsonOutput, OutputMode, ShowResult,
};
use kira_spatial_features::source::ByteSource;
use kira_spatial_features::store::FeatureStore;

#[derive(Parser)]
#[command(name = "kira-sf")]
#[command(about = "Inspect sparse spatial feature datasets (genes and TF activities per cell)")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./kira-sf.json when neither --path nor --url is given)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Dataset directory
    #[arg(long, global = true, conflicts_with = "url")]
    path: Option<Utf8PathBuf>,

    /// Dataset base URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Fail instead of returning zero vectors for unavailable features
    #[arg(long, global = true)]
    strict: bool,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Show dataset and cache counts")]
    Stats,
    #[command(about = "List available features")]
    Features {
        #[arg(long, value_enum, default_value = "genes")]
        category: Category,
    },
    #[command(about = "Load one feature and show its top cells")]
    Show {
        name: String,
        /// Inferred from the metadata index or the feature name when omitted
        #[arg(long, value_enum)]
        category: Option<Category>,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    #[command(about = "Show base data for one cell")]
    Cell { id: String },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<FeatureError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FeatureError) -> u8 {
    match error {
        FeatureError::MissingConfig
        | FeatureError::UnknownFeature { .. }
        | FeatureError::CellNotFound(_) => 2,
        FeatureError::FetchFailed { .. }
        | FeatureError::FetchStatus { .. }
        | FeatureError::WaitTimedOut { .. } => 3,
        FeatureError::InitializationFailed(inner) => map_exit_code(inner),
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let (source, mut store_config) = resolve_source(&cli)?;
    if cli.strict {
        store_config = StoreConfig {
            index_policy: store_config.index_policy,
            wait_timeout_ms: store_config.wait_timeout_ms,
            ..StoreConfig::strict()
        };
    }

    let store = FeatureStore::new(source, store_config);
    store.initialize()?;

    match cli.command {
        Command::Stats => {
            let stats = store.stats();
            match output_mode {
                OutputMode::Json => JsonOutput::print_stats(&stats).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_stats(&stats),
            }
        }
        Command::Features { category } => {
            let metadata = store.metadata()?;
            let result = FeatureListResult {
                category,
                total: metadata.total(category),
                features: metadata.features(category).to_vec(),
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print_features(&result).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_features(&result),
            }
        }
        Command::Show {
            name,
            category,
            top,
        } => {
            let category = match category {
                Some(category) => category,
                None => store.metadata()?.category_of(&name),
            };
            let vector = store.load_feature(&name, category)?;
            let base = store.base_data()?;
            let result = ShowResult::build(&name, category, &base, &vector, top);
            match output_mode {
                OutputMode::Json => JsonOutput::print_show(&result).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_show(&result),
            }
        }
        Command::Cell { id } => {
            let base = store.base_data()?;
            let cell = base
                .cell(&id)
                .ok_or_else(|| FeatureError::CellNotFound(id.clone()))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_cell(cell).into_diagnostic()?,
                OutputMode::Human => HumanOutput::print_cell(cell),
            }
        }
    }
    Ok(())
}

fn resolve_source(cli: &Cli) -> miette::Result<(Box<dyn ByteSource>, StoreConfig)> {
    let explicit = match (&cli.path, &cli.url) {
        (Some(path), _) => Some(SourceConfig::Path { path: path.clone() }),
        (None, Some(url)) => Some(SourceConfig::Url { url: url.clone() }),
        (None, None) => None,
    };
    match (explicit, cli.config.as_deref()) {
        (Some(source), None) => Ok((source.open()?, StoreConfig::default())),
        (Some(source), Some(path)) => {
            let config = ConfigLoader::resolve(Some(path))?;
            Ok((source.open()?, config.store))
        }
        (None, path) => {
            let config = ConfigLoader::resolve(path)?;
            Ok((config.source.open()?, config.store))
        }
    }
}
