// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
//! Corrects low-contrast text in a document snapshot from the command line.
use clap::{Parser, Subcommand};
use contrast_core::config::{
    DESIRED_CONTRAST_KEY, Settings, SettingsFile, choose_desired_contrast, load_desired_contrast,
    parse_desired_contrast, save_desired_contrast,
};
use contrast_core::corrector::ContrastCorrector;
use contrast_core::image_colour::{FileImageSource, KmeansQuantizer};
use contrast_core::snapshot::Snapshot;
use contrast_core::store::{JsonFileStore, KeyValueStore as _};
use std::io::Write as _;
use std::path::{Path, PathBuf};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "text-contrast")]
#[command(version, about = "Raise the contrast of text against its rendered background")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings store to use instead of the one in the user's config directory
    #[arg(long, global = true, value_name = "PATH")]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Correct every text element of a JSON document snapshot
    Correct {
        /// Snapshot to correct; image urls resolve relative to its directory
        document: PathBuf,

        /// Write the corrected snapshot here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target relative contrast in [0, 1], overriding the stored value
        #[arg(short, long, value_parser = parse_contrast_arg)]
        desired_contrast: Option<f32>,

        /// Milliseconds to wait for background images
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// JSON file with correction settings; its desired contrast wins over the stored one
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Inspect or change the stored desired contrast
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the desired contrast, storing the default if none is valid
    Get,
    /// Store a new desired contrast
    Set {
        #[arg(value_parser = parse_contrast_arg)]
        value: f32,
    },
    /// List the keys in the store
    List,
    /// Remove the stored desired contrast
    Delete,
}

fn parse_contrast_arg(raw: &str) -> Result<f32, String> {
    parse_desired_contrast(raw).ok_or_else(|| format!("'{raw}' is not a number between 0 and 1"))
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose) {
        #[expect(clippy::let_underscore_must_use)]
        let _ = writeln!(std::io::stderr(), "Error setting up logging: {e}");
    }

    let store = match cli.store {
        Some(path) => JsonFileStore::new(path),
        None => JsonFileStore::default_location()?,
    };
    log::debug!("Using settings store {}", store.path().display());

    match cli.command {
        Commands::Correct {
            document,
            output,
            desired_contrast,
            deadline_ms,
            config,
        } => {
            let file = match config {
                Some(path) => SettingsFile::read(&path).await?,
                None => SettingsFile::default(),
            };
            let mut settings = file.settings;
            settings.desired_contrast =
                choose_desired_contrast(desired_contrast, file.desired_contrast, &store).await;
            if let Some(deadline_ms) = deadline_ms {
                settings.image_deadline_ms = deadline_ms;
            }
            correct(&document, output.as_deref(), settings).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Get => println!("{}", load_desired_contrast(&store).await),
            ConfigAction::Set { value } => {
                save_desired_contrast(&store, value).await?;
                log::info!("Stored {DESIRED_CONTRAST_KEY} = {value}");
            }
            ConfigAction::List => {
                for key in store.list().await? {
                    println!("{key}");
                }
            }
            ConfigAction::Delete => {
                if store.delete(DESIRED_CONTRAST_KEY).await? {
                    log::info!("Removed {DESIRED_CONTRAST_KEY}");
                } else {
                    log::info!("{DESIRED_CONTRAST_KEY} was not set");
                }
            }
        },
    }

    Ok(())
}

async fn correct(document: &Path, output: Option<&Path>, settings: Settings) -> CliResult<()> {
    let json = tokio::fs::read_to_string(document)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", document.display()))?;
    let mut snapshot = Snapshot::from_json(&json)?;
    log::info!(
        "Loaded {} element(s) from {}",
        snapshot.len(),
        document.display()
    );

    let base_dir = document.parent().unwrap_or_else(|| Path::new("."));
    let images = FileImageSource::new(base_dir);
    let corrector = ContrastCorrector::new(settings);
    let summary = corrector
        .run(&mut snapshot, &images, &KmeansQuantizer::default())
        .await;
    log::debug!("{}", serde_json::to_string(&summary)?);

    let corrected = snapshot.to_json_pretty()?;
    match output {
        Some(path) => {
            tokio::fs::write(path, corrected).await?;
            log::info!("Wrote corrected snapshot to {}", path.display());
        }
        None => println!("{corrected}"),
    }
    Ok(())
}

/// Logs to stderr so stdout stays free for command output.
fn setup_logging(verbose: bool) -> Result<(), fern::InitError> {
    let level = if verbose || cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ));
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}
