//! stagexfer CLI - move single files to and from a stage.
//!
//! The stage is described by a JSON file in the same shape the service
//! hands out (`locationType`, `location`, `creds`, ...).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use stagexfer_common::{StageLocation, TransferStatus};
use stagexfer_crypto::EncryptionMaterial;
use stagexfer_storage::{TransferContext, UploadSource};
use stagexfer_transfer::{TransferConfig, TransferEngine};

#[derive(Parser)]
#[command(name = "stagexfer")]
#[command(about = "stagexfer - Stage file transfers")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by both directions.
#[derive(Args)]
struct StageArgs {
    /// JSON file describing the stage location.
    #[arg(short, long)]
    stage: PathBuf,

    /// JSON file with transfer settings (retries, timeouts, ...).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file with the query-stage encryption material.
    #[arg(short, long)]
    material: Option<PathBuf>,

    /// Requested transfer concurrency.
    #[arg(short, long, default_value_t = 1)]
    parallel: usize,

    /// Presigned URL to use instead of bearer credentials.
    #[arg(long)]
    presigned_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file to the stage.
    Put {
        #[command(flatten)]
        stage: StageArgs,

        /// Local file to upload.
        #[arg(short, long)]
        file: PathBuf,

        /// Object name in the stage (default: the file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Replace an existing object instead of skipping it.
        #[arg(long)]
        overwrite: bool,

        /// Content encoding of the file, e.g. "zstd".
        #[arg(long)]
        compression: Option<String>,
    },

    /// Download an object from the stage.
    Get {
        #[command(flatten)]
        stage: StageArgs,

        /// Object name in the stage.
        #[arg(short, long)]
        name: String,

        /// Local directory to download into.
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Put {
            stage,
            file,
            name,
            overwrite,
            compression,
        } => cmd_put(&stage, &file, name, overwrite, compression).await,

        Commands::Get { stage, name, dest } => cmd_get(&stage, &name, &dest).await,
    }
}

/// Loaded stage, engine and material for one command.
struct Session {
    stage: Arc<StageLocation>,
    engine: TransferEngine,
    material: Option<EncryptionMaterial>,
}

impl Session {
    fn load(args: &StageArgs) -> Result<Self> {
        let raw = std::fs::read_to_string(&args.stage)
            .with_context(|| format!("Failed to read stage file {}", args.stage.display()))?;
        let stage = StageLocation::from_json(&raw).context("Invalid stage description")?;

        let config = match &args.config {
            Some(path) => TransferConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => TransferConfig::default(),
        };

        let material = match &args.material {
            Some(path) => Some(load_material(path)?),
            None => None,
        };

        let engine = TransferEngine::new(config).context("Failed to initialize transfer engine")?;
        Ok(Self {
            stage: Arc::new(stage),
            engine,
            material,
        })
    }

    fn apply(&self, args: &StageArgs, mut ctx: TransferContext) -> TransferContext {
        ctx = ctx.with_parallel(args.parallel);
        if let Some(url) = &args.presigned_url {
            ctx = ctx.with_presigned_url(url.as_str());
        }
        if let Some(material) = &self.material {
            ctx = ctx.with_encryption(material.clone());
        }
        ctx
    }
}

fn load_material(path: &Path) -> Result<EncryptionMaterial> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read material file {}", path.display()))?;
    serde_json::from_str(&raw).context("Invalid encryption material")
}

/// Object name for an upload when none is given.
fn default_name(file: &Path) -> Result<String> {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", file.display()))
}

/// Upload one file.
async fn cmd_put(
    args: &StageArgs,
    file: &Path,
    name: Option<String>,
    overwrite: bool,
    compression: Option<String>,
) -> Result<()> {
    let session = Session::load(args)?;
    let name = match name {
        Some(name) => name,
        None => default_name(file)?,
    };
    info!("Uploading {} to {} as {}", file.display(), session.stage.location, name);

    let mut ctx = TransferContext::upload(Arc::clone(&session.stage), UploadSource::File(file.to_path_buf()), &name)
        .with_overwrite(overwrite);
    if let Some(encoding) = compression {
        ctx = ctx.with_compression(encoding);
    }
    let mut ctx = session.apply(args, ctx);

    session
        .engine
        .put(&mut ctx)
        .await
        .with_context(|| format!("Failed to upload {}", file.display()))?;

    match ctx.status {
        TransferStatus::Uploaded | TransferStatus::Skipped => {
            println!("{}  {}  {} bytes", ctx.status, name, ctx.dst_file_size);
            Ok(())
        }
        status => anyhow::bail!("Upload of {} ended with status {}", name, status),
    }
}

/// Download one object.
async fn cmd_get(args: &StageArgs, name: &str, dest: &Path) -> Result<()> {
    let session = Session::load(args)?;
    info!("Downloading {} from {} into {}", name, session.stage.location, dest.display());

    let ctx = TransferContext::download(Arc::clone(&session.stage), name, dest);
    let mut ctx = session.apply(args, ctx);

    session
        .engine
        .get(&mut ctx)
        .await
        .with_context(|| format!("Failed to download {}", name))?;

    println!("{}  {}  {} bytes", ctx.status, ctx.destination().display(), ctx.dst_file_size);
    Ok(())
}
