use clap::{Parser, Subcommand};
use modelprep::cmd;
use modelprep::envconfig::EnvConfig;
use modelprep::hub::DEFAULT_REVISION;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modelprep")]
#[command(version)]
#[command(about = "Prepare pretrained transformer models for an embedding service", long_about = None)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Root for relative output paths
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a built-in recipe
    Run {
        recipe: String,
        #[arg(short, long, conflicts_with = "install")]
        output: Option<PathBuf>,
        /// Write into the model store instead of the recipe's output path
        #[arg(long)]
        install: bool,
        #[arg(long, default_value = DEFAULT_REVISION)]
        revision: String,
    },
    /// List built-in recipes
    Recipes,
    /// Mirror a hub repository
    Pull {
        repo_id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_REVISION)]
        revision: String,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Re-save weights as candle-ready safetensors
    Convert {
        /// Hub repository id or local directory
        source: String,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = DEFAULT_REVISION)]
        revision: String,
        /// Substring removed from every tensor name, in order
        #[arg(long)]
        strip: Vec<String>,
        /// f32, f16 or bf16
        #[arg(long)]
        dtype: Option<String>,
        /// cls or mean
        #[arg(long)]
        pooling: Option<String>,
    },
    /// Quantize linear weights to int8
    Quantize {
        source: String,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value = DEFAULT_REVISION)]
        revision: String,
    },
    /// Show the tensors of a safetensors file
    Inspect { path: PathBuf },
    /// List installed models
    #[command(alias = "ls")]
    Installed,
    /// Remove an installed model
    #[command(alias = "rm")]
    Remove { id: String },
    /// Check a prepared directory against its manifest
    Verify {
        /// Installed model id or directory
        target: String,
        /// Also load the weights into a BERT encoder
        #[arg(long)]
        load: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "modelprep=debug" } else { "modelprep=info" };
    let filter = if verbose {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = EnvConfig::from_env().with_root(cli.root);

    let result = match cli.command {
        Commands::Run {
            recipe,
            output,
            install,
            revision,
        } => cmd::run(config, &recipe, output, install, &revision).await,
        Commands::Recipes => cmd::recipes().await,
        Commands::Pull {
            repo_id,
            output,
            revision,
            include,
            exclude,
        } => cmd::pull(config, &repo_id, output, &revision, &include, &exclude).await,
        Commands::Convert {
            source,
            output,
            revision,
            strip,
            dtype,
            pooling,
        } => {
            let args = cmd::ConvertArgs {
                source,
                output,
                revision,
                strip,
                dtype,
                pooling,
            };
            cmd::convert(config, args).await
        }
        Commands::Quantize {
            source,
            output,
            revision,
        } => cmd::quantize(config, &source, &output, &revision).await,
        Commands::Inspect { path } => cmd::inspect(&path).await,
        Commands::Installed => cmd::installed(config).await,
        Commands::Remove { id } => cmd::remove(config, &id).await,
        Commands::Verify { target, load } => cmd::verify(config, &target, load).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
