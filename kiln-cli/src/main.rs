use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Build model environments into container images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a model image from kiln.yaml
    Build {
        /// Model source directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Image name (e.g., "registry.example.com/owner/model")
        #[arg(short, long)]
        tag: Option<String>,

        /// Build secrets ("id=NAME,src=path")
        #[arg(long)]
        secret: Vec<String>,

        /// Disable the engine's layer cache
        #[arg(long)]
        no_cache: bool,

        /// Build weight artifacts as a separately cached image
        #[arg(long)]
        separate_weights: bool,

        /// Accelerator (CUDA) base image selection
        #[arg(long)]
        use_cuda_base_image: Option<String>,

        /// Force the managed Kiln base image on or off
        #[arg(long)]
        use_kiln_base_image: Option<bool>,

        /// Progress output mode (auto, plain, tty)
        #[arg(long, default_value = "auto")]
        progress: String,

        /// Validate this schema file instead of introspecting the image
        #[arg(long)]
        openapi_schema: Option<PathBuf>,

        /// Build from this Dockerfile verbatim, skipping generation
        #[arg(short = 'f', long)]
        dockerfile: Option<PathBuf>,

        /// Strip shared libraries in the built environment
        #[arg(long)]
        strip: bool,

        /// Precompile Python sources in the built environment
        #[arg(long)]
        precompile: bool,

        /// Fast build
        #[arg(long)]
        fast: bool,

        /// Extra image labels (KEY=VALUE), applied after computed ones
        #[arg(long)]
        annotation: Vec<String>,

        /// Resolve the managed base image from the local store
        #[arg(long)]
        local_image: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            dir,
            tag,
            secret,
            no_cache,
            separate_weights,
            use_cuda_base_image,
            use_kiln_base_image,
            progress,
            openapi_schema,
            dockerfile,
            strip,
            precompile,
            fast,
            annotation,
            local_image,
        } => {
            commands::build::build(commands::build::BuildArgs {
                dir,
                tag,
                secrets: secret,
                no_cache,
                separate_weights,
                use_cuda_base_image,
                use_kiln_base_image,
                progress,
                openapi_schema,
                dockerfile,
                strip,
                precompile,
                fast,
                annotations: annotation,
                local_image,
            })
            .await
        }
    }
}
