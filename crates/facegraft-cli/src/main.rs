use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegraft_core::io::{load_image, save_image};
use facegraft_core::{
    process_batch, BatchJob, BatchOptions, EnhanceMethod, FsTemplateStore, ModelRegistry,
    Pipeline, SwapRequest, TransformOptions,
};
use facegraft_models::{Catalog, HttpFetcher, ModelCache, Provisioner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facegraft", about = "facegraft portrait face swap CLI")]
struct Cli {
    /// Model cache directory
    #[arg(long, global = true, env = "FACEGRAFT_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// TOML file overriding model download candidates
    #[arg(long, global = true, env = "FACEGRAFT_CATALOG")]
    catalog: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct EnhanceArgs {
    /// Run quality enhancement on the swapped face
    #[arg(long)]
    enhance: bool,

    /// Enhancement chain: auto, primary, secondary or basic
    #[arg(long, default_value = "auto")]
    method: EnhanceMethod,

    /// Blend weight of the enhanced image, in [0, 1]
    #[arg(long, default_value_t = 1.0)]
    strength: f32,
}

impl EnhanceArgs {
    fn options(&self) -> TransformOptions {
        TransformOptions {
            enhance: self.enhance,
            method: self.method,
            strength: self.strength,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Swap the face in SOURCE onto TARGET
    Swap {
        source: PathBuf,
        target: PathBuf,
        /// Where to write the result
        #[arg(short, long, default_value = "facegraft-out.png")]
        output: PathBuf,
        #[command(flatten)]
        enhance: EnhanceArgs,
    },
    /// Apply the face in SOURCE to every TARGET
    Batch {
        source: PathBuf,
        #[arg(required = true)]
        targets: Vec<PathBuf>,
        /// Directory results are written to
        #[arg(long, default_value = "facegraft-out")]
        out_dir: PathBuf,
        /// Maximum concurrently processed targets
        #[arg(long, default_value_t = 2)]
        workers: usize,
        #[command(flatten)]
        enhance: EnhanceArgs,
    },
    /// Manage the local model cache
    Models {
        #[command(subcommand)]
        command: ModelCommands,
    },
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum ModelCommands {
    /// Download and validate every model
    Fetch,
    /// Show the load state of each model
    Status,
}

#[zbus::proxy(
    interface = "org.facegraft.Facegraft1",
    default_service = "org.facegraft.Facegraft1",
    default_path = "/org/facegraft/Facegraft1"
)]
trait Facegraft {
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match &cli.command {
        Commands::Swap {
            source,
            target,
            output,
            enhance,
        } => {
            let registry = open_registry(&cli)?;
            let options = enhance.options();
            // Inference is CPU bound; keep it off the runtime threads.
            let (source, target, output) = (source.clone(), target.clone(), output.clone());
            tokio::task::spawn_blocking(move || {
                swap(registry, &source, &target, &output, options, json)
            })
            .await
            .context("swap task panicked")??;
        }
        Commands::Batch {
            source,
            targets,
            out_dir,
            workers,
            enhance,
        } => {
            let registry = open_registry(&cli)?;
            let options = BatchOptions {
                transform: enhance.options(),
                workers: *workers,
            };
            let (source, targets, out_dir) = (source.clone(), targets.clone(), out_dir.clone());
            tokio::task::spawn_blocking(move || {
                batch(registry, &source, &targets, &out_dir, &options, json)
            })
            .await
            .context("batch task panicked")??;
        }
        Commands::Models { command } => {
            let registry = open_registry(&cli)?;
            match command {
                ModelCommands::Fetch => {
                    let warm = Arc::clone(&registry);
                    let outcome = tokio::task::spawn_blocking(move || warm.warm_up())
                        .await
                        .context("model fetch task panicked")?;
                    print_model_states(&registry, json)?;
                    outcome.context("face detection model unavailable")?;
                }
                ModelCommands::Status => print_model_states(&registry, json)?,
            }
        }
        Commands::Status => {
            let conn = zbus::Connection::session()
                .await
                .context("connecting to session bus")?;
            let proxy = FacegraftProxy::new(&conn).await?;
            match proxy.status().await {
                Ok(status) => println!("{status}"),
                Err(e) => {
                    tracing::debug!(error = %e, "status call failed");
                    println!("facegraftd: not running");
                }
            }
        }
    }

    Ok(())
}

fn open_registry(cli: &Cli) -> Result<Arc<ModelRegistry>> {
    let model_dir = cli
        .model_dir
        .clone()
        .unwrap_or_else(facegraft_models::default_model_dir);
    let catalog = match &cli.catalog {
        Some(path) => Catalog::from_file(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => Catalog::default(),
    };
    let fetcher = HttpFetcher::new(Duration::from_secs(300), 2 * 1024 * 1024 * 1024);
    let provisioner = Provisioner::new(ModelCache::new(model_dir), Arc::new(fetcher));
    Ok(Arc::new(ModelRegistry::onnx(catalog, provisioner)))
}

fn swap(
    registry: Arc<ModelRegistry>,
    source: &Path,
    target: &Path,
    output: &Path,
    options: TransformOptions,
    json: bool,
) -> Result<()> {
    registry.warm_up().context("face detection model unavailable")?;
    let request = SwapRequest::new(load_image(source)?, load_image(target)?, options)?
        .with_template(target.display().to_string());

    let pipeline = Pipeline::new(registry);
    let result = pipeline.transform(&request);
    let Some(image) = result.image else {
        bail!(result.error.unwrap_or_else(|| "transform failed".to_string()));
    };
    save_image(&image, output)?;

    if json {
        let report = serde_json::json!({
            "success": result.success,
            "output": output,
            "enhanced": result.enhanced,
            "path": result.path,
        });
        println!("{report}");
    } else {
        println!("Wrote {}", output.display());
        if result.path == Some(facegraft_core::RenderPath::Demo) {
            println!("Swap model unavailable; wrote demo preview instead");
        }
        if options.enhance {
            println!("Enhanced: {}", if result.enhanced { "yes" } else { "no" });
        }
    }
    Ok(())
}

fn batch(
    registry: Arc<ModelRegistry>,
    source: &Path,
    targets: &[PathBuf],
    out_dir: &Path,
    options: &BatchOptions,
    json: bool,
) -> Result<()> {
    registry.warm_up().context("face detection model unavailable")?;
    options.transform.validate()?;

    let cwd = std::env::current_dir()?;
    let references: Vec<String> = targets
        .iter()
        .map(|t| cwd.join(t).display().to_string())
        .collect();

    let pipeline = Pipeline::new(registry);
    let job = BatchJob::prepare(&pipeline, load_image(source)?, references)?;
    let report = process_batch(&pipeline, &FsTemplateStore::new(&cwd), &job, options);

    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let mut entries = Vec::with_capacity(report.results.len());
    for (i, (result, target)) in report.results.iter().zip(targets).enumerate() {
        let output = match &result.image {
            Some(image) => {
                let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("target");
                let path = out_dir.join(format!("{:03}_{stem}.png", i + 1));
                save_image(image, &path)?;
                Some(path)
            }
            None => None,
        };

        if !json {
            match (&output, &result.error) {
                (Some(path), _) => println!("  [ok]   {} -> {}", target.display(), path.display()),
                (None, Some(err)) => println!("  [fail] {}: {err}", target.display()),
                (None, None) => println!("  [fail] {}", target.display()),
            }
        }
        entries.push(serde_json::json!({
            "target": target,
            "success": result.success,
            "output": output,
            "enhanced": result.enhanced,
            "path": result.path,
            "error": result.error,
        }));
    }

    if json {
        let summary = serde_json::json!({
            "total": targets.len(),
            "succeeded": report.succeeded,
            "results": entries,
        });
        println!("{summary}");
    } else {
        println!("{} of {} targets succeeded", report.succeeded, targets.len());
    }
    Ok(())
}

fn print_model_states(registry: &ModelRegistry, json: bool) -> Result<()> {
    let states = registry.states();
    if json {
        let report = serde_json::json!({
            "model_dir": registry.model_dir(),
            "degraded": registry.is_degraded(),
            "models": states,
        });
        println!("{report}");
        return Ok(());
    }

    println!("Model directory: {}", registry.model_dir().display());
    for (kind, state) in &states {
        let state = serde_json::to_value(state)?;
        println!("  {:<18} {}", kind.as_str(), state.as_str().unwrap_or("?"));
    }
    if registry.is_degraded() {
        println!("Swap model unavailable; transforms produce demo previews");
    }
    Ok(())
}
