use anyhow::{bail, Result};
use crate::check;
use crate::convert::pooling::PoolingMode;
use crate::convert::quantize::QUANTIZE_CONFIG_FILE;
use crate::convert::{parse_dtype, safetensors, KeyRenamer};
use crate::envconfig::EnvConfig;
use crate::format::{human_age, human_bytes, shape};
use crate::hub::FileFilter;
use crate::progress::Progress;
use crate::recipe::{self, ConfigSource, ConvertOptions, Preparer, Source};
use crate::store::{self, Manifest, ModelStore};
use std::path::{Path, PathBuf};

pub async fn run(
    config: EnvConfig,
    id: &str,
    output: Option<PathBuf>,
    install: bool,
    revision: &str,
) -> Result<()> {
    let recipe = recipe::find(id)?;
    let out_dir = if install {
        ModelStore::new(&config.models_dir).model_dir(recipe.id)?
    } else {
        config.resolve(output.as_deref().unwrap_or_else(|| Path::new(recipe.output)))
    };

    println!("Preparing {} ({}) into {}", recipe.id, recipe.repo_id, out_dir.display());
    let manifest = Preparer::from_config(config)?
        .run(&recipe, &out_dir, revision)
        .await?;
    print_summary(&out_dir, &manifest);

    Ok(())
}

pub async fn recipes() -> Result<()> {
    println!("\n{:<20} {:<40} {:<6} {:<8} {:<20} OUTPUT", "ID", "REPOSITORY", "DIMS", "USE", "STEPS");
    println!("{}", "-".repeat(120));

    for r in recipe::builtin() {
        let usage = r.usage.map(|u| u.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<40} {:<6} {:<8} {:<20} {}",
            r.id,
            r.repo_id,
            r.dims,
            usage,
            r.transform.label(),
            r.output
        );
    }

    Ok(())
}

pub async fn pull(
    config: EnvConfig,
    repo_id: &str,
    output: Option<PathBuf>,
    revision: &str,
    include: &[String],
    exclude: &[String],
) -> Result<()> {
    let out_dir = match output {
        Some(dir) => config.resolve(&dir),
        None => {
            let name = repo_id.rsplit('/').next().unwrap_or(repo_id);
            config.resolve(&Path::new("models").join(name))
        }
    };
    let filter = FileFilter::new(include, exclude)?;

    println!("Pulling {}@{} into {}", repo_id, revision, out_dir.display());
    let manifest = Preparer::from_config(config)?
        .pull(repo_id, revision, &out_dir, &filter, None)
        .await?;
    print_summary(&out_dir, &manifest);

    Ok(())
}

pub struct ConvertArgs {
    pub source: String,
    pub output: PathBuf,
    pub revision: String,
    pub strip: Vec<String>,
    pub dtype: Option<String>,
    pub pooling: Option<String>,
}

pub async fn convert(config: EnvConfig, args: ConvertArgs) -> Result<()> {
    let options = ConvertOptions {
        renamer: KeyRenamer::new(args.strip),
        dtype: args.dtype.as_deref().map(parse_dtype).transpose()?,
        config: ConfigSource::FromSource,
        pooling: args.pooling.as_deref().map(str::parse::<PoolingMode>).transpose()?,
    };
    let source = Source::parse(&args.source, &args.revision);
    let out_dir = config.resolve(&args.output);

    let mut progress = Progress::new();
    progress.spinner(&format!("converting {}", args.source));
    let result = Preparer::from_config(config)?
        .convert(&source, &out_dir, options)
        .await;
    progress.stop_and_clear();

    print_summary(&out_dir, &result?);
    Ok(())
}

pub async fn quantize(config: EnvConfig, source: &str, output: &Path, revision: &str) -> Result<()> {
    let source = Source::parse(source, revision);
    let out_dir = config.resolve(output);

    let mut progress = Progress::new();
    progress.spinner("quantizing linear weights to int8");
    let result = Preparer::from_config(config)?.quantize(&source, &out_dir).await;
    progress.stop_and_clear();

    print_summary(&out_dir, &result?);
    Ok(())
}

pub async fn inspect(path: &Path) -> Result<()> {
    let tensors = safetensors::inspect(path)?;

    println!("\n{:<64} {:<6} {:<16} SIZE", "NAME", "DTYPE", "SHAPE");
    println!("{}", "-".repeat(100));

    let mut total = 0u64;
    for t in &tensors {
        total += t.bytes as u64;
        println!("{:<64} {:<6} {:<16} {}", t.name, t.dtype, shape(&t.shape), human_bytes(t.bytes as u64));
    }
    println!("\n{} tensors, {}", tensors.len(), human_bytes(total));

    Ok(())
}

pub async fn installed(config: EnvConfig) -> Result<()> {
    let models = ModelStore::new(&config.models_dir).list()?;

    if models.is_empty() {
        println!("No models installed in {}", config.models_dir.display());
        return Ok(());
    }

    println!("\n{:<24} {:<40} {:<12} INSTALLED", "ID", "REPOSITORY", "SIZE");
    println!("{}", "-".repeat(96));

    let now = chrono::Utc::now();
    for m in models {
        println!(
            "{:<24} {:<40} {:<12} {}",
            m.id,
            m.repo_id,
            human_bytes(m.size),
            human_age(m.installed_at, now)
        );
    }

    Ok(())
}

pub async fn remove(config: EnvConfig, id: &str) -> Result<()> {
    if ModelStore::new(&config.models_dir).remove(id)? {
        println!("Removed '{}'", id);
    } else {
        println!("'{}' is not installed, nothing to remove", id);
    }
    Ok(())
}

pub async fn verify(config: EnvConfig, target: &str, load: bool) -> Result<()> {
    let dir = resolve_target(&config, target);
    let report = store::verify(&dir)?;

    for path in &report.missing {
        println!("missing  {}", path);
    }
    for path in &report.changed {
        println!("changed  {}", path);
    }
    if !report.is_ok() {
        bail!(
            "{}: {} of {} files missing or changed",
            dir.display(),
            report.missing.len() + report.changed.len(),
            report.checked
        );
    }
    println!("{}: {} files ok", dir.display(), report.checked);

    if load {
        if dir.join(QUANTIZE_CONFIG_FILE).is_file() {
            println!("Skipping load check: int8 weights are not loadable as a float BERT encoder");
            return Ok(());
        }
        let load_dir = dir.clone();
        let loaded = tokio::task::spawn_blocking(move || check::load_bert(&load_dir)).await??;
        println!(
            "Loaded BERT encoder: hidden size {}, output {}",
            loaded.hidden_size,
            shape(&loaded.output_dims)
        );
    }

    Ok(())
}

/// An installed model id, or a directory path.
fn resolve_target(config: &EnvConfig, target: &str) -> PathBuf {
    let store = ModelStore::new(&config.models_dir);
    store
        .model_path(target)
        .unwrap_or_else(|| config.resolve(Path::new(target)))
}

fn print_summary(out_dir: &Path, manifest: &Manifest) {
    println!(
        "Wrote {} files ({}) to {}",
        manifest.files.len(),
        human_bytes(manifest.total_size()),
        out_dir.display()
    );
    if let Some(commit) = &manifest.commit {
        println!("  {}@{}", manifest.repo_id, commit);
    }
}
