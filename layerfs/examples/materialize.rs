//! This example materializes an overlay directory on top of a base directory.
//!
//! Both layers are read through [`NativeBackend`], so any two directories on disk can be
//! combined. With `--diff` the changes the overlay makes to the base are printed instead.
//!
//! To run the example:
//! ```bash
//! cargo run --example materialize -- ./overlay ./out --base ./base --conflict skip
//! cargo run --example materialize -- ./overlay ./out --base ./base --diff
//! ```

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use layerfs::{
    ConflictResolution, LayerFsConfig, Materializer, NativeBackend, QueryOptions, StorageBackend,
    ViewQuery,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes the combined content of an overlay and an optional base to a directory.
#[derive(Parser, Debug)]
#[command(author, long_about = None)]
struct Args {
    /// Directory holding the overlay layer
    overlay: PathBuf,

    /// Directory to write the result to
    target: PathBuf,

    /// Directory holding the base layer
    #[arg(short, long)]
    base: Option<PathBuf>,

    /// TOML file to read settings from
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// What to do with files that already exist: overwrite, skip or error
    #[arg(long)]
    conflict: Option<String>,

    /// Only copy overlay files matching this glob
    #[arg(short, long)]
    pattern: Option<String>,

    /// Keep existing files in the target directory
    #[arg(long)]
    no_clean: bool,

    /// Print the changes instead of materializing
    #[arg(long)]
    diff: bool,
}

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    let mut config = match &args.config {
        Some(path) => LayerFsConfig::load(path).await?,
        None => LayerFsConfig::default(),
    };
    if let Some(conflict) = &args.conflict {
        config.set_conflict_resolution(parse_conflict(conflict)?);
    }
    if args.no_clean {
        config.set_clean(false);
    }

    let overlay = NativeBackend::new(&args.overlay);
    let base = args.base.as_ref().map(NativeBackend::new);
    let materializer = Materializer::from_config(&config).with_progress(|path, written, _| {
        tracing::debug!("[{}] wrote {}", written, path);
    });

    if args.diff {
        let Some(base) = &base else {
            bail!("--diff needs a base directory");
        };

        for change in materializer.diff(&overlay, base, "/").await? {
            println!(
                "{:?} {} ({:?} -> {:?})",
                change.get_change_type(),
                change.get_path(),
                change.get_old_size(),
                change.get_new_size()
            );
        }

        return Ok(());
    }

    let filters = match &args.pattern {
        Some(pattern) => Some(ViewQuery::new(
            QueryOptions::builder().path_pattern(pattern.as_str()).build(),
        )?),
        None => None,
    };

    let result = materializer
        .materialize(
            &overlay,
            &args.target,
            base.as_ref().map(|b| b as &dyn StorageBackend),
            filters.as_ref(),
            config.get_clean(),
        )
        .await?;

    println!(
        "wrote {} file(s), {} bytes to {}",
        result.get_files_written(),
        result.get_bytes_written(),
        result.get_target_path().display()
    );
    for path in result.get_skipped() {
        println!("skipped {}", path);
    }
    for (path, error) in result.get_errors() {
        eprintln!("error {}: {}", path, error);
    }

    Ok(())
}

fn parse_conflict(value: &str) -> Result<ConflictResolution> {
    Ok(match value {
        "overwrite" => ConflictResolution::Overwrite,
        "skip" => ConflictResolution::Skip,
        "error" => ConflictResolution::Error,
        other => bail!("unknown conflict resolution: {other}"),
    })
}
