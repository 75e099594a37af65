//! appstream-builder - build AppStream catalogs from distribution packages

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use appstream_builder::config::ContextConfig;
use appstream_builder::executor::BuildExecutor;
use appstream_builder::harvest::Context;

#[derive(Parser, Debug)]
#[command(name = "appstream-builder")]
#[command(author, version, about = "Build AppStream metadata from packages")]
struct Cli {
    /// Package files to process (.rpm, .deb, .cab, .pkg.tar.*, .eopkg)
    packages: Vec<PathBuf>,

    /// TOML configuration file; command line options override it
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// OSTree repository to read branches from
    #[arg(long, requires = "ostree_ref")]
    ostree_repo: Option<PathBuf>,

    /// OSTree branch to process, may be repeated
    #[arg(long = "ostree-ref")]
    ostree_ref: Vec<String>,

    /// Base filename of the generated artifacts
    #[arg(long)]
    basename: Option<String>,

    /// Origin attribute of the primary catalog
    #[arg(long)]
    origin: Option<String>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    temp_dir: Option<PathBuf>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Output of a previous run to reuse records and icons from
    #[arg(long)]
    old_metadata: Option<PathBuf>,

    /// Directory of extra catalogs appended to the primary catalog
    #[arg(long)]
    extra_appstream: Option<PathBuf>,

    /// Directory of extra AppData files
    #[arg(long)]
    extra_appdata: Option<PathBuf>,

    /// Directory of extra screenshots, one subdirectory per application
    #[arg(long)]
    extra_screenshots: Option<PathBuf>,

    /// Base URL screenshots are mirrored under
    #[arg(long)]
    screenshot_uri: Option<String>,

    /// Plugin to skip, may be repeated
    #[arg(long = "disable-plugin")]
    disabled_plugins: Vec<String>,

    #[arg(long)]
    min_icon_size: Option<u32>,

    /// Also write the catalog of vetoed records
    #[arg(long)]
    include_failed: bool,

    /// Inline icon data into the catalog
    #[arg(long)]
    embedded_icons: bool,

    /// Also save 128x128 icons
    #[arg(long)]
    hidpi_icons: bool,

    /// Never touch the network
    #[arg(long)]
    no_network: bool,

    /// Copy the icon tree instead of writing a tarball
    #[arg(long)]
    uncompressed_icons: bool,

    /// Keep per-package temp trees
    #[arg(long)]
    keep_temp: bool,

    /// Build timeout in seconds
    #[arg(long, default_value_t = 3600)]
    timeout: u64,

    /// Write the build report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Loads the config file, if any, and applies command line overrides.
    fn build_config(&self) -> Result<ContextConfig> {
        let mut config = match &self.config {
            Some(path) => ContextConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ContextConfig::default(),
        };

        let paths = [
            (&mut config.output_dir, &self.output_dir),
            (&mut config.temp_dir, &self.temp_dir),
            (&mut config.cache_dir, &self.cache_dir),
            (&mut config.log_dir, &self.log_dir),
            (&mut config.old_metadata, &self.old_metadata),
            (&mut config.extra_appstream, &self.extra_appstream),
            (&mut config.extra_appdata, &self.extra_appdata),
            (&mut config.extra_screenshots, &self.extra_screenshots),
        ];
        for (field, value) in paths {
            if value.is_some() {
                field.clone_from(value);
            }
        }
        if self.basename.is_some() {
            config.basename.clone_from(&self.basename);
        }
        if let Some(origin) = &self.origin {
            config.origin.clone_from(origin);
        }
        if self.screenshot_uri.is_some() {
            config.screenshot_uri.clone_from(&self.screenshot_uri);
        }
        if let Some(size) = self.min_icon_size {
            config.min_icon_size = size;
        }
        config
            .disabled_plugins
            .extend(self.disabled_plugins.iter().cloned());

        let flags = &mut config.flags;
        flags.include_failed |= self.include_failed;
        flags.embedded_icons |= self.embedded_icons;
        flags.hidpi_icons |= self.hidpi_icons;
        flags.no_network |= self.no_network;
        flags.uncompressed_icons |= self.uncompressed_icons;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.build_config()?;
    let mut context = Context::new(config).with_temp_cleanup(!cli.keep_temp);
    for path in &cli.packages {
        context
            .add_filename(path)
            .with_context(|| format!("Failed to add {}", path.display()))?;
    }
    if let Some(repo) = &cli.ostree_repo {
        for refname in &cli.ostree_ref {
            context.add_ostree(repo, refname);
        }
    }

    let report = BuildExecutor::new(1)
        .with_timeout(Duration::from_secs(cli.timeout))
        .run(context)
        .await
        .context("Build failed")?;

    info!(
        kept = report.stats.apps_kept,
        failed = report.stats.apps_failed,
        ignored = report.stats.packages_ignored,
        elapsed_ms = report.elapsed_ms,
        "Done"
    );

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }
    Ok(())
}
