use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use igbh_core::{ProcessOptions, TimeZoneMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "igbh",
    version,
    about = "Instagram Backup Helper - watermark exported images and name them by capture time"
)]
struct Cli {
    /// Instagram backup archive (.tar, .tar.gz, .tar.bz2, .tar.xz, .tar.zst)
    archive: PathBuf,

    /// JSON file with processing options; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory (emptied before writing)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Watermark text
    #[arg(long)]
    watermark: Option<String>,

    /// Watermark opacity, 0-255
    #[arg(long)]
    opacity: Option<u8>,

    /// Font file for the watermark; repeat to give fallbacks
    #[arg(long = "font")]
    fonts: Vec<PathBuf>,

    /// Name prefix of the backup folder inside the archive
    #[arg(long)]
    backup_prefix: Option<String>,

    /// Name output files by UTC time instead of local time
    #[arg(long)]
    utc: bool,

    /// JPEG quality, 1-100
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Log debug details
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_options(self) -> anyhow::Result<ProcessOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str::<ProcessOptions>(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => ProcessOptions::new(&self.archive),
        };

        options.archive = self.archive;
        if let Some(output) = self.output {
            options.output = output;
        }
        if let Some(text) = self.watermark {
            options.watermark.text = text;
        }
        if let Some(opacity) = self.opacity {
            options.watermark.opacity = opacity;
        }
        if !self.fonts.is_empty() {
            options.watermark.font_paths = self.fonts;
        }
        if let Some(prefix) = self.backup_prefix {
            options.backup_prefix = prefix;
        }
        if self.utc {
            options.timezone = TimeZoneMode::Utc;
        }
        if let Some(quality) = self.quality {
            options.jpeg_quality = quality;
        }
        Ok(options)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "igbh=debug,igbh_core=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };
    init_logging(cli.verbose);

    if !cli.archive.exists() {
        eprintln!("Error: File not found: {}", cli.archive.display());
        return ExitCode::from(1);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let t_total = std::time::Instant::now();
    let options = cli.into_options()?;

    let result = igbh_core::process(&options, &|stage, current, total, message| {
        tracing::debug!("[{}] {}/{} {}", stage, current, total, message);
    })?;

    eprintln!(
        "Done! {} images found, {} written, {} failed, {} unsafe archive members skipped ({:.2}s)",
        result.images_found,
        result.images_written,
        result.images_failed,
        result.members_rejected,
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
