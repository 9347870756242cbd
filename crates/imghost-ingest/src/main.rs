//! imghost Ingest - bulk archive upload tool

use anyhow::Result;
use clap::{Parser, Subcommand};
use imghost_common::logging::{init_logging, LogConfig, LogLevel};
use imghost_common::types::{
    split_tags, OutputFormat, UploadOptions, DEFAULT_MAX_WIDTH, DEFAULT_QUALITY,
};
use imghost_ingest::{
    archive::{AnalysisResult, ArchiveAnalyzer, ArchiveSource, SkipReason},
    dispatch::DEFAULT_UPLOAD_CONCURRENCY,
    extract::DEFAULT_BATCH_SIZE,
    progress::format_bytes,
    session::{IngestSession, Phase, SessionConfig},
    uploader::{HttpUploader, DEFAULT_SERVER_URL},
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "imghost-ingest")]
#[command(author, version, about = "Bulk upload image archives to an imghost server")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the images an archive contains without uploading anything
    Analyze {
        /// ZIP archive to inspect
        archive: PathBuf,

        /// Show every skipped entry
        #[arg(long)]
        show_skipped: bool,
    },

    /// Upload every image of an archive
    Upload {
        /// ZIP archive to upload
        archive: PathBuf,

        /// imghost server base URL
        #[arg(long, env = "IMGHOST_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
        server: String,

        /// Comma separated tags applied to every image
        #[arg(long, default_value = "")]
        tags: String,

        /// Minutes until the images expire; 0 keeps them forever
        #[arg(long, default_value_t = 0)]
        expiry_minutes: u32,

        /// Encoder quality (1-100)
        #[arg(long, default_value_t = DEFAULT_QUALITY)]
        quality: u8,

        /// Widest derived variant; 0 keeps the original width
        #[arg(long, default_value_t = DEFAULT_MAX_WIDTH)]
        max_width: u32,

        /// Re-encode animated images instead of keeping only the original
        #[arg(long)]
        flatten_animation: bool,

        /// Derived variants to produce: webp, avif or both
        #[arg(long, default_value = "webp")]
        format: OutputFormat,

        /// Entries extracted per batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Uploads in flight at once
        #[arg(long, default_value_t = DEFAULT_UPLOAD_CONCURRENCY)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("imghost-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;

    init_logging(&log_config)?;

    match cli.command {
        Command::Analyze {
            archive,
            show_skipped,
        } => {
            let source = ArchiveSource::path(archive);
            let analysis = tokio::task::spawn_blocking(move || {
                let mut archive = source.open()?;
                ArchiveAnalyzer::new().analyze(&mut archive)
            })
            .await??;
            print_preview(&analysis, show_skipped);
        },
        Command::Upload {
            archive,
            server,
            tags,
            expiry_minutes,
            quality,
            max_width,
            flatten_animation,
            format,
            batch_size,
            concurrency,
        } => {
            let options = UploadOptions {
                tags: split_tags(&tags),
                expiry_minutes,
                quality,
                max_width,
                preserve_animation: !flatten_animation,
                output_format: format,
            };
            let config = SessionConfig {
                batch_size,
                upload_concurrency: concurrency,
                ..SessionConfig::default()
            };
            upload(archive, &server, options, config).await?;
        },
    }

    Ok(())
}

fn print_preview(analysis: &AnalysisResult, show_skipped: bool) {
    println!(
        "{} images, {} total",
        analysis.total_images,
        format_bytes(analysis.total_size_bytes)
    );

    let not_image = analysis.skipped_count(SkipReason::NotImage);
    let too_large = analysis.skipped_count(SkipReason::TooLarge);
    if not_image + too_large > 0 {
        println!("Skipped: {} not images, {} too large", not_image, too_large);
    }

    if show_skipped {
        for skip in &analysis.skipped {
            println!("  {:?}  {}", skip.reason, skip.path);
        }
    }
}

fn bar(total: u64, template: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(ProgressStyle::with_template(template)?.progress_chars("#>-"));
    Ok(pb)
}

async fn upload(
    archive: PathBuf,
    server: &str,
    options: UploadOptions,
    config: SessionConfig,
) -> Result<()> {
    let uploader = Arc::new(HttpUploader::new(server)?);
    let session = Arc::new(IngestSession::new(uploader, config));

    let analysis = session.select_archive(ArchiveSource::path(archive)).await?;
    print_preview(&analysis, false);
    if analysis.total_images == 0 {
        println!("Nothing to upload");
        return Ok(());
    }

    let total = analysis.total_images as u64;
    let bars = MultiProgress::new();
    let extract_bar = bars.add(bar(
        total,
        "extract [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
    )?);
    let upload_bar = bars.add(bar(
        total,
        "upload  [{wide_bar:.green/blue}] {pos}/{len} {msg}",
    )?);

    // Mirror session snapshots into the progress bars
    let mut updates = session.subscribe();
    let render = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if let Some(progress) = &snapshot.extract_progress {
                extract_bar.set_position(progress.current as u64);
                extract_bar.set_message(progress.current_item_name.clone());
            }
            let uploaded = snapshot.upload_progress;
            upload_bar.set_position(uploaded.attempted() as u64);
            upload_bar.set_message(format!("{} failed", uploaded.failed_count));
            if matches!(snapshot.phase, Phase::Completed | Phase::Idle | Phase::Error) {
                break;
            }
        }
        extract_bar.finish();
        upload_bar.finish();
    });

    let interrupt = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling ingestion");
                session.cancel().await;
            }
        })
    };

    let result = session.confirm(options).await;
    interrupt.abort();

    // Rejected options leave the session in preview, so the renderer never sees a final phase
    if result.is_err() {
        render.abort();
    } else if let Err(e) = render.await {
        tracing::warn!("Progress display task failed: {}", e);
    }

    let report = result?;
    println!(
        "{} uploaded, {} failed, {} could not be extracted (of {})",
        report.completed, report.failed, report.extraction_skipped, report.total
    );
    if report.cancelled {
        println!("Cancelled; images already uploaded were kept");
    }

    Ok(())
}
