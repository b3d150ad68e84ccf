mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Mode};
use novel_reel::api::{ChatClient, SpeechClient, TaskImageClient};
use novel_reel::breakdown::run_breakdown;
use novel_reel::config::Config;
use novel_reel::generator::Pipeline;
use novel_reel::init;
use novel_reel::retry::RetryPolicy;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;
    Ok(())
}

fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    let retry = RetryPolicy::from_settings(&cfg.retry);
    let speech = SpeechClient::new(cfg.tts.clone(), retry)?;
    let images = TaskImageClient::new(cfg.image.clone(), retry)?;
    Ok(Pipeline::new(cfg.clone(), Arc::new(speech), Arc::new(images)))
}

async fn render_chapter(pipeline: &Pipeline, path: &Path) {
    match pipeline.process_chapter_file(path).await {
        Ok(report) => info!(
            "[OK] {}: {}/{} paragraph video(s)",
            report.folder.display(),
            report.paragraph_videos.len(),
            report.paragraphs
        ),
        Err(err) => error!("[ERROR] {}: {:#}", path.display(), err),
    }
}

async fn build_movie(pipeline: &Pipeline) {
    match pipeline.create_complete_movie().await {
        Ok(Some(movie)) => info!("[OK] Movie ready: {}", movie.display()),
        Ok(None) => warn!("[WARN] No movie produced"),
        Err(err) => error!("[ERROR] Movie assembly failed: {:#}", err),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let args = Cli::parse();

    let cfg = if args.config.exists() {
        Config::load(&args.config).await?
    } else {
        warn!("[WARN] {} not found; using defaults", args.config.display());
        Config::from_yaml("")?
    };
    init::ensure_directories(&cfg).await?;

    let mode = args.mode();
    match &mode {
        Mode::Breakdown => cfg.validate_llm_credentials()?,
        Mode::Everything | Mode::Chapter(_) => cfg.validate_credentials()?,
        Mode::Movie => {}
    }

    if mode != Mode::Breakdown && !init::check_ffmpeg(&cfg).await {
        warn!("[WARN] {} is not runnable. Please install FFmpeg.", cfg.video.ffmpeg);
    }

    match mode {
        Mode::Breakdown => {
            let model = ChatClient::new(cfg.llm.clone(), RetryPolicy::from_settings(&cfg.retry))?;
            match run_breakdown(&cfg, &model).await {
                Ok(summary) => info!(
                    "[OK] Breakdown: {} parsed, {} raw, {} skipped, {} failed",
                    summary.parsed, summary.raw, summary.skipped, summary.failed
                ),
                Err(err) => error!("[ERROR] Breakdown stopped: {:#}", err),
            }
        }
        Mode::Chapter(path) => {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                anyhow::bail!("expected a chapter .json file, got {}", path.display());
            }
            let pipeline = build_pipeline(&cfg)?;
            render_chapter(&pipeline, &path).await;
        }
        Mode::Movie => {
            build_movie(&build_pipeline(&cfg)?).await;
        }
        Mode::Everything => {
            let pipeline = build_pipeline(&cfg)?;
            match pipeline.process_all_chapters().await {
                Ok(reports) => info!("[OK] Rendered {} chapter(s)", reports.len()),
                Err(err) => error!("[ERROR] Chapter processing stopped: {:#}", err),
            }
            build_movie(&pipeline).await;
        }
    }

    Ok(())
}
