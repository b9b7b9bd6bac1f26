//! grid-overlay: headless driver for the temporal map-overlay engine.
//!
//! Mounts the engine against the live data service and WMS imagery,
//! drives the timeline the way a user would (one scrub, or autoplay
//! through the raster window), then unmounts and reports what happened.

mod config;
mod journal;

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use tokio::time::sleep;
use tracing::{error, info, warn};

use common::{Error, OverlayConfig, RasterType};
use grid_data_client::{GridDataClient, WmsTileProvider};
use journal::JournalCanvas;
use overlay_engine::{OverlayEngine, SystemClock};

/// Grid map-overlay engine, headless.
#[derive(Parser)]
#[command(name = "grid-overlay", about = "Drive the grid map-overlay engine headlessly")]
struct Cli {
    /// Scrub once to now + this many hours (negative for history).
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset_hours: f64,

    /// Step through the whole raster window in one-hour increments.
    #[arg(long)]
    autoplay: bool,

    /// Delay between autoplay steps (ms).
    #[arg(long, default_value_t = 250)]
    step_ms: u64,

    /// Keep the engine mounted this long after the scenario.
    #[arg(long, default_value_t = 5)]
    hold_secs: u64,

    /// Append every canvas command to this JSONL file.
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Start with transmission flows hidden.
    #[arg(long)]
    no_flows: bool,

    /// Raster types shown on mount (repeatable). Defaults to the config.
    #[arg(long = "raster", value_parser = parse_raster_type)]
    rasters: Vec<RasterType>,
}

fn parse_raster_type(raw: &str) -> Result<RasterType, String> {
    RasterType::parse(raw).ok_or_else(|| {
        format!("unknown raster type '{raw}' (temperature, precipitation, cloud_cover)")
    })
}

fn apply_cli_overrides(config: &mut OverlayConfig, cli: &Cli) {
    if cli.no_flows {
        config.flows_visible = false;
    }
    if !cli.rasters.is_empty() {
        let mut rasters = cli.rasters.clone();
        rasters.sort();
        rasters.dedup();
        config.raster.initially_visible = rasters;
    }
}

/// `now` shifted by a fractional number of hours, if representable.
fn offset_instant(now: DateTime<Utc>, offset_hours: f64) -> Result<DateTime<Utc>, Error> {
    let out_of_range = || Error::Config(format!("--offset-hours {offset_hours} is out of range"));
    let millis = (offset_hours * 3_600_000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return Err(out_of_range());
    }
    let offset = ChronoDuration::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;
    now.checked_add_signed(offset).ok_or_else(out_of_range)
}

async fn run_scenario(engine: &OverlayEngine, cli: &Cli, window_hours: i64) {
    if cli.autoplay {
        info!("autoplay over ±{}h every {}ms", window_hours, cli.step_ms);
        for offset in -window_hours..=window_hours {
            let now = Utc::now();
            let instant = ChronoDuration::try_hours(offset)
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now);
            engine.set_scrub_instant(instant);
            sleep(Duration::from_millis(cli.step_ms)).await;
        }
    } else {
        // Validated before mount.
        let instant = offset_instant(Utc::now(), cli.offset_hours).unwrap_or_else(|_| Utc::now());
        info!("scrubbing to {} ({:+}h)", instant, cli.offset_hours);
        engine.set_scrub_instant(instant);
    }

    info!("holding for {}s", cli.hold_secs);
    sleep(Duration::from_secs(cli.hold_secs)).await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "grid_overlay=info,overlay_engine=info,grid_data_client=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("grid overlay starting up...");

    // Load configuration.
    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    apply_cli_overrides(&mut cfg, &cli);
    if let Err(e) = offset_instant(Utc::now(), cli.offset_hours) {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("Data service: {}", cfg.data_service.base_url);
    info!("WMS: {}", cfg.raster.wms_base_url);
    info!(
        "Rasters: {:?}, flows {}, constrained={}",
        cfg.raster.initially_visible,
        if cfg.flows_visible { "on" } else { "off" },
        cfg.constrained_device
    );

    let canvas = match &cli.journal {
        Some(path) => match JournalCanvas::with_journal(path.clone()) {
            Ok(canvas) => canvas,
            Err(e) => {
                error!("Failed to open canvas journal {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => JournalCanvas::in_memory(),
    };
    let canvas = Arc::new(canvas);
    if let Some(path) = canvas.journal_path() {
        info!("Canvas journal path: {}", path.display());
    }

    let engine = OverlayEngine::mount(
        &cfg,
        canvas.clone(),
        Arc::new(GridDataClient::new(&cfg.data_service)),
        Arc::new(WmsTileProvider::new(&cfg.raster)),
        Arc::new(SystemClock),
    );

    tokio::select! {
        _ = run_scenario(&engine, &cli, cfg.raster.window_hours) => {
            info!("scenario finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; unmounting");
        }
    }

    let stats = engine.stats();
    info!(
        "fetches={} failed={} cache_hits={} short_circuits={} cached={} rasters={} animator={:?}",
        stats.scheduler.fetches,
        stats.scheduler.failed_fetches,
        stats.scheduler.cache_hits,
        stats.scheduler.short_circuits,
        stats.cached_records,
        stats.resident_raster_layers,
        stats.animator,
    );
    match serde_json::to_string(&stats) {
        Ok(line) => info!("stats: {}", line),
        Err(e) => warn!("failed to serialize stats: {}", e),
    }

    engine.unmount();

    let summary = canvas.summary();
    info!(
        "after unmount: {} layers attached ({} visible, {} raster), {} pending tasks, {} canvas commands",
        summary.attached,
        summary.visible,
        summary.rasters,
        engine.stats().pending_tasks,
        summary.commands
    );
    if summary.attached > 0 {
        error!("{} layers leaked past unmount", summary.attached);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "grid-overlay",
            "--no-flows",
            "--raster",
            "precip",
            "--raster",
            "cloud",
            "--offset-hours",
            "-2.5",
        ]);
        let mut config = OverlayConfig::default();
        apply_cli_overrides(&mut config, &cli);

        assert!(!config.flows_visible);
        assert_eq!(
            config.raster.initially_visible,
            vec![RasterType::Precipitation, RasterType::CloudCover]
        );
        assert_eq!(cli.offset_hours, -2.5);
    }

    #[test]
    fn test_rejects_unknown_raster() {
        assert!(Cli::try_parse_from(["grid-overlay", "--raster", "smoke"]).is_err());
    }

    #[test]
    fn test_fractional_offset() {
        let now = Utc::now();
        assert_eq!(
            offset_instant(now, -1.5).unwrap(),
            now - ChronoDuration::minutes(90)
        );
    }

    #[test]
    fn test_offset_out_of_range_is_config_error() {
        let now = Utc::now();
        assert!(matches!(offset_instant(now, 1e15), Err(Error::Config(_))));
        assert!(matches!(offset_instant(now, f64::NAN), Err(Error::Config(_))));
        assert!(matches!(offset_instant(now, -1e300), Err(Error::Config(_))));
    }

    #[test]
    fn test_repeated_rasters_deduplicated() {
        let cli = Cli::parse_from([
            "grid-overlay",
            "--raster",
            "temp",
            "--raster",
            "cloud",
            "--raster",
            "temp",
        ]);
        let mut config = OverlayConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(
            config.raster.initially_visible,
            vec![RasterType::Temperature, RasterType::CloudCover]
        );
    }
}
