//! Configuration loader: merges .env, config.toml and environment overrides.

use std::path::PathBuf;

use common::{Error, OverlayConfig};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn config_path() -> PathBuf {
    std::env::var("GRID_OVERLAY_CONFIG")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn validate_config(config: &OverlayConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.data_service.base_url.trim().is_empty() {
        issues.push("data_service.base_url must not be empty".into());
    }
    if config.data_service.timeout_secs == 0 {
        issues.push("data_service.timeout_secs must be > 0".into());
    }
    if config.data_service.max_requests_per_sec == 0 {
        issues.push("data_service.max_requests_per_sec must be > 0".into());
    }

    if config.fetch.throttle_ms == 0 {
        issues.push("fetch.throttle_ms must be > 0".into());
    }
    if config.fetch.cache_ttl_secs == 0 {
        issues.push("fetch.cache_ttl_secs must be > 0".into());
    }
    if config.fetch.cache_max_entries == 0 {
        issues.push("fetch.cache_max_entries must be > 0".into());
    }
    if config.fetch.realtime_tolerance_minutes < 0 {
        issues.push("fetch.realtime_tolerance_minutes must be >= 0".into());
    }

    if config.raster.wms_base_url.trim().is_empty() {
        issues.push("raster.wms_base_url must not be empty".into());
    }
    if config.raster.window_hours < 0 {
        issues.push("raster.window_hours must be >= 0".into());
    }
    if config.raster.eager_steps == 0 {
        issues.push("raster.eager_steps must be > 0".into());
    }
    for (name, opacity) in [
        ("temperature_opacity", config.raster.temperature_opacity),
        ("precipitation_opacity", config.raster.precipitation_opacity),
        ("cloud_cover_opacity", config.raster.cloud_cover_opacity),
    ] {
        if !(opacity > 0.0 && opacity <= 1.0) {
            issues.push(format!("raster.{name} must be in (0,1]"));
        }
    }
    let [min_lon, min_lat, max_lon, max_lat] = config.raster.bbox;
    if min_lon >= max_lon || min_lat >= max_lat {
        issues.push("raster.bbox must be [min_lon, min_lat, max_lon, max_lat]".into());
    }
    if config.raster.image_width == 0 || config.raster.image_height == 0 {
        issues.push("raster image size must be > 0".into());
    }

    if config.animation.cycle_ms == 0 {
        issues.push("animation.cycle_ms must be > 0".into());
    }
    if config.animation.indicators_per_corridor == 0 {
        issues.push("animation.indicators_per_corridor must be > 0".into());
    }
    if config.animation.noise_threshold_mw < 0.0 {
        issues.push("animation.noise_threshold_mw must be >= 0".into());
    }
    if config.animation.display_fps == 0 || config.animation.constrained_max_fps == 0 {
        issues.push("animation frame rates must be > 0".into());
    }
    if config.animation.constrained_max_fps > config.animation.display_fps {
        issues.push("animation.constrained_max_fps must be <= animation.display_fps".into());
    }

    let mut seen = std::collections::HashSet::new();
    for corridor in &config.corridors {
        if !seen.insert(corridor.group_key.as_str()) {
            issues.push(format!("duplicate corridor group_key {}", corridor.group_key));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for site in &config.generators {
        if !seen.insert(site.name.as_str()) {
            issues.push(format!("duplicate generator name {}", site.name));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load overlay configuration from environment and optional config file.
pub fn load_config() -> Result<OverlayConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = OverlayConfig::default();

    // 3. Try loading the config file if it exists.
    let path = config_path();
    if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
    }

    // 4. Override with environment variables (highest priority).
    if let Ok(url) = std::env::var("GRID_DATA_URL") {
        config.data_service.base_url = url.trim().to_string();
    }
    if let Ok(url) = std::env::var("GRID_WMS_URL") {
        config.raster.wms_base_url = url.trim().to_string();
    }
    if let Ok(raw) = std::env::var("GRID_THROTTLE_MS") {
        config.fetch.throttle_ms = parse_positive_u64(&raw, "GRID_THROTTLE_MS")?;
    }
    if let Ok(raw) = std::env::var("GRID_CACHE_TTL_SECS") {
        config.fetch.cache_ttl_secs = parse_positive_u64(&raw, "GRID_CACHE_TTL_SECS")?;
    }
    if let Ok(raw) = std::env::var("GRID_CONSTRAINED_DEVICE") {
        config.constrained_device = parse_bool(&raw);
    }
    if let Ok(raw) = std::env::var("GRID_RASTER_WINDOW_HOURS") {
        let hours = parse_positive_u64(&raw, "GRID_RASTER_WINDOW_HOURS")?;
        config.raster.window_hours = i64::try_from(hours)
            .map_err(|_| Error::Config("GRID_RASTER_WINDOW_HOURS is too large".into()))?;
    }

    // 5. Validate.
    validate_config(&config)?;

    Ok(config)
}
