use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureSettings;
use crate::error::PublisherError;
use crate::frame::{FrameGeometry, FrameRate};
use crate::ingest::camera::DEFAULT_DEVICE;

pub const CONFIG_ENV: &str = "CAMERA_SHM_CONFIG";
pub const DEFAULT_PLANAR_NAME: &str = "video0.i420";
pub const DEFAULT_PACKED_NAME: &str = "video0.argb";
const DEFAULT_WARMUP_MS: u64 = 3_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PublisherConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    freq: Option<f32>,
    device: Option<String>,
    warmup_ms: Option<u64>,
    verbose: Option<bool>,
    names: Option<NamesConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NamesConfigFile {
    i420: Option<String>,
    argb: Option<String>,
}

/// Values given explicitly on the command line or through their environment
/// variables. Anything set here wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub freq: Option<f32>,
    pub device: Option<String>,
    pub warmup_ms: Option<u64>,
    pub verbose: bool,
    pub name_i420: Option<String>,
    pub name_argb: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub capture: CaptureSettings,
    pub device: String,
    /// Open a preview window.
    pub verbose: bool,
}

impl PublisherConfig {
    /// Resolve the publisher configuration.
    ///
    /// Order: built-in defaults, then the JSON file named by
    /// `overrides.config_path` or `CAMERA_SHM_CONFIG`, then explicit
    /// overrides. The result is validated; every failure is a
    /// `PublisherError::Configuration`.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides.config_path.clone().or_else(|| {
            std::env::var(CONFIG_ENV)
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from)
        });
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => PublisherConfigFile::default(),
        };
        Self::resolve(file_cfg, overrides)
    }

    fn resolve(file: PublisherConfigFile, overrides: &ConfigOverrides) -> Result<Self> {
        let names = file.names.unwrap_or_default();

        let width = overrides
            .width
            .or(file.width)
            .ok_or_else(|| PublisherError::configuration("width is required"))?;
        let height = overrides
            .height
            .or(file.height)
            .ok_or_else(|| PublisherError::configuration("height is required"))?;
        let freq = overrides
            .freq
            .or(file.freq)
            .ok_or_else(|| PublisherError::configuration("freq is required"))?;

        let planar_name = overrides
            .name_i420
            .clone()
            .or(names.i420)
            .unwrap_or_else(|| DEFAULT_PLANAR_NAME.to_string());
        let packed_name = overrides
            .name_argb
            .clone()
            .or(names.argb)
            .unwrap_or_else(|| DEFAULT_PACKED_NAME.to_string());
        validate_region_names(&planar_name, &packed_name)?;

        let device = overrides
            .device
            .clone()
            .or(file.device)
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string());
        if device.trim().is_empty() {
            return Err(PublisherError::configuration("device must not be empty").into());
        }

        let warmup = Duration::from_millis(
            overrides
                .warmup_ms
                .or(file.warmup_ms)
                .unwrap_or(DEFAULT_WARMUP_MS),
        );

        Ok(Self {
            capture: CaptureSettings {
                geometry: FrameGeometry::new(width, height)?,
                frame_rate: FrameRate::new(freq)?,
                planar_name,
                packed_name,
                warmup,
            },
            device,
            verbose: overrides.verbose || file.verbose.unwrap_or(false),
        })
    }
}

fn validate_region_names(planar: &str, packed: &str) -> Result<()> {
    for name in [planar, packed] {
        let bare = name.strip_prefix('/').unwrap_or(name);
        if bare.trim().is_empty() {
            return Err(
                PublisherError::configuration("shared memory names must not be empty").into(),
            );
        }
        if bare.contains('/') || bare.contains('\0') {
            return Err(PublisherError::configuration(format!(
                "shared memory name '{name}' must not contain '/' or NUL"
            ))
            .into());
        }
    }
    let bare = |name: &str| name.trim_start_matches('/').to_string();
    if bare(planar) == bare(packed) {
        return Err(PublisherError::configuration(format!(
            "I420 and ARGB shared memory need distinct names; both are '{planar}'"
        ))
        .into());
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<PublisherConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        PublisherError::configuration(format!(
            "failed to read config file {}: {}",
            path.display(),
            err
        ))
    })?;
    let cfg = serde_json::from_str(&raw).map_err(|err| {
        PublisherError::configuration(format!("invalid config file {}: {}", path.display(), err))
    })?;
    Ok(cfg)
}
