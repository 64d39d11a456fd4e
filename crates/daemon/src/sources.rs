//! Watch path resolution.
//!
//! Besides the folders listed in the config, clips can come from recorder
//! apps that keep their output folder in their own settings files:
//! Medal TV (`%APPDATA%/Medal/store/settings.json`) and the NVIDIA overlay
//! (`%LOCALAPPDATA%/NVIDIA Corporation/NVIDIA Overlay/GallerySettings.json`).

use crate::config::Config;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors resolving a recorder's clip folder
#[derive(Debug, Error)]
pub enum SourceError {
    /// A required base directory could not be determined
    #[error("{0} environment variable not found")]
    MissingEnv(&'static str),

    /// The recorder's settings file does not exist
    #[error("{app} settings file not found at {path} - is {app} installed?")]
    SettingsNotFound { app: &'static str, path: PathBuf },

    /// The settings file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON of the expected shape
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The settings file has no folder entry
    #[error("{field} not found in {app} settings")]
    MissingField { app: &'static str, field: &'static str },

    /// The configured folder does not exist
    #[error("{app} clip folder does not exist: {path}")]
    FolderMissing { app: &'static str, path: PathBuf },
}

#[derive(Debug, Default, Deserialize)]
struct MedalSettings {
    #[serde(default)]
    recorder: MedalRecorder,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MedalRecorder {
    #[serde(default)]
    clip_folder: String,
}

#[derive(Debug, Default, Deserialize)]
struct NvidiaGallerySettings {
    #[serde(default)]
    settings: NvidiaGallery,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvidiaGallery {
    #[serde(default, rename = "currentDirectoryV2")]
    current_directory_v2: String,
}

/// Base directories recorder settings live under
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceEnv {
    /// Roaming app data (`%APPDATA%`)
    pub appdata: Option<PathBuf>,
    /// Local app data (`%LOCALAPPDATA%`)
    pub local_appdata: Option<PathBuf>,
}

impl SourceEnv {
    /// Read the environment, falling back to the platform's data dirs
    pub fn from_system() -> Self {
        let base = BaseDirs::new();
        let appdata = std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .or_else(|| base.as_ref().map(|b| b.data_dir().to_path_buf()));
        let local_appdata = std::env::var_os("LOCALAPPDATA")
            .map(PathBuf::from)
            .or_else(|| base.as_ref().map(|b| b.data_local_dir().to_path_buf()));
        Self {
            appdata,
            local_appdata,
        }
    }
}

fn read_settings<T: for<'de> Deserialize<'de>>(app: &'static str, path: &Path) -> Result<T, SourceError> {
    if !path.is_file() {
        return Err(SourceError::SettingsNotFound {
            app,
            path: path.to_path_buf(),
        });
    }
    let data = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn existing_folder(app: &'static str, field: &'static str, folder: String) -> Result<PathBuf, SourceError> {
    if folder.is_empty() {
        return Err(SourceError::MissingField { app, field });
    }
    let path = PathBuf::from(folder);
    if !path.is_dir() {
        return Err(SourceError::FolderMissing { app, path });
    }
    Ok(path)
}

/// Medal TV's configured clip folder
pub fn medal_clip_folder(env: &SourceEnv) -> Result<PathBuf, SourceError> {
    let appdata = env.appdata.as_ref().ok_or(SourceError::MissingEnv("APPDATA"))?;
    let settings_path = appdata.join("Medal").join("store").join("settings.json");
    let settings: MedalSettings = read_settings("Medal TV", &settings_path)?;
    existing_folder("Medal TV", "clipFolder", settings.recorder.clip_folder)
}

/// The NVIDIA overlay's current capture folder
pub fn nvidia_capture_folder(env: &SourceEnv) -> Result<PathBuf, SourceError> {
    let local = env
        .local_appdata
        .as_ref()
        .ok_or(SourceError::MissingEnv("LOCALAPPDATA"))?;
    let settings_path = local
        .join("NVIDIA Corporation")
        .join("NVIDIA Overlay")
        .join("GallerySettings.json");
    let settings: NvidiaGallerySettings = read_settings("NVIDIA Overlay", &settings_path)?;
    existing_folder("NVIDIA Overlay", "currentDirectoryV2", settings.settings.current_directory_v2)
}

/// Every folder that should be watched, in order: Medal TV, NVIDIA, then
/// the configured paths.
///
/// Recorder folders that cannot be resolved are logged and skipped.
/// Duplicates keep their first position.
pub fn active_watch_paths(config: &Config, env: &SourceEnv) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();

    if config.watch.use_medal_path {
        match medal_clip_folder(env) {
            Ok(path) => {
                info!(path = %path.display(), "Watching Medal TV clip folder");
                paths.push(path);
            }
            Err(e) => warn!(error = %e, "Medal TV folder enabled but unavailable"),
        }
    }

    if config.watch.use_nvidia_path {
        match nvidia_capture_folder(env) {
            Ok(path) => {
                info!(path = %path.display(), "Watching NVIDIA capture folder");
                paths.push(path);
            }
            Err(e) => warn!(error = %e, "NVIDIA folder enabled but unavailable"),
        }
    }

    for path in &config.watch.paths {
        if path.as_os_str().is_empty() {
            continue;
        }
        paths.push(path.clone());
    }

    let mut unique = Vec::with_capacity(paths.len());
    for path in paths {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }

    info!(count = unique.len(), "Resolved watch paths");
    unique
}
