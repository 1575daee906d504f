//! YAML persistence for scripts and background action sets.

use crate::automation::Script;
use crate::background::BackgroundActionSet;
use log::info;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid YAML in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Invalid content in {path:?}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    // An empty document is an empty mapping, so every field takes its default.
    let text = if text.trim().is_empty() { "{}" } else { &text };
    serde_yaml::from_str(text).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn save_yaml<T: Serialize>(value: &T, path: &Path) -> Result<(), StoreError> {
    let text = serde_yaml::to_string(value).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, text).map_err(write_err)
}

pub fn load_script(path: &Path) -> Result<Script, StoreError> {
    let script: Script = load_yaml(path)?;
    info!("📂 Loaded script '{}' ({} steps)", script.name, script.steps.len());
    Ok(script)
}

pub fn save_script(script: &Script, path: &Path) -> Result<(), StoreError> {
    save_yaml(script, path)?;
    info!("💾 Saved script '{}' to {}", script.name, path.display());
    Ok(())
}

/// Loads and validates an action set.
pub fn load_action_set(path: &Path) -> Result<BackgroundActionSet, StoreError> {
    let set: BackgroundActionSet = load_yaml(path)?;
    set.validate().map_err(|reason| StoreError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    info!("📂 Loaded action set '{}' ({} actions)", set.name, set.actions.len());
    Ok(set)
}

pub fn save_action_set(set: &BackgroundActionSet, path: &Path) -> Result<(), StoreError> {
    save_yaml(set, path)?;
    info!("💾 Saved action set '{}' to {}", set.name, path.display());
    Ok(())
}
