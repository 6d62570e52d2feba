use super::data::Settings;
use crate::forensics::ProcessingParameters;
use crate::pipeline::PresentationTarget;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracelens")
}

#[derive(Debug)]
pub struct SettingsManager {
    path: PathBuf,
    pub data: Settings,
    last_written: Option<String>,
}

impl SettingsManager {
    pub fn load_or_default() -> Self {
        Self::load_from(config_dir().join("settings.json"))
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut data: Settings = fs::read_to_string(&path)
            .ok()
            .and_then(|s| {
                serde_json::from_str(&s)
                    .map_err(|e| warn!("[settings] parse error {path:?}: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        data.sanitize();
        Self {
            path,
            data,
            last_written: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.data
    }

    pub fn set_processing(&mut self, params: ProcessingParameters) {
        self.data.processing = params.sanitized();
    }

    pub fn set_presentation(&mut self, target: PresentationTarget) {
        self.data.presentation = target.sanitized();
    }

    pub fn set_last_source(&mut self, source: Option<PathBuf>) {
        self.data.last_source = source;
    }

    /// Write the settings atomically. Returns false when the file already
    /// holds the same content.
    pub fn save(&mut self) -> io::Result<bool> {
        self.data.sanitize();
        let json = serde_json::to_string_pretty(&self.data)?;
        if self.last_written.as_deref() == Some(json.as_str())
            || fs::read_to_string(&self.path).is_ok_and(|on_disk| on_disk == json)
        {
            debug!("[settings] {:?} unchanged; skipping write", self.path);
            self.last_written = Some(json);
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json).and_then(|()| fs::rename(&temp_path, &self.path))?;
        debug!("[settings] wrote {:?}", self.path);
        self.last_written = Some(json);
        Ok(true)
    }
}
