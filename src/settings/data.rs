use crate::forensics::ProcessingParameters;
use crate::pipeline::PresentationTarget;
use crate::pipeline::coordinator::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub processing: ProcessingParameters,
    pub coordinator: CoordinatorConfig,
    pub presentation: PresentationTarget,
    pub last_source: Option<PathBuf>,
}

impl Settings {
    pub fn sanitize(&mut self) {
        self.processing = self.processing.sanitized();
        self.presentation = self.presentation.sanitized();
    }
}
