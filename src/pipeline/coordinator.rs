//! Single-flight pass scheduler.
//!
//! The coordinator is either idle or running exactly one pass. Requests
//! made while idle restart a debounce window; requests made while a pass
//! runs only raise the pending flag, and the latest parameters win. When a
//! pass completes with the flag raised, one follow-up pass is scheduled
//! after a short settle delay. Time is always passed in by the caller.

use super::{PassJob, PresentationTarget};
use crate::error::{ForensicError, Result};
use crate::forensics::ProcessingParameters;
use crate::forensics::condition::{ConditionedImage, condition};
use crate::raster::{Interpolation, RawImage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_DEBOUNCE_MS: u64 = 150;
pub const DEFAULT_SETTLE_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub debounce_ms: u64,
    pub settle_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            settle_ms: DEFAULT_SETTLE_MS,
        }
    }
}

impl CoordinatorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Processing { pass_id: u64 },
}

#[derive(Debug)]
struct Source {
    raw: RawImage,
    conditioned: ConditionedImage,
    resample: Interpolation,
}

#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    engine_ready: bool,
    phase: Phase,
    pending: bool,
    deadline: Option<Instant>,
    source: Option<Source>,
    params: ProcessingParameters,
    target: PresentationTarget,
    next_pass_id: u64,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        params: ProcessingParameters,
        target: PresentationTarget,
    ) -> Self {
        Self {
            config,
            engine_ready: false,
            phase: Phase::Idle,
            pending: false,
            deadline: None,
            source: None,
            params: params.sanitized(),
            target: target.sanitized(),
            next_pass_id: 1,
        }
    }

    /// Set once when the transform engine has been built.
    pub fn mark_engine_ready(&mut self) {
        if !self.engine_ready {
            debug!("[coordinator] engine ready");
        }
        self.engine_ready = true;
    }

    pub fn is_engine_ready(&self) -> bool {
        self.engine_ready
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn params(&self) -> &ProcessingParameters {
        &self.params
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.engine_ready {
            Ok(())
        } else {
            Err(ForensicError::EngineUnavailable)
        }
    }

    /// Condition a new source image and schedule a pass for it.
    pub fn set_source(&mut self, raw: RawImage, now: Instant) -> Result<&ConditionedImage> {
        self.ensure_ready()?;
        let conditioned = condition(&raw, self.params.bounds(), self.params.resample)?;
        info!(
            "[coordinator] source {}x{} conditioned to {}",
            raw.width(),
            raw.height(),
            conditioned.describe()
        );
        self.schedule(now);
        let source = self.source.insert(Source {
            raw,
            conditioned,
            resample: self.params.resample,
        });
        Ok(&source.conditioned)
    }

    /// Replace the parameters; only the latest set is ever used.
    pub fn request(&mut self, params: ProcessingParameters, now: Instant) -> Result<()> {
        self.ensure_ready()?;
        params.validate()?;
        self.params = params;
        self.schedule(now);
        Ok(())
    }

    pub fn retarget(&mut self, target: PresentationTarget, now: Instant) -> Result<()> {
        self.ensure_ready()?;
        self.target = target.sanitized();
        self.schedule(now);
        Ok(())
    }

    fn schedule(&mut self, now: Instant) {
        match self.phase {
            Phase::Idle => self.deadline = Some(now + self.config.debounce()),
            Phase::Processing { pass_id } => {
                if !self.pending {
                    debug!("[coordinator] request during pass {pass_id}; follow-up pending");
                }
                self.pending = true;
            }
        }
    }

    /// When the next pass is due, if one is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Idle if self.source.is_some() => self.deadline,
            _ => None,
        }
    }

    /// Start the scheduled pass if its deadline has passed. The source is
    /// re-conditioned first when the bounds or resampling policy changed.
    pub fn poll(&mut self, now: Instant) -> Result<Option<PassJob>> {
        if !self.engine_ready || self.phase != Phase::Idle {
            return Ok(None);
        }
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Ok(None),
        }
        self.deadline = None;

        let bounds = self.params.bounds();
        let resample = self.params.resample;
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        if source.conditioned.bounds() != bounds || source.resample != resample {
            source.conditioned = condition(&source.raw, bounds, resample)?;
            source.resample = resample;
            debug!(
                "[coordinator] re-conditioned source to {}",
                source.conditioned.describe()
            );
        }

        let id = self.next_pass_id;
        self.next_pass_id += 1;
        self.phase = Phase::Processing { pass_id: id };
        debug!("[coordinator] starting pass {id}");
        Ok(Some(PassJob {
            id,
            image: source.conditioned.clone(),
            params: self.params,
            target: self.target,
        }))
    }

    /// Return to idle after pass `pass_id`, successful or not. Returns true
    /// when a follow-up pass was scheduled.
    pub fn complete(&mut self, pass_id: u64, now: Instant) -> bool {
        match self.phase {
            Phase::Processing { pass_id: running } if running == pass_id => {}
            phase => {
                warn!("[coordinator] completion for pass {pass_id} ignored in {phase:?}");
                return false;
            }
        }
        self.phase = Phase::Idle;
        if !self.pending {
            return false;
        }
        self.pending = false;
        self.deadline = Some(now + self.config.settle());
        debug!("[coordinator] follow-up pass scheduled after {pass_id}");
        true
    }
}
