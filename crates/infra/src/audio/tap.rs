//! Registry of installed taps
//!
//! A tap observes the buffers flowing out of one bus of a node. The registry is an
//! ordinary value owned by whichever component manages taps; there is no
//! process-wide table. Entries are keyed by caller-chosen [`TapKey`]s and access
//! is serialized by a mutex, since buffers are delivered from the render side
//! while the control side installs and queries taps.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};
use patchbay_core::domain::graph::{BusIndex, NodeHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapError {
    #[error("Tap target node is null")]
    NullNode,

    #[error("Tap not found: {0}")]
    NotFound(TapKey),

    #[error("Invalid tap format: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, TapError>;

/// Caller-supplied identifier of a tap
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TapKey(String);

impl TapKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Format of the buffers a tap receives
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapFormat {
    pub sample_rate: f64,
    pub channel_count: u16,
}

/// State of one installed tap
#[derive(Debug, Clone, PartialEq)]
pub struct TapInfo {
    pub node: NodeHandle,
    pub bus: BusIndex,
    pub format: TapFormat,
    pub active: bool,
    /// Frames in the most recent buffer
    pub frame_count: usize,
    /// RMS of the first channel of the most recent buffer
    pub rms: f32,
}

/// Mutex-guarded table of taps
#[derive(Debug, Default)]
pub struct TapRegistry {
    taps: Mutex<HashMap<TapKey, TapInfo>>,
}

impl TapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a tap, replacing any tap already registered under `key`
    ///
    /// Returns the replaced tap.
    pub fn install(
        &self,
        key: TapKey,
        node: NodeHandle,
        bus: BusIndex,
        format: TapFormat,
    ) -> Result<Option<TapInfo>> {
        if node.is_null() {
            return Err(TapError::NullNode);
        }
        if format.channel_count == 0 || format.sample_rate <= 0.0 {
            return Err(TapError::InvalidFormat(format!(
                "{} Hz, {} channels",
                format.sample_rate, format.channel_count
            )));
        }

        info!(
            "Installing tap {} on node {} bus {} ({:.0} Hz, {} channels)",
            key, node, bus, format.sample_rate, format.channel_count
        );

        let info = TapInfo {
            node,
            bus,
            format,
            active: true,
            frame_count: 0,
            rms: 0.0,
        };
        Ok(self.taps().insert(key, info))
    }

    pub fn remove(&self, key: &TapKey) -> Result<TapInfo> {
        let removed = self
            .taps()
            .remove(key)
            .ok_or_else(|| TapError::NotFound(key.clone()))?;
        debug!(tap = %key, "Removed tap");
        Ok(removed)
    }

    pub fn info(&self, key: &TapKey) -> Option<TapInfo> {
        self.taps().get(key).cloned()
    }

    /// Record a delivered buffer of interleaved samples
    ///
    /// Returns the RMS of its first channel.
    pub fn record_buffer(&self, key: &TapKey, samples: &[f32]) -> Result<f32> {
        let mut taps = self.taps();
        let info = taps
            .get_mut(key)
            .ok_or_else(|| TapError::NotFound(key.clone()))?;

        let channels = usize::from(info.format.channel_count);
        let frames = samples.len() / channels;
        let rms = first_channel_rms(samples, channels);

        info.frame_count = frames;
        info.rms = rms;
        Ok(rms)
    }

    pub fn rms(&self, key: &TapKey) -> Option<f32> {
        self.taps().get(key).map(|info| info.rms)
    }

    pub fn active_count(&self) -> usize {
        self.taps().values().filter(|info| info.active).count()
    }

    /// Remove every tap, returning how many were installed
    pub fn clear(&self) -> usize {
        let mut taps = self.taps();
        let count = taps.len();
        taps.clear();
        if count > 0 {
            debug!(count, "Cleared taps");
        }
        count
    }

    fn taps(&self) -> MutexGuard<'_, HashMap<TapKey, TapInfo>> {
        self.taps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn first_channel_rms(samples: &[f32], channels: usize) -> f32 {
    let mut sum = 0.0f32;
    let mut frames = 0usize;
    for sample in samples.iter().step_by(channels.max(1)) {
        sum += sample * sample;
        frames += 1;
    }
    if frames == 0 {
        0.0
    } else {
        (sum / frames as f32).sqrt()
    }
}
