//! Every-Nth-frame selection.

use crate::configuration::DEFAULT_SAMPLE_EVERY;
use crate::error::HwsnapError;
use crate::frame::OutputFrame;

/// Picks every `n`th frame that reaches the output stage.
///
/// The index is 1-based and advances for every frame offered to the
/// converter, including frames later dropped by a per-frame error, so
/// snapshot numbers always match the frame's position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sampler {
    every: u64,
    index: u64,
}

impl Sampler {
    /// Sample every `every`th frame.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::InvalidInterval`] when `every` is zero.
    pub fn new(every: u64) -> Result<Self, HwsnapError> {
        if every == 0 {
            return Err(HwsnapError::InvalidInterval);
        }
        Ok(Self { every, index: 0 })
    }

    /// The sampling interval.
    pub fn every(&self) -> u64 {
        self.every
    }

    /// Index of the most recent frame; zero before the first.
    pub fn position(&self) -> u64 {
        self.index
    }

    /// Count one more frame and return its index.
    pub fn advance(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// `true` if the frame at `index` should be kept.
    pub fn selects(&self, index: u64) -> bool {
        index > 0 && index % self.every == 0
    }

    /// Keep `frame` if its index is selected; otherwise drop it.
    pub fn sample(&self, frame: OutputFrame) -> Option<OutputFrame> {
        self.selects(frame.index()).then_some(frame)
    }

    /// Number of selections among the frames counted so far.
    pub fn selected(&self) -> u64 {
        self.index / self.every
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            every: DEFAULT_SAMPLE_EVERY,
            index: 0,
        }
    }
}
