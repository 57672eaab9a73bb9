// Per-frame loudness estimation for silence detection.
//
// Frames are ephemeral: metrics are computed fresh per frame and nothing is
// retained beyond the current decision.

/// Loudness metrics for one audio frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameLoudness {
    /// Root-mean-square energy over all samples. 0.0 for an empty frame.
    pub rms: f32,
    /// Peak absolute amplitude.
    pub peak: f32,
    /// RMS as a logarithmic level (`20 * log10(rms)` dBFS), or `None` when
    /// rms is zero. `log10(0)` is undefined; keeping the level optional
    /// means no `-inf`/NaN ever reaches a threshold comparison.
    pub level_db: Option<f32>,
}

impl FrameLoudness {
    /// Measure one frame of amplitude samples.
    pub fn measure(samples: &[f32]) -> Self {
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt();
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let level_db = if rms > 0.0 {
            Some(20.0 * rms.log10())
        } else {
            None
        };

        Self {
            rms,
            peak,
            level_db,
        }
    }

    /// Classify the frame against a dBFS threshold. A frame with no
    /// measurable level (empty or all-zero) counts as silent.
    pub fn is_silent(&self, threshold_db: f32) -> bool {
        match self.level_db {
            Some(level) => level < threshold_db,
            None => true,
        }
    }
}
