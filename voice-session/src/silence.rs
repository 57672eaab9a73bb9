//! Auto-stop policies for a listening session.
//!
//! Two interchangeable behaviors decide when a session has gone silent long
//! enough to terminate on its own. `FixedTimeout` restarts a countdown on
//! every engine activity event and fires when it elapses uninterrupted.
//! `LoudnessDebounce` ignores engine events entirely and counts consecutive
//! silent audio frames against a dB threshold, so it stays correct with
//! engines that never report speech begin/end.

use std::time::{Duration, Instant};

use crate::vad::FrameLoudness;

/// Countdown restarted by engine activity before auto-stop fires.
pub const DEFAULT_SILENCE_WINDOW: Duration = Duration::from_secs(5);
/// Frames quieter than this level are classified as silent.
pub const DEFAULT_SILENCE_THRESHOLD_DB: f32 = -50.0;
/// Consecutive silent frames required before auto-stop fires.
pub const DEFAULT_DEBOUNCE_FRAMES: u32 = 10;

/// Which auto-stop behavior a session uses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SilencePolicy {
    /// Restart a countdown on every activity event (speech start, amplitude
    /// change, buffer received); fire when it elapses uninterrupted.
    FixedTimeout { window: Duration },
    /// Classify each audio frame by loudness; fire on the Nth consecutive
    /// silent frame, resetting the run on any voiced frame.
    LoudnessDebounce {
        threshold_db: f32,
        debounce_frames: u32,
    },
}

impl Default for SilencePolicy {
    fn default() -> Self {
        SilencePolicy::FixedTimeout {
            window: DEFAULT_SILENCE_WINDOW,
        }
    }
}

impl SilencePolicy {
    /// The loudness-debounce policy with reference parameters.
    pub fn loudness_debounce() -> Self {
        SilencePolicy::LoudnessDebounce {
            threshold_db: DEFAULT_SILENCE_THRESHOLD_DB,
            debounce_frames: DEFAULT_DEBOUNCE_FRAMES,
        }
    }
}

/// Runtime state for the selected policy.
///
/// Armed while a session is listening with auto-stop enabled. Fires at most
/// once per arm. Disarming clears the counter and deadline so nothing leaks
/// into a subsequent session.
#[derive(Debug)]
pub struct SilenceTracker {
    policy: SilencePolicy,
    armed: bool,
    deadline: Option<Instant>,
    silent_run: u32,
    fired: bool,
}

impl SilenceTracker {
    pub fn new(policy: SilencePolicy) -> Self {
        let policy = match policy {
            SilencePolicy::LoudnessDebounce {
                threshold_db,
                debounce_frames,
            } => SilencePolicy::LoudnessDebounce {
                threshold_db,
                // A zero debounce would fire on a voiced frame's reset.
                debounce_frames: debounce_frames.max(1),
            },
            fixed => fixed,
        };

        Self {
            policy,
            armed: false,
            deadline: None,
            silent_run: 0,
            fired: false,
        }
    }

    pub fn policy(&self) -> SilencePolicy {
        self.policy
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Engage the policy at session start.
    pub fn arm(&mut self, now: Instant) {
        self.armed = true;
        self.fired = false;
        self.silent_run = 0;
        self.deadline = match self.policy {
            SilencePolicy::FixedTimeout { window } => Some(now + window),
            SilencePolicy::LoudnessDebounce { .. } => None,
        };
    }

    /// Disengage at session end, clearing all state.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.deadline = None;
        self.silent_run = 0;
        self.fired = false;
    }

    /// Engine-level activity (speech start, amplitude change, buffer
    /// received). Restarts the fixed countdown; the debounce policy ignores
    /// engine events.
    pub fn on_activity(&mut self, now: Instant) {
        if !self.armed || self.fired {
            return;
        }
        if let SilencePolicy::FixedTimeout { window } = self.policy {
            self.deadline = Some(now + window);
        }
    }

    /// Observe one audio frame. Returns `true` when the debounce policy
    /// fires on this exact frame. For the fixed policy a frame is just
    /// another activity event.
    pub fn on_frame(&mut self, loudness: &FrameLoudness, now: Instant) -> bool {
        if !self.armed || self.fired {
            return false;
        }

        match self.policy {
            SilencePolicy::FixedTimeout { window } => {
                self.deadline = Some(now + window);
                false
            }
            SilencePolicy::LoudnessDebounce {
                threshold_db,
                debounce_frames,
            } => {
                if loudness.is_silent(threshold_db) {
                    self.silent_run += 1;
                    if self.silent_run >= debounce_frames {
                        self.fired = true;
                        log::debug!(
                            "silence debounce fired after {} consecutive silent frames",
                            self.silent_run
                        );
                        return true;
                    }
                } else {
                    self.silent_run = 0;
                }
                false
            }
        }
    }

    /// Deadline the event loop should wake at, when the fixed countdown is
    /// armed. `None` for the debounce policy.
    pub fn deadline(&self) -> Option<Instant> {
        if self.armed && !self.fired {
            self.deadline
        } else {
            None
        }
    }

    /// Check the fixed countdown. Returns `true` exactly once when it has
    /// elapsed uninterrupted.
    pub fn check_deadline(&mut self, now: Instant) -> bool {
        if !self.armed || self.fired {
            return false;
        }
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.fired = true;
                log::debug!("silence window elapsed, auto-stop");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_frame() -> FrameLoudness {
        FrameLoudness::measure(&[0.0; 160])
    }

    fn voiced_frame() -> FrameLoudness {
        FrameLoudness::measure(&[0.5; 160])
    }

    #[test]
    fn debounce_fires_on_exactly_the_nth_frame() {
        let mut tracker = SilenceTracker::new(SilencePolicy::LoudnessDebounce {
            threshold_db: -50.0,
            debounce_frames: 10,
        });
        let now = Instant::now();
        tracker.arm(now);
        tracker.on_frame(&voiced_frame(), now);

        for i in 1..10 {
            assert!(
                !tracker.on_frame(&silent_frame(), now),
                "fired early on frame {i}"
            );
        }
        assert!(tracker.on_frame(&silent_frame(), now), "10th frame fires");
        // Fired once; further frames are no-ops.
        assert!(!tracker.on_frame(&silent_frame(), now));
    }

    #[test]
    fn voiced_frame_resets_the_run() {
        let mut tracker = SilenceTracker::new(SilencePolicy::LoudnessDebounce {
            threshold_db: -50.0,
            debounce_frames: 3,
        });
        let now = Instant::now();
        tracker.arm(now);

        assert!(!tracker.on_frame(&silent_frame(), now));
        assert!(!tracker.on_frame(&silent_frame(), now));
        assert!(!tracker.on_frame(&voiced_frame(), now));
        // Counter restarted: two more silent frames are not enough.
        assert!(!tracker.on_frame(&silent_frame(), now));
        assert!(!tracker.on_frame(&silent_frame(), now));
        assert!(tracker.on_frame(&silent_frame(), now));
    }

    #[test]
    fn debounce_ignores_engine_activity() {
        let mut tracker = SilenceTracker::new(SilencePolicy::LoudnessDebounce {
            threshold_db: -50.0,
            debounce_frames: 2,
        });
        let now = Instant::now();
        tracker.arm(now);
        assert!(!tracker.on_frame(&silent_frame(), now));
        tracker.on_activity(now);
        assert!(tracker.on_frame(&silent_frame(), now));
    }

    #[test]
    fn fixed_timeout_fires_once_after_window() {
        let mut tracker = SilenceTracker::new(SilencePolicy::FixedTimeout {
            window: Duration::from_secs(5),
        });
        let start = Instant::now();
        tracker.arm(start);

        assert!(!tracker.check_deadline(start + Duration::from_secs(4)));
        assert!(tracker.check_deadline(start + Duration::from_secs(6)));
        assert!(!tracker.check_deadline(start + Duration::from_secs(7)));
    }

    #[test]
    fn activity_restarts_the_fixed_countdown() {
        let mut tracker = SilenceTracker::new(SilencePolicy::FixedTimeout {
            window: Duration::from_secs(5),
        });
        let start = Instant::now();
        tracker.arm(start);

        tracker.on_activity(start + Duration::from_secs(4));
        assert!(!tracker.check_deadline(start + Duration::from_secs(6)));
        assert!(tracker.check_deadline(start + Duration::from_secs(10)));
    }

    #[test]
    fn frames_count_as_activity_for_the_fixed_policy() {
        let mut tracker = SilenceTracker::new(SilencePolicy::FixedTimeout {
            window: Duration::from_secs(5),
        });
        let start = Instant::now();
        tracker.arm(start);

        assert!(!tracker.on_frame(&silent_frame(), start + Duration::from_secs(4)));
        assert!(!tracker.check_deadline(start + Duration::from_secs(6)));
        assert!(tracker.check_deadline(start + Duration::from_secs(9)));
    }

    #[test]
    fn disarm_clears_state_between_sessions() {
        let mut tracker = SilenceTracker::new(SilencePolicy::LoudnessDebounce {
            threshold_db: -50.0,
            debounce_frames: 3,
        });
        let now = Instant::now();
        tracker.arm(now);
        tracker.on_frame(&silent_frame(), now);
        tracker.on_frame(&silent_frame(), now);
        tracker.disarm();

        // A new session must not inherit the previous run.
        tracker.arm(now);
        assert!(!tracker.on_frame(&silent_frame(), now));
        assert!(!tracker.on_frame(&silent_frame(), now));
        assert!(tracker.on_frame(&silent_frame(), now));
    }

    #[test]
    fn disarmed_tracker_reports_no_deadline() {
        let mut tracker = SilenceTracker::new(SilencePolicy::default());
        let now = Instant::now();
        tracker.arm(now);
        assert!(tracker.deadline().is_some());
        tracker.disarm();
        assert!(tracker.deadline().is_none());
        assert!(!tracker.check_deadline(now + Duration::from_secs(60)));
    }
}
