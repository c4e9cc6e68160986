//! Playback controller, unifying live streaming and replay of recorded sequences.
//!
//! In live mode, frames are appended as they are captured and the cursor always sits on the newest
//! one. In replay mode, the cursor indexes into a stored, time-ordered sequence and can be moved
//! by seeking, by phase navigation, or by autoplay.

use std::{collections::VecDeque, fs, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use stride_body::{
    landmark::is_time_ordered,
    phase::transition_at,
    skeleton::ReconstructError,
    Frame, Phase, PhaseTransition, Reconstructor, Skeleton, SkeletonOptions,
};

use crate::stream::PhaseState;

/// Autoplay speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Speed {
    Half,
    #[default]
    Normal,
    Double,
}

impl Speed {
    pub const ALL: [Self; 3] = [Self::Half, Self::Normal, Self::Double];

    pub fn factor(self) -> f64 {
        match self {
            Speed::Half => 0.5,
            Speed::Normal => 1.0,
            Speed::Double => 2.0,
        }
    }
}

/// Returns the index of the frame whose time is closest to `time`.
///
/// `frames` must be sorted by time. Queries outside the sequence clamp to its first or last frame;
/// ties resolve to the earlier frame. Returns [`None`] for an empty sequence.
pub fn nearest_index(frames: &[Frame], time: f64) -> Option<usize> {
    if frames.is_empty() {
        return None;
    }
    let after = frames.partition_point(|f| f.time < time);
    if after == 0 {
        return Some(0);
    }
    if after == frames.len() {
        return Some(frames.len() - 1);
    }
    let before = after - 1;
    if time - frames[before].time <= frames[after].time - time {
        Some(before)
    } else {
        Some(after)
    }
}

#[derive(Debug)]
enum Mode {
    Live {
        /// Trailing window of captured frames, oldest first.
        window: VecDeque<Frame>,
        capacity: usize,
    },
    Replay {
        frames: Vec<Frame>,
        index: usize,
        /// Continuous playback position in seconds; `index` is derived from it.
        time: f64,
        autoplay: bool,
        speed: Speed,
    },
}

/// A stored session: captured frames plus the transitions the phase service reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recording {
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub transitions: Vec<PhaseTransition>,
}

impl Recording {
    /// Loads a JSON recording from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read recording {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse recording {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string(self)?;
        fs::write(path, text)
            .with_context(|| format!("failed to write recording {}", path.display()))
    }

    /// Length of the recording in seconds.
    pub fn duration(&self) -> f64 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}

/// Owns the frame cursor and drives skeleton reconstruction.
#[derive(Debug)]
pub struct PlaybackController {
    mode: Mode,
    transitions: Vec<PhaseTransition>,
    current_phase: Option<Phase>,
    reconstructor: Reconstructor,
}

impl PlaybackController {
    /// Creates a controller in live mode.
    pub fn live(options: SkeletonOptions) -> Self {
        let capacity = options.history_len().max(1);
        Self {
            mode: Mode::Live {
                window: VecDeque::with_capacity(capacity),
                capacity,
            },
            transitions: Vec::new(),
            current_phase: None,
            reconstructor: Reconstructor::new(options),
        }
    }

    /// Creates a controller replaying `frames`, with the cursor on the first frame.
    ///
    /// Fails if `frames` is empty or not ordered by time.
    pub fn replay(
        frames: Vec<Frame>,
        transitions: Vec<PhaseTransition>,
        options: SkeletonOptions,
    ) -> anyhow::Result<Self> {
        if frames.is_empty() {
            anyhow::bail!("cannot replay an empty sequence");
        }
        if !is_time_ordered(&frames) {
            anyhow::bail!("replay frames are not ordered by time");
        }
        let time = frames[0].time;
        Ok(Self {
            mode: Mode::Replay {
                frames,
                index: 0,
                time,
                autoplay: false,
                speed: Speed::Normal,
            },
            transitions,
            current_phase: None,
            reconstructor: Reconstructor::new(options),
        })
    }

    /// Creates a controller replaying `recording`.
    pub fn from_recording(recording: Recording, options: SkeletonOptions) -> anyhow::Result<Self> {
        Self::replay(recording.frames, recording.transitions, options)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.mode, Mode::Live { .. })
    }

    /// Appends a live frame and moves the cursor onto it.
    ///
    /// Frames older than the newest one are rejected. Returns whether the frame was accepted. In
    /// replay mode, this does nothing.
    pub fn push_live(&mut self, frame: Frame) -> bool {
        let Mode::Live { window, capacity } = &mut self.mode else {
            return false;
        };
        if let Some(last) = window.back() {
            if frame.time < last.time {
                log::debug!(
                    "rejecting live frame at {:.3}s, cursor is at {:.3}s",
                    frame.time,
                    last.time
                );
                return false;
            }
        }
        if window.len() == *capacity {
            window.pop_front();
        }
        window.push_back(frame);
        true
    }

    /// Adopts the phase state reported by the streaming service.
    pub fn apply_phase_state(&mut self, state: &PhaseState) {
        self.transitions.clone_from(&state.transitions);
        if state.current_phase.is_some() {
            self.current_phase = state.current_phase;
        }
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    /// Time of the frame under the cursor.
    pub fn cursor_time(&self) -> Option<f64> {
        self.current_frame().map(|f| f.time)
    }

    pub fn cursor_index(&self) -> Option<usize> {
        match &self.mode {
            Mode::Live { window, .. } => window.len().checked_sub(1),
            Mode::Replay { index, .. } => Some(*index),
        }
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        match &self.mode {
            Mode::Live { window, .. } => window.back(),
            Mode::Replay { frames, index, .. } => frames.get(*index),
        }
    }

    /// Number of frames the cursor can address.
    pub fn len(&self) -> usize {
        match &self.mode {
            Mode::Live { window, .. } => window.len(),
            Mode::Replay { frames, .. } => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The phase covering `time`, from the recorded transitions or, failing that, from the frame
    /// labels.
    pub fn current_phase_at(&self, time: f64) -> Option<Phase> {
        if let Some(t) = transition_at(&self.transitions, time) {
            return Some(t.phase);
        }
        match &self.mode {
            Mode::Replay { frames, .. } => nearest_index(frames, time).and_then(|i| frames[i].phase),
            Mode::Live { window, .. } => window.iter().rev().find(|f| f.time <= time)?.phase,
        }
    }

    /// The phase under the cursor.
    pub fn current_phase(&self) -> Option<Phase> {
        if self.is_live() {
            if let Some(phase) = self.current_phase {
                return Some(phase);
            }
        }
        self.current_phase_at(self.cursor_time()?)
    }

    /// Moves the cursor to the frame nearest `time`. Cancels autoplay. Live mode ignores seeks.
    pub fn seek(&mut self, time: f64) {
        if let Mode::Replay {
            frames,
            index,
            time: cursor,
            autoplay,
            ..
        } = &mut self.mode
        {
            *autoplay = false;
            if let Some(i) = nearest_index(frames, time) {
                *index = i;
                *cursor = frames[i].time;
            }
        }
    }

    /// Moves the cursor to the start of `phase`. Returns `false` if the phase was not recorded.
    pub fn jump_to_phase(&mut self, phase: Phase) -> bool {
        match self.phase_start(phase) {
            Some(start) if !self.is_live() => {
                self.seek(start);
                true
            }
            _ => false,
        }
    }

    /// Moves to the start of the next recorded phase. Does nothing at the last phase.
    pub fn next_phase(&mut self) -> bool {
        let from = self.current_phase().map_or(0, |phase| phase.ordinal() + 1);
        self.jump_to_first_recorded(Phase::ALL.into_iter().skip(from))
    }

    /// Moves to the start of the previous recorded phase. Does nothing at the first phase.
    pub fn prev_phase(&mut self) -> bool {
        let Some(phase) = self.current_phase() else {
            return false;
        };
        let candidates = Phase::ALL.into_iter().take(phase.ordinal()).rev();
        self.jump_to_first_recorded(candidates)
    }

    fn jump_to_first_recorded(&mut self, mut phases: impl Iterator<Item = Phase>) -> bool {
        match phases.find(|&p| self.phase_start(p).is_some()) {
            Some(phase) => self.jump_to_phase(phase),
            None => false,
        }
    }

    fn phase_start(&self, phase: Phase) -> Option<f64> {
        if let Some(t) = self.transitions.iter().find(|t| t.phase == phase) {
            return Some(t.start);
        }
        match &self.mode {
            Mode::Replay { frames, .. } => frames
                .iter()
                .find(|f| f.phase == Some(phase))
                .map(|f| f.time),
            Mode::Live { .. } => None,
        }
    }

    pub fn is_autoplaying(&self) -> bool {
        matches!(self.mode, Mode::Replay { autoplay: true, .. })
    }

    /// Turns autoplay on or off. Turning it off stops advancement immediately.
    pub fn set_autoplay(&mut self, on: bool) {
        if let Mode::Replay { autoplay, .. } = &mut self.mode {
            *autoplay = on;
        }
    }

    pub fn toggle_autoplay(&mut self) {
        let on = !self.is_autoplaying();
        self.set_autoplay(on);
    }

    pub fn set_speed(&mut self, new: Speed) {
        if let Mode::Replay { speed, .. } = &mut self.mode {
            *speed = new;
        }
    }

    pub fn speed(&self) -> Speed {
        match &self.mode {
            Mode::Replay { speed, .. } => *speed,
            Mode::Live { .. } => Speed::Normal,
        }
    }

    /// Advances autoplay by `elapsed` wall-clock time, looping at the end of the sequence.
    ///
    /// Meant to be called from the same per-refresh callback that renders. Does nothing unless
    /// autoplay is on.
    pub fn advance(&mut self, elapsed: Duration) {
        let Mode::Replay {
            frames,
            index,
            time,
            autoplay: true,
            speed,
        } = &mut self.mode
        else {
            return;
        };

        let (start, end) = (frames[0].time, frames[frames.len() - 1].time);
        let duration = end - start;
        let mut t = *time + elapsed.as_secs_f64() * speed.factor();
        if t > end {
            t = if duration > 0.0 {
                start + (t - end) % duration
            } else {
                start
            };
        }
        *time = t;
        if let Some(i) = nearest_index(frames, t) {
            *index = i;
        }
    }

    /// Stops driving playback forward. Called on session teardown.
    pub fn stop(&mut self) {
        self.set_autoplay(false);
    }

    /// Reconstructs the skeleton under the cursor, with trails from the preceding frames.
    ///
    /// Returns [`None`] if there is no frame under the cursor.
    pub fn skeleton(&mut self) -> Option<Result<Skeleton, ReconstructError>> {
        let history_len = self.reconstructor.options().history_len();
        let (frame, history) = match &mut self.mode {
            Mode::Live { window, .. } => {
                let history = &*window.make_contiguous();
                (history.last()?, history)
            }
            Mode::Replay { frames, index, .. } => {
                let history = &frames[index.saturating_sub(history_len.max(1) - 1)..=*index];
                (&frames[*index], history)
            }
        };
        Some(self.reconstructor.reconstruct(frame, history))
    }
}

#[cfg(test)]
mod tests {
    use stride_body::{Landmark, NUM_LANDMARKS};

    use super::*;

    fn frames(times: &[f64]) -> Vec<Frame> {
        times
            .iter()
            .map(|&t| Frame::new(t, vec![Landmark::default(); NUM_LANDMARKS]))
            .collect()
    }

    fn transitions() -> Vec<PhaseTransition> {
        vec![
            PhaseTransition {
                phase: Phase::StandUp,
                start: 0.0,
                end: Some(1.0),
            },
            PhaseTransition {
                phase: Phase::WalkOut,
                start: 1.0,
                end: Some(3.0),
            },
            PhaseTransition {
                phase: Phase::Turn,
                start: 3.0,
                end: None,
            },
        ]
    }

    fn replay() -> PlaybackController {
        let times = (0..=40).map(|i| i as f64 * 0.1).collect::<Vec<_>>();
        PlaybackController::replay(frames(&times), transitions(), SkeletonOptions::default())
            .unwrap()
    }

    #[test]
    fn nearest_on_uneven_spacing() {
        let frames = frames(&[0.0, 0.1, 0.5, 0.55, 2.0]);
        assert_eq!(nearest_index(&frames, -3.0), Some(0));
        assert_eq!(nearest_index(&frames, 0.29), Some(1));
        assert_eq!(nearest_index(&frames, 0.31), Some(2));
        assert_eq!(nearest_index(&frames, 0.53), Some(3));
        assert_eq!(nearest_index(&frames, 1.2), Some(3));
        assert_eq!(nearest_index(&frames, 1.3), Some(4));
        assert_eq!(nearest_index(&frames, 99.0), Some(4));
        assert_eq!(nearest_index(&frames, 0.5), Some(2));
        assert_eq!(nearest_index(&[], 0.0), None);
    }

    #[test]
    fn nearest_matches_linear_scan() {
        let mut t = 0.0;
        let times = (0..200)
            .map(|_| {
                t += fastrand::f64() * 0.2;
                t
            })
            .collect::<Vec<_>>();
        let frames = frames(&times);
        for _ in 0..500 {
            let q = fastrand::f64() * (t + 2.0) - 1.0;
            let expected = frames
                .iter()
                .map(|f| (f.time - q).abs())
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap()
                .1;
            let got = nearest_index(&frames, q).unwrap();
            assert_eq!((frames[got].time - q).abs(), expected, "query {q}");
        }
    }

    #[test]
    fn replay_rejects_bad_sequences() {
        let opts = SkeletonOptions::default;
        assert!(PlaybackController::replay(Vec::new(), Vec::new(), opts()).is_err());
        assert!(PlaybackController::replay(frames(&[1.0, 0.5]), Vec::new(), opts()).is_err());
    }

    #[test]
    fn seek_cancels_autoplay() {
        let mut playback = replay();
        playback.set_autoplay(true);
        playback.seek(2.04);
        assert!(!playback.is_autoplaying());
        assert_eq!(playback.cursor_index(), Some(20));
        assert_eq!(playback.current_phase(), Some(Phase::WalkOut));
    }

    #[test]
    fn autoplay_scales_and_loops() {
        let mut playback = replay();
        playback.advance(Duration::from_secs(1));
        assert_eq!(playback.cursor_index(), Some(0), "autoplay is off");

        playback.toggle_autoplay();
        playback.set_speed(Speed::Double);
        playback.advance(Duration::from_millis(500));
        assert_eq!(playback.cursor_index(), Some(10));

        playback.set_speed(Speed::Half);
        playback.advance(Duration::from_millis(1000));
        assert_eq!(playback.cursor_index(), Some(15));

        // 1.5s + 3s = 4.5s wraps to 0.5s.
        playback.set_speed(Speed::Normal);
        playback.advance(Duration::from_secs(3));
        assert_eq!(playback.cursor_index(), Some(5));

        playback.toggle_autoplay();
        playback.advance(Duration::from_secs(1));
        assert_eq!(playback.cursor_index(), Some(5));
    }

    #[test]
    fn phase_navigation() {
        let mut playback = replay();
        assert!(!playback.prev_phase(), "no-op at the first phase");
        assert!(playback.next_phase());
        assert_eq!(playback.cursor_time(), Some(1.0));
        assert!(playback.next_phase());
        assert_eq!(playback.current_phase(), Some(Phase::Turn));
        assert!(!playback.next_phase(), "no later phase was recorded");
        assert!(playback.prev_phase());
        assert_eq!(playback.current_phase(), Some(Phase::WalkOut));

        assert!(playback.jump_to_phase(Phase::StandUp));
        assert_eq!(playback.cursor_index(), Some(0));
        assert!(!playback.jump_to_phase(Phase::SitDown));
    }

    #[test]
    fn live_cursor_moves_forward_only() {
        let mut playback = PlaybackController::live(SkeletonOptions::default().trail_capacity(3));
        for t in [0.0, 0.1, 0.2, 0.3] {
            assert!(playback.push_live(frames(&[t]).remove(0)));
        }
        assert!(!playback.push_live(frames(&[0.25]).remove(0)));
        assert_eq!(playback.len(), 3);
        assert_eq!(playback.cursor_time(), Some(0.3));

        playback.seek(0.0);
        assert_eq!(playback.cursor_time(), Some(0.3));
        assert!(!playback.jump_to_phase(Phase::StandUp));

        let state = PhaseState {
            current_phase: Some(Phase::WalkOut),
            transitions: transitions(),
            ..Default::default()
        };
        playback.apply_phase_state(&state);
        assert_eq!(playback.current_phase(), Some(Phase::WalkOut));
        assert_eq!(playback.transitions().len(), 3);
    }

    #[test]
    fn empty_live_has_no_skeleton() {
        let mut playback = PlaybackController::live(SkeletonOptions::default());
        assert!(playback.skeleton().is_none());
        assert!(playback.current_phase().is_none());
    }

    #[test]
    fn recording_from_json() {
        let json = r#"{
            "frames": [
                {"time": 0.0, "landmarks": [{"x": 0.5, "y": 0.5, "z": 0.0}], "phase": "stand_up"},
                {"time": 0.5, "landmarks": []},
                {"time": 1.25, "landmarks": []}
            ]
        }"#;
        let recording: Recording = serde_json::from_str(json).unwrap();
        assert!(recording.transitions.is_empty());
        assert_eq!(recording.duration(), 1.25);

        let mut playback =
            PlaybackController::from_recording(recording, SkeletonOptions::default()).unwrap();
        assert_eq!(playback.current_phase(), Some(Phase::StandUp));
        assert!(playback.jump_to_phase(Phase::StandUp));
        // Frames are too sparse to reconstruct.
        assert!(playback.skeleton().unwrap().is_err());
        let empty = Recording::default();
        assert!(PlaybackController::from_recording(empty, SkeletonOptions::default()).is_err());
    }
}
