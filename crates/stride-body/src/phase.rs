//! Assessment phases and phase transitions.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// One of the fixed sub-movements of the assessment, in the order they are performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    StandUp,
    WalkOut,
    Turn,
    WalkBack,
    SitDown,
}

impl Phase {
    /// All phases, in assessment order.
    pub const ALL: [Self; 5] = [
        Self::StandUp,
        Self::WalkOut,
        Self::Turn,
        Self::WalkBack,
        Self::SitDown,
    ];

    #[inline]
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Returns the phase that follows `self`, or [`None`] for the last phase.
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.ordinal() + 1).copied()
    }

    /// Returns the phase that precedes `self`, or [`None`] for the first phase.
    pub fn prev(self) -> Option<Self> {
        self.ordinal().checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StandUp => "stand_up",
            Self::WalkOut => "walk_out",
            Self::Turn => "turn",
            Self::WalkBack => "walk_back",
            Self::SitDown => "sit_down",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase together with the time span it covers.
///
/// `end` is [`None`] while the phase is still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: Phase,
    pub start: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

impl PhaseTransition {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Returns whether `time` falls into this transition's `[start, end)` span.
    ///
    /// Open transitions contain every time at or after their start.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && self.end.map_or(true, |end| time < end)
    }
}

/// Checks the structural invariants of a transition list.
///
/// Transitions must be strictly ordered by start time, each closed transition must end where the
/// next one starts, and only the last transition may be open.
pub fn transitions_are_contiguous(transitions: &[PhaseTransition]) -> bool {
    for (a, b) in transitions.iter().tuple_windows() {
        if a.start >= b.start {
            return false;
        }
        match a.end {
            Some(end) if end == b.start => {}
            _ => return false,
        }
    }
    true
}

/// Finds the transition covering `time`.
pub fn transition_at(transitions: &[PhaseTransition], time: f64) -> Option<&PhaseTransition> {
    transitions.iter().rev().find(|t| t.contains(time))
}
