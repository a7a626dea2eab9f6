//! Run presentation
//!
//! Provides a simple API for reporting what a run is doing:
//! - Current phase (Resolving, Cleaning, Fetching, Regenerating, Done)
//! - Progress (current/total with a label)
//! - Activity log

mod console;

pub use console::ConsoleUi;

/// Run phases
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Resolving,
    Cleaning,
    Fetching,
    Regenerating(String),
    Done,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Resolving => write!(f, "Resolving options"),
            Phase::Cleaning => write!(f, "Rebuilding database from empty"),
            Phase::Fetching => write!(f, "Fetching dumps"),
            Phase::Regenerating(domain) => write!(f, "Regenerating {}", domain),
            Phase::Done => write!(f, "Done"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress information for the current operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    pub label: String,
}

impl Progress {
    pub fn new(current: u64, total: u64, label: impl Into<String>) -> Self {
        Self {
            current,
            total,
            label: label.into(),
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 / self.total as f64
        }
    }
}

/// Trait for UI implementations - allows both console and silent/test modes
pub trait Ui {
    fn set_phase(&mut self, phase: Phase);
    fn set_info(&mut self, info: impl Into<String>);
    fn set_progress(&mut self, current: u64, total: u64, label: impl Into<String>);
    fn clear_progress(&mut self);
    fn log(&mut self, message: impl Into<String>);
}

/// Silent UI implementation for testing and non-interactive use
#[derive(Default)]
pub struct SilentUi;

impl SilentUi {
    pub fn new() -> Self {
        Self
    }
}

impl Ui for SilentUi {
    fn set_phase(&mut self, _phase: Phase) {}
    fn set_info(&mut self, _info: impl Into<String>) {}
    fn set_progress(&mut self, _current: u64, _total: u64, _label: impl Into<String>) {}
    fn clear_progress(&mut self) {}
    fn log(&mut self, _message: impl Into<String>) {}
}

/// Records everything it is told; for asserting on what a run reported
#[derive(Debug, Default)]
pub struct RecordingUi {
    pub phases: Vec<Phase>,
    pub logs: Vec<String>,
    pub last_progress: Option<Progress>,
}

impl Ui for RecordingUi {
    fn set_phase(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    fn set_info(&mut self, _info: impl Into<String>) {}

    fn set_progress(&mut self, current: u64, total: u64, label: impl Into<String>) {
        self.last_progress = Some(Progress::new(current, total, label));
    }

    fn clear_progress(&mut self) {}

    fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_ratio() {
        assert_eq!(Progress::new(0, 0, "x").ratio(), 0.0);
        assert_eq!(Progress::new(1, 4, "x").ratio(), 0.25);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Regenerating("station".into()).to_string(), "Regenerating station");
    }
}
