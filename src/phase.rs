use crate::clock::CYCLE_SECONDS;

const PHASE_PERIOD: u32 = 60;
const SEARCHING_UNTIL: u32 = 5;
const ANALYZING_UNTIL: u32 = 10;

/// Cosmetic status shown next to the countdown. Derived from the clock on
/// every query and never fed back into scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningPhase {
    Searching,
    Analyzing,
    Executing,
}

impl MiningPhase {
    pub fn from_remaining(remaining_seconds: u32) -> Self {
        let elapsed = CYCLE_SECONDS.saturating_sub(remaining_seconds);
        match elapsed % PHASE_PERIOD {
            p if p < SEARCHING_UNTIL => MiningPhase::Searching,
            p if p < ANALYZING_UNTIL => MiningPhase::Analyzing,
            _ => MiningPhase::Executing,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MiningPhase::Searching => "searching",
            MiningPhase::Analyzing => "analyzing",
            MiningPhase::Executing => "executing",
        }
    }
}
