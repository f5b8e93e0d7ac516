use crate::error::Result;
use tracing::{debug, warn};

/// Phase of a single gitshu invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Start,
    Resolving,
    Installing,
    Dispatching,
    Done,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed)
    }

    fn allows(self, next: RequestState) -> bool {
        use RequestState::*;

        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) => true,
            (Start, Resolving | Installing | Done) => true,
            (Resolving, Installing | Dispatching | Done) => true,
            (Installing, Dispatching | Done) => true,
            (Dispatching, Done) => true,
            _ => false,
        }
    }
}

/// Tracks `Start → Resolving → Installing? → Dispatching → Done | Failed`
#[derive(Debug)]
pub struct Lifecycle {
    state: RequestState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RequestState::Start,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Move to `next`; returns false and stays put if the move is not allowed.
    pub fn advance(&mut self, next: RequestState) -> bool {
        if self.state == next {
            return true;
        }

        if !self.state.allows(next) {
            warn!("Ignoring request transition {:?} -> {:?}", self.state, next);
            return false;
        }

        debug!("Request {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }

    /// Enter the terminal state matching `result` and return the exit code.
    pub fn finish<T>(&mut self, result: &Result<T>) -> i32 {
        let terminal = if result.is_ok() {
            RequestState::Done
        } else {
            RequestState::Failed
        };
        self.advance(terminal);

        match self.state {
            RequestState::Done => 0,
            _ => 1,
        }
    }
}
