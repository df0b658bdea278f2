//! Chat status state machine.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    #[default]
    Ready,
    Submitted,
    Streaming,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Submit,
    FirstFrame,
    Finish,
    Fail,
    Clear,
    Stop,
}

impl ChatStatus {
    /// Pure transition function. Pairs without a transition keep the
    /// current status.
    pub fn next(self, event: StatusEvent) -> Self {
        use ChatStatus::*;
        use StatusEvent::*;

        match (self, event) {
            (_, Submit) => Submitted,
            (Submitted, FirstFrame) => Streaming,
            (Submitted | Streaming, Finish) => Ready,
            (Submitted | Streaming, Fail) => Error,
            (Error, Clear) => Ready,
            (status, Stop) => status,
            (status, _) => status,
        }
    }

    /// A request is outstanding.
    pub fn is_busy(self) -> bool {
        matches!(self, ChatStatus::Submitted | ChatStatus::Streaming)
    }
}
