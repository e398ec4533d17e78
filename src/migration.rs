use std::fmt;

/// Phases of a backend migration, as broadcast on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// All traffic served by the default backend.
    Normal,
    /// Data is being moved; traffic served by the legacy backend.
    Migration,
    /// Migration finished, leftovers being cleaned up; traffic back on the
    /// default backend.
    Cleanup,
}

impl MigrationState {
    /// Decodes a status token from the control channel or the persisted key.
    ///
    /// Unrecognized or empty tokens decode to `Normal` rather than an error,
    /// so a garbled message can never wedge the controller.
    pub fn decode(token: &str) -> Self {
        match token {
            "normal" => Self::Normal,
            "migration" => Self::Migration,
            "cleanup" => Self::Cleanup,
            _ => Self::Normal,
        }
    }

    /// Canonical token for this state.
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Migration => "migration",
            Self::Cleanup => "cleanup",
        }
    }

    /// Whether requests should go to the default backend in this state.
    /// Only an in-flight migration routes to the legacy backend.
    pub fn routes_to_default(&self) -> bool {
        !matches!(self, Self::Migration)
    }

    /// Applies one decoded status to the machine, yielding the next state
    /// and the routing flag to publish.
    ///
    /// Every cell of the transition table moves the machine to the incoming
    /// state, and the flag depends only on the state the machine lands in.
    /// Repeating the current status is a no-op that still recomputes the
    /// flag, so duplicate messages cannot flap routing.
    pub fn transition(self, incoming: MigrationState) -> (MigrationState, bool) {
        let next = incoming;
        (next, next.routes_to_default())
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}
