use serde::Serialize;
use strum::Display;

/// Where a sign stands with respect to its hub link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(tag = "state", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkState {
    /// Session up; the hub decides what is shown.
    Connected,
    /// Session lost; retrying with backoff while the last server content
    /// stays on screen.
    Reconnecting { attempt: u32 },
    /// Gave up waiting on the hub. Content comes from the local cache and
    /// emergency commands. Reconnects continue in the background.
    #[strum(serialize = "offline_autonomous")]
    OfflineAutonomous { attempt: u32 },
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_autonomous(self) -> bool {
        matches!(self, Self::OfflineAutonomous { .. })
    }

    /// Failed connects since the link was last up.
    pub fn attempt(self) -> u32 {
        match self {
            Self::Connected => 0,
            Self::Reconnecting { attempt } | Self::OfflineAutonomous { attempt } => attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_snake_case() {
        assert_eq!(LinkState::Connected.to_string(), "connected");
        assert_eq!(LinkState::Reconnecting { attempt: 2 }.to_string(), "reconnecting");
        assert_eq!(
            LinkState::OfflineAutonomous { attempt: 4 }.to_string(),
            "offline_autonomous"
        );
    }
}
