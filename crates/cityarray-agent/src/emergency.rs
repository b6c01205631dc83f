// ── Local emergency vocabulary ──
//
// Commands a sign accepts from its own console with no network path. The
// string forms are fixed; staff are trained on them.

use std::str::FromStr;

use cityarray_core::Priority;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LocalCommand {
    Evacuate,
    Shelter,
    Medical,
    Weather,
    /// Drop the local emergency and fall back to cached content.
    Clear,
    /// Retry the hub immediately with a fresh backoff.
    Reconnect,
}

/// Fixed text shown for a local emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyTemplate {
    pub content: &'static str,
    pub priority: Priority,
}

impl LocalCommand {
    /// Parse console input, ignoring surrounding whitespace and case.
    pub fn parse(input: &str) -> Result<Self, AgentError> {
        Self::from_str(input.trim()).map_err(|_| AgentError::UnknownCommand {
            input: input.trim().to_owned(),
        })
    }

    /// The template this command puts on screen. `None` for control
    /// commands.
    pub fn template(self) -> Option<EmergencyTemplate> {
        let (content, priority) = match self {
            Self::Evacuate => ("⚠️ EVACUATE NOW ⚠️\nFollow exit signs\nStay calm", 100),
            Self::Shelter => ("🏠 SHELTER IN PLACE\nStay indoors\nAwait instructions", 95),
            Self::Medical => ("🚑 MEDICAL EMERGENCY\nClear the area\nHelp is coming", 90),
            Self::Weather => ("⛈️ SEVERE WEATHER\nSeek shelter immediately", 85),
            Self::Clear | Self::Reconnect => return None,
        };
        Some(EmergencyTemplate {
            content,
            priority: Priority::saturating(priority),
        })
    }

    /// Text of the report queued for the hub when this runs offline.
    pub fn report(self) -> String {
        format!("OFFLINE: {self}")
    }
}
