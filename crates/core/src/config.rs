//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables shared by the template store and the progress engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt budget for assessment components that do not set one
    pub default_max_attempts: u32,

    /// EXCUSED attendance on a mandatory component forces EXCUSED status
    pub enforce_excused_attendance: bool,

    /// Allowed gap between planned and summed durations before warning
    pub duration_tolerance_minutes: u32,

    /// Accept enrollments into sessions whose template was deactivated
    pub allow_inactive_enrollment: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            enforce_excused_attendance: true,
            duration_tolerance_minutes: 0,
            allow_inactive_enrollment: false,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
