//! Admission configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rules the coordinator applies to every connect attempt.
///
/// Start from `AdmissionConfig::default()` and override what you need:
///
/// ```rust
/// use std::time::Duration;
/// use turnstile_session::AdmissionConfig;
///
/// let config = AdmissionConfig {
///     max_players: 4,
///     auth_timeout: Duration::from_secs(2),
///     ..AdmissionConfig::default()
/// };
/// assert_eq!(config.required_version, "1.0");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Peers must report exactly this version string.
    pub required_version: String,

    /// Roster capacity. Connect attempts beyond it are refused before the
    /// identity provider is contacted.
    pub max_players: usize,

    /// How long one validation may occupy the single auth slot before the
    /// peer is rejected and the queue moves on.
    pub auth_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            required_version: "1.0".to_string(),
            max_players: 16,
            auth_timeout: Duration::from_secs(5),
        }
    }
}
