use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable sync state of one draft key.
///
/// `Idle → Saving → {Saved, Error}`; `Saved`/`Error` return to `Saving` on the
/// next edit or retry. `Conflict` is only entered at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing queued, nothing confirmed yet.
    #[default]
    Idle,
    /// A write is queued or in flight.
    Saving,
    /// The last queued write was confirmed.
    Saved,
    /// A write failed and needs an explicit trigger.
    Error,
    /// The remote copy differs from the local one.
    Conflict,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Error => "error",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
