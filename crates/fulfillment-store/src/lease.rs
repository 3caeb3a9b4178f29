use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exclusive right to run a scheduled job until `expires_at`.
///
/// An expired lease can be taken over by another holder, so a crashed run
/// never blocks the job forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Returns true if the lease no longer protects its holder.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
