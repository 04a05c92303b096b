use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::NodeError;

/// Freshly shipped releases get this long before the version floor applies;
/// measured from the local build's commit timestamp.
pub const VERSION_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

/// `major.minor.patch`, tolerating a leading `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FromStr for NodeVersion {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let mut parts = trimmed.split('.');

        let mut field = |name: &str| -> Result<u32, NodeError> {
            parts
                .next()
                .and_then(|part| part.parse().ok())
                .ok_or_else(|| NodeError::ValidationFailed {
                    field: name.to_string(),
                    message: format!("invalid version '{s}'"),
                })
        };

        Ok(NodeVersion {
            major: field("major")?,
            minor: field("minor")?,
            patch: field("patch")?,
        })
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl NodeVersion {
    /// The oldest version still accepted: one patch level behind, clamped.
    pub fn minimum_accepted(self) -> NodeVersion {
        NodeVersion {
            patch: self.patch.saturating_sub(1),
            ..self
        }
    }
}

/// A remote version passes if it equals the local one, meets the patch−1
/// floor, or the local build is younger than the grace window (a fleet-wide
/// rollout takes time to propagate).
pub fn version_accepted(
    remote: &str,
    local: &str,
    local_commit_ms: i64,
    now_ms: i64,
) -> bool {
    let Ok(local) = local.parse::<NodeVersion>() else {
        return false;
    };

    let remote = match remote.parse::<NodeVersion>() {
        Ok(version) => version,
        Err(_) => return false,
    };

    if remote == local || remote >= local.minimum_accepted() {
        return true;
    }

    local_commit_ms > 0
        && now_ms.saturating_sub(local_commit_ms) <= VERSION_GRACE.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    #[test]
    fn parses_with_and_without_prefix() {
        let version: NodeVersion = "v1.4.2".parse().unwrap();
        assert_eq!(version, "1.4.2".parse().unwrap());
        assert_eq!(version.to_string(), "1.4.2");
    }

    #[test]
    fn rejects_garbage() {
        assert!("1.4".parse::<NodeVersion>().is_err());
        assert!("one.two.three".parse::<NodeVersion>().is_err());
    }

    #[test]
    fn exact_match_passes() {
        assert!(version_accepted("1.4.2", "1.4.2", 0, 100 * HOUR_MS));
    }

    #[test]
    fn patch_minus_one_passes() {
        assert!(version_accepted("1.4.1", "1.4.2", 0, 100 * HOUR_MS));
    }

    #[test]
    fn patch_minus_two_fails_outside_grace() {
        let commit = 0;
        let now = 100 * HOUR_MS;
        assert!(!version_accepted("1.4.0", "1.4.2", commit, now));
    }

    #[test]
    fn patch_minus_two_passes_inside_grace() {
        let commit = 10 * HOUR_MS;
        let now = 20 * HOUR_MS;
        assert!(version_accepted("1.4.0", "1.4.2", commit, now));
    }

    #[test]
    fn newer_remote_passes() {
        assert!(version_accepted("1.5.0", "1.4.2", 0, 100 * HOUR_MS));
    }

    #[test]
    fn patch_floor_clamps_at_zero() {
        assert!(version_accepted("1.4.0", "1.4.0", 0, 100 * HOUR_MS));
    }
}
