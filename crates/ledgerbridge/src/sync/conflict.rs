//! Which side wins a cycle.
//!
//! Last-write-wins at record granularity, gated by the sync marker: while the
//! remote `date_modified` equals the marker nothing has changed remotely and
//! the pair is converged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateRemote,
    CreateLocal,
    UpdateLocal,
    UpdateRemote,
    NoOp,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::CreateRemote => "create_remote",
            Action::CreateLocal => "create_local",
            Action::UpdateLocal => "update_local",
            Action::UpdateRemote => "update_remote",
            Action::NoOp => "no_op",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    LocalOnly,
    RemoteOnly,
    Converged,
    RemoteNewer,
    LocalNewer,
    /// Both sides carry the same timestamp but the marker disagrees.
    Tie,
    /// Local is linked but the remote was not fetched.
    RemoteMissing,
    Nothing,
}

/// The local side as seen by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalState {
    pub modified: DateTime<Utc>,
    pub marker: Option<DateTime<Utc>>,
    /// The ref already carries a remote id.
    pub linked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairState {
    pub local: Option<LocalState>,
    /// Remote `date_modified`, when a remote record exists.
    pub remote: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: Reason,
}

impl Decision {
    fn new(action: Action, reason: Reason) -> Self {
        Self { action, reason }
    }
}

pub fn decide(state: &PairState) -> Decision {
    match (state.local, state.remote) {
        (Some(local), None) if !local.linked => Decision::new(Action::CreateRemote, Reason::LocalOnly),
        (Some(_), None) => Decision::new(Action::NoOp, Reason::RemoteMissing),
        (None, Some(_)) => Decision::new(Action::CreateLocal, Reason::RemoteOnly),
        (None, None) => Decision::new(Action::NoOp, Reason::Nothing),
        (Some(local), Some(remote_modified)) => {
            if local.marker == Some(remote_modified) {
                Decision::new(Action::NoOp, Reason::Converged)
            } else if remote_modified > local.modified {
                Decision::new(Action::UpdateLocal, Reason::RemoteNewer)
            } else if remote_modified < local.modified {
                Decision::new(Action::UpdateRemote, Reason::LocalNewer)
            } else {
                Decision::new(Action::NoOp, Reason::Tie)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn both(modified: i64, marker: Option<i64>, remote: i64) -> PairState {
        PairState {
            local: Some(LocalState {
                modified: t(modified),
                marker: marker.map(t),
                linked: true,
            }),
            remote: Some(t(remote)),
        }
    }

    #[test]
    fn test_rule_order() {
        let local_only = PairState {
            local: Some(LocalState {
                modified: t(0),
                marker: None,
                linked: false,
            }),
            remote: None,
        };
        assert_eq!(decide(&local_only).action, Action::CreateRemote);

        let remote_only = PairState {
            local: None,
            remote: Some(t(0)),
        };
        assert_eq!(decide(&remote_only).action, Action::CreateLocal);

        assert_eq!(decide(&both(100, Some(5), 5)).action, Action::NoOp);
        assert_eq!(decide(&both(0, Some(1), 10)).action, Action::UpdateLocal);
        assert_eq!(decide(&both(20, Some(1), 10)).action, Action::UpdateRemote);
    }

    #[test]
    fn test_tie_is_noop() {
        let decision = decide(&both(10, Some(1), 10));
        assert_eq!(decision, Decision::new(Action::NoOp, Reason::Tie));
    }

    #[test]
    fn test_linked_local_without_remote_never_creates() {
        let state = PairState {
            local: Some(LocalState {
                modified: t(0),
                marker: Some(t(0)),
                linked: true,
            }),
            remote: None,
        };
        assert_eq!(decide(&state).action, Action::NoOp);
    }

    proptest! {
        #[test]
        fn prop_marker_match_is_always_converged(modified in -1000i64..1000, remote in -1000i64..1000) {
            let decision = decide(&both(modified, Some(remote), remote));
            prop_assert_eq!(decision, Decision::new(Action::NoOp, Reason::Converged));
        }

        #[test]
        fn prop_direction_follows_newer_side(
            modified in -1000i64..1000,
            remote in -1000i64..1000,
            marker in proptest::option::of(-1000i64..1000),
        ) {
            prop_assume!(marker != Some(remote));
            let action = decide(&both(modified, marker, remote)).action;
            let expected = if remote > modified {
                Action::UpdateLocal
            } else if remote < modified {
                Action::UpdateRemote
            } else {
                Action::NoOp
            };
            prop_assert_eq!(action, expected);
        }

        #[test]
        fn prop_never_creates_when_both_exist(
            modified in -1000i64..1000,
            remote in -1000i64..1000,
            marker in proptest::option::of(-1000i64..1000),
        ) {
            let action = decide(&both(modified, marker, remote)).action;
            prop_assert!(action != Action::CreateLocal && action != Action::CreateRemote);
        }
    }
}
