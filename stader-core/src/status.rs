//! Validator statuses and the rule that combines them for display.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Validator lifecycle status as tracked by the permissionless node registry.
///
/// Discriminants match the contract enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    /// Key added, pre-deposit not yet sent.
    Initialized,
    /// Key failed signature verification.
    InvalidSignature,
    /// Key was front-run on the deposit contract.
    FrontRun,
    /// 1 ETH pre-deposit sent.
    PreDeposit,
    /// Full deposit sent.
    Deposited,
    /// Validator exited and its withdrawal was settled.
    Withdrawn,
}

impl ValidatorStatus {
    /// Decodes the contract enum value.
    pub fn from_repr(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Initialized,
            1 => Self::InvalidSignature,
            2 => Self::FrontRun,
            3 => Self::PreDeposit,
            4 => Self::Deposited,
            5 => Self::Withdrawn,
            _ => return None,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::InvalidSignature => "invalid_signature",
            Self::FrontRun => "front_run",
            Self::PreDeposit => "pre_deposit",
            Self::Deposited => "deposited",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validator status reported by the beacon node API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconStatus {
    /// The beacon node has no record of the key.
    Unknown,
    /// Deposit seen, not yet eligible for activation.
    PendingInitialized,
    /// Waiting in the activation queue.
    PendingQueued,
    /// Attesting normally.
    ActiveOngoing,
    /// Voluntary exit initiated.
    ActiveExiting,
    /// Slashed, still in the active set.
    ActiveSlashed,
    /// Exited without being slashed.
    ExitedUnslashed,
    /// Exited after being slashed.
    ExitedSlashed,
    /// Balance withdrawable.
    WithdrawalPossible,
    /// Balance withdrawn.
    WithdrawalDone,
}

impl BeaconStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::PendingInitialized => "pending_initialized",
            Self::PendingQueued => "pending_queued",
            Self::ActiveOngoing => "active_ongoing",
            Self::ActiveExiting => "active_exiting",
            Self::ActiveSlashed => "active_slashed",
            Self::ExitedUnslashed => "exited_unslashed",
            Self::ExitedSlashed => "exited_slashed",
            Self::WithdrawalPossible => "withdrawal_possible",
            Self::WithdrawalDone => "withdrawal_done",
        }
    }
}

impl fmt::Display for BeaconStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A beacon status string that is not part of the beacon API.
#[derive(Debug, Snafu)]
#[snafu(display("unrecognised beacon validator status '{status}'"))]
pub struct UnknownBeaconStatus {
    /// The rejected string.
    status: String,
}

impl FromStr for BeaconStatus {
    type Err = UnknownBeaconStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "unknown" => Self::Unknown,
            "pending_initialized" => Self::PendingInitialized,
            "pending_queued" => Self::PendingQueued,
            "active_ongoing" => Self::ActiveOngoing,
            "active_exiting" => Self::ActiveExiting,
            "active_slashed" => Self::ActiveSlashed,
            "exited_unslashed" => Self::ExitedUnslashed,
            "exited_slashed" => Self::ExitedSlashed,
            "withdrawal_possible" => Self::WithdrawalPossible,
            "withdrawal_done" => Self::WithdrawalDone,
            other => {
                return Err(UnknownBeaconStatus {
                    status: other.to_string(),
                })
            }
        })
    }
}

/// Status shown to the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    /// The registry status, shown unchanged.
    OnChain(ValidatorStatus),
    /// Exit initiated on the beacon chain.
    Exiting,
    /// Exited on the beacon chain.
    Exited,
    /// Slashed on the beacon chain.
    Slashed,
    /// Withdrawn according to the registry.
    Withdrawn,
}

impl DisplayStatus {
    /// Combines registry and beacon status.
    ///
    /// A registry `withdrawn` wins outright, then beacon slashing, exit and exit initiation
    /// in that order; otherwise the registry status is shown as is.
    pub fn derive(raw: ValidatorStatus, beacon: BeaconStatus) -> Self {
        if raw == ValidatorStatus::Withdrawn {
            return Self::Withdrawn;
        }
        match beacon {
            BeaconStatus::ActiveSlashed | BeaconStatus::ExitedSlashed => Self::Slashed,
            BeaconStatus::ExitedUnslashed
            | BeaconStatus::WithdrawalPossible
            | BeaconStatus::WithdrawalDone => Self::Exited,
            BeaconStatus::ActiveExiting => Self::Exiting,
            _ => Self::OnChain(raw),
        }
    }

    /// Stable label used in metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OnChain(raw) => raw.as_str(),
            Self::Exiting => "exiting",
            Self::Exited => "exited",
            Self::Slashed => "slashed",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_exit_overrides_deposited() {
        assert_eq!(
            DisplayStatus::derive(ValidatorStatus::Deposited, BeaconStatus::ExitedUnslashed),
            DisplayStatus::Exited
        );
        assert_eq!(
            DisplayStatus::derive(ValidatorStatus::Deposited, BeaconStatus::ActiveExiting),
            DisplayStatus::Exiting
        );
    }

    #[test]
    fn registry_withdrawn_wins_over_beacon() {
        assert_eq!(
            DisplayStatus::derive(ValidatorStatus::Withdrawn, BeaconStatus::ActiveOngoing),
            DisplayStatus::Withdrawn
        );
        assert_eq!(
            DisplayStatus::derive(ValidatorStatus::Withdrawn, BeaconStatus::ExitedSlashed),
            DisplayStatus::Withdrawn
        );
    }

    #[test]
    fn slashing_is_reported_before_exit() {
        assert_eq!(
            DisplayStatus::derive(ValidatorStatus::Deposited, BeaconStatus::ExitedSlashed),
            DisplayStatus::Slashed
        );
        assert_eq!(
            DisplayStatus::derive(ValidatorStatus::Deposited, BeaconStatus::ActiveSlashed),
            DisplayStatus::Slashed
        );
    }

    #[test]
    fn raw_status_passes_through_otherwise() {
        for beacon in [
            BeaconStatus::Unknown,
            BeaconStatus::PendingQueued,
            BeaconStatus::ActiveOngoing,
        ] {
            assert_eq!(
                DisplayStatus::derive(ValidatorStatus::PreDeposit, beacon),
                DisplayStatus::OnChain(ValidatorStatus::PreDeposit)
            );
        }
    }

    #[test]
    fn beacon_status_parses_api_strings() {
        assert_eq!(
            "active_ongoing".parse::<BeaconStatus>().unwrap(),
            BeaconStatus::ActiveOngoing
        );
        assert_eq!(
            "withdrawal_done".parse::<BeaconStatus>().unwrap(),
            BeaconStatus::WithdrawalDone
        );
        assert!("active".parse::<BeaconStatus>().is_err());
    }

    #[test]
    fn contract_status_decodes_known_values_only() {
        assert_eq!(ValidatorStatus::from_repr(4), Some(ValidatorStatus::Deposited));
        assert_eq!(ValidatorStatus::from_repr(5), Some(ValidatorStatus::Withdrawn));
        assert_eq!(ValidatorStatus::from_repr(6), None);
    }
}
