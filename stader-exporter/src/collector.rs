//! Prometheus collector over the snapshot cache.
//!
//! Every scrape reads the cached snapshot once and builds all gauges from it, so a scrape
//! never mixes values from two snapshots and never triggers a chain read.

use std::collections::HashMap;
use std::sync::Arc;

use log::error;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use stader_core::snapshot::Snapshot;
use stader_core::state_cache::{CacheState, RefreshStats, StateCache};
use stader_core::units::{to_f64, wei_to_eth};

/// Metric namespace.
pub const NAMESPACE: &str = "stader";
/// Metric subsystem.
pub const SUBSYSTEM: &str = "operator";

/// Where the collector reads snapshots from.
pub trait SnapshotSource: Send + Sync {
    /// The currently published snapshot.
    fn current(&self) -> CacheState;

    /// Refresh bookkeeping.
    fn refresh_stats(&self) -> RefreshStats;
}

impl SnapshotSource for StateCache {
    fn current(&self) -> CacheState {
        self.get_state()
    }

    fn refresh_stats(&self) -> RefreshStats {
        self.stats()
    }
}

/// A gauge family exported by [`OperatorCollector`].
struct MetricDef {
    /// Name below the namespace and subsystem.
    name: &'static str,
    /// Help text.
    help: &'static str,
    /// Variable label names.
    labels: &'static [&'static str],
}

/// Every gauge family, in exposition order.
const METRICS: &[MetricDef] = &[
    MetricDef {
        name: "snapshot_available",
        help: "1 when a snapshot has been assembled",
        labels: &[],
    },
    MetricDef {
        name: "refresh_consecutive_failures",
        help: "Failed snapshot refreshes since the last success",
        labels: &[],
    },
    MetricDef {
        name: "last_refresh_timestamp_seconds",
        help: "Unix time of the last successful refresh",
        labels: &[],
    },
    MetricDef {
        name: "snapshot_block",
        help: "Execution block the snapshot was read at",
        labels: &[],
    },
    MetricDef {
        name: "eth_balance",
        help: "Node account ETH balance",
        labels: &[],
    },
    MetricDef {
        name: "sd_balance",
        help: "Node account SD balance",
        labels: &[],
    },
    MetricDef {
        name: "registered",
        help: "1 when the node address is a registered operator",
        labels: &[],
    },
    MetricDef {
        name: "active",
        help: "1 when the operator is active",
        labels: &[],
    },
    MetricDef {
        name: "opted_into_socializing_pool",
        help: "1 when the operator opted into the socializing pool",
        labels: &[],
    },
    MetricDef {
        name: "el_rewards_owed_eth",
        help: "Operator share of the EL reward vault",
        labels: &[],
    },
    MetricDef {
        name: "non_terminal_validators",
        help: "Validator keys not in a terminal state",
        labels: &[],
    },
    MetricDef {
        name: "validators",
        help: "Validators by display status",
        labels: &["status"],
    },
    MetricDef {
        name: "validator_reward_share_eth",
        help: "Operator share of skimmed rewards in the withdraw vault",
        labels: &["pubkey"],
    },
    MetricDef {
        name: "validator_withdrawable_share_eth",
        help: "Operator share of the withdraw vault after exit",
        labels: &["pubkey"],
    },
    MetricDef {
        name: "validator_crossed_reward_threshold",
        help: "1 when the withdraw vault balance is above the rewards threshold",
        labels: &["pubkey"],
    },
    MetricDef {
        name: "sd_collateral_deposited",
        help: "SD deposited as collateral",
        labels: &[],
    },
    MetricDef {
        name: "max_spawnable_validators",
        help: "Validators the deposited collateral can back",
        labels: &[],
    },
    MetricDef {
        name: "sd_withdraw_requested",
        help: "SD requested for withdrawal",
        labels: &[],
    },
    MetricDef {
        name: "sd_withdraw_unlock_timestamp_seconds",
        help: "Unix time the requested SD unlocks",
        labels: &[],
    },
    MetricDef {
        name: "reward_cycle_current",
        help: "Latest published reward cycle",
        labels: &[],
    },
    MetricDef {
        name: "reward_cycles_missing",
        help: "Published reward cycles without a local proof",
        labels: &[],
    },
];

/// Fully qualified name of `spec`.
fn fq_name(spec: &MetricDef) -> String {
    format!("{NAMESPACE}_{SUBSYSTEM}_{}", spec.name)
}

/// Gauge values of one scrape, keyed by spec name.
#[derive(Default)]
struct Sample {
    /// `(spec name, label values, value)` in insertion order.
    values: Vec<(&'static str, Vec<String>, f64)>,
}

impl Sample {
    fn set(&mut self, name: &'static str, value: f64) {
        self.values.push((name, Vec::new(), value));
    }

    fn set_labelled(&mut self, name: &'static str, label: String, value: f64) {
        self.values.push((name, vec![label], value));
    }

    fn flag(&mut self, name: &'static str, on: bool) {
        self.set(name, if on { 1.0 } else { 0.0 });
    }
}

/// Fills `sample` from one snapshot.
fn sample_snapshot(sample: &mut Sample, snapshot: &Snapshot) {
    sample.set("snapshot_block", snapshot.captured_at_block as f64);
    sample.set("eth_balance", wei_to_eth(snapshot.account.eth_balance));
    sample.set("sd_balance", wei_to_eth(snapshot.account.token_balance));
    sample.flag("registered", snapshot.is_registered());

    if let Some(operator) = &snapshot.operator {
        sample.flag("active", operator.active);
        sample.flag("opted_into_socializing_pool", operator.opted_into_socializing_pool);
        sample.set("el_rewards_owed_eth", wei_to_eth(operator.el_rewards_owed));
        sample.set("non_terminal_validators", operator.non_terminal_validators as f64);
    }

    for (status, count) in snapshot.validators_by_status() {
        sample.set_labelled("validators", status.label().to_string(), count as f64);
    }
    for validator in &snapshot.validators {
        let pubkey = validator.pubkey.to_string();
        sample.set_labelled(
            "validator_reward_share_eth",
            pubkey.clone(),
            wei_to_eth(validator.reward_share_owed),
        );
        sample.set_labelled(
            "validator_withdrawable_share_eth",
            pubkey.clone(),
            wei_to_eth(validator.withdrawable_share_owed),
        );
        sample.set_labelled(
            "validator_crossed_reward_threshold",
            pubkey,
            if validator.crossed_reward_threshold { 1.0 } else { 0.0 },
        );
    }

    let collateral = &snapshot.collateral;
    sample.set("sd_collateral_deposited", wei_to_eth(collateral.deposited));
    sample.set("max_spawnable_validators", to_f64(collateral.max_spawnable_validators));
    sample.set("sd_withdraw_requested", wei_to_eth(collateral.withdraw_requested));
    sample.set(
        "sd_withdraw_unlock_timestamp_seconds",
        to_f64(collateral.withdraw_unlock_time),
    );

    sample.set("reward_cycle_current", snapshot.reward_cycle.current_index as f64);
    sample.set(
        "reward_cycles_missing",
        snapshot.reward_cycle.missing_local_cycles.len() as f64,
    );
}

/// Exposes the cached snapshot as gauges.
pub struct OperatorCollector {
    /// Snapshot source.
    source: Arc<dyn SnapshotSource>,
    /// Descriptors of every family in [`METRICS`].
    descs: Vec<Desc>,
}

impl OperatorCollector {
    /// Creates a collector reading from `source`.
    pub fn new(source: Arc<dyn SnapshotSource>) -> prometheus::Result<Self> {
        let descs = METRICS
            .iter()
            .map(|spec| {
                Desc::new(
                    fq_name(spec),
                    spec.help.to_string(),
                    spec.labels.iter().map(|l| l.to_string()).collect(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self { source, descs })
    }

    /// Builds the families of one scrape.
    fn families(&self, sample: &Sample) -> prometheus::Result<Vec<MetricFamily>> {
        let mut families = Vec::new();
        for spec in METRICS {
            let mut values = sample
                .values
                .iter()
                .filter(|(name, ..)| *name == spec.name)
                .peekable();
            if values.peek().is_none() {
                continue;
            }
            let opts = Opts::new(spec.name, spec.help)
                .namespace(NAMESPACE)
                .subsystem(SUBSYSTEM);
            let gauge = GaugeVec::new(opts, spec.labels)?;
            for (_, labels, value) in values {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                gauge.get_metric_with_label_values(&labels)?.set(*value);
            }
            families.extend(gauge.collect());
        }
        Ok(families)
    }
}

impl Collector for OperatorCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut sample = Sample::default();
        let stats = self.source.refresh_stats();
        sample.set(
            "refresh_consecutive_failures",
            f64::from(stats.consecutive_failures),
        );
        if let Some(at) = stats.last_success {
            if let Ok(since_epoch) = at.duration_since(std::time::UNIX_EPOCH) {
                sample.set("last_refresh_timestamp_seconds", since_epoch.as_secs_f64());
            }
        }

        match self.source.current() {
            CacheState::Uninitialized => sample.flag("snapshot_available", false),
            CacheState::Ready(snapshot) => {
                sample.flag("snapshot_available", true);
                sample_snapshot(&mut sample, &snapshot);
            }
        }

        self.families(&sample).unwrap_or_else(|e| {
            error!("❌ Failed to build operator metrics: {e}");
            Vec::new()
        })
    }
}
