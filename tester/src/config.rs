use std::time::Duration;

/// Snapshot every this many applied commands, by default.
pub const SNAPSHOT_INTERVAL: u64 = 10;

/// How a [`Cluster`](crate::Cluster) is set up.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Drop and delay requests and replies.
    pub unreliable: bool,
    /// Ask peers to compact their logs every `snapshot_interval` commands,
    /// and hold them to strictly sequential applies.
    pub snapshot: bool,
    pub snapshot_interval: u64,
    /// Pause a long time on calls over disabled links.
    pub long_delays: bool,
    /// Seed of the cluster's random source. Drawn from entropy, and logged,
    /// when unset.
    pub seed: Option<u64>,
    /// Wall-clock budget of the whole scenario.
    pub time_limit: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            unreliable: false,
            snapshot: false,
            snapshot_interval: SNAPSHOT_INTERVAL,
            long_delays: true,
            seed: None,
            time_limit: Duration::from_secs(120),
        }
    }
}

impl ClusterConfig {
    pub fn with_unreliable(mut self, unreliable: bool) -> Self {
        self.unreliable = unreliable;
        self
    }

    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_long_delays(mut self, long_delays: bool) -> Self {
        self.long_delays = long_delays;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    /// The interval at which the applier snapshots, if snapshots are on.
    pub(crate) fn snapshot_every(&self) -> Option<u64> {
        if self.snapshot {
            Some(self.snapshot_interval)
        } else {
            None
        }
    }
}
