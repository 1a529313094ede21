use std::fmt;
use std::time::{Duration, Instant};

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::peer::Peer;

/// Performance numbers of one scenario, from `begin` to `end`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    /// real time
    pub elapsed: Duration,
    /// number of peers
    pub peers: usize,
    /// number of RPC sends
    pub rpcs: usize,
    /// number of bytes
    pub bytes: u64,
    /// number of agreements reported
    pub commands: u64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:4.1}s  {} {:4} {:7} {:4}",
            self.elapsed.as_secs_f64(),
            self.peers,
            self.rpcs,
            self.bytes,
            self.commands
        )
    }
}

impl<P: Peer> Cluster<P> {
    /// start a scenario.
    /// print the description.
    /// e.g. cfg.begin("Test (2B): RPC counts aren't too high")
    pub fn begin(&self, description: &str) {
        info!("{} ...", description);
        let rpcs0 = self.rpc_total();
        let bytes0 = self.bytes_total();
        let mut s = self.lock();
        s.t0 = Instant::now();
        s.rpcs0 = rpcs0;
        s.bytes0 = bytes0;
        s.storage.mark();
    }

    /// end a scenario. Fails with the first failure the cluster saw, if any;
    /// otherwise logs and returns the numbers since `begin`.
    pub fn end(&self) -> Result<Report> {
        self.check_timeout()?;
        if let Some(err) = self.failure() {
            return Err(err);
        }

        let rpcs = self.rpc_total();
        let bytes = self.bytes_total();
        let s = self.lock();
        let report = Report {
            elapsed: s.t0.elapsed(),
            peers: self.n,
            rpcs: rpcs - s.rpcs0,
            bytes: bytes - s.bytes0,
            commands: s.storage.commands_since_mark(),
        };
        info!("  ... Passed --  {}", report);
        Ok(report)
    }

    /// enforce the real-time limit on the scenario.
    pub fn check_timeout(&self) -> Result<()> {
        let limit = self.config.time_limit;
        if self.start.elapsed() > limit {
            return Err(self.fatal(Error::TimeLimit(limit)));
        }
        Ok(())
    }
}
