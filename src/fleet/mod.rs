pub mod roster;

pub use roster::Roster;

use crate::domain::NodeHandle;
use futures::future::join_all;
use itertools::Itertools;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The fleet of battery nodes the controller drives.
///
/// Cycles are serialized: the roster lock is held from the first disable
/// call to the last allocation call, so an overlapping tick queues behind
/// the running one instead of interleaving conflicting calls, and
/// discovery cannot mutate the roster mid-cycle.
pub struct Fleet {
    roster: Mutex<Roster>,
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            roster: Mutex::new(Roster::new()),
        }
    }

    /// Returns false when a node with that name is already rostered.
    pub async fn register(&self, node: Arc<dyn NodeHandle>) -> bool {
        let name = node.name().to_owned();
        let added = self.roster.lock().await.insert(node);
        if added {
            info!(node = %name, "node joined the fleet");
        }
        added
    }

    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.roster.lock().await.remove(name);
        if removed {
            info!(node = name, "node removed from the fleet");
        }
        removed
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.roster.lock().await.contains(name)
    }

    pub async fn node_names(&self) -> Vec<String> {
        self.roster.lock().await.names()
    }

    pub async fn len(&self) -> usize {
        self.roster.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.roster.lock().await.is_empty()
    }

    /// Drive the fleet to `level`. Positive levels activate chargers,
    /// negative levels activate inverters, zero switches everything off.
    ///
    /// Two phases. First the opposite device kind is switched off on
    /// every node concurrently. Then fresh capacity counts are taken in
    /// parallel and devices are switched one call at a time, subtracting
    /// each call's reported contribution from the remaining level. Once
    /// the remainder reaches zero, every further index the pass covers
    /// is switched off instead, so a level drop leaves no stale devices
    /// behind.
    ///
    /// Returns the unallocated remainder. Nonzero means the fleet lacks
    /// capacity for the requested level; that is a signal, not an error.
    /// A node whose call is rejected is skipped for the rest of the
    /// cycle, stays rostered, and is retried on the next cycle.
    pub async fn set_run_level(&self, level: i32) -> i32 {
        let roster = self.roster.lock().await;
        let nodes = roster.nodes();
        let mut excluded = vec![false; nodes.len()];
        let mut r = level;

        // Phase 1: disable the opposite kind everywhere. Charger and
        // inverter relay lines are disjoint, so at level zero both
        // sweeps can run in the same pass.
        let disables = nodes.iter().enumerate().map(|(i, node)| {
            let node = Arc::clone(node);
            async move {
                if level >= 0 {
                    if let Err(error) = node.turn_off_all_inverters().await {
                        return (i, Err(error));
                    }
                }
                if level <= 0 {
                    if let Err(error) = node.turn_off_all_chargers().await {
                        return (i, Err(error));
                    }
                }
                (i, Ok(()))
            }
        });
        for (i, outcome) in join_all(disables).await {
            if let Err(error) = outcome {
                warn!(node = nodes[i].name(), error = %error, "disable rejected, node skipped this cycle");
                excluded[i] = true;
            }
        }

        if level == 0 {
            return 0;
        }

        // Phase 2: re-read capacities before allocating. Node device
        // sets can change between cycles.
        let queries = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| !excluded[*i])
            .map(|(i, node)| {
                let node = Arc::clone(node);
                async move {
                    let counts =
                        match tokio::join!(node.charger_count(), node.inverter_count()) {
                            (Ok(chargers), Ok(inverters)) => Ok((chargers, inverters)),
                            (Err(error), _) | (_, Err(error)) => Err(error),
                        };
                    (i, counts)
                }
            });
        let mut cap = vec![0u32; nodes.len()];
        for (i, outcome) in join_all(queries).await {
            match outcome {
                Ok((chargers, inverters)) => cap[i] = chargers.max(inverters),
                Err(error) => {
                    warn!(node = nodes[i].name(), error = %error, "count query rejected, node skipped this cycle");
                    excluded[i] = true;
                }
            }
        }

        // Allocation is strictly sequential: each call's result feeds
        // the remainder that decides whether the next index is switched
        // on or off.
        if r > 0 {
            // Charging packs one node full before moving to the next.
            // Charge bursts are short, so concentrating them is fine.
            for (i, node) in nodes.iter().enumerate() {
                if excluded[i] {
                    continue;
                }
                for idx in 0..cap[i] {
                    let turning_on = r != 0;
                    let call = if turning_on {
                        node.turn_on_charger(idx).await
                    } else {
                        node.turn_off_charger(idx).await
                    };
                    match call {
                        Ok(result) if turning_on => r -= result,
                        Ok(_) => {}
                        Err(error) => {
                            warn!(node = node.name(), error = %error, "charger call rejected, node skipped this cycle");
                            excluded[i] = true;
                            break;
                        }
                    }
                }
            }
        } else {
            // Generating stripes column by column across nodes, one
            // inverter per node per column. Generation runs for hours,
            // and striping spreads that duty evenly over the fleet.
            let cap_max = cap.iter().copied().max().unwrap_or(0);
            for column in 0..cap_max {
                for (i, node) in nodes.iter().enumerate() {
                    if excluded[i] || cap[i] <= column {
                        continue;
                    }
                    let turning_on = r != 0;
                    let call = if turning_on {
                        node.turn_on_inverter(column).await
                    } else {
                        node.turn_off_inverter(column).await
                    };
                    match call {
                        Ok(result) if turning_on => r -= result,
                        Ok(_) => {}
                        Err(error) => {
                            warn!(node = node.name(), error = %error, "inverter call rejected, node skipped this cycle");
                            excluded[i] = true;
                        }
                    }
                }
            }
        }

        debug!(requested = level, residual = r, "allocation pass complete");
        r
    }

    /// Fleet-wide charger and inverter totals. A node that rejects the
    /// query contributes nothing and stays rostered.
    pub async fn total_counts(&self) -> (u32, u32) {
        let roster = self.roster.lock().await;
        let queries = roster.nodes().iter().map(|node| {
            let node = Arc::clone(node);
            async move {
                match tokio::join!(node.charger_count(), node.inverter_count()) {
                    (Ok(chargers), Ok(inverters)) => Some((chargers, inverters)),
                    (Err(error), _) | (_, Err(error)) => {
                        warn!(node = node.name(), error = %error, "count query rejected");
                        None
                    }
                }
            }
        });
        let mut chargers = 0;
        let mut inverters = 0;
        for (c, v) in join_all(queries).await.into_iter().flatten() {
            chargers += c;
            inverters += v;
        }
        (chargers, inverters)
    }

    /// One line per node, for operator logs.
    pub async fn dump_state(&self) -> String {
        let roster = self.roster.lock().await;
        let dumps = join_all(roster.nodes().iter().map(|node| {
            let node = Arc::clone(node);
            async move {
                match node.dump_state().await {
                    Ok(line) => line,
                    Err(error) => format!("uBattery {} unreachable: {}", node.name(), error),
                }
            }
        }))
        .await;
        dumps.iter().join("\n")
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}
