use serde::{Deserialize, Serialize};

/// One meter reading. Sign convention: negative watts are production
/// (solar or battery inverters feeding the house), positive watts are
/// consumption drawn from the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    pub produced_w: f64,
    pub consumed_w: f64,
    /// Net figure the meter computed itself, when it provides one. Used
    /// only as a cross-check against the computed total.
    pub reported_net_w: Option<f64>,
}

impl PowerSample {
    pub fn new(produced_w: f64, consumed_w: f64) -> Self {
        Self {
            produced_w,
            consumed_w,
            reported_net_w: None,
        }
    }

    pub fn with_reported_net(mut self, net_w: f64) -> Self {
        self.reported_net_w = Some(net_w);
        self
    }

    /// Signed house total: positive means the house is drawing power,
    /// negative means it is exporting.
    pub fn net_w(&self) -> f64 {
        self.consumed_w + self.produced_w
    }
}
