use super::PowerMeter;
use crate::config::MeterConfig;
use crate::domain::PowerSample;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, Timelike};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Meter stand-in for development. A time-of-day household load curve
/// plus midday solar, with uniform noise, gives the controller both
/// charge-worthy surplus and pump-worthy draw over one simulated day.
pub struct SimulatedMeter {
    base_load_w: f64,
    solar_peak_w: f64,
    noise_w: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedMeter {
    pub fn new(cfg: &MeterConfig) -> Self {
        let rng = match cfg.sim_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base_load_w: cfg.sim_base_load_w,
            solar_peak_w: cfg.sim_solar_peak_w,
            noise_w: cfg.sim_noise_w,
            rng: Mutex::new(rng),
        }
    }

    fn sample_at(&self, hour: f64) -> PowerSample {
        let mut rng = self.rng.lock();
        let consumed_w = self.base_load_w * load_multiplier(hour)
            + rng.gen_range(-self.noise_w..=self.noise_w);
        let production_w = (self.solar_peak_w * solar_fraction(hour)
            + rng.gen_range(-self.noise_w..=self.noise_w))
        .max(0.0);
        let sample = PowerSample::new(-production_w, consumed_w);

        // Rare meter transient, so the mismatch guard sees traffic in
        // dev runs too.
        let reported_net_w = if rng.gen_ratio(1, 50) {
            sample.net_w() + 400.0
        } else {
            sample.net_w() + rng.gen_range(-self.noise_w..=self.noise_w) * 0.1
        };
        sample.with_reported_net(reported_net_w)
    }
}

fn load_multiplier(hour: f64) -> f64 {
    if hour < 6.0 {
        // night: fridge and standby
        0.6
    } else if hour < 9.0 {
        // morning: breakfast and showers
        1.8
    } else if hour < 16.0 {
        // daytime
        1.0
    } else if hour < 21.0 {
        // evening: cooking and appliances
        2.2
    } else {
        // late evening: winding down
        1.2
    }
}

/// 0 outside the solar window, a bell peaking at 1.0 around noon.
fn solar_fraction(hour: f64) -> f64 {
    if !(6.0..18.0).contains(&hour) {
        return 0.0;
    }
    let x = (hour - 12.0) / 6.0;
    (1.0 - x * x).max(0.0)
}

#[async_trait]
impl PowerMeter for SimulatedMeter {
    async fn sample(&self) -> Result<PowerSample> {
        let now = Local::now();
        let hour = f64::from(now.hour()) + f64::from(now.minute()) / 60.0;
        Ok(self.sample_at(hour))
    }
}
