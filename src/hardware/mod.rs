pub mod gpio;
pub mod watchdog;

pub use gpio::{MemoryRelays, RelayDriver, SysfsRelays};
pub use watchdog::Watchdog;

use crate::domain::NodeHandle;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Which physical relay lines a node controls, by device kind. The two
/// sets must be disjoint; a node cannot start without a valid one.
#[derive(Debug, Clone)]
pub struct HardwareDescriptor {
    pub name: String,
    pub charger_gpios: Vec<u32>,
    pub inverter_gpios: Vec<u32>,
}

impl HardwareDescriptor {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("hardware descriptor has no name");
        }
        let mut seen = HashSet::new();
        for line in self.charger_gpios.iter().chain(&self.inverter_gpios) {
            if !seen.insert(line) {
                bail!("gpio line {} is wired to more than one device", line);
            }
        }
        Ok(())
    }
}

/// Relay driver selection, from the node config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RelayMode {
    /// In-memory relays for simulation and tests.
    Memory,
    /// Real relays through the sysfs GPIO interface.
    Sysfs,
}

pub fn driver_for(mode: RelayMode) -> Arc<dyn RelayDriver> {
    match mode {
        RelayMode::Memory => Arc::new(MemoryRelays::new()),
        RelayMode::Sysfs => Arc::new(SysfsRelays::new()),
    }
}

/// One node's charger and inverter relays with their commanded state.
///
/// The bank is the single writer to its driver. The mirrors hold
/// commanded state, so dumps and counts never read hardware back.
/// Construction drives every relay off: a node always boots idle.
pub struct RelayBank {
    name: String,
    driver: Arc<dyn RelayDriver>,
    charger_gpios: Vec<u32>,
    inverter_gpios: Vec<u32>,
    charger_state: Mutex<Vec<bool>>,
    inverter_state: Mutex<Vec<bool>>,
}

impl RelayBank {
    pub fn new(descriptor: HardwareDescriptor, driver: Arc<dyn RelayDriver>) -> Result<Self> {
        descriptor.validate()?;
        let charger_state = Mutex::new(vec![false; descriptor.charger_gpios.len()]);
        let inverter_state = Mutex::new(vec![false; descriptor.inverter_gpios.len()]);
        let bank = Self {
            name: descriptor.name,
            driver,
            charger_gpios: descriptor.charger_gpios,
            inverter_gpios: descriptor.inverter_gpios,
            charger_state,
            inverter_state,
        };
        bank.all_off()?;
        Ok(bank)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn charger_count(&self) -> u32 {
        self.charger_gpios.len() as u32
    }

    pub fn inverter_count(&self) -> u32 {
        self.inverter_gpios.len() as u32
    }

    /// Switch one charger. Returns the charger's +1 contribution when
    /// the relay was driven, 0 when the index is out of range or the
    /// write failed.
    pub fn set_charger(&self, idx: u32, on: bool) -> i32 {
        self.switch(&self.charger_gpios, &self.charger_state, idx, on, 1)
    }

    /// Switch one inverter. Same contract as [`set_charger`] with a -1
    /// contribution.
    ///
    /// [`set_charger`]: RelayBank::set_charger
    pub fn set_inverter(&self, idx: u32, on: bool) -> i32 {
        self.switch(&self.inverter_gpios, &self.inverter_state, idx, on, -1)
    }

    fn switch(
        &self,
        gpios: &[u32],
        state: &Mutex<Vec<bool>>,
        idx: u32,
        on: bool,
        worth: i32,
    ) -> i32 {
        let Some(&line) = gpios.get(idx as usize) else {
            return 0;
        };
        if let Err(error) = self.driver.write(line, on) {
            warn!(line, error = %error, "relay write failed");
            return 0;
        }
        state.lock()[idx as usize] = on;
        worth
    }

    pub fn all_chargers_off(&self) -> Result<()> {
        self.sweep_off(&self.charger_gpios, &self.charger_state)
    }

    pub fn all_inverters_off(&self) -> Result<()> {
        self.sweep_off(&self.inverter_gpios, &self.inverter_state)
    }

    /// Drive every relay off. Every line is attempted even when one
    /// write fails; the first failure is returned.
    pub fn all_off(&self) -> Result<()> {
        let chargers = self.all_chargers_off();
        let inverters = self.all_inverters_off();
        chargers.and(inverters)
    }

    fn sweep_off(&self, gpios: &[u32], state: &Mutex<Vec<bool>>) -> Result<()> {
        let mut first_error = None;
        for (i, &line) in gpios.iter().enumerate() {
            match self.driver.write(line, false) {
                Ok(()) => state.lock()[i] = false,
                Err(error) => {
                    warn!(line, error = %error, "relay write failed");
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn charger_states(&self) -> Vec<bool> {
        self.charger_state.lock().clone()
    }

    pub fn inverter_states(&self) -> Vec<bool> {
        self.inverter_state.lock().clone()
    }

    /// Renders like `uBattery shed bc = [ 1 0 ] ui = [ 0 ]`.
    pub fn dump_state(&self) -> String {
        fn render(states: &[bool]) -> String {
            states
                .iter()
                .map(|on| if *on { " 1" } else { " 0" })
                .collect()
        }
        format!(
            "uBattery {} bc = [{} ] ui = [{} ]",
            self.name,
            render(&self.charger_state.lock()),
            render(&self.inverter_state.lock()),
        )
    }
}

/// In-process handle to a bank. The node daemon serves one over RPC;
/// simulations register it with a fleet directly.
pub struct LocalNode {
    bank: Arc<RelayBank>,
}

impl LocalNode {
    pub fn new(bank: Arc<RelayBank>) -> Self {
        Self { bank }
    }
}

#[async_trait]
impl NodeHandle for LocalNode {
    fn name(&self) -> &str {
        self.bank.name()
    }

    async fn charger_count(&self) -> Result<u32> {
        Ok(self.bank.charger_count())
    }

    async fn inverter_count(&self) -> Result<u32> {
        Ok(self.bank.inverter_count())
    }

    async fn turn_on_charger(&self, idx: u32) -> Result<i32> {
        Ok(self.bank.set_charger(idx, true))
    }

    async fn turn_off_charger(&self, idx: u32) -> Result<i32> {
        Ok(self.bank.set_charger(idx, false))
    }

    async fn turn_on_inverter(&self, idx: u32) -> Result<i32> {
        Ok(self.bank.set_inverter(idx, true))
    }

    async fn turn_off_inverter(&self, idx: u32) -> Result<i32> {
        Ok(self.bank.set_inverter(idx, false))
    }

    async fn turn_off_all_chargers(&self) -> Result<()> {
        self.bank.all_chargers_off()
    }

    async fn turn_off_all_inverters(&self) -> Result<()> {
        self.bank.all_inverters_off()
    }

    async fn dump_state(&self) -> Result<String> {
        Ok(self.bank.dump_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> HardwareDescriptor {
        HardwareDescriptor {
            name: name.to_owned(),
            charger_gpios: vec![17, 27],
            inverter_gpios: vec![22],
        }
    }

    #[test]
    fn construction_drives_every_line_off() {
        let relays = Arc::new(MemoryRelays::new());
        relays.write(17, true).unwrap();
        relays.write(22, true).unwrap();
        let bank = RelayBank::new(descriptor("shed"), relays.clone()).unwrap();
        assert!(!relays.is_on(17));
        assert!(!relays.is_on(22));
        assert_eq!(bank.charger_states(), vec![false, false]);
    }

    #[test]
    fn switch_reports_signed_contribution() {
        let relays = Arc::new(MemoryRelays::new());
        let bank = RelayBank::new(descriptor("shed"), relays.clone()).unwrap();
        assert_eq!(bank.set_charger(0, true), 1);
        assert_eq!(bank.set_charger(0, false), 1);
        assert_eq!(bank.set_inverter(0, true), -1);
        assert_eq!(bank.set_inverter(0, false), -1);
        assert!(!relays.is_on(22));
    }

    #[test]
    fn out_of_range_index_reports_zero() {
        let relays = Arc::new(MemoryRelays::new());
        let bank = RelayBank::new(descriptor("shed"), relays).unwrap();
        assert_eq!(bank.set_charger(2, true), 0);
        assert_eq!(bank.set_inverter(1, true), 0);
        assert_eq!(bank.charger_states(), vec![false, false]);
    }

    #[test]
    fn sweeps_only_touch_their_own_kind() {
        let relays = Arc::new(MemoryRelays::new());
        let bank = RelayBank::new(descriptor("shed"), relays).unwrap();
        bank.set_charger(1, true);
        bank.set_inverter(0, true);
        bank.all_chargers_off().unwrap();
        assert_eq!(bank.charger_states(), vec![false, false]);
        assert_eq!(bank.inverter_states(), vec![true]);
    }

    #[test]
    fn dump_matches_operator_format() {
        let relays = Arc::new(MemoryRelays::new());
        let bank = RelayBank::new(descriptor("shed"), relays).unwrap();
        bank.set_charger(0, true);
        assert_eq!(bank.dump_state(), "uBattery shed bc = [ 1 0 ] ui = [ 0 ]");
    }

    #[test]
    fn descriptor_rejects_duplicate_lines() {
        let descriptor = HardwareDescriptor {
            name: "shed".into(),
            charger_gpios: vec![17, 22],
            inverter_gpios: vec![22],
        };
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn descriptor_rejects_blank_name() {
        let descriptor = HardwareDescriptor {
            name: "  ".into(),
            charger_gpios: vec![17],
            inverter_gpios: vec![],
        };
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn relay_mode_parses_from_config_strings() {
        assert_eq!("memory".parse::<RelayMode>().unwrap(), RelayMode::Memory);
        assert_eq!("sysfs".parse::<RelayMode>().unwrap(), RelayMode::Sysfs);
        assert!("modbus".parse::<RelayMode>().is_err());
    }

    /// Healthy until told otherwise, then every write fails.
    struct FlakyDriver {
        healthy: Mutex<bool>,
        inner: MemoryRelays,
    }

    impl FlakyDriver {
        fn new() -> Self {
            Self {
                healthy: Mutex::new(true),
                inner: MemoryRelays::new(),
            }
        }
    }

    impl RelayDriver for FlakyDriver {
        fn write(&self, line: u32, on: bool) -> Result<()> {
            if !*self.healthy.lock() {
                bail!("relay board not answering");
            }
            self.inner.write(line, on)
        }
    }

    #[test]
    fn construction_surfaces_a_dead_driver() {
        let driver = Arc::new(FlakyDriver::new());
        *driver.healthy.lock() = false;
        assert!(RelayBank::new(descriptor("shed"), driver).is_err());
    }

    #[test]
    fn failed_write_reports_zero_and_keeps_mirror() {
        let driver = Arc::new(FlakyDriver::new());
        let bank = RelayBank::new(descriptor("shed"), driver.clone()).unwrap();
        *driver.healthy.lock() = false;
        assert_eq!(bank.set_charger(0, true), 0);
        assert_eq!(bank.charger_states(), vec![false, false]);
        assert!(bank.all_off().is_err());
    }
}
