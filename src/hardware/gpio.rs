use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

/// Sets a single relay line on or off.
///
/// Drivers are synchronous: a relay write is a sub-millisecond sysfs
/// poke and the owning bank serializes them anyway.
pub trait RelayDriver: Send + Sync {
    fn write(&self, line: u32, on: bool) -> Result<()>;
}

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Drives relays through the legacy sysfs GPIO interface. A line is
/// exported and switched to output direction on first use; lines left
/// exported by a previous run are picked up as they are.
pub struct SysfsRelays {
    root: PathBuf,
    prepared: Mutex<HashSet<u32>>,
}

impl SysfsRelays {
    pub fn new() -> Self {
        Self::with_root(GPIO_ROOT)
    }

    fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prepared: Mutex::new(HashSet::new()),
        }
    }

    fn prepare(&self, line: u32) -> Result<()> {
        let mut prepared = self.prepared.lock();
        if prepared.contains(&line) {
            return Ok(());
        }
        let line_dir = self.root.join(format!("gpio{}", line));
        if !line_dir.exists() {
            fs::write(self.root.join("export"), line.to_string())
                .with_context(|| format!("exporting gpio{}", line))?;
        }
        fs::write(line_dir.join("direction"), "out")
            .with_context(|| format!("setting gpio{} direction", line))?;
        prepared.insert(line);
        Ok(())
    }
}

impl Default for SysfsRelays {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayDriver for SysfsRelays {
    fn write(&self, line: u32, on: bool) -> Result<()> {
        self.prepare(line)?;
        let value = if on { "1" } else { "0" };
        fs::write(self.root.join(format!("gpio{}/value", line)), value)
            .with_context(|| format!("writing gpio{}", line))
    }
}

/// In-memory relay lines for simulation and tests.
#[derive(Default)]
pub struct MemoryRelays {
    lines: Mutex<HashMap<u32, bool>>,
}

impl MemoryRelays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self, line: u32) -> bool {
        self.lines.lock().get(&line).copied().unwrap_or(false)
    }
}

impl RelayDriver for MemoryRelays {
    fn write(&self, line: u32, on: bool) -> Result<()> {
        self.lines.lock().insert(line, on);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn memory_relays_track_last_write() {
        let relays = MemoryRelays::new();
        assert!(!relays.is_on(4));
        relays.write(4, true).unwrap();
        assert!(relays.is_on(4));
        relays.write(4, false).unwrap();
        assert!(!relays.is_on(4));
    }

    static SCRATCH: AtomicU32 = AtomicU32::new(0);

    /// Lay out a fake exported-gpio tree; sysfs itself creates the
    /// gpioN directories on export, a plain filesystem cannot, so the
    /// tests pre-create them.
    fn scratch_gpio_tree(lines: &[u32]) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "ubattery-gpio-{}-{}",
            std::process::id(),
            SCRATCH.fetch_add(1, Ordering::Relaxed)
        ));
        for line in lines {
            let dir = root.join(format!("gpio{}", line));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("direction"), "in").unwrap();
            fs::write(dir.join("value"), "0").unwrap();
        }
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("export"), "").unwrap();
        root
    }

    #[test]
    fn sysfs_write_sets_direction_then_value() {
        let root = scratch_gpio_tree(&[17]);
        let relays = SysfsRelays::with_root(&root);

        relays.write(17, true).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio17/direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(root.join("gpio17/value")).unwrap(), "1");

        relays.write(17, false).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio17/value")).unwrap(), "0");

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn sysfs_surfaces_missing_line_as_error() {
        let root = scratch_gpio_tree(&[]);
        let relays = SysfsRelays::with_root(&root);
        assert!(relays.write(99, true).is_err());
        let _ = fs::remove_dir_all(&root);
    }
}
