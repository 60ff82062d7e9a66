use super::RelayBank;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Single-shot dead-man switch for a relay bank.
///
/// Arming starts one countdown; each further arm restarts it. A period
/// that elapses with no arm drives every relay off and leaves the
/// watchdog disarmed until the next arm. The node arms it on every
/// device mutation it serves, so a crashed or partitioned controller
/// leaves devices running for at most one period.
#[derive(Clone)]
pub struct Watchdog {
    feed: mpsc::Sender<()>,
}

impl Watchdog {
    pub fn spawn(bank: Arc<RelayBank>, period: Duration) -> Self {
        let (feed, mut fed) = mpsc::channel::<()>(8);
        tokio::spawn(async move {
            loop {
                // Disarmed: wait for a mutation.
                if fed.recv().await.is_none() {
                    return;
                }
                // Armed: every feed restarts the countdown.
                loop {
                    match tokio::time::timeout(period, fed.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => {
                            warn!(
                                node = bank.name(),
                                period_s = period.as_secs(),
                                "watchdog fired, forcing all relays off"
                            );
                            if let Err(error) = bank.all_off() {
                                warn!(error = %error, "watchdog all-off failed");
                            }
                            break;
                        }
                    }
                }
            }
        });
        Self { feed }
    }

    /// Restart the countdown. Lossless arming is not needed: a full
    /// channel already carries a pending feed.
    pub fn arm(&self) {
        match self.feed.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("watchdog task is gone, arm ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{HardwareDescriptor, MemoryRelays};

    fn bank() -> Arc<RelayBank> {
        let descriptor = HardwareDescriptor {
            name: "shed".into(),
            charger_gpios: vec![17, 27],
            inverter_gpios: vec![22],
        };
        Arc::new(RelayBank::new(descriptor, Arc::new(MemoryRelays::new())).unwrap())
    }

    fn devices_on(bank: &RelayBank) -> usize {
        bank.charger_states()
            .into_iter()
            .chain(bank.inverter_states())
            .filter(|on| *on)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_forces_all_off() {
        let bank = bank();
        let watchdog = Watchdog::spawn(bank.clone(), Duration::from_secs(30));
        bank.set_charger(0, true);
        bank.set_inverter(0, true);
        watchdog.arm();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(devices_on(&bank), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn arming_restarts_the_countdown() {
        let bank = bank();
        let watchdog = Watchdog::spawn(bank.clone(), Duration::from_secs(30));
        bank.set_charger(0, true);
        watchdog.arm();

        tokio::time::sleep(Duration::from_secs(20)).await;
        watchdog.arm();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(devices_on(&bank), 1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(devices_on(&bank), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stays_disarmed_after_firing() {
        let bank = bank();
        let watchdog = Watchdog::spawn(bank.clone(), Duration::from_secs(30));
        bank.set_charger(0, true);
        watchdog.arm();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(devices_on(&bank), 0);

        // Its own all-off must not have re-armed it.
        bank.set_charger(1, true);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(devices_on(&bank), 1);

        watchdog.arm();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(devices_on(&bank), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unarmed_watchdog_never_fires() {
        let bank = bank();
        let _watchdog = Watchdog::spawn(bank.clone(), Duration::from_secs(30));
        bank.set_charger(0, true);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(devices_on(&bank), 1);
    }
}
