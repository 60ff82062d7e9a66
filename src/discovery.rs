//! mDNS discovery. Nodes announce themselves under a well-known service
//! type; the controller browses and rosters every complete announcement.

use crate::fleet::Fleet;
use crate::rpc::RemoteNode;
use anyhow::{anyhow, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Well-known service type every node answers for.
pub const SERVICE_TYPE: &str = "_ubattery._tcp.local.";

/// One complete announcement: everything needed to roster a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Extract a complete `{name, host, port}` triple from a resolved
/// announcement. An incomplete announcement yields None and is ignored
/// as a whole, never partially applied.
pub fn candidate_from(info: &ServiceInfo) -> Option<Candidate> {
    let name = instance_name(info.get_fullname());
    if name.is_empty() {
        return None;
    }
    let host = info
        .get_addresses()
        .iter()
        .map(|addr| IpAddr::from(*addr))
        .next()?
        .to_string();
    let port = info.get_port();
    if port == 0 {
        return None;
    }
    Some(Candidate {
        name: name.to_owned(),
        host,
        port,
    })
}

fn instance_name(fullname: &str) -> &str {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .and_then(|instance| instance.strip_suffix('.'))
        .unwrap_or(fullname)
}

/// Advertises one node until dropped, then withdraws the announcement.
pub struct Announcer {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Announcer {
    pub fn announce(
        name: &str,
        port: u16,
        charger_count: u32,
        inverter_count: u32,
    ) -> Result<Self> {
        let daemon =
            ServiceDaemon::new().map_err(|e| anyhow!("failed to create mDNS daemon: {}", e))?;
        let chargers = charger_count.to_string();
        let inverters = inverter_count.to_string();
        let properties = [
            ("chargers", chargers.as_str()),
            ("inverters", inverters.as_str()),
        ];
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            name,
            &format!("{}.local.", name),
            "",
            port,
            &properties[..],
        )
        .map_err(|e| anyhow!("failed to build service info for {}: {}", name, e))?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_owned();
        daemon
            .register(service)
            .map_err(|e| anyhow!("failed to register {}: {}", fullname, e))?;
        info!(service = %fullname, port, "announcing node over mDNS");
        Ok(Self { daemon, fullname })
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        let _ = self.daemon.unregister(&self.fullname);
        let _ = self.daemon.shutdown();
    }
}

/// Browse for node announcements and roster each complete one. Runs for
/// the life of the daemon. Departures are logged but never remove a
/// node; absence from the airwaves does not mean the node is gone.
pub async fn browse(fleet: Arc<Fleet>, rpc_timeout: Duration) -> Result<()> {
    let daemon =
        ServiceDaemon::new().map_err(|e| anyhow!("failed to create mDNS daemon: {}", e))?;
    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| anyhow!("failed to browse {}: {}", SERVICE_TYPE, e))?;
    info!(service = SERVICE_TYPE, "browsing for nodes");

    while let Ok(event) = receiver.recv_async().await {
        match event {
            ServiceEvent::ServiceResolved(service) => match candidate_from(&service) {
                Some(candidate) => {
                    match RemoteNode::new(
                        &candidate.name,
                        &candidate.host,
                        candidate.port,
                        rpc_timeout,
                    ) {
                        Ok(node) => {
                            if fleet.register(Arc::new(node)).await {
                                info!(
                                    node = %candidate.name,
                                    host = %candidate.host,
                                    port = candidate.port,
                                    "discovered node"
                                );
                            } else {
                                debug!(node = %candidate.name, "node already rostered");
                            }
                        }
                        Err(error) => {
                            warn!(node = %candidate.name, error = %error, "failed to build node handle");
                        }
                    }
                }
                None => {
                    warn!(
                        service = service.get_fullname(),
                        "incomplete announcement ignored"
                    );
                }
            },
            ServiceEvent::ServiceRemoved(_, fullname) => {
                info!(service = %fullname, "node announcement withdrawn, roster unchanged");
            }
            ServiceEvent::SearchStarted(_) => debug!("mdns search started"),
            other => debug!(event = ?other, "mdns event ignored"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(name: &str, ip: &str, port: u16) -> ServiceInfo {
        let no_props: &[(&str, &str)] = &[];
        ServiceInfo::new(
            SERVICE_TYPE,
            name,
            &format!("{}.local.", name),
            ip,
            port,
            no_props,
        )
        .unwrap()
    }

    #[test]
    fn complete_triple_is_accepted() {
        let candidate = candidate_from(&resolved("shed", "192.168.1.40", 9100)).unwrap();
        assert_eq!(
            candidate,
            Candidate {
                name: "shed".into(),
                host: "192.168.1.40".into(),
                port: 9100,
            }
        );
    }

    #[test]
    fn missing_address_is_rejected() {
        assert!(candidate_from(&resolved("shed", "", 9100)).is_none());
    }

    #[test]
    fn zero_port_is_rejected() {
        assert!(candidate_from(&resolved("shed", "192.168.1.40", 0)).is_none());
    }

    #[test]
    fn instance_name_strips_the_service_suffix() {
        assert_eq!(instance_name("shed._ubattery._tcp.local."), "shed");
        assert_eq!(
            instance_name("garage.attic._ubattery._tcp.local."),
            "garage.attic"
        );
        assert_eq!(instance_name("unrelated"), "unrelated");
    }
}
