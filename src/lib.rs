//! uBattery - a distributed run-level controller for home micro battery
//! fleets. One controller daemon samples the house meter, ramps a signed
//! run level, and drives any number of node daemons that each own a bank
//! of charger/inverter relays.

pub mod config;
pub mod controller;
pub mod discovery;
pub mod domain;
pub mod fleet;
pub mod hardware;
pub mod meter;
pub mod rpc;
pub mod telemetry;
