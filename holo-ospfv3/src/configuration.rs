//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::Ipv6Network;
use serde::{Deserialize, Serialize};

use crate::area::AreaType;
use crate::error::ConfigError;
use crate::interface::InterfaceType;
use crate::lsdb::{LSA_INFINITY, MAX_LINK_METRIC};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct InstanceCfg {
    pub router_id: Ipv4Addr,
    pub instance_id: u8,
    pub stub_router: bool,
    pub areas: Vec<AreaCfg>,
    pub interfaces: BTreeMap<String, InterfaceCfg>,
    pub trace_opts: TraceOptions,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AreaCfg {
    pub area_id: Ipv4Addr,
    pub area_type: AreaType,
    // Cost of the default route advertised into stub areas.
    pub default_cost: u32,
    // Whether inter-area summaries are advertised into stub areas.
    pub summary: bool,
    // Address ranges used to summarize the area's intra-area routes.
    pub ranges: BTreeMap<Ipv6Network, RangeCfg>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RangeCfg {
    pub advertise: bool,
    // Fixed summary cost. Defaults to the largest cost of the covered routes.
    pub cost: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct InterfaceCfg {
    pub area_id: Ipv4Addr,
    pub if_type: InterfaceType,
    pub passive: bool,
    pub cost: u32,
    pub priority: u8,
    pub hello_interval: u16,
    pub dead_interval: u16,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub poll_interval: u16,
    pub ack_delay: u16,
    pub mtu_ignore: bool,
    pub static_nbrs: Vec<StaticNbrCfg>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticNbrCfg {
    pub addr: Ipv6Addr,
    pub priority: u8,
    pub poll_interval: u16,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceOptions {
    pub packets: TraceOptionPacket,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceOptionPacket {
    pub rx: bool,
    pub tx: bool,
}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    pub fn area(&self, area_id: Ipv4Addr) -> Option<&AreaCfg> {
        self.areas.iter().find(|area| area.area_id == area_id)
    }

    // Checks the configuration for values the protocol can't operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router_id.is_unspecified() {
            return Err(ConfigError::MissingRouterId);
        }

        let mut area_ids = BTreeSet::new();
        for area in &self.areas {
            if !area_ids.insert(area.area_id) {
                return Err(ConfigError::DuplicateArea(area.area_id));
            }
            area.validate()?;
        }

        for (name, iface) in &self.interfaces {
            self.validate_interface(name, iface)?;
        }

        Ok(())
    }

    pub fn validate_interface(
        &self,
        name: &str,
        iface: &InterfaceCfg,
    ) -> Result<(), ConfigError> {
        if self.area(iface.area_id).is_none() {
            return Err(ConfigError::UnknownArea(
                name.to_owned(),
                iface.area_id,
            ));
        }
        iface.validate(name)
    }
}

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            router_id: Ipv4Addr::UNSPECIFIED,
            instance_id: 0,
            stub_router: false,
            areas: Default::default(),
            interfaces: Default::default(),
            trace_opts: Default::default(),
        }
    }
}

// ===== impl AreaCfg =====

impl AreaCfg {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.default_cost >= LSA_INFINITY {
            return Err(ConfigError::InvalidDefaultCost(
                self.area_id,
                self.default_cost,
            ));
        }

        for (prefix, range) in &self.ranges {
            if let Some(cost) = range.cost
                && cost >= LSA_INFINITY
            {
                return Err(ConfigError::InvalidRangeCost(
                    self.area_id,
                    *prefix,
                    cost,
                ));
            }

            // Nested ranges must agree on whether they're advertised.
            if let Some((other, _)) =
                self.ranges.iter().find(|(other, other_range)| {
                    *other != prefix
                        && other.is_supernet_of(*prefix)
                        && other_range.advertise != range.advertise
                })
            {
                return Err(ConfigError::InconsistentRange(
                    self.area_id,
                    *other,
                    *prefix,
                ));
            }
        }

        Ok(())
    }
}

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            area_type: AreaType::Normal,
            default_cost: 1,
            summary: true,
            ranges: Default::default(),
        }
    }
}

// ===== impl RangeCfg =====

impl Default for RangeCfg {
    fn default() -> RangeCfg {
        RangeCfg {
            advertise: true,
            cost: None,
        }
    }
}

// ===== impl InterfaceCfg =====

impl InterfaceCfg {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.hello_interval == 0 {
            return Err(ConfigError::InvalidHelloInterval(
                name.to_owned(),
                self.hello_interval,
            ));
        }
        if self.dead_interval <= self.hello_interval {
            return Err(ConfigError::InvalidDeadInterval(
                name.to_owned(),
                self.dead_interval,
            ));
        }
        if self.retransmit_interval == 0 {
            return Err(ConfigError::InvalidRetransmitInterval(
                name.to_owned(),
                self.retransmit_interval,
            ));
        }
        if self.cost == 0 || self.cost > MAX_LINK_METRIC as u32 {
            return Err(ConfigError::InvalidCost(name.to_owned(), self.cost));
        }
        Ok(())
    }

    // Interface output cost, as advertised in the Router-LSA.
    pub(crate) fn metric(&self) -> u16 {
        self.cost.min(MAX_LINK_METRIC as u32) as u16
    }
}

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            if_type: InterfaceType::Broadcast,
            passive: false,
            cost: 10,
            priority: 1,
            hello_interval: 10,
            dead_interval: 40,
            retransmit_interval: 5,
            transmit_delay: 1,
            poll_interval: 120,
            ack_delay: 1,
            mtu_ignore: false,
            static_nbrs: Default::default(),
        }
    }
}

// ===== impl StaticNbrCfg =====

impl Default for StaticNbrCfg {
    fn default() -> StaticNbrCfg {
        StaticNbrCfg {
            addr: Ipv6Addr::UNSPECIFIED,
            priority: 1,
            poll_interval: 120,
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InstanceCfg {
        serde_json::from_str(
            r#"{
                "router_id": "1.1.1.1",
                "areas": [{ "area_id": "0.0.0.0" }],
                "interfaces": {
                    "eth0": { "area_id": "0.0.0.0" }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn json_defaults() {
        let config = config();
        assert!(config.validate().is_ok());
        let iface = &config.interfaces["eth0"];
        assert_eq!(iface.hello_interval, 10);
        assert_eq!(iface.dead_interval, 40);
        assert_eq!(iface.retransmit_interval, 5);
        assert_eq!(iface.transmit_delay, 1);
        assert_eq!(iface.priority, 1);
        assert_eq!(iface.cost, 10);
        assert_eq!(iface.poll_interval, 120);
        assert_eq!(iface.if_type, InterfaceType::Broadcast);
        assert!(config.areas[0].summary);
    }

    #[test]
    fn invalid_timers() {
        let mut config = config();
        if let Some(iface) = config.interfaces.get_mut("eth0") {
            iface.dead_interval = iface.hello_interval;
        }
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidDeadInterval("eth0".to_owned(), 10))
        );

        let mut config = self::config();
        if let Some(iface) = config.interfaces.get_mut("eth0") {
            iface.hello_interval = 0;
        }
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHelloInterval("eth0".to_owned(), 0))
        );
    }

    #[test]
    fn invalid_cost() {
        let mut config = config();
        if let Some(iface) = config.interfaces.get_mut("eth0") {
            iface.cost = 0x10000;
        }
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidCost("eth0".to_owned(), 0x10000))
        );
    }

    #[test]
    fn unknown_and_duplicate_areas() {
        let mut config = config();
        if let Some(iface) = config.interfaces.get_mut("eth0") {
            iface.area_id = Ipv4Addr::new(0, 0, 0, 1);
        }
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownArea(
                "eth0".to_owned(),
                Ipv4Addr::new(0, 0, 0, 1)
            ))
        );

        let mut config = self::config();
        config.areas.push(AreaCfg::default());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateArea(Ipv4Addr::UNSPECIFIED))
        );
    }

    #[test]
    fn area_ranges() {
        let config: InstanceCfg = serde_json::from_str(
            r#"{
                "router_id": "1.1.1.1",
                "areas": [{
                    "area_id": "0.0.0.1",
                    "ranges": {
                        "2001:db8:1::/48": {},
                        "2001:db8:1:1::/64": { "cost": 30 }
                    }
                }]
            }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        let ranges = &config.areas[0].ranges;
        let prefix: Ipv6Network = "2001:db8:1::/48".parse().unwrap();
        assert!(ranges[&prefix].advertise);
        assert_eq!(ranges[&prefix].cost, None);

        // Nested ranges with conflicting advertise settings.
        let mut config = config;
        let inner: Ipv6Network = "2001:db8:1:1::/64".parse().unwrap();
        if let Some(range) = config.areas[0].ranges.get_mut(&inner) {
            range.advertise = false;
        }
        assert_eq!(
            config.validate(),
            Err(ConfigError::InconsistentRange(
                Ipv4Addr::new(0, 0, 0, 1),
                prefix,
                inner
            ))
        );

        // Range cost out of range.
        let mut config = config;
        config.areas[0].ranges.remove(&inner);
        if let Some(range) = config.areas[0].ranges.get_mut(&prefix) {
            range.cost = Some(LSA_INFINITY);
        }
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRangeCost(
                Ipv4Addr::new(0, 0, 0, 1),
                prefix,
                LSA_INFINITY
            ))
        );
    }
}
