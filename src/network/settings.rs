//! Agent-facing network settings.
//!
//! These mappings are serialized verbatim into agent configuration, so the
//! field names and shapes below are a compatibility surface.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Settings a network can be authoritative for when a job has several networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultRole {
    Dns,
    Gateway,
}

impl DefaultRole {
    pub const ALL: [DefaultRole; 2] = [DefaultRole::Dns, DefaultRole::Gateway];
}

impl fmt::Display for DefaultRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultRole::Dns => f.write_str("dns"),
            DefaultRole::Gateway => f.write_str("gateway"),
        }
    }
}

/// Settings for one reservation, shaped by the kind of network it is on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworkSettings {
    Manual(ManualSettings),
    Dynamic(DynamicSettings),
    Vip(VipSettings),
}

/// `{ip, netmask, cloud_properties, gateway?, dns?, default}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualSettings {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub cloud_properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<Ipv4Addr>>,
    pub default: Vec<DefaultRole>,
}

/// `{type: "dynamic", cloud_properties, dns?, default}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicSettings {
    #[serde(rename = "type")]
    pub network_type: DynamicKind,
    pub cloud_properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Vec<Ipv4Addr>>,
    pub default: Vec<DefaultRole>,
}

/// `{type: "vip", ip, cloud_properties}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VipSettings {
    #[serde(rename = "type")]
    pub network_type: VipKind,
    pub ip: Ipv4Addr,
    pub cloud_properties: Map<String, Value>,
}

/// Serializes as the literal `"dynamic"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicKind {
    Dynamic,
}

/// Serializes as the literal `"vip"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VipKind {
    Vip,
}

impl NetworkSettings {
    /// The address the agent should configure, when the director knows it
    pub fn ip(&self) -> Option<Ipv4Addr> {
        match self {
            NetworkSettings::Manual(settings) => Some(settings.ip),
            NetworkSettings::Vip(settings) => Some(settings.ip),
            NetworkSettings::Dynamic(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manual_settings_shape() {
        let settings = NetworkSettings::Manual(ManualSettings {
            ip: Ipv4Addr::new(192, 168, 1, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            cloud_properties: Map::new(),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            dns: Some(vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]),
            default: vec![DefaultRole::Dns, DefaultRole::Gateway],
        });

        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            json!({
                "ip": "192.168.1.2",
                "netmask": "255.255.255.0",
                "cloud_properties": {},
                "gateway": "192.168.1.1",
                "dns": ["192.168.1.1", "192.168.1.2"],
                "default": ["dns", "gateway"]
            })
        );
    }

    #[test]
    fn test_dynamic_and_vip_settings_shape() {
        let dynamic = NetworkSettings::Dynamic(DynamicSettings {
            network_type: DynamicKind::Dynamic,
            cloud_properties: Map::new(),
            dns: None,
            default: vec![],
        });
        assert_eq!(
            serde_json::to_value(&dynamic).unwrap(),
            json!({"type": "dynamic", "cloud_properties": {}, "default": []})
        );

        let vip = NetworkSettings::Vip(VipSettings {
            network_type: VipKind::Vip,
            ip: Ipv4Addr::new(203, 0, 113, 5),
            cloud_properties: Map::new(),
        });
        assert_eq!(
            serde_json::to_value(&vip).unwrap(),
            json!({"type": "vip", "ip": "203.0.113.5", "cloud_properties": {}})
        );
        assert_eq!(vip.ip(), Some(Ipv4Addr::new(203, 0, 113, 5)));
    }
}
