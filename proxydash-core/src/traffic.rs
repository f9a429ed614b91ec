//! Traffic snapshot types (`GET /v1/traffic`)

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Byte counters and speeds for one network interface or policy connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorTraffic {
    /// Total bytes received.
    #[serde(rename = "in", default, deserialize_with = "lenient_u64")]
    pub in_bytes: u64,

    /// Total bytes sent.
    #[serde(rename = "out", default, deserialize_with = "lenient_u64")]
    pub out_bytes: u64,

    #[serde(default, deserialize_with = "lenient_u64")]
    pub in_current_speed: u64,

    #[serde(default, deserialize_with = "lenient_u64")]
    pub out_current_speed: u64,

    #[serde(default, deserialize_with = "lenient_u64")]
    pub in_max_speed: u64,

    #[serde(default, deserialize_with = "lenient_u64")]
    pub out_max_speed: u64,
}

impl ConnectorTraffic {
    pub fn total(&self) -> u64 {
        self.in_bytes.saturating_add(self.out_bytes)
    }
}

// The proxy reports counters as JSON numbers that are occasionally floats.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v as u64)
        .unwrap_or(0))
}

/// A named counter set, as displayed in traffic listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTraffic {
    pub name: String,
    pub traffic: ConnectorTraffic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Traffic {
    /// Proxy start time in unix seconds.
    #[serde(default)]
    pub start_time: f64,

    #[serde(default)]
    pub interface: BTreeMap<String, ConnectorTraffic>,

    #[serde(default)]
    pub connector: BTreeMap<String, ConnectorTraffic>,
}

impl Traffic {
    /// Interfaces in name order.
    pub fn sorted_interfaces(&self) -> Vec<NamedTraffic> {
        self.interface
            .iter()
            .map(|(name, traffic)| NamedTraffic {
                name: name.clone(),
                traffic: *traffic,
            })
            .collect()
    }

    /// Connectors with the most total traffic first. Equal totals keep name order.
    pub fn sorted_connectors(&self) -> Vec<NamedTraffic> {
        let mut connectors: Vec<NamedTraffic> = self
            .connector
            .iter()
            .map(|(name, traffic)| NamedTraffic {
                name: name.clone(),
                traffic: *traffic,
            })
            .collect();
        connectors.sort_by(|a, b| b.traffic.total().cmp(&a.traffic.total()));
        connectors
    }

    /// Time since the proxy started. Clock skew never yields a negative uptime,
    /// and a start time too far in the past saturates at `Duration::MAX`.
    pub fn uptime(&self, now_unix: f64) -> Duration {
        let secs = now_unix - self.start_time;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
