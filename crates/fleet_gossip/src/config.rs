//! Gossip configuration and tuning params.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GossipError, GossipResult};
use crate::AgentId;

macro_rules! mk_tune {
    ($($(#[doc = $doc:expr])* $i:ident: $t:ty = $d:expr,)*) => {
        /// Gossip tuning parameters.
        /// Serialized as a flat map of strings so every value can be written
        /// in a config file as text. Unknown or unparsable keys are logged and
        /// skipped, leaving the default in place.
        #[non_exhaustive]
        #[derive(Clone, Debug, PartialEq)]
        pub struct GossipTuningParams {
            $(
                $(#[doc = $doc])*
                pub $i: $t,
            )*
        }

        impl Default for GossipTuningParams {
            fn default() -> Self {
                Self {
                    $(
                        $i: $d,
                    )*
                }
            }
        }

        impl serde::Serialize for GossipTuningParams {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                use serde::ser::SerializeMap;
                let mut m = serializer.serialize_map(None)?;
                $(
                    m.serialize_entry(
                        stringify!($i),
                        &format!("{}", &self.$i),
                    )?;
                )*
                m.end()
            }
        }

        impl<'de> serde::Deserialize<'de> for GossipTuningParams {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let result = <HashMap<String, serde_json::Value>>::deserialize(deserializer)?;
                let mut out = GossipTuningParams::default();
                for (k, v) in result.into_iter() {
                    let v = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    match k.as_str() {
                        $(
                            stringify!($i) => match v.parse::<$t>() {
                                Ok(v) => out.$i = v,
                                Err(e) => tracing::warn!("failed to parse {}: {}", k, e),
                            },
                        )*
                        _ => tracing::warn!("INVALID TUNING PARAM: '{}'", k),
                    }
                }
                Ok(out)
            }
        }
    };
}

mk_tune! {
    /// Maximum number of live items held per protocol instance.
    /// [Default: 10000]
    max_items: u32 = 10_000,

    /// How long a newly shared item lives. [Default: 24 hours]
    item_ttl_ms: u64 = 1000 * 60 * 60 * 24,

    /// Delay between epidemic gossip rounds. [Default: 5s]
    gossip_interval_ms: u64 = 5000,

    /// How many random peers receive each gossip round. [Default: 3]
    fanout: u32 = 3,

    /// Items below this priority are never selected for gossip.
    /// [Default: 0.3]
    min_share_priority: f64 = 0.3,

    /// Whether to gzip payloads above the threshold. [Default: true]
    enable_compression: bool = true,

    /// Payloads larger than this many bytes are candidates for
    /// compression. [Default: 1024]
    compression_threshold_bytes: u32 = 1024,

    /// Delay between anti-entropy rounds, for kinds that support them.
    /// [Default: 30s]
    anti_entropy_interval_ms: u64 = 30_000,

    /// Patterns with quality below this floor are refused at share time.
    /// [Default: 0.5]
    min_quality_to_share: f64 = 0.5,

    /// Largest canonical payload accepted from a peer. Items declaring
    /// more are rejected before decompression. [Default: 4 MiB]
    max_payload_bytes: u32 = 4 * 1024 * 1024,

    /// Upper bound on items sent in one gossip round. [Default: 10]
    max_items_per_round: u32 = 10,

    /// How long a single hand-off to a peer may take before it is
    /// counted as failed. [Default: 10s]
    send_timeout_ms: u64 = 10_000,

    /// Buffer of the event broadcast channel. Slow subscribers that
    /// fall further behind than this lose events. [Default: 256]
    event_channel_capacity: u32 = 256,
}

impl GossipTuningParams {
    /// Interval between gossip rounds.
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    /// Interval between anti-entropy rounds.
    pub fn anti_entropy_interval(&self) -> Duration {
        Duration::from_millis(self.anti_entropy_interval_ms)
    }

    /// Lifetime of a newly shared item.
    pub fn item_ttl(&self) -> Duration {
        Duration::from_millis(self.item_ttl_ms)
    }

    /// Timeout of one hand-off.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Reject values the protocol cannot run with.
    pub fn validate(&self) -> GossipResult<()> {
        fn non_zero(name: &str, v: u64) -> GossipResult<()> {
            if v == 0 {
                return Err(GossipError::config(format!("{} must be non-zero", name)));
            }
            Ok(())
        }
        fn unit(name: &str, v: f64) -> GossipResult<()> {
            if !(0.0..=1.0).contains(&v) {
                return Err(GossipError::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )));
            }
            Ok(())
        }

        non_zero("max_items", self.max_items as u64)?;
        non_zero("item_ttl_ms", self.item_ttl_ms)?;
        non_zero("gossip_interval_ms", self.gossip_interval_ms)?;
        non_zero("fanout", self.fanout as u64)?;
        non_zero("anti_entropy_interval_ms", self.anti_entropy_interval_ms)?;
        non_zero("max_items_per_round", self.max_items_per_round as u64)?;
        non_zero("send_timeout_ms", self.send_timeout_ms)?;
        non_zero("event_channel_capacity", self.event_channel_capacity as u64)?;
        non_zero("max_payload_bytes", self.max_payload_bytes as u64)?;
        unit("min_share_priority", self.min_share_priority)?;
        unit("min_quality_to_share", self.min_quality_to_share)?;
        Ok(())
    }
}

/// Configuration of one protocol instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipConfig {
    /// Identity of the local agent.
    pub agent_id: AgentId,

    /// Tuning params. Omitted keys take their defaults.
    #[serde(default)]
    pub tuning: GossipTuningParams,
}

impl GossipConfig {
    /// Config for `agent_id` with default tuning.
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            tuning: GossipTuningParams::default(),
        }
    }

    /// Replace the tuning params.
    pub fn with_tuning(mut self, tuning: GossipTuningParams) -> Self {
        self.tuning = tuning;
        self
    }

    /// Check the config is usable.
    pub fn validate(&self) -> GossipResult<()> {
        if self.agent_id.trim().is_empty() {
            return Err(GossipError::config("agent_id must not be empty"));
        }
        self.tuning.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn defaults() {
        let t = GossipTuningParams::default();
        assert_eq!(t.max_items, 10_000);
        assert_eq!(t.item_ttl(), Duration::from_secs(86_400));
        assert_eq!(t.gossip_interval(), Duration::from_secs(5));
        assert_eq!(t.anti_entropy_interval(), Duration::from_secs(30));
        assert_eq!(t.fanout, 3);
        assert_eq!(t.min_share_priority, 0.3);
        assert!(t.enable_compression);
        assert_eq!(t.compression_threshold_bytes, 1024);
        assert_eq!(t.min_quality_to_share, 0.5);
        assert_eq!(t.max_items_per_round, 10);
        assert_eq!(t.max_payload_bytes as usize, crate::codec::DEFAULT_MAX_PAYLOAD_BYTES);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn tuning_deserializes_strings_and_numbers() {
        let t: GossipTuningParams = serde_json::from_str(
            r#"{"fanout": 5, "min_share_priority": "0.1", "enable_compression": false, "bogus": 1, "max_items": "lots"}"#,
        )
        .unwrap();
        assert_eq!(t.fanout, 5);
        assert_eq!(t.min_share_priority, 0.1);
        assert!(!t.enable_compression);
        assert_eq!(t.max_items, 10_000);
    }

    #[test]
    fn tuning_serializes_as_strings() {
        let v = serde_json::to_value(GossipTuningParams::default()).unwrap();
        assert_eq!(v["fanout"], "3");
        let back: GossipTuningParams = serde_json::from_value(v).unwrap();
        assert_eq!(back, GossipTuningParams::default());
    }

    #[test]
    fn config_omitted_tuning_is_default() {
        let c: GossipConfig = serde_json::from_str(r#"{"agentId": "agent-1"}"#).unwrap();
        assert_eq!(c, GossipConfig::new("agent-1"));
    }

    #[test]
    fn empty_agent_id_is_rejected() {
        assert!(matches!(
            GossipConfig::new("  ").validate(),
            Err(GossipError::Config(_))
        ));
    }

    #[test_case(|t: &mut GossipTuningParams| t.fanout = 0 ; "zero fanout")]
    #[test_case(|t: &mut GossipTuningParams| t.max_items = 0 ; "zero max items")]
    #[test_case(|t: &mut GossipTuningParams| t.gossip_interval_ms = 0 ; "zero interval")]
    #[test_case(|t: &mut GossipTuningParams| t.max_items_per_round = 0 ; "zero per round")]
    #[test_case(|t: &mut GossipTuningParams| t.max_payload_bytes = 0 ; "zero payload bound")]
    #[test_case(|t: &mut GossipTuningParams| t.min_share_priority = 1.5 ; "priority floor above one")]
    #[test_case(|t: &mut GossipTuningParams| t.min_quality_to_share = -0.1 ; "negative quality floor")]
    #[test_case(|t: &mut GossipTuningParams| t.min_quality_to_share = f64::NAN ; "nan quality floor")]
    fn invalid_tuning_is_rejected(f: fn(&mut GossipTuningParams)) {
        let mut t = GossipTuningParams::default();
        f(&mut t);
        assert!(matches!(t.validate(), Err(GossipError::Config(_))));
    }
}
