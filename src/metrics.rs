//! # Pipeline Report
//!
//! Snapshot of everything observable about a pipeline run, serialisable to
//! JSON for logs or monitoring. The dropped-block counter is the one number an
//! operator must watch: it is the only place overload becomes visible.

use crate::audio::session::SessionSummary;
use crate::audio::{FlushOutcome, HandoffStatsSnapshot};
use crate::consumer::ConsumerSummary;
use crate::error::AppResult;
use serde::Serialize;
use serde_json::json;

/// Counters kept by the producer thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProducerSummary {
    pub source: String,
    pub bursts: u64,
    pub samples_ingested: u64,
    pub blocks_emitted: u64,
    /// Periods where the producer woke up after its deadline
    pub deadline_misses: u64,
    /// Carry-over handling at teardown; `None` if the producer never finished
    pub flush: Option<FlushOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandoffSummary {
    #[serde(flatten)]
    pub counters: HandoffStatsSnapshot,
    pub drop_rate: f64,
    pub block_size: usize,
    pub channel_bound: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub service: ServiceInfo,
    pub session: SessionSummary,
    pub producer: ProducerSummary,
    pub handoff: HandoffSummary,
    pub consumer: ConsumerSummary,
    pub consume_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

impl HandoffSummary {
    pub fn new(counters: HandoffStatsSnapshot, block_size: usize, channel_bound: usize) -> Self {
        Self {
            drop_rate: counters.drop_rate(),
            counters,
            block_size,
            channel_bound,
        }
    }
}

impl PipelineReport {
    /// Load classification from the drop rate, mirroring a health check.
    pub fn status(&self) -> &'static str {
        let rate = self.handoff.drop_rate;
        if rate > 0.1 {
            "overloaded"
        } else if rate > 0.0 {
            "lossy"
        } else {
            "healthy"
        }
    }

    pub fn to_json(&self) -> AppResult<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("status".to_string(), json!(self.status()));
            map.insert("timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::PipelineSession;

    fn report(counters: HandoffStatsSnapshot) -> PipelineReport {
        PipelineReport {
            service: ServiceInfo::default(),
            session: PipelineSession::new().summary(),
            producer: ProducerSummary {
                source: "sine".to_string(),
                flush: Some(FlushOutcome::Discarded { samples: 3 }),
                ..Default::default()
            },
            handoff: HandoffSummary::new(counters, 4, 2),
            consumer: ConsumerSummary::default(),
            consume_errors: 0,
        }
    }

    #[test]
    fn test_status_from_drop_rate() {
        let healthy = report(HandoffStatsSnapshot {
            pushed: 10,
            delivered: 10,
            dropped: 0,
        });
        assert_eq!(healthy.status(), "healthy");

        let lossy = report(HandoffStatsSnapshot {
            pushed: 100,
            delivered: 99,
            dropped: 1,
        });
        assert_eq!(lossy.status(), "lossy");

        let overloaded = report(HandoffStatsSnapshot {
            pushed: 3,
            delivered: 2,
            dropped: 1,
        });
        assert_eq!(overloaded.status(), "overloaded");
    }

    #[test]
    fn test_report_json_shape() {
        let json = report(HandoffStatsSnapshot {
            pushed: 3,
            delivered: 2,
            dropped: 1,
        })
        .to_json()
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["handoff"]["dropped"], 1);
        assert_eq!(value["handoff"]["channel_bound"], 2);
        assert_eq!(value["producer"]["flush"]["outcome"], "discarded");
        assert_eq!(value["producer"]["flush"]["samples"], 3);
        assert_eq!(value["status"], "overloaded");
        assert!(value["timestamp"].is_string());
        // Same shape on every platform: nothing process-specific
        assert!(value.get("memory").is_none());
    }
}
