use std::fmt;

use serde::{Deserialize, Serialize};

/// The time range a subscription covers: a sliding realtime window or a history window.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timewindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<RealtimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<HistoryWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeWindow {
    pub timewindow_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryWindow {
    pub timewindow_ms: u64,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default = "default_aggregation_type")]
    pub aggregation_type: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub kind: String,
    pub limit: u32,
    pub interval: u64,
}

fn default_aggregation_type() -> String {
    "NONE".to_string()
}

fn default_limit() -> u32 {
    100
}

impl Timewindow {
    /// One minute of realtime data.
    pub const DEFAULT_REALTIME_MS: u64 = 60_000;

    pub fn realtime(timewindow_ms: u64) -> Self {
        Self {
            realtime: Some(RealtimeWindow { timewindow_ms }),
            ..Self::default()
        }
    }

    pub fn history(timewindow_ms: u64, interval_ms: u64) -> Self {
        Self {
            history: Some(HistoryWindow {
                timewindow_ms,
                interval_ms,
                aggregation_type: default_aggregation_type(),
                limit: default_limit(),
            }),
            ..Self::default()
        }
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime.is_some()
    }

    pub fn is_history(&self) -> bool {
        self.history.is_some()
    }

    /// Window length; realtime wins when both are present.
    pub fn duration_ms(&self) -> u64 {
        if let Some(realtime) = &self.realtime {
            return realtime.timewindow_ms;
        }
        self.history.as_ref().map_or(0, |h| h.timewindow_ms)
    }

    pub fn interval_ms(&self) -> u64 {
        self.history.as_ref().map_or(0, |h| h.interval_ms)
    }
}

impl fmt::Display for Timewindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(realtime) = &self.realtime {
            return f.write_str(&format_duration(realtime.timewindow_ms));
        }
        if let Some(history) = &self.history {
            return write!(
                f,
                "{} ({} interval)",
                format_duration(history.timewindow_ms),
                format_duration(history.interval_ms)
            );
        }
        f.write_str("No timewindow")
    }
}

fn format_duration(ms: u64) -> String {
    const SECOND: u64 = 1_000;
    const MINUTE: u64 = 60 * SECOND;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let scaled = |unit: u64, suffix: &str| {
        let value = ms as f64 / unit as f64;
        if value.fract() == 0.0 {
            format!("{value:.0}{suffix}")
        } else {
            format!("{value}{suffix}")
        }
    };

    match ms {
        ms if ms < SECOND => format!("{ms}ms"),
        ms if ms < MINUTE => scaled(SECOND, "s"),
        ms if ms < HOUR => scaled(MINUTE, "m"),
        ms if ms < DAY => scaled(HOUR, "h"),
        _ => scaled(DAY, "d"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_prefers_realtime() {
        let mut tw = Timewindow::history(3_600_000, 60_000);
        assert_eq!(tw.duration_ms(), 3_600_000);
        assert_eq!(tw.interval_ms(), 60_000);
        tw.realtime = Some(RealtimeWindow {
            timewindow_ms: 5_000,
        });
        assert_eq!(tw.duration_ms(), 5_000);
    }

    #[test]
    fn display_formats_units() {
        assert_eq!(Timewindow::realtime(500).to_string(), "500ms");
        assert_eq!(Timewindow::realtime(90_000).to_string(), "1.5m");
        assert_eq!(
            Timewindow::history(2 * 86_400_000, 3_600_000).to_string(),
            "2d (1h interval)"
        );
        assert_eq!(Timewindow::default().to_string(), "No timewindow");
    }
}
