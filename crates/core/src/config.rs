use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub trader: TraderConfig,
    pub risk: RiskConfig,
    pub leverage: LeverageConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraderConfig {
    pub id: String,
    pub name: String,
    /// Balance the session started with; total P&L is measured against it.
    pub initial_balance: f64,
    /// Interval between decision cycles.
    #[serde(with = "duration_secs")]
    pub scan_interval: Duration,
    /// Coins to offer as candidates. Normalized to `XXXUSDT`.
    pub trading_coins: Vec<String>,
    pub taker_fee_rate: f64,
    pub cross_margin: bool,
    /// Trailing cycle count used for performance statistics.
    pub performance_window_cycles: usize,
    /// Pause between two executed decisions of the same batch.
    #[serde(with = "duration_millis")]
    pub execution_pause: Duration,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "perp-guard".to_string(),
            initial_balance: 1000.0,
            scan_interval: Duration::from_secs(3 * 60),
            trading_coins: vec!["BTC".to_string(), "ETH".to_string()],
            taker_fee_rate: 0.0004,
            cross_margin: true,
            performance_window_cycles: 100,
            execution_pause: Duration::from_secs(1),
        }
    }
}

/// Account-level and position-level risk limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Daily loss (percent of day-start equity) that pauses trading. Zero disables the check.
    pub max_daily_loss_pct: f64,
    /// Drawdown from the equity peak (percent) that pauses trading. Zero disables the check.
    pub max_drawdown_pct: f64,
    #[serde(with = "duration_secs")]
    pub pause_duration: Duration,
    /// Period of the position drawdown monitor.
    #[serde(with = "duration_secs")]
    pub monitor_interval: Duration,
    /// Positions must be at least this profitable (percent) before a reversal counts.
    pub monitor_min_profit_pct: f64,
    /// Retracement from the position's peak profit (percent) that counts as a breach.
    pub monitor_drawdown_pct: f64,
    /// Consecutive breaching checks required before an emergency close.
    pub breach_window: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 0.0,
            max_drawdown_pct: 0.0,
            pause_duration: Duration::from_secs(60 * 60),
            monitor_interval: Duration::from_secs(60),
            monitor_min_profit_pct: 5.0,
            monitor_drawdown_pct: 40.0,
            breach_window: 3,
        }
    }
}

impl RiskConfig {
    #[must_use]
    pub fn with_max_daily_loss_pct(mut self, pct: f64) -> Self {
        self.max_daily_loss_pct = pct;
        self
    }

    #[must_use]
    pub fn with_max_drawdown_pct(mut self, pct: f64) -> Self {
        self.max_drawdown_pct = pct;
        self
    }

    #[must_use]
    pub fn with_pause_duration(mut self, duration: Duration) -> Self {
        self.pause_duration = duration;
        self
    }

    #[must_use]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    #[must_use]
    pub fn with_breach_window(mut self, window: u32) -> Self {
        self.breach_window = window;
        self
    }
}

/// Leverage caps per symbol class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverageConfig {
    /// Cap for the reference majors (BTC and ETH).
    pub major: u32,
    pub altcoin: u32,
}

impl Default for LeverageConfig {
    fn default() -> Self {
        Self {
            major: 5,
            altcoin: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Extra strategy text appended to the system prompt.
    pub custom_prompt: String,
    /// Send only `custom_prompt` as the system prompt.
    pub override_base: bool,
}

/// Serializes a `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serializes a `Duration` as whole milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.risk.breach_window, 3);
        assert_eq!(config.risk.monitor_interval, Duration::from_secs(60));
        assert!((config.trader.taker_fee_rate - 0.0004).abs() < f64::EPSILON);
        assert!(config.risk.max_daily_loss_pct.abs() < f64::EPSILON);
    }

    #[test]
    fn test_risk_builder() {
        let risk = RiskConfig::default()
            .with_max_daily_loss_pct(5.0)
            .with_max_drawdown_pct(20.0)
            .with_pause_duration(Duration::from_secs(600));
        assert!((risk.max_daily_loss_pct - 5.0).abs() < f64::EPSILON);
        assert!((risk.max_drawdown_pct - 20.0).abs() < f64::EPSILON);
        assert_eq!(risk.pause_duration, Duration::from_secs(600));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"risk": {"max_drawdown_pct": 12.5, "pause_duration": 90}}"#)
                .unwrap();
        assert!((config.risk.max_drawdown_pct - 12.5).abs() < f64::EPSILON);
        assert_eq!(config.risk.pause_duration, Duration::from_secs(90));
        assert_eq!(config.leverage, LeverageConfig::default());
        assert_eq!(config.trader.execution_pause, Duration::from_secs(1));
    }
}
