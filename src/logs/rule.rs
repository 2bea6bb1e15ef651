use std::time::Duration;

use crate::config::LogEventConfig;
use crate::pattern::Pattern;

/// A compiled log event rule
#[derive(Debug, Clone)]
pub struct LogEventRule {
    pub pattern: Pattern,
    /// Matches inside the window needed to raise the alert, at least 1
    pub threshold: usize,
    /// Zero means every match fires and there is no "off" state
    pub window: Duration,
    pub include_raw: bool,
    pub message_on: String,
    pub message_off: String,
    pub enabled: bool,
}

impl LogEventRule {
    /// Compile a configured rule. A threshold below one is treated as one.
    pub fn from_config(config: &LogEventConfig) -> Result<Self, RuleError> {
        let pattern = Pattern::new(&config.pattern, config.is_regex).map_err(|source| {
            RuleError::InvalidPattern {
                pattern: config.pattern.clone(),
                source,
            }
        })?;

        let window_secs = config
            .window
            .checked_mul(60)
            .ok_or(RuleError::WindowTooLarge(config.window))?;

        Ok(Self {
            pattern,
            threshold: config.threshold.max(1) as usize,
            window: Duration::from_secs(window_secs),
            include_raw: config.include_raw,
            message_on: config.message_on.clone(),
            message_off: config.message_off.clone(),
            enabled: config.enabled,
        })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    pub fn is_windowed(&self) -> bool {
        !self.window.is_zero()
    }

    /// Name used in logs and status listings
    pub fn label(&self) -> String {
        format!("LOGS: {}", self.pattern.as_str())
    }

    pub fn on_text(&self, raw: &str) -> String {
        if self.include_raw {
            format!("LOGS: {}: {}", self.message_on, raw)
        } else {
            format!("LOGS: {}", self.message_on)
        }
    }

    pub fn off_text(&self) -> String {
        format!("LOGS: {}", self.message_off)
    }
}

/// Log rule errors
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Failed to compile pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Window of {0} minutes is too large")]
    WindowTooLarge(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pattern: &str, is_regex: bool, threshold: i64, window: u64) -> LogEventConfig {
        LogEventConfig {
            enabled: true,
            pattern: pattern.to_string(),
            is_regex,
            message_on: "too many errors".to_string(),
            message_off: "errors stopped".to_string(),
            threshold,
            window,
            include_raw: false,
        }
    }

    #[test]
    fn test_threshold_normalized() {
        let rule = LogEventRule::from_config(&config("ERROR", false, 0, 5)).unwrap();
        assert_eq!(rule.threshold, 1);
        let rule = LogEventRule::from_config(&config("ERROR", false, -4, 5)).unwrap();
        assert_eq!(rule.threshold, 1);
    }

    #[test]
    fn test_window_in_minutes() {
        let rule = LogEventRule::from_config(&config("ERROR", false, 3, 5)).unwrap();
        assert_eq!(rule.window, Duration::from_secs(300));
        assert!(rule.is_windowed());
    }

    #[test]
    fn test_oversized_window_rejected() {
        let err = LogEventRule::from_config(&config("ERROR", false, 1, u64::MAX / 30)).unwrap_err();
        assert!(matches!(err, RuleError::WindowTooLarge(_)));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let err = LogEventRule::from_config(&config("([", true, 1, 0)).unwrap_err();
        assert!(err.to_string().contains("(["));
    }

    #[test]
    fn test_texts() {
        let mut rule = LogEventRule::from_config(&config("ERROR", false, 1, 0)).unwrap();
        assert_eq!(rule.on_text("ERROR x"), "LOGS: too many errors");
        rule.include_raw = true;
        assert_eq!(rule.on_text("ERROR x"), "LOGS: too many errors: ERROR x");
        assert_eq!(rule.off_text(), "LOGS: errors stopped");
    }
}
