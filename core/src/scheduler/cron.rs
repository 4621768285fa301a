//! Minimal cron-subset parser (spec §4.5 ambient addition). Only
//! `@every <dur>`, `@hourly`, and `@daily` are supported; anything else is
//! a `CronError`. A documented simplification relative to a full cron
//! grammar (see DESIGN.md).

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unsupported cron expression {0:?}: expected @hourly, @daily, or @every <duration>")]
pub struct CronError(pub String);

/// Parses a schedule expression into a fixed period.
pub fn parse_cron(expr: &str) -> Result<Duration, CronError> {
    match expr.trim() {
        "@hourly" => Ok(Duration::from_secs(3600)),
        "@daily" => Ok(Duration::from_secs(86_400)),
        other if other.starts_with("@every ") => {
            parse_duration(other.trim_start_matches("@every ").trim())
                .ok_or_else(|| CronError(expr.to_string()))
        }
        _ => Err(CronError(expr.to_string())),
    }
}

/// Parses a Go-style duration literal: a number followed by `s`, `m`, or `h`.
fn parse_duration(s: &str) -> Option<Duration> {
    let unit = s.chars().last()?;
    let (value, multiplier) = match unit {
        's' => (&s[..s.len() - 1], 1u64),
        'm' => (&s[..s.len() - 1], 60u64),
        'h' => (&s[..s.len() - 1], 3600u64),
        _ => return None,
    };
    let n: u64 = value.parse().ok()?;
    if n == 0 {
        return None;
    }
    Some(Duration::from_secs(n * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_and_daily_resolve() {
        assert_eq!(parse_cron("@hourly").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_cron("@daily").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn every_expression_resolves() {
        assert_eq!(parse_cron("@every 5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_cron("@every 30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn unsupported_expression_errors() {
        assert!(parse_cron("0 */5 * * * *").is_err());
        assert!(parse_cron("@every 0m").is_err());
    }
}
