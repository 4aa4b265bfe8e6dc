//! Configuration management

use anyhow::{Context, Result};
use chrono_tz::Tz;

use crate::defaults::{
    DEFAULT_AVERAGE_SPEED_KMH, DEFAULT_DWELL_MINUTES, DEFAULT_ROUTING_TIMEOUT_SECONDS,
    DEFAULT_SITE_CACHE_TTL_SECONDS,
};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Valhalla routing engine URL (optional, straight-line estimates without it)
    pub valhalla_url: Option<String>,

    /// Routing request timeout
    pub routing_timeout_seconds: u64,

    /// Dwell time for stops added without an explicit value
    pub default_dwell_minutes: u32,

    /// Average speed for straight-line estimates
    pub fallback_speed_kmh: f64,

    /// Time-to-live of cached site lookups
    pub site_cache_ttl_seconds: u64,

    /// Local time zone of the routed region. Valhalla reads departure
    /// times as local wall-clock time.
    pub routing_timezone: Tz,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            valhalla_url: None,
            routing_timeout_seconds: DEFAULT_ROUTING_TIMEOUT_SECONDS,
            default_dwell_minutes: DEFAULT_DWELL_MINUTES,
            fallback_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            site_cache_ttl_seconds: DEFAULT_SITE_CACHE_TTL_SECONDS,
            routing_timezone: Tz::UTC,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let valhalla_url = lookup("VALHALLA_URL").filter(|url| !url.trim().is_empty());

        let routing_timeout_seconds =
            parse_or(&lookup, "ROUTING_TIMEOUT_SECONDS", defaults.routing_timeout_seconds)?;
        let default_dwell_minutes =
            parse_or(&lookup, "DEFAULT_DWELL_MINUTES", defaults.default_dwell_minutes)?;
        let fallback_speed_kmh =
            parse_or(&lookup, "FALLBACK_SPEED_KMH", defaults.fallback_speed_kmh)?;
        let site_cache_ttl_seconds =
            parse_or(&lookup, "SITE_CACHE_TTL_SECONDS", defaults.site_cache_ttl_seconds)?;

        let routing_timezone = match lookup("ROUTING_TIMEZONE") {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<Tz>()
                .map_err(|e| {
                    anyhow::anyhow!("ROUTING_TIMEZONE has an invalid value: {:?} ({})", raw, e)
                })?,
            _ => defaults.routing_timezone,
        };

        if fallback_speed_kmh <= 0.0 {
            anyhow::bail!("FALLBACK_SPEED_KMH must be positive (got {})", fallback_speed_kmh);
        }

        Ok(Self {
            valhalla_url,
            routing_timeout_seconds,
            default_dwell_minutes,
            fallback_speed_kmh,
            site_cache_ttl_seconds,
            routing_timezone,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults_when_nothing_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert!(config.valhalla_url.is_none());
        assert_eq!(config.routing_timeout_seconds, 30);
        assert_eq!(config.default_dwell_minutes, 5);
        assert_eq!(config.site_cache_ttl_seconds, 300);
        assert!((config.fallback_speed_kmh - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_routing_timezone() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.routing_timezone, Tz::UTC);

        let config =
            Config::from_lookup(lookup_from(&[("ROUTING_TIMEZONE", "Europe/Paris")])).unwrap();
        assert_eq!(config.routing_timezone, chrono_tz::Europe::Paris);

        assert!(Config::from_lookup(lookup_from(&[("ROUTING_TIMEZONE", "Mars/Olympus")])).is_err());
    }

    #[test]
    fn test_config_valhalla_url_some_when_set() {
        let config =
            Config::from_lookup(lookup_from(&[("VALHALLA_URL", "http://localhost:8002")])).unwrap();
        assert_eq!(config.valhalla_url, Some("http://localhost:8002".to_string()));
    }

    #[test]
    fn test_config_blank_valhalla_url_is_none() {
        let config = Config::from_lookup(lookup_from(&[("VALHALLA_URL", "  ")])).unwrap();
        assert!(config.valhalla_url.is_none());
    }

    #[test]
    fn test_config_parses_numbers() {
        let config = Config::from_lookup(lookup_from(&[
            ("DEFAULT_DWELL_MINUTES", "12"),
            ("FALLBACK_SPEED_KMH", "35.5"),
            ("SITE_CACHE_TTL_SECONDS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.default_dwell_minutes, 12);
        assert!((config.fallback_speed_kmh - 35.5).abs() < f64::EPSILON);
        assert_eq!(config.site_cache_ttl_seconds, 60);
    }

    #[test]
    fn test_config_rejects_invalid_number() {
        let err =
            Config::from_lookup(lookup_from(&[("DEFAULT_DWELL_MINUTES", "five")])).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_DWELL_MINUTES"));
    }

    #[test]
    fn test_config_rejects_non_positive_speed() {
        assert!(Config::from_lookup(lookup_from(&[("FALLBACK_SPEED_KMH", "0")])).is_err());
    }
}
