//! Configuration for the commerce engine

use crate::domain::referral::TierSchedule;
use crate::error::{CommerceError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Data directory for RocksDB (only used with the `storage-rocksdb` feature)
    pub data_dir: Option<PathBuf>,

    /// Reservation configuration
    pub reservation: ReservationConfig,

    /// Deposit matching configuration
    pub deposits: DepositConfig,

    /// Referral configuration
    pub referral: ReferralConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "commerce-engine".to_string(),
            data_dir: None,
            reservation: ReservationConfig::default(),
            deposits: DepositConfig::default(),
            referral: ReferralConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Reservation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// How long a product stays held for one user (seconds)
    pub ttl_secs: u64,

    /// Expiry sweeper period (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

impl ReservationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Deposit matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepositConfig {
    /// Payment events with fewer confirmations are ignored
    pub min_confirmations: u32,

    /// Accepted relative deviation from an intent's expected amount
    pub amount_tolerance: Decimal,

    /// Pending intents older than this are expired by the sweeper (seconds)
    pub intent_ttl_secs: u64,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            min_confirmations: 3,
            amount_tolerance: dec!(0.05),
            intent_ttl_secs: 86_400,
        }
    }
}

impl DepositConfig {
    pub fn intent_ttl(&self) -> Duration {
        Duration::from_secs(self.intent_ttl_secs)
    }
}

/// Referral configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    /// Fraction of a referred deposit credited to the referrer
    pub commission_rate: Decimal,

    /// Ascending earnings thresholds mapped to tier labels
    pub tiers: TierSchedule,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            commission_rate: dec!(0.03),
            tiers: TierSchedule::default(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Row lock wait limit (milliseconds)
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CommerceError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlays `COMMERCE_*` variables resolved through `lookup` on the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(name) = lookup("COMMERCE_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(dir) = lookup("COMMERCE_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = lookup("COMMERCE_RESERVATION_TTL_SECS") {
            config.reservation.ttl_secs = parse_var("COMMERCE_RESERVATION_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("COMMERCE_SWEEP_INTERVAL_SECS") {
            config.reservation.sweep_interval_secs =
                parse_var("COMMERCE_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("COMMERCE_MIN_CONFIRMATIONS") {
            config.deposits.min_confirmations = parse_var("COMMERCE_MIN_CONFIRMATIONS", &v)?;
        }
        if let Some(v) = lookup("COMMERCE_AMOUNT_TOLERANCE") {
            config.deposits.amount_tolerance = parse_var("COMMERCE_AMOUNT_TOLERANCE", &v)?;
        }
        if let Some(v) = lookup("COMMERCE_INTENT_TTL_SECS") {
            config.deposits.intent_ttl_secs = parse_var("COMMERCE_INTENT_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("COMMERCE_COMMISSION_RATE") {
            config.referral.commission_rate = parse_var("COMMERCE_COMMISSION_RATE", &v)?;
        }
        if let Some(v) = lookup("COMMERCE_LOCK_TIMEOUT_MS") {
            config.storage.lock_timeout_ms = parse_var("COMMERCE_LOCK_TIMEOUT_MS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let rate = self.referral.commission_rate;
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(CommerceError::Config(format!(
                "referral.commission_rate must be within [0, 1], got {rate}"
            )));
        }
        if self.deposits.amount_tolerance < Decimal::ZERO {
            return Err(CommerceError::Config(format!(
                "deposits.amount_tolerance must not be negative, got {}",
                self.deposits.amount_tolerance
            )));
        }
        for (name, value) in [
            ("reservation.ttl_secs", self.reservation.ttl_secs),
            (
                "reservation.sweep_interval_secs",
                self.reservation.sweep_interval_secs,
            ),
            ("deposits.intent_ttl_secs", self.deposits.intent_ttl_secs),
            ("storage.lock_timeout_ms", self.storage.lock_timeout_ms),
        ] {
            if value == 0 {
                return Err(CommerceError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CommerceError::Config(format!("Invalid value for {key}: {e}")))
}
