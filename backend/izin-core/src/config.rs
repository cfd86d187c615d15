// src/config.rs
use chrono::FixedOffset;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::firestore::{FirestoreConfig, DEFAULT_DATABASE, FIRESTORE_API_BASE_URL};
use crate::recorder::LedgerCollections;
use crate::roster::RosterKey;
use crate::validator::DEFAULT_CUTOFF_HOUR;

pub const ENV_PREFIX: &str = "IZIN_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Firestore,
    Memory,
}

/// Service configuration, read from `IZIN_*` environment variables (and a
/// `.env` file when present).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,

    // Submission policy
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default)]
    pub roster_key: RosterKey,
    pub roster_refresh_secs: Option<u64>,

    // Storage
    #[serde(default)]
    pub store_backend: StoreBackend,
    pub seed_path: Option<PathBuf>,
    #[serde(default = "default_students_collection")]
    pub students_collection: String,
    #[serde(default = "default_leave_collection")]
    pub leave_collection: String,
    #[serde(default = "default_attendance_collection")]
    pub attendance_collection: String,

    // Firestore
    pub firestore_project_id: Option<String>,
    #[serde(default = "default_firestore_database")]
    pub firestore_database: String,
    #[serde(default = "default_firestore_base_url")]
    pub firestore_base_url: String,
    pub firestore_api_key: Option<String>,
    pub firestore_access_token: Option<String>,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3000
}

fn default_cutoff_hour() -> u32 {
    DEFAULT_CUTOFF_HOUR
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_students_collection() -> String {
    "students".to_string()
}

fn default_leave_collection() -> String {
    "leaveLedger".to_string()
}

fn default_attendance_collection() -> String {
    "attendanceLedger".to_string()
}

fn default_firestore_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_firestore_base_url() -> String {
    FIRESTORE_API_BASE_URL.to_string()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Config = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cutoff_hour > 23 {
            return Err(ConfigError::Invalid {
                name: "CUTOFF_HOUR",
                message: format!("{} is not an hour of the day", self.cutoff_hour),
            });
        }
        self.utc_offset()?;
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ConfigError::Invalid {
                name: "CERT_PATH/KEY_PATH",
                message: "both or neither must be set".to_string(),
            });
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::Invalid {
                name: "UTC_OFFSET_HOURS",
                message: format!("{} is out of range", self.utc_offset_hours),
            })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server_host, self.server_port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "SERVER_HOST/SERVER_PORT",
                message: e.to_string(),
            })
    }

    pub fn ledger_collections(&self) -> LedgerCollections {
        LedgerCollections {
            leave: self.leave_collection.clone(),
            attendance: self.attendance_collection.clone(),
        }
    }

    pub fn firestore(&self) -> Result<FirestoreConfig, ConfigError> {
        let project_id = non_blank(&self.firestore_project_id)
            .ok_or(ConfigError::Missing("IZIN_FIRESTORE_PROJECT_ID"))?;
        Ok(FirestoreConfig {
            project_id,
            database: self.firestore_database.clone(),
            base_url: self.firestore_base_url.clone(),
            api_key: non_blank(&self.firestore_api_key),
            access_token: non_blank(&self.firestore_access_token),
        })
    }
}

/// `KEY=` in an env file reads as `Some("")`; treat it as unset.
fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
