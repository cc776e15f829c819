use std::env;
use std::path::{Path, PathBuf};

use crate::model::DEFAULT_CURRENCY;
use crate::validation::validate_currency;

pub const DATA_DIR_ENV: &str = "HEARTHLEDGER_DATA_DIR";
pub const LOG_ENV: &str = "HEARTHLEDGER_LOG";
pub const DEFAULT_CURRENCY_ENV: &str = "HEARTHLEDGER_DEFAULT_CURRENCY";
pub const BACKUP_BEFORE_REPLACE_ENV: &str = "HEARTHLEDGER_BACKUP_BEFORE_REPLACE";

pub const DEFAULT_LOG_FILTER: &str = "hearthledger=info,sqlx=warn";
const APP_DIR_NAME: &str = "hearthledger";
const DB_FILE_NAME: &str = "hearthledger.sqlite3";

/// Everything the ledger needs to know about its surroundings. Built once at
/// startup and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub log_filter: String,
    pub default_currency: String,
    pub backup_before_replace: bool,
}

impl LedgerConfig {
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup(DATA_DIR_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let log_filter = lookup(LOG_ENV)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let default_currency = lookup(DEFAULT_CURRENCY_ENV)
            .map(|value| value.trim().to_ascii_uppercase())
            .filter(|value| validate_currency(value).is_ok())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let backup_before_replace = lookup(BACKUP_BEFORE_REPLACE_ENV)
            .map(|value| !matches!(value.trim(), "0" | "false" | "FALSE" | "no" | "NO"))
            .unwrap_or(true);

        Self {
            data_dir,
            log_filter,
            default_currency,
            backup_before_replace,
        }
    }

    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::load_from(|_| None)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(env::temp_dir)
        .join(APP_DIR_NAME)
}
