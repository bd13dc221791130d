//! Local configuration for the binary: bind address, silence timeout, save
//! directory, pit-window threshold. Stored as JSON in the platform config
//! directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::PitwallError;

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "pitwall";

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:20777";
pub const DEFAULT_SILENCE_TIMEOUT_S: u64 = 30;
pub const DEFAULT_PIT_WEAR_THRESHOLD_PCT: f32 = 60.0;

#[derive(Serialize, Deserialize, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub silence_timeout_s: u64,
    pub save_directory: Option<PathBuf>,
    /// Wear percentage at which a corner is considered due for a pit stop
    pub pit_wear_threshold_pct: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            silence_timeout_s: DEFAULT_SILENCE_TIMEOUT_S,
            save_directory: None,
            pit_wear_threshold_pct: DEFAULT_PIT_WEAR_THRESHOLD_PCT,
        }
    }
}

impl AppConfig {
    pub fn from_local_file() -> Option<Self> {
        let config_path = dirs::config_dir()?.join(APP_DIR_NAME).join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let file = std::fs::File::open(config_path).expect("Could not open config file");
            Some(serde_json::from_reader(file).expect("Could not parse config file"))
        } else {
            None
        }
    }

    pub fn save(&self) -> Result<(), PitwallError> {
        let config_path = dirs::config_dir()
            .ok_or(PitwallError::NoConfigDir)?
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            std::fs::create_dir_all(config_path.parent().expect("config path has a parent"))
                .map_err(|e| PitwallError::ConfigIOError { source: e })?;
        }

        let file = std::fs::File::create(config_path)
            .map_err(|e| PitwallError::ConfigIOError { source: e })?;
        serde_json::to_writer(file, self)
            .map_err(|e| PitwallError::ConfigSerializeError { source: e })
    }

    /// Save directory from config, or the platform data directory.
    pub fn resolved_save_directory(&self) -> Option<PathBuf> {
        match &self.save_directory {
            Some(directory) => Some(directory.clone()),
            None => dirs::data_dir().map(|data| data.join(APP_DIR_NAME).join("sessions")),
        }
    }
}
