use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: String,
    /// Hard cap on simulated cycles per run.
    pub timeout: u64,
    /// Host transactions the driver injects.
    pub num_requests: u64,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            timeout: 1_000_000,
            num_requests: 4096,
        }
    }
}
