use crate::basis::{BasisError, SplineSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Run-time settings for a scoring invocation, persisted as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SirenConfig {
    /// Spread per-gene and per-edge work over the rayon pool.
    pub parallel: bool,
    /// Network files number genes from 1.
    pub one_based_network: bool,
    /// Largest absolute difference `verify` accepts between computed and expected scores.
    pub tolerance: f64,
    /// Shape of the per-gene spline basis. The number of bins equals its degrees of freedom.
    pub spline: SplineSpec,
}

impl Default for SirenConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            one_based_network: true,
            tolerance: 1e-7,
            spline: SplineSpec::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid spline settings: {0}")]
    Invalid(#[from] BasisError),
    #[error("The verification tolerance must be finite and non-negative, got {0}.")]
    InvalidTolerance(f64),
}

impl SirenConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.spline.validate()?;
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.tolerance));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Saves the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates a configuration. Missing keys take their default values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        log::debug!("Loaded configuration from '{}': {config:?}", path.display());
        Ok(config)
    }
}
