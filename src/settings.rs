// ⚙️ Pipeline settings - TOML file, every field defaulted
//
// An absent file is not an error: `Settings::default()` describes the
// standard directory layout.

use crate::analytics::{AnalysisParams, AnalysisStores};
use crate::error::{Error, Result};
use crate::stats::UnitExpectations;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where store files live
    pub database_dir: PathBuf,
    /// Root of `csv_raw/` and `md_raw/`
    pub raw_data_dir: PathBuf,
    pub export_dir: PathBuf,
    /// Table config (`database_name, table_name, header, header_data_type, foreign_key`)
    pub schema_config: PathBuf,
    /// `abbreviation, definition, type` CSV for the master store
    pub reference_data: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
    pub stores: StoreNames,
    pub analysis: AnalysisParams,
    pub identity: IdentitySettings,
    pub units: UnitExpectations,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_dir: PathBuf::from("data/db"),
            raw_data_dir: PathBuf::from("data/raw"),
            export_dir: PathBuf::from("data/export"),
            schema_config: PathBuf::from("config/db_table_config.csv"),
            reference_data: PathBuf::from("config/reference_data.csv"),
            log_filter: "info".to_string(),
            stores: StoreNames::default(),
            analysis: AnalysisParams::default(),
            identity: IdentitySettings::default(),
            units: UnitExpectations::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreNames {
    pub master: String,
    pub raw: String,
    pub static_analyses: String,
    pub dynamic_analyses: String,
}

impl Default for StoreNames {
    fn default() -> Self {
        StoreNames {
            master: "master".to_string(),
            raw: "raw_data".to_string(),
            static_analyses: "static_analyses".to_string(),
            dynamic_analyses: "dynamic_analyses".to_string(),
        }
    }
}

impl StoreNames {
    pub fn analysis_stores(&self) -> AnalysisStores {
        AnalysisStores {
            raw: self.raw.clone(),
            static_analyses: self.static_analyses.clone(),
            dynamic_analyses: self.dynamic_analyses.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Channel code of multi-variant packs
    pub combo_channel: String,
    /// Variants per combo pack
    pub combo_variants: usize,
    /// Fixed seed → reproducible ids
    pub seed: Option<String>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        IdentitySettings {
            combo_channel: "CCO".to_string(),
            combo_variants: 3,
            seed: None,
        }
    }
}

impl Settings {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity.combo_variants == 0 {
            return Err(Error::Config("identity.combo_variants must be at least 1".into()));
        }
        if self.units.default == 0 {
            return Err(Error::Config("units.default must be at least 1".into()));
        }
        if self.analysis.empty_volume_divisor <= 0.0 {
            return Err(Error::Config("analysis.empty_volume_divisor must be positive".into()));
        }
        Ok(())
    }
}
