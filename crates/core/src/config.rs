//! Kernel build configuration and the protection settings derived from it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{DEFAULT_KEY_REGISTER, DEFAULT_MASK_REGISTER, REG_FP};

pub const CONFIG_JOPP: &str = "CONFIG_RKP_CFP_JOPP";
pub const CONFIG_ROPP: &str = "CONFIG_RKP_CFP_ROPP";
pub const CONFIG_JOPP_MAGIC: &str = "CONFIG_RKP_CFP_JOPP_MAGIC";

/// Errors reading the kernel configuration or the skip policy.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },

    #[error("{name} must be set when {requires} is enabled")]
    Missing { name: String, requires: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// `NAME=value` pairs of a kernel `.config`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelConfig {
    values: BTreeMap<String, String>,
}

impl KernelConfig {
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim_start();
            let Some((name, rest)) = line.split_once('=') else {
                continue;
            };
            if name.is_empty()
                || !name.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
            {
                continue;
            }
            let value = rest.split(|c: char| c.is_whitespace() || c == '#').next().unwrap_or("");
            if !value.is_empty() {
                values.insert(name.to_string(), value.to_string());
            }
        }
        Self { values }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Only `=y` counts as enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name) == Some("y")
    }
}

/// Which passes run and with which registers and marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionConfig {
    pub ropp: bool,
    pub jopp: bool,
    pub jopp_magic: Option<u32>,
    pub mask_register: u8,
    pub key_register: u8,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            ropp: false,
            jopp: false,
            jopp_magic: None,
            mask_register: DEFAULT_MASK_REGISTER,
            key_register: DEFAULT_KEY_REGISTER,
        }
    }
}

impl ProtectionConfig {
    pub fn from_kernel(config: &KernelConfig) -> Result<Self, ConfigError> {
        let jopp = config.is_enabled(CONFIG_JOPP);
        let jopp_magic = match config.get(CONFIG_JOPP_MAGIC) {
            Some(raw) => Some(parse_magic(raw)?),
            None => None,
        };
        if jopp && jopp_magic.is_none() {
            return Err(ConfigError::Missing {
                name: CONFIG_JOPP_MAGIC.to_string(),
                requires: CONFIG_JOPP.to_string(),
            });
        }
        Ok(Self { ropp: config.is_enabled(CONFIG_ROPP), jopp, jopp_magic, ..Self::default() })
    }

    /// Override the scratch registers.
    pub fn with_registers(mut self, mask: u8, key: u8) -> Result<Self, ConfigError> {
        for (name, reg) in [("mask register", mask), ("key register", key)] {
            if reg >= REG_FP {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    value: format!("x{reg}"),
                });
            }
        }
        if mask == key {
            return Err(ConfigError::InvalidValue {
                name: "key register".to_string(),
                value: format!("x{key} (same as mask register)"),
            });
        }
        self.mask_register = mask;
        self.key_register = key;
        Ok(self)
    }

    /// The landing-pad word; only meaningful with JOPP on.
    pub fn magic(&self) -> Option<u32> {
        if self.jopp {
            self.jopp_magic
        } else {
            None
        }
    }
}

fn parse_magic(raw: &str) -> Result<u32, ConfigError> {
    let trimmed = raw.trim_matches('"');
    let digits = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")).unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidValue {
        name: CONFIG_JOPP_MAGIC.to_string(),
        value: raw.to_string(),
    })
}
