// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::Error;

/// Deployment description read from the configuration file.
///
/// Rules:
/// - `modules` is the canonical module list, in prerequisite order
/// - per-module paths default to the standard layout under `prefix`,
///   any of them can be overridden per module
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Root directory of the deployment, e.g. `/opt/cinnabar`
    pub prefix: PathBuf,
    /// Module entries in prerequisite order
    pub modules: Vec<ModuleConfig>,
}

/// One module entry of the configuration file.
///
/// The standard layout places a module named `agent` with app `cinnabar-agent` at:
///     `<prefix>/agent/bin/cinnabar-agent -c <prefix>/agent/config/cfg.json`
/// logging to `<prefix>/agent/logs/agent.log`.
#[derive(Debug, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    /// Display label, also the process name matched in the process table
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub bin: Option<PathBuf>,
    #[serde(default)]
    pub cfg: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;

        let config: Config = serde_json::from_str(&raw)?;
        debug!(
            "loaded {} modules from {}",
            config.modules.len(),
            path.display()
        );

        Ok(config)
    }
}
