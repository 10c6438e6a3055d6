// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use libc::pid_t;

use crate::config::Config;
use crate::proctab;
use crate::Error;

/// Resolved description of one module of the deployment.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub name: String,
    /// Display label, also the process name matched in the process table
    pub app: String,
    pub bin: PathBuf,
    pub cfg: PathBuf,
    pub log_dir: PathBuf,
    pub log_path: PathBuf,
}

/// The module registry the start/stop/check sequencing is written against.
///
/// Rules:
/// - `modules()` is the canonical module list, its order IS the
///   prerequisite order
/// - running state is re-derived on every `pid()` call, never cached;
///   a spawned process is only observable through this lookup
pub trait Registry {
    /// Canonical module list in prerequisite order.
    fn modules(&self) -> &[ModuleSpec];

    /// Look up one module by name.
    fn module(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules().iter().find(|module| module.name == name)
    }

    /// Current pid of the module, if it is observable as running.
    fn pid(&self, name: &str) -> Option<pid_t>;

    fn is_running(&self, name: &str) -> bool {
        self.pid(name).is_some()
    }
}

/// Registry backed by the configuration file and the process table.
#[derive(Debug)]
pub struct StaticRegistry {
    modules: Vec<ModuleSpec>,
}

impl StaticRegistry {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config = Config::load(path)?;
        Ok(Self::from_config(&config))
    }

    pub fn from_config(config: &Config) -> Self {
        let modules = config
            .modules
            .iter()
            .map(|module| {
                let home = config.prefix.join(&module.name);
                let app = module.app.clone().unwrap_or_else(|| module.name.clone());
                let bin = module.bin.clone().unwrap_or_else(|| home.join("bin").join(&app));
                let cfg = module
                    .cfg
                    .clone()
                    .unwrap_or_else(|| home.join("config").join("cfg.json"));
                let log_dir = module.log_dir.clone().unwrap_or_else(|| home.join("logs"));
                let log_path = log_dir.join(format!("{}.log", module.name));

                ModuleSpec {
                    name: module.name.clone(),
                    app,
                    bin,
                    cfg,
                    log_dir,
                    log_path,
                }
            })
            .collect();

        Self { modules }
    }
}

impl Registry for StaticRegistry {
    fn modules(&self) -> &[ModuleSpec] {
        &self.modules
    }

    fn pid(&self, name: &str) -> Option<pid_t> {
        let module = self.module(name)?;
        proctab::pid_of(&module.app, &module.bin)
    }
}

/// Remove duplicate names, the first occurrence wins.
pub fn rm_dup(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Reorder the requested names into the registry's prerequisite order.
///
/// Names unknown to the registry are kept at the tail in their given order,
/// so that validation can report them instead of silently dropping them.
pub fn preq_order<R: Registry>(registry: &R, names: &[String]) -> Vec<String> {
    let requested: HashSet<&str> = names.iter().map(String::as_str).collect();

    let mut ordered: Vec<String> = registry
        .modules()
        .iter()
        .filter(|module| requested.contains(module.name.as_str()))
        .map(|module| module.name.clone())
        .collect();

    for name in names {
        if registry.module(name).is_none() {
            ordered.push(name.clone());
        }
    }

    ordered
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    enum PidState {
        /// Down for the given number of lookups, then running with the pid
        RunningAfter(usize, pid_t),
        /// Running with the pid for the given number of lookups, then down
        DownAfter(usize, pid_t),
    }

    /// In-memory registry so that sequencing is testable without spawning
    /// real module processes.
    pub(crate) struct FakeRegistry {
        modules: Vec<ModuleSpec>,
        pids: Mutex<HashMap<String, PidState>>,
    }

    impl FakeRegistry {
        pub(crate) fn new() -> Self {
            Self {
                modules: Vec::new(),
                pids: Mutex::new(HashMap::new()),
            }
        }

        pub(crate) fn add_module(&mut self, spec: ModuleSpec) {
            self.modules.push(spec);
        }

        /// Report the module as running right away.
        pub(crate) fn set_running(&self, name: &str, pid: pid_t) {
            self.run_after(name, 0, pid);
        }

        /// Report the module as running only after `lookups` pid lookups
        /// have observed it as down.
        pub(crate) fn run_after(&self, name: &str, lookups: usize, pid: pid_t) {
            self.pids
                .lock()
                .expect("pid table poisoned")
                .insert(name.to_string(), PidState::RunningAfter(lookups, pid));
        }

        /// Report the module as running for `lookups` pid lookups, down
        /// from then on.
        pub(crate) fn stop_after(&self, name: &str, lookups: usize, pid: pid_t) {
            self.pids
                .lock()
                .expect("pid table poisoned")
                .insert(name.to_string(), PidState::DownAfter(lookups, pid));
        }
    }

    impl Registry for FakeRegistry {
        fn modules(&self) -> &[ModuleSpec] {
            &self.modules
        }

        fn pid(&self, name: &str) -> Option<pid_t> {
            let mut pids = self.pids.lock().expect("pid table poisoned");
            match pids.get_mut(name) {
                Some(PidState::RunningAfter(0, pid)) => Some(*pid),
                Some(PidState::RunningAfter(lookups, _)) => {
                    *lookups -= 1;
                    None
                }
                Some(PidState::DownAfter(0, _)) => None,
                Some(PidState::DownAfter(lookups, pid)) => {
                    let pid = *pid;
                    *lookups -= 1;
                    Some(pid)
                }
                None => None,
            }
        }
    }

    /// Module whose binary and config don't exist; enough for lookups and
    /// validation failures.
    pub(crate) fn module_spec(name: &str) -> ModuleSpec {
        let home = PathBuf::from("/nonexistent").join(name);
        ModuleSpec {
            name: name.to_string(),
            app: format!("cinnabar-{}", name),
            bin: home.join("bin").join(format!("cinnabar-{}", name)),
            cfg: home.join("config").join("cfg.json"),
            log_dir: home.join("logs"),
            log_path: home.join("logs").join(format!("{}.log", name)),
        }
    }

    pub(crate) fn registry_of(names: &[&str]) -> FakeRegistry {
        let mut registry = FakeRegistry::new();
        for name in names {
            registry.add_module(module_spec(name));
        }
        registry
    }
}
