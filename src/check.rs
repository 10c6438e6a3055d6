// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use clap::{App, Arg, ArgMatches, SubCommand};

use crate::error::ErrorKind;
use crate::registry::{rm_dup, Registry};
use crate::start::MODULE;
use crate::Error;

pub const NAME: &str = "check";

pub fn sub_command() -> App<'static, 'static> {
    SubCommand::with_name(NAME)
        .about("Report the running state of the configured modules")
        .arg(
            Arg::with_name(MODULE)
                .multiple(true)
                .help("modules to check, all of them when empty"),
        )
}

pub fn run<R: Registry>(registry: &R, args: &ArgMatches<'_>) -> Result<(), Error> {
    let names: Vec<String> = args
        .values_of(MODULE)
        .map(|values| values.map(String::from).collect())
        .unwrap_or_default();

    check_modules(registry, &names)
}

/// Print one line per module with its observed running state. A single
/// process-table observation per module, no polling.
pub fn check_modules<R: Registry>(registry: &R, names: &[String]) -> Result<(), Error> {
    let mut names = rm_dup(names);

    if names.is_empty() {
        names = registry
            .modules()
            .iter()
            .map(|module| module.name.clone())
            .collect();
    }

    for name in &names {
        let module = registry
            .module(name)
            .ok_or_else(|| ErrorKind::UnknownModule(name.to_string()))?;

        match registry.pid(name) {
            Some(pid) => println!("[{}] UP {}", module.app, pid),
            None => println!("[{}] DOWN", module.app),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::registry::testing::registry_of;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn unknown_module_aborts() {
        let registry = registry_of(&["a"]);

        let err = check_modules(&registry, &names(&["ghost"]))
            .expect_err("unknown module should fail");

        assert_eq!(err.to_string(), "ghost doesn't exist");
    }

    #[test]
    fn reports_every_module_when_empty() {
        let registry = registry_of(&["a", "b"]);
        registry.set_running("a", 11);

        check_modules(&registry, &[]).expect("check should succeed");
    }

    #[test]
    fn duplicates_are_reported_once() {
        let registry = registry_of(&["a"]);
        registry.set_running("a", 11);

        check_modules(&registry, &names(&["a", "a"])).expect("check should succeed");
    }
}
