// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fs::{self, File, OpenOptions};
use std::process::Stdio;
use std::time::Duration;

use clap::{App, Arg, ArgMatches, SubCommand};
use futures::future::FutureExt;
use futures::select;
use libc::pid_t;
use log::debug;
use tokio::process::Command;
use tokio::time;

use crate::error::ErrorKind;
use crate::registry::{preq_order, rm_dup, ModuleSpec, Registry};
use crate::Error;

pub const NAME: &str = "start";
pub const PREQ_ORDER: &str = "preq-order";
pub const CONSOLE_OUTPUT: &str = "console-output";
pub const MODULE: &str = "MODULE";

/// How often a just-signalled module is polled for its running state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Total budget for one module to become observable, armed once per module.
pub const CONFIRM_BUDGET: Duration = Duration::from_secs(1);

pub fn sub_command() -> App<'static, 'static> {
    SubCommand::with_name(NAME)
        .about("Start the configured modules and confirm each one came up")
        .arg(
            Arg::with_name(PREQ_ORDER)
                .long(PREQ_ORDER)
                .help("start the modules in the prerequisite order"),
        )
        .arg(
            Arg::with_name(CONSOLE_OUTPUT)
                .long(CONSOLE_OUTPUT)
                .help("inherit stdout/stderr instead of redirecting to the module log file"),
        )
        .arg(
            Arg::with_name(MODULE)
                .multiple(true)
                .help("modules to start, all of them when empty"),
        )
}

pub async fn run<R: Registry>(registry: &R, args: &ArgMatches<'_>) -> Result<(), Error> {
    let names: Vec<String> = args
        .values_of(MODULE)
        .map(|values| values.map(String::from).collect())
        .unwrap_or_default();

    start_modules(
        registry,
        &names,
        args.is_present(PREQ_ORDER),
        args.is_present(CONSOLE_OUTPUT),
    )
    .await
}

/// Start the named modules, one after the other.
///
/// Rules:
/// - duplicates are dropped, the first occurrence wins
/// - an empty list means every module, in the registry order
/// - a module already observable as running is reported and skipped
/// - the first failure aborts the remaining modules, already started
///   modules are left running
pub async fn start_modules<R: Registry>(
    registry: &R,
    names: &[String],
    preq: bool,
    console_output: bool,
) -> Result<(), Error> {
    let mut names = rm_dup(names);

    if preq {
        names = preq_order(registry, &names);
    }

    if names.is_empty() {
        names = registry
            .modules()
            .iter()
            .map(|module| module.name.clone())
            .collect();
    }

    for name in &names {
        let module = check_start_req(registry, name)?;

        // skip modules that are already up
        if let Some(pid) = registry.pid(name) {
            println!("[{}] {}", module.app, pid);
            continue;
        }

        exec_module(console_output, module).await?;

        match wait_started(registry, name).await {
            Some(pid) => println!("[{}] {}", module.app, pid),
            None => return Err(ErrorKind::FailedToStart(module.app.clone()).into()),
        }
    }

    Ok(())
}

/// The module must be known to the registry and its config file present.
fn check_start_req<'a, R: Registry>(registry: &'a R, name: &str) -> Result<&'a ModuleSpec, Error> {
    let module = registry
        .module(name)
        .ok_or_else(|| ErrorKind::UnknownModule(name.to_string()))?;

    if !module.cfg.is_file() {
        return Err(ErrorKind::MissingConfig(module.cfg.clone()).into());
    }

    Ok(module)
}

fn open_log_file(module: &ModuleSpec) -> Result<File, Error> {
    fs::create_dir_all(&module.log_dir).map_err(|err| {
        format!(
            "failed to create log directory {}: {}",
            module.log_dir.display(),
            err
        )
    })?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&module.log_path)
        .map_err(|err| {
            format!(
                "failed to open log file {}: {}",
                module.log_path.display(),
                err
            )
            .into()
        })
}

/// Invoke the module binary with the `-c <config>` convention.
///
/// With console output the parent's stdio is inherited and the call waits
/// for the child to exit. Otherwise stdout/stderr go to the module log file
/// and the child is left running on its own; the parent's handle to the log
/// file is dropped as soon as the spawn returns, the child keeps its own.
async fn exec_module(console_output: bool, module: &ModuleSpec) -> Result<(), Error> {
    let mut cmd = Command::new(&module.bin);
    cmd.arg("-c").arg(&module.cfg);

    debug!("spawning [{}]: {:?} -c {:?}", module.app, module.bin, module.cfg);

    if console_output {
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        let status = cmd.status().await.map_err(|err| {
            format!("[{}] failed to invoke {}: {}", module.app, module.bin.display(), err)
        })?;

        if !status.success() {
            return Err(ErrorKind::ModuleExited(module.app.clone(), status).into());
        }

        return Ok(());
    }

    let log_output = open_log_file(module)?;
    cmd.stdout(Stdio::from(log_output.try_clone()?));
    cmd.stderr(Stdio::from(log_output));

    let child = cmd.spawn().map_err(|err| {
        format!("[{}] failed to invoke {}: {}", module.app, module.bin.display(), err)
    })?;

    // the child runs on independently of this process
    drop(child);
    Ok(())
}

/// Poll the registry every 100ms until the module is observable as
/// running, giving up after the confirmation budget elapses.
pub(crate) async fn wait_started<R: Registry>(registry: &R, name: &str) -> Option<pid_t> {
    let mut deadline = time::delay_for(CONFIRM_BUDGET).fuse();

    loop {
        let mut tick = time::delay_for(POLL_INTERVAL).fuse();

        select! {
            _ = tick => {
                if let Some(pid) = registry.pid(name) {
                    return Some(pid);
                }
            }
            _ = deadline => return None,
        }
    }
}
