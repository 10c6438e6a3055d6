// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use clap::{App, Arg, ArgMatches, SubCommand};
use futures::future::FutureExt;
use futures::select;
use log::debug;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time;

use crate::error::ErrorKind;
use crate::registry::{preq_order, rm_dup, Registry};
use crate::start::{CONFIRM_BUDGET, MODULE, POLL_INTERVAL, PREQ_ORDER};
use crate::Error;

pub const NAME: &str = "stop";

pub fn sub_command() -> App<'static, 'static> {
    SubCommand::with_name(NAME)
        .about("Stop the configured modules and confirm each one went down")
        .arg(
            Arg::with_name(PREQ_ORDER)
                .long(PREQ_ORDER)
                .help("stop the modules in reverse prerequisite order"),
        )
        .arg(
            Arg::with_name(MODULE)
                .multiple(true)
                .help("modules to stop, all of them when empty"),
        )
}

pub async fn run<R: Registry>(registry: &R, args: &ArgMatches<'_>) -> Result<(), Error> {
    let names: Vec<String> = args
        .values_of(MODULE)
        .map(|values| values.map(String::from).collect())
        .unwrap_or_default();

    stop_modules(registry, &names, args.is_present(PREQ_ORDER)).await
}

/// Stop the named modules, one after the other.
///
/// Normalization matches start, except that under the prerequisite flag
/// the final list is reversed: dependencies go down after their
/// dependents. A module that isn't running is reported and skipped.
pub async fn stop_modules<R: Registry>(
    registry: &R,
    names: &[String],
    preq: bool,
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

    if preq {
        names.reverse();
    }

    for name in &names {
        let module = registry
            .module(name)
            .ok_or_else(|| ErrorKind::UnknownModule(name.to_string()))?;

        let pid = match registry.pid(name) {
            Some(pid) => pid,
            None => {
                println!("[{}] down", module.app);
                continue;
            }
        };

        debug!("sending SIGTERM to [{}] {}", module.app, pid);
        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|err| format!("[{}] failed to signal {}: {}", module.app, pid, err))?;

        if wait_stopped(registry, name).await {
            println!("[{}] stopped", module.app);
            continue;
        }

        // FIXME: escalate to SIGKILL when the module ignores SIGTERM
        return Err(ErrorKind::FailedToStop(module.app.clone()).into());
    }

    Ok(())
}

/// Poll the registry every 100ms until the module is no longer observable
/// as running, giving up after the confirmation budget elapses.
async fn wait_stopped<R: Registry>(registry: &R, name: &str) -> bool {
    let mut deadline = time::delay_for(CONFIRM_BUDGET).fuse();

    loop {
        let mut tick = time::delay_for(POLL_INTERVAL).fuse();

        select! {
            _ = tick => {
                if !registry.is_running(name) {
                    return true;
                }
            }
            _ = deadline => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    use tokio::runtime;

    use crate::registry::testing::registry_of;

    fn runtime() -> runtime::Runtime {
        runtime::Builder::new()
            .basic_scheduler()
            .enable_all()
            .build()
            .expect("failed to build runtime")
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    /// A process this test owns and may signal.
    fn spawn_sleeper() -> std::process::Child {
        Command::new("/bin/sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .expect("failed to spawn sleep")
    }

    #[test]
    fn unknown_module_aborts() {
        let registry = registry_of(&["a"]);
        let mut rt = runtime();

        let err = rt
            .block_on(stop_modules(&registry, &names(&["ghost"]), false))
            .expect_err("unknown module should fail");

        assert_eq!(err.to_string(), "ghost doesn't exist");
    }

    #[test]
    fn module_already_down_is_skipped() {
        let registry = registry_of(&["a"]);
        let mut rt = runtime();

        rt.block_on(stop_modules(&registry, &names(&["a"]), false))
            .expect("module that is down should be skipped");
    }

    #[test]
    fn sigterm_reaches_the_module_process() {
        let mut child = spawn_sleeper();
        let registry = registry_of(&["a"]);
        // running at the kill-time lookup, down at the first poll after
        registry.stop_after("a", 1, child.id() as libc::pid_t);

        let mut rt = runtime();
        rt.block_on(stop_modules(&registry, &names(&["a"]), false))
            .expect("stop should succeed");

        // the sleeper must actually have received the SIGTERM
        let begin = Instant::now();
        loop {
            match child.try_wait().expect("failed to poll child") {
                Some(status) => {
                    assert!(!status.success(), "sleep should have died by signal");
                    break;
                }
                None if begin.elapsed() > Duration::from_secs(5) => {
                    child.kill().expect("failed to kill leftover sleep");
                    panic!("sleep survived the SIGTERM");
                }
                None => std::thread::sleep(Duration::from_millis(20)),
            }
        }
    }

    #[test]
    fn stop_timeout_is_bounded() {
        let mut child = spawn_sleeper();
        let registry = registry_of(&["a"]);
        // reported running forever, even after the SIGTERM
        registry.stop_after("a", usize::max_value(), child.id() as libc::pid_t);

        let mut rt = runtime();
        let begin = Instant::now();
        let err = rt
            .block_on(stop_modules(&registry, &names(&["a"]), false))
            .expect_err("stop should time out");
        let elapsed = begin.elapsed();

        assert_eq!(err.to_string(), "[cinnabar-a] failed to stop");
        assert!(elapsed >= Duration::from_millis(900), "gave up too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "timeout not bounded: {:?}", elapsed);

        child.kill().ok();
        child.wait().expect("failed to reap sleep");
    }
}
