// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libc::pid_t;
use log::debug;

/// Look up the pid of a running module by scanning the process table.
///
/// A process matches if its argv[0] is the module binary path, or if the
/// file name of its argv[0] is the module's app label. Kernel threads and
/// zombies expose an empty cmdline and never match, so a module that died
/// right after spawning does not count as running. The scanner's own
/// process is skipped.
pub fn pid_of(app: &str, bin: &Path) -> Option<pid_t> {
    let entries = fs::read_dir("/proc").ok()?;
    let own = std::process::id() as pid_t;

    for entry in entries.flatten() {
        let pid: pid_t = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(pid) => pid,
            None => continue,
        };

        if pid == own {
            continue;
        }

        let cmdline = match fs::read(entry.path().join("cmdline")) {
            Ok(cmdline) => cmdline,
            Err(_) => continue,
        };

        let argv0 = match cmdline.split(|b| *b == 0).next() {
            Some(argv0) if !argv0.is_empty() => Path::new(OsStr::from_bytes(argv0)),
            _ => continue,
        };

        if argv0 == bin || argv0.file_name() == Some(OsStr::new(app)) {
            debug!("found [{}] in process table: {}", app, pid);
            return Some(pid);
        }
    }

    None
}
