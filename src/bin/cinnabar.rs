// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::Path;

use clap::{App, Arg};
use tokio::runtime;

use cinnabarrc::registry::StaticRegistry;
use cinnabarrc::{check, start, stop, Error};

const CONFIG: &str = "config";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
}

impl<'a, 'b> SetupClapApp for App<'a, 'b> {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let args = App::new("cinnabar")
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name(CONFIG)
                .short("c")
                .long(CONFIG)
                .value_name("FILE")
                .default_value("cfg.json")
                .help("deployment configuration file"),
        )
        .subcommand(start::sub_command().setup_clap_app())
        .subcommand(stop::sub_command().setup_clap_app())
        .subcommand(check::sub_command().setup_clap_app())
        .get_matches();

    let config = args.value_of(CONFIG).expect("config has a default");
    let registry = StaticRegistry::load(Path::new(config))?;

    let mut runtime = runtime::Builder::new()
        .basic_scheduler()
        .enable_all()
        .build()
        .expect("Failed to initialize Tokio Runtime");

    runtime.block_on(async move {
        match args.subcommand() {
            (start::NAME, Some(args)) => start::run(&registry, args).await,
            (stop::NAME, Some(args)) => stop::run(&registry, args).await,
            (check::NAME, Some(args)) => check::run(&registry, args),
            ("", None) => {
                println!("command required");
                println!("{}", args.usage());
                std::process::exit(1);
            }
            (arg, _) => {
                println!("unexpected argument: {}", arg);
                println!("{}", args.usage());
                std::process::exit(2);
            }
        }
    })
}
