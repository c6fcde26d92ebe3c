// Copyright (c) 2021 Quark Container Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(non_snake_case)]

#[macro_use]
extern crate log;

use std::thread;
use std::time::Duration;

use clap::App;
use clap::Arg;

use qcore::config::*;
use qcore::core::*;
use qcore::LogInit;

fn main() {
    let matches = App::new("qcore_srv")
        .version("0.1.0")
        .about("per-cpu core runtime daemon")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("configuration file"),
        )
        .arg(
            Arg::with_name("coremask")
                .short("m")
                .long("coremask")
                .takes_value(true)
                .help("hex mask of cores to run"),
        )
        .arg(Arg::with_name("daemon").short("d").long("daemon"))
        .arg(Arg::with_name("polling").short("p").long("polling"))
        .arg(Arg::with_name("debug").long("debug"))
        .get_matches();

    LogInit(matches.is_present("debug"));

    let mut conf = match matches.value_of("config") {
        Some(path) => match ConfigLoad(path) {
            Ok(conf) => conf,
            Err(e) => {
                error!("{:?}", e);
                std::process::exit(1);
            }
        },
        None => CONFIG.read().clone(),
    };

    if let Some(mask) = matches.value_of("coremask") {
        conf.coremask = match u64::from_str_radix(mask.trim_start_matches("0x"), 16) {
            Ok(mask) => mask,
            Err(e) => {
                error!("coremask {}: {}", mask, e);
                std::process::exit(1);
            }
        };
    }

    if matches.is_present("daemon") {
        conf.daemon = true;
    }

    let mut flag = CoreFlags::NET;
    if matches.is_present("polling") {
        flag |= CoreFlags::POLLING;
    }

    let coremask = conf.coremask;
    ConfigSet(conf);

    if let Err(e) = CoreInit(coremask, flag) {
        error!("core init: {:?}", e);
        std::process::exit(1);
    }

    loop {
        thread::sleep(Duration::from_secs(60));
        info!("memory used {}", CoreDumpMemory());
    }
}
