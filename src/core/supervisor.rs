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

use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use spin::Mutex;

use super::super::config::CONFIG;
use super::super::time::*;
use super::*;

lazy_static! {
    static ref SUPERVISOR: Mutex<Option<JoinHandle<()>>> = Mutex::new(None);
}

// a stuck core is unrecoverable: every storage/network guarantee depends
// on every core making progress. a missed trylock means the worker holds
// the lock right now, which is progress enough
pub fn CoreCheckDead(core: &Core, now: u64, timeout: u64) -> bool {
    match core.keepalive.try_lock() {
        Some(keepalive) => now.saturating_sub(*keepalive) > timeout,
        None => false,
    }
}

fn CoreCheckHealth() {
    loop {
        let (interval, timeout) = {
            let conf = CONFIG.read();
            (conf.healthInterval, conf.healthTimeout)
        };

        for _ in 0..interval {
            if !CoreRunning() {
                return;
            }

            thread::sleep(Duration::from_secs(1));
        }

        let now = Gettime();
        for i in 0..CORE_MAX {
            if !CoreUsed(i) {
                continue;
            }

            let core = CoreGet(i);
            if CoreCheckDead(&core, now, timeout) {
                error!("polling core[{}] block !!!!!", core.hash);
                std::process::abort();
            }
        }
    }
}

pub(crate) fn CoreCheckHealthStart() {
    let handle = thread::Builder::new()
        .name("core_check_health".to_string())
        .spawn(CoreCheckHealth);

    match handle {
        Ok(handle) => *SUPERVISOR.lock() = Some(handle),
        Err(e) => {
            error!("core_check_health spawn failed: {}", e);
            std::process::abort();
        }
    }
}

pub(crate) fn SupervisorJoin() {
    let handle = SUPERVISOR.lock().take();
    if let Some(handle) = handle {
        let _ = handle.join();
    }
}
