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

use std::sync::Arc;
use std::sync::Mutex;

use qcore::config::*;
use qcore::core::*;

// teardown gets its own process, the fleet does not survive it
#[test]
fn TestShutdownRunsDestroyListReversed() {
    qcore::LogInit(false);

    let mut conf = CoreConfig::default();
    conf.coremask = 0b11;
    conf.pollingTimeout = 1000;
    conf.scanInterval = 1;
    ConfigSet(conf);

    CoreInit(0b11, CoreFlags::empty()).expect("core init");
    assert!(CoreRunning());

    let order = Arc::new(Mutex::new(Vec::new()));

    let a = order.clone();
    let b = order.clone();
    CoreRequest(0, -1, "register", move || {
        CoreRegisterDestroy("first", move |_| a.lock().unwrap().push("first"))?;
        CoreRegisterDestroy("second", move |_| b.lock().unwrap().push("second"))?;
        return Ok(0);
    })
    .expect("register");

    CoreShutdown();
    assert!(!CoreRunning());

    // reverse registration order
    assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);

    // a second shutdown is a no-op
    CoreShutdown();

    // the registry itself stays readable
    assert!(CoreUsed(0));
    assert_eq!(CoreGet(0).hash, 0);
}
