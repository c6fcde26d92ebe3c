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

use std::mem;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Once;
use std::thread;
use std::time::Duration;

use qcore::common::*;
use qcore::config::*;
use qcore::core::*;
use qcore::net::*;
use qcore::sche::*;

static INIT: Once = Once::new();

const TEST_MASK: u64 = 0b1111;

// one fleet per test process; every test in this file shares it
fn Setup() {
    INIT.call_once(|| {
        qcore::LogInit(false);

        let mut conf = CoreConfig::default();
        conf.coremask = TEST_MASK;
        conf.pollingTimeout = 1000;
        conf.scanInterval = 1;
        ConfigSet(conf);

        CoreInit(TEST_MASK, CoreFlags::empty()).expect("core init");
    });
}

#[test]
fn TestBringUp() {
    Setup();

    assert_eq!(CoreMaskGet(), TEST_MASK);
    for i in 0..4 {
        assert!(CoreUsed(i));
        let core = CoreGet(i);
        assert_eq!(core.hash, i);
        assert!(core.Sche().is_ok());
    }
    assert!(!CoreUsed(4));

    // the slow path refreshes the keepalive within a few seconds
    let before = *CoreGet(0).keepalive.lock();
    thread::sleep(Duration::from_secs(4));
    let after = *CoreGet(0).keepalive.lock();
    assert!(after > before);
}

#[test]
fn TestSelfRequest() {
    Setup();

    // the inner request runs inside a task on core 0 and targets core 0:
    // the caller yields, the request is served on a later tick
    let ret = CoreRequest(0, -1, "outer", || {
        return CoreRequest(0, -1, "echo", || Ok(42));
    });

    assert_eq!(ret, Ok(42));
}

#[test]
fn TestCrossCoreTaskRequest() {
    Setup();

    let ret = CoreRequest(0, -1, "outer", || {
        return CoreRequest(1, -1, "echo", || Ok(7));
    });

    assert_eq!(ret, Ok(7));
}

#[test]
fn TestForeignRequest() {
    Setup();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let ret = CoreRequest(0, -1, "echo", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let core = CoreSelf().ok_or(Error::SysError(SysErr::ENOSYS))?;
        assert_eq!(core.hash, 0);
        return Ok(42);
    });

    assert_eq!(ret, Ok(42));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn TestForeignRequestErr() {
    Setup();

    let ret = CoreRequest(2, -1, "fail", || Err(Error::SysError(SysErr::EIO)));
    assert_eq!(ret, Err(Error::SysError(SysErr::EIO)));
}

#[test]
fn TestInitModulesFanout() {
    Setup();

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let ret = CoreInitModules("init_foo", move |core| {
        seen.lock().unwrap().push(core.hash);
        if core.hash == 3 {
            return Err(Error::SysError(SysErr::EIO));
        }

        return Ok(0);
    });

    assert_eq!(ret, Err(Error::SysError(SysErr::EIO)));
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn TestInitModulesSubmask() {
    Setup();

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    CoreInitModules1("init_sub", 0b0110, move |core| {
        seen.lock().unwrap().push(core.hash);
        return Ok(0);
    })
    .expect("fan-out");

    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}

#[test]
fn TestRegistrationOrder() {
    Setup();

    let seq = Arc::new(Mutex::new(Vec::new()));

    let a = seq.clone();
    let b = seq.clone();
    CoreRequest(1, -1, "register", move || {
        CoreRegisterRoutine("first", move |_| a.lock().unwrap().push('a'))?;
        CoreRegisterRoutine("second", move |_| b.lock().unwrap().push('b'))?;
        return Ok(0);
    })
    .expect("register");

    thread::sleep(Duration::from_millis(200));

    let seen = seq.lock().unwrap().clone();
    let start = seen.iter().position(|c| *c == 'b').expect("second ran") - 1;
    assert_eq!(seen[start], 'a');

    // both run every tick, in registration order
    for pair in seen[start..].chunks_exact(2).take(8) {
        assert_eq!(pair, &['a', 'b'][..]);
    }
}

#[test]
fn TestScanCadence() {
    Setup();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    CoreRequest(2, -1, "register_scan", move || {
        CoreRegisterScan("probe", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
        return Ok(0);
    })
    .expect("register");

    thread::sleep(Duration::from_secs(3));

    // scans run on the slow path, not every tick
    let seen = runs.load(Ordering::SeqCst);
    assert!(seen >= 1);
    assert!(seen <= 4);
}

#[test]
fn TestAttachLifecycle() {
    Setup();

    let served = Arc::new(AtomicUsize::new(0));
    let alive = Arc::new(AtomicUsize::new(1));
    let resets = Arc::new(AtomicUsize::new(0));

    let sockid = SockId { sd: 333, seq: 1 };

    let exec = served.clone();
    let check = alive.clone();
    let reset = resets.clone();
    CoreAttach(
        2,
        &sockid,
        "test_conn",
        Arc::new(move |_core, _sockid| {
            exec.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        Arc::new(move |_sockid| {
            reset.fetch_add(1, Ordering::SeqCst);
        }),
        Arc::new(move |_sockid| check.load(Ordering::SeqCst) == 1),
    )
    .expect("attach");

    thread::sleep(Duration::from_millis(100));
    assert!(served.load(Ordering::SeqCst) > 0);
    assert_eq!(CoreGet(2).corenet.read().clone().unwrap().Count(), 1);

    // a dead descriptor is reset and dropped by the next tick
    alive.store(0, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(resets.load(Ordering::SeqCst), 1);
    assert_eq!(CoreGet(2).corenet.read().clone().unwrap().Count(), 0);
}

#[test]
fn TestTlsForeignReads() {
    Setup();

    // no core on this thread, every slot reads as uninitialized
    assert!(CoreSelf().is_none());
    assert!(TlsSche().is_none());
    assert!(TlsHugepage().is_none());
    assert!(TlsMemRing().is_none());
    assert!(TlsAnalysis().is_none());
}

#[test]
fn TestTlsOnCore() {
    Setup();

    let ret = CoreRequest(3, -1, "tls", || {
        assert!(TlsSche().is_some());
        let core = CoreSelf().ok_or(Error::SysError(SysErr::ENOSYS))?;
        assert_eq!(core.hash, 3);
        return Ok(0);
    });

    assert_eq!(ret, Ok(0));
}

#[test]
fn TestIterator() {
    Setup();

    let mut hashes = Vec::new();
    CoreIterator(|core| hashes.push(core.hash));
    assert_eq!(hashes, vec![0, 1, 2, 3]);
}

#[test]
fn TestDumpMemory() {
    Setup();

    let percore = (mem::size_of::<CoreInternal>()
        + mem::size_of::<ScheInternal>()
        + (mem::size_of::<ScheEntry>() + DEFAULT_STACK_SIZE) * TASK_MAX) as u64;

    assert_eq!(CoreDumpMemory(), 4 * percore);
}

#[test]
fn TestGetid() {
    Setup();

    // foreign threads have no identity
    assert_eq!(CoreGetid().err(), Some(Error::SysError(SysErr::ENOSYS)));

    let nid = NetGetnid();
    let ret = CoreRequest(1, -1, "getid", move || {
        let coreid = CoreGetid()?;
        assert_eq!(coreid.idx, 1);
        assert_eq!(coreid.nid, nid);
        assert!(CoreIslocal(&coreid));
        return Ok(0);
    });

    assert_eq!(ret, Ok(0));
}

#[test]
fn TestMapingPublished() {
    Setup();

    assert_eq!(CorenetMapingGet(&NetGetnid()), Some(TEST_MASK));
}

#[test]
fn TestOccupy() {
    Setup();

    CoreOccupy("frontend", 0b1000);
    assert_eq!(CoreGet(3).Name(), "frontend");

    CoreOccupy("rpc", 0b1000);
    assert_eq!(CoreGet(3).Name(), "frontend|rpc");
}
