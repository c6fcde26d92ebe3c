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

pub mod mask;
pub mod request;
pub mod supervisor;

pub use self::mask::*;
pub use self::request::*;
pub use self::supervisor::*;

use std::cell::RefCell;
use std::cmp;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use cache_padded::CachePadded;
use spin::Mutex;
use spin::RwLock;

use super::analysis::*;
use super::common::*;
use super::config::CONFIG;
use super::cpuset::*;
use super::mem::*;
use super::net::*;
use super::sche::*;
use super::sem::Semaphore;
use super::time::*;

bitflags! {
    pub struct CoreFlags: u32 {
        // busy-spin instead of interrupt-driven wakeups
        const POLLING = 1 << 0;
        const NET = 1 << 1;
    }
}

// one registered callback. the context of the original registration is
// captured by the closure
pub struct Routine {
    pub name: String,
    pub func: Box<dyn Fn(&Core) + Send + Sync>,
}

// typed per-core slots for sub-resource handles. foreign threads observe
// none of them
#[derive(Default)]
pub struct CoreTls {
    pub sche: RwLock<Option<Sche>>,
    pub hugepage: RwLock<Option<HugepageArena>>,
    pub memRing: RwLock<Option<MemRing>>,
    pub analysis: RwLock<Option<Analysis>>,
}

pub struct CoreInternal {
    // core index and stable identity
    pub hash: usize,
    pub name: Mutex<String>,
    pub flag: CoreFlags,
    // physical cpu, set iff this core is pinned
    pub mainCore: Option<CpuDesc>,

    pub sche: RwLock<Option<Sche>>,

    pollerList: Mutex<Vec<Arc<Routine>>>,
    routineList: Mutex<Vec<Arc<Routine>>>,
    scanList: Mutex<Vec<Arc<Routine>>>,
    destroyList: Mutex<Vec<Arc<Routine>>>,

    // last progress timestamp, shared with the health supervisor. the
    // mutex is the keepalive spinlock, trylock on both sides
    pub keepalive: Mutex<u64>,
    lastScan: AtomicU64,

    statT1: AtomicU64,
    statNr1: CachePadded<AtomicU64>,
    statNr2: CachePadded<AtomicU64>,

    pub tls: CoreTls,
    // readiness, posted once when worker init completes
    sem: Semaphore,
    pub corenet: RwLock<Option<CoreNet>>,
}

#[derive(Clone)]
pub struct Core(Arc<CoreInternal>);

impl Deref for Core {
    type Target = Arc<CoreInternal>;

    fn deref(&self) -> &Arc<CoreInternal> {
        &self.0
    }
}

lazy_static! {
    static ref CORE_ARRAY: RwLock<Vec<Option<Core>>> = RwLock::new(vec![None; CORE_MAX]);
    static ref CORE_THREADS: Mutex<Vec<JoinHandle<()>>> = Mutex::new(Vec::new());
}

static CORE_MASK: AtomicU64 = AtomicU64::new(0);
static CORE_RUNNING: AtomicBool = AtomicBool::new(false);

thread_local! {
    static LOCAL_CORE: RefCell<Option<Core>> = RefCell::new(None);
}

pub fn CoreSelf() -> Option<Core> {
    return LOCAL_CORE.with(|c| c.borrow().clone());
}

pub fn CoreMaskGet() -> u64 {
    return CORE_MASK.load(Ordering::SeqCst);
}

pub fn CoreUsed(idx: usize) -> bool {
    return CoreUsedby(CoreMaskGet(), idx);
}

pub fn CoreRunning() -> bool {
    return CORE_RUNNING.load(Ordering::SeqCst);
}

pub fn CoreGet(hash: usize) -> Core {
    assert!(CoreUsed(hash));
    return CORE_ARRAY.read()[hash].clone().unwrap();
}

impl Core {
    pub fn New(name: &str, hash: usize, flag: CoreFlags) -> Result<Self> {
        let conf = CONFIG.read().clone();

        let lock = conf.daemon && flag.contains(CoreFlags::POLLING);
        let mainCore = if lock {
            Some(CpusetLock(hash)?)
        } else {
            None
        };

        let now = Gettime();

        return Ok(Self(Arc::new(CoreInternal {
            hash: hash,
            name: Mutex::new(name.to_string()),
            flag: flag,
            mainCore: mainCore,
            sche: RwLock::new(None),
            pollerList: Mutex::new(Vec::new()),
            routineList: Mutex::new(Vec::new()),
            scanList: Mutex::new(Vec::new()),
            destroyList: Mutex::new(Vec::new()),
            keepalive: Mutex::new(now),
            lastScan: AtomicU64::new(now),
            statT1: AtomicU64::new(0),
            statNr1: CachePadded::new(AtomicU64::new(0)),
            statNr2: CachePadded::new(AtomicU64::new(0)),
            tls: CoreTls::default(),
            sem: Semaphore::New(),
            corenet: RwLock::new(None),
        })));
    }

    pub fn Name(&self) -> String {
        return self.name.lock().clone();
    }

    pub fn Sche(&self) -> Result<Sche> {
        return self.sche.read().clone().ok_or(Error::SysError(SysErr::ENOSYS));
    }
}

fn CoreInitFatal(stage: &str, e: Error) -> ! {
    error!("core init {} failed: {:?}", stage, e);
    std::process::abort();
}

pub fn CoreInit(mask: u64, flag: CoreFlags) -> Result<()> {
    let mut mask = mask;
    let mut flag = flag;

    if mask == 0 {
        let conf = CONFIG.read().clone();
        assert!(conf.pollingTimeout > 0 || conf.daemon);

        flag.toggle(CoreFlags::POLLING);
        mask = 1;
        CONFIG.write().coremask = mask;
        info!("set coremask default");
    }

    CORE_MASK.store(mask, Ordering::SeqCst);
    CORE_RUNNING.store(true, Ordering::SeqCst);

    let conf = CONFIG.read().clone();

    if let Err(e) = CpusetInit() {
        CoreInitFatal("cpuset", e);
    }

    if let Err(e) = HugepageInit(conf.daemon, mask, conf.useHuge) {
        CoreInitFatal("hugepage", e);
    }

    if let Err(e) = MemRingInit() {
        CoreInitFatal("mem ring", e);
    }

    if let Err(e) = SlabStreamInit() {
        CoreInitFatal("stream slab", e);
    }

    if let Err(e) = SlabStaticInit() {
        CoreInitFatal("static slab", e);
    }

    for i in 0..CORE_MAX {
        if !CoreUsed(i) {
            continue;
        }

        let core = match Core::New("core", i, flag) {
            Ok(core) => core,
            Err(e) => CoreInitFatal("core create", e),
        };

        CORE_ARRAY.write()[i] = Some(core.clone());

        if let Err(e) = CoreStart(&core) {
            CoreInitFatal("core spawn", e);
        }

        info!("core[{}] hash {} created", i, core.hash);
    }

    for i in 0..CORE_MAX {
        if !CoreUsed(i) {
            continue;
        }

        CoreGet(i).sem.Wait();
    }

    CoreCheckHealthStart();

    if let Err(e) = CorenetInit(flag) {
        CoreInitFatal("corenet", e);
    }

    if let Err(e) = CorerpcInit() {
        CoreInitFatal("corerpc", e);
    }

    if let Err(e) = CorenetMapingInit() {
        CoreInitFatal("corenet maping", e);
    }

    if let Err(e) = CoreLatencyInit() {
        CoreInitFatal("core latency", e);
    }

    info!("core init done, mask {:#x}", mask);

    return Ok(());
}

fn CoreStart(core: &Core) -> Result<()> {
    let clone = core.clone();
    let handle = thread::Builder::new()
        .name(format!("core[{}]", core.hash))
        .spawn(move || CoreWorker(clone))
        .map_err(|_| Error::SysError(SysErr::EAGAIN))?;

    CORE_THREADS.lock().push(handle);

    return Ok(());
}

fn CoreWorker(core: Core) {
    info!("start {} idx {}", core.Name(), core.hash);

    if let Err(e) = CoreWorkerInit(&core) {
        error!("core[{}] worker init failed: {:?}", core.hash, e);
        std::process::abort();
    }

    while CoreRunning() {
        CoreWorkerRun(&core);
    }

    CoreWorkerDestroy(&core);

    info!("{}[{}] exit", core.Name(), core.hash);
}

fn CoreWorkerInit(core: &Core) -> Result<()> {
    info!(
        "core[{}] init begin, polling {}",
        core.hash,
        if core.flag.contains(CoreFlags::POLLING) { "on" } else { "off" }
    );

    LOCAL_CORE.with(|c| *c.borrow_mut() = Some(core.clone()));

    let name = format!("{}[{}]", core.Name(), core.hash);

    let mut nodeId = -1;
    if let Some(mainCore) = &core.mainCore {
        CpusetSet(&name, mainCore.cpuId).map_err(|_| Error::SysError(SysErr::EINVAL))?;
        nodeId = mainCore.nodeId;
    }

    let conf = CONFIG.read().clone();

    if conf.daemon {
        let hugepage = HugepagePrivateInit(core.hash, nodeId)?;
        *core.tls.hugepage.write() = Some(hugepage);
    }

    let interrupt = !core.flag.contains(CoreFlags::POLLING);
    let sche = ScheCreate(interrupt, &core.Name())?;
    *core.sche.write() = Some(sche.clone());
    *core.tls.sche.write() = Some(sche.clone());

    info!("{}[{}] sche[{}] inited", core.Name(), core.hash, sche.idx);

    if interrupt {
        TimerInit(1)?;
    }

    GettimePrivateInit();
    SlabStreamPrivateInit()?;
    SlabStaticPrivateInit()?;

    if conf.daemon {
        let memRing = MemRingPrivateInit(core.hash)?;
        *core.tls.memRing.write() = Some(memRing);
    }

    info!("{}[{}] mem inited", core.Name(), core.hash);

    if conf.performanceAnalysis {
        let analysis = AnalysisPrivateCreate(&name)?;
        *core.tls.analysis.write() = Some(analysis);
    }

    core.statT1.store(ExactUsecs(), Ordering::Relaxed);

    core.sem.Post();

    return Ok(());
}

// teardown hooks run in reverse registration order
fn CoreWorkerDestroy(core: &Core) {
    let routines: Vec<Arc<Routine>> = core.destroyList.lock().iter().cloned().collect();
    for routine in routines.iter().rev() {
        (routine.func)(core);
    }
}

fn CoreRunList(core: &Core, list: &Mutex<Vec<Arc<Routine>>>) {
    let mut i = 0;
    loop {
        let routine = {
            let list = list.lock();
            if i >= list.len() {
                break;
            }
            list[i].clone()
        };

        (routine.func)(core);
        i += 1;
    }
}

fn CoreCheckKeepalive(core: &Core, interval: u64, now: u64) {
    if let Some(mut keepalive) = core.keepalive.try_lock() {
        if now - *keepalive >= interval {
            *keepalive = now;
        }
    }
}

fn CoreStat(core: &Core, sche: &Sche) {
    let stat = sche.Stat();
    let ringCount = sche.RingCount();

    let t2 = ExactUsecs();
    let t1 = core.statT1.load(Ordering::Relaxed);
    let used = t2 - t1;
    if used == 0 {
        return;
    }

    let nr2 = core.statNr2.load(Ordering::Relaxed);
    let nr1 = core.statNr1.load(Ordering::Relaxed);
    let ticks = cmp::max(1, nr2 - nr1);

    let (ioLat, ioQueue) = if stat.queueCount == 0 {
        (0, 0)
    } else {
        (stat.ioTime / stat.queueCount, stat.ioTime / used)
    };

    info!(
        "{}[{}] pps:{} task:{}/{}/{}/{}/{} ring:{} counter:{} cpu {} io {}/{}",
        core.Name(),
        core.hash,
        ticks * 1000 * 1000 / used,
        stat.taskMax,
        stat.taskUsed,
        stat.runTime / used,
        stat.taskWaiting,
        stat.taskRunnable,
        ringCount,
        stat.counter / ticks,
        stat.runTime * 100 / used,
        ioLat,
        ioQueue
    );

    core.statT1.store(t2, Ordering::Relaxed);
    core.statNr1.store(nr2, Ordering::Relaxed);
}

// one tick. no preemption inside: a callback that never returns stalls
// this core until the supervisor aborts the process
pub fn CoreWorkerRun(core: &Core) {
    core.statNr2.fetch_add(1, Ordering::Relaxed);

    let (scanInterval, keepaliveInterval, analysis) = {
        let conf = CONFIG.read();
        (conf.scanInterval, conf.keepaliveInterval, conf.performanceAnalysis)
    };

    let begin = if analysis { ExactUsecs() } else { 0 };

    let sche = match core.sche.read().clone() {
        Some(sche) => sche,
        None => return,
    };

    sche.Run();

    CoreRunList(core, &core.pollerList);

    // pollers typically enqueue work
    sche.Run();

    CoreRunList(core, &core.routineList);

    let now = Gettime();
    if now - core.lastScan.load(Ordering::Relaxed) > scanInterval {
        core.lastScan.store(now, Ordering::Relaxed);

        CoreRunList(core, &core.scanList);

        CoreCheckKeepalive(core, keepaliveInterval, Gettime());

        sche.Scan();

        CoreStat(core, &sche);
    }

    GettimeRefresh();
    TimerExpire();

    if analysis {
        AnalysisMerge();

        // the merge on the next tick folds this sample into the latency
        // gauge and warns if it exceeded the threshold
        let used = ExactUsecs() - begin;
        if used > 0 {
            AnalysisPrivateQueue("core_worker", used);
        }
    }
}

fn CoreRegister(core: &Core, list: &Mutex<Vec<Arc<Routine>>>, kind: &str, name: &str,
                func: Box<dyn Fn(&Core) + Send + Sync>) -> Result<()> {
    let routine = SlabStaticAlloc(Routine {
        name: name.to_string(),
        func: func,
    })?;

    list.lock().push(Arc::from(routine));

    info!("register {}[{}], name: {}", kind, core.hash, name);

    return Ok(());
}

pub fn CoreRegisterPoller<F>(name: &str, func: F) -> Result<()>
where
    F: Fn(&Core) + Send + Sync + 'static,
{
    let core = CoreSelf();
    assert!(core.is_some());
    let core = core.unwrap();

    return CoreRegister(&core, &core.pollerList, "poller", name, Box::new(func));
}

pub fn CoreRegisterRoutine<F>(name: &str, func: F) -> Result<()>
where
    F: Fn(&Core) + Send + Sync + 'static,
{
    let core = CoreSelf();
    assert!(core.is_some());
    let core = core.unwrap();

    return CoreRegister(&core, &core.routineList, "routine", name, Box::new(func));
}

pub fn CoreRegisterScan<F>(name: &str, func: F) -> Result<()>
where
    F: Fn(&Core) + Send + Sync + 'static,
{
    let core = CoreSelf();
    assert!(core.is_some());
    let core = core.unwrap();

    return CoreRegister(&core, &core.scanList, "scan", name, Box::new(func));
}

pub fn CoreRegisterDestroy<F>(name: &str, func: F) -> Result<()>
where
    F: Fn(&Core) + Send + Sync + 'static,
{
    let core = CoreSelf();
    assert!(core.is_some());
    let core = core.unwrap();

    return CoreRegister(&core, &core.destroyList, "destroy", name, Box::new(func));
}

// register a descriptor on the target core and poke its scheduler so the
// next tick notices it. may run on any thread
pub fn CoreAttach(hash: usize, sockid: &SockId, name: &str,
                  exec: NetExec, reset: NetReset, check: NetCheck) -> Result<()> {
    info!("attach hash {} fd {} name {}", hash, sockid.sd, name);

    let core = CoreGet(hash);

    let corenet = core
        .corenet
        .read()
        .clone()
        .ok_or(Error::SysError(SysErr::ENOSYS))?;
    corenet.Attach(sockid, name, exec, reset, check)?;

    core.Sche()?.Post();

    return Ok(());
}

pub fn TlsSche() -> Option<Sche> {
    return CoreSelf().and_then(|core| core.tls.sche.read().clone());
}

pub fn TlsHugepage() -> Option<HugepageArena> {
    return CoreSelf().and_then(|core| core.tls.hugepage.read().clone());
}

pub fn TlsMemRing() -> Option<MemRing> {
    return CoreSelf().and_then(|core| core.tls.memRing.read().clone());
}

pub fn TlsAnalysis() -> Option<Analysis> {
    return CoreSelf().and_then(|core| core.tls.analysis.read().clone());
}

// walk every active core in index order from the calling thread.
// read-only aggregation, the cores' private state belongs to their workers
pub fn CoreIterator<F>(mut func: F)
where
    F: FnMut(&Core),
{
    for i in 0..CORE_MAX {
        if !CoreUsed(i) {
            continue;
        }

        func(&CoreGet(i));
    }
}

pub fn CoreDumpMemory() -> u64 {
    let mut memory: u64 = 0;

    CoreIterator(|_core| {
        memory += (mem::size_of::<CoreInternal>()
            + mem::size_of::<ScheInternal>()
            + (mem::size_of::<ScheEntry>() + DEFAULT_STACK_SIZE) * TASK_MAX)
            as u64;
    });

    return memory;
}

// append a role suffix to the selected cores' names
pub fn CoreOccupy(name: &str, coremask: u64) {
    for i in 0..CORE_MAX {
        if !CoreUsedby(coremask, i) {
            continue;
        }

        assert!(CoreUsed(i));

        let core = CoreGet(i);
        let mut current = core.name.lock();
        if *current != "core" {
            *current = format!("{}|{}", *current, name);
        } else {
            *current = name.to_string();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreId {
    pub nid: NodeId,
    pub idx: usize,
}

pub fn CoreGetid() -> Result<CoreId> {
    let core = CoreSelf().ok_or(Error::SysError(SysErr::ENOSYS))?;

    let nid = NetGetnid();
    assert!(nid.id > 0);

    return Ok(CoreId {
        nid: nid,
        idx: core.hash,
    });
}

pub fn CoreIslocal(coreid: &CoreId) -> bool {
    if !NetIslocal(&coreid.nid) {
        return false;
    }

    let core = match CoreSelf() {
        Some(core) => core,
        None => return false,
    };

    return core.hash == coreid.idx;
}

// cooperative teardown: stop the fleet, run destroy lists, join workers
pub fn CoreShutdown() {
    if !CORE_RUNNING.swap(false, Ordering::SeqCst) {
        return;
    }

    for i in 0..CORE_MAX {
        if !CoreUsed(i) {
            continue;
        }

        if let Some(sche) = CoreGet(i).sche.read().clone() {
            sche.Post();
        }
    }

    let handles: Vec<JoinHandle<()>> = CORE_THREADS.lock().drain(..).collect();
    for handle in handles {
        let _ = handle.join();
    }

    SupervisorJoin();

    info!("core shutdown, mask {:#x}", CoreMaskGet());
}
