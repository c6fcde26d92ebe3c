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

use std::cell::Cell;
use std::cell::RefCell;
use std::cmp;
use std::ops::Deref;
use std::os::unix::io::RawFd;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use cache_padded::CachePadded;
use crossbeam::channel::bounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;
use crossbeam::channel::TrySendError;
use nix::sys::eventfd::eventfd;
use nix::sys::eventfd::EfdFlags;

use super::common::*;
use super::config::CONFIG;
use super::time::*;

// task slots per scheduler
pub const TASK_MAX: usize = 1024;
// inbound request ring depth
pub const RING_MAX: usize = 8192;
// reserved per task context
pub const DEFAULT_STACK_SIZE: usize = 1 << 16;

static SCHE_IDX: AtomicI32 = AtomicI32::new(0);

thread_local! {
    static LOCAL_SCHE: RefCell<Option<Sche>> = RefCell::new(None);
    static RUN_DEPTH: Cell<usize> = Cell::new(0);
}

pub struct ScheEntry {
    pub name: String,
    pub group: i32,
    pub func: Box<dyn FnOnce() + Send>,
}

pub struct ScheInternal {
    pub idx: i32,
    pub name: String,

    ringTx: Sender<ScheEntry>,
    ringRx: Receiver<ScheEntry>,
    // present iff the owner block-waits instead of busy-polling
    interruptEventfd: Option<RawFd>,

    pub counter: CachePadded<AtomicU64>,
    runTime: CachePadded<AtomicU64>,
    ioTime: AtomicU64,
    queueCount: AtomicU64,

    taskUsed: AtomicUsize,
    taskWaiting: AtomicUsize,
}

#[derive(Clone)]
pub struct Sche(Arc<ScheInternal>);

impl Deref for Sche {
    type Target = Arc<ScheInternal>;

    fn deref(&self) -> &Arc<ScheInternal> {
        &self.0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScheStat {
    pub taskMax: usize,
    pub taskUsed: usize,
    pub taskWaiting: usize,
    pub taskRunnable: usize,
    // deltas since the last sample
    pub runTime: u64,
    pub ioTime: u64,
    pub queueCount: u64,
    pub counter: u64,
}

// create the calling thread's scheduler and install it as sche_self
pub fn ScheCreate(interrupt: bool, name: &str) -> Result<Sche> {
    let (tx, rx) = bounded(RING_MAX);

    let efd = if interrupt {
        let fd = eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(|e| Error::SysError(e as i32))?;
        Some(fd)
    } else {
        None
    };

    let sche = Sche(Arc::new(ScheInternal {
        idx: SCHE_IDX.fetch_add(1, Ordering::SeqCst),
        name: name.to_string(),
        ringTx: tx,
        ringRx: rx,
        interruptEventfd: efd,
        counter: CachePadded::new(AtomicU64::new(0)),
        runTime: CachePadded::new(AtomicU64::new(0)),
        ioTime: AtomicU64::new(0),
        queueCount: AtomicU64::new(0),
        taskUsed: AtomicUsize::new(0),
        taskWaiting: AtomicUsize::new(0),
    }));

    LOCAL_SCHE.with(|s| *s.borrow_mut() = Some(sche.clone()));

    return Ok(sche);
}

pub fn ScheSelf() -> Option<Sche> {
    return LOCAL_SCHE.with(|s| s.borrow().clone());
}

// true while the calling thread is inside a scheduled entry
pub fn ScheRunning() -> bool {
    return RUN_DEPTH.with(|d| d.get()) > 0;
}

impl Sche {
    // enqueue work onto this scheduler from any thread. a full ring is a
    // retriable EBUSY, the caller is never blocked
    pub fn Request(&self, group: i32, name: &str, func: Box<dyn FnOnce() + Send>) -> Result<()> {
        let entry = ScheEntry {
            name: name.to_string(),
            group: group,
            func: func,
        };

        match self.ringTx.try_send(entry) {
            Ok(()) => (),
            Err(TrySendError::Full(_)) => {
                warn!("sche[{}] {} ring full, {} refused", self.idx, self.name, name);
                return Err(Error::SysError(SysErr::EBUSY));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(Error::SysError(SysErr::ENOSYS));
            }
        }

        self.Post();

        return Ok(());
    }

    // drain ready entries once. an interrupt-driven scheduler with an
    // empty ring first block-waits up to the polling timeout
    pub fn Run(&self) -> usize {
        if self.ringRx.is_empty() {
            self.WaitInterrupt();
        }

        let begin = ExactUsecs();
        let mut count = 0;

        while let Ok(entry) = self.ringRx.try_recv() {
            RUN_DEPTH.with(|d| d.set(d.get() + 1));
            (entry.func)();
            RUN_DEPTH.with(|d| d.set(d.get() - 1));

            self.counter.fetch_add(1, Ordering::Relaxed);
            count += 1;
            if count >= RING_MAX {
                break;
            }
        }

        if count > 0 {
            self.runTime
                .fetch_add(ExactUsecs() - begin, Ordering::Relaxed);
        }

        return count;
    }

    // slow path companion of Run
    pub fn Scan(&self) {
        let depth = self.ringRx.len();
        if depth > RING_MAX / 2 {
            warn!("sche[{}] {} ring depth {}", self.idx, self.name, depth);
        }
    }

    // wake the owner of this scheduler
    pub fn Post(&self) {
        if let Some(fd) = self.interruptEventfd {
            let buf = 1u64.to_ne_bytes();
            let _ = nix::unistd::write(fd, &buf);
        }
    }

    fn WaitInterrupt(&self) {
        let fd = match self.interruptEventfd {
            Some(fd) => fd,
            None => return,
        };

        let mut timeoutUs = CONFIG.read().pollingTimeout;
        if let Some(next) = TimerNextUs() {
            timeoutUs = cmp::min(timeoutUs, next);
        }

        if timeoutUs == 0 {
            return;
        }

        let mut pfd = libc::pollfd {
            fd: fd,
            events: libc::POLLIN,
            revents: 0,
        };

        let timeoutMs = cmp::max(1, timeoutUs / 1000) as libc::c_int;
        let ret = unsafe { libc::poll(&mut pfd, 1, timeoutMs) };
        if ret > 0 && pfd.revents & libc::POLLIN != 0 {
            let mut buf = [0u8; 8];
            let _ = nix::unistd::read(fd, &mut buf);
        }
    }

    // reserve a task slot for the calling task so that a peer can wake it
    pub fn TaskGet1(&self) -> Result<TaskHandle> {
        let used = self.taskUsed.fetch_add(1, Ordering::SeqCst);
        if used >= TASK_MAX {
            self.taskUsed.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::SysError(SysErr::EBUSY));
        }

        self.taskWaiting.fetch_add(1, Ordering::SeqCst);

        return Ok(TaskHandle(Arc::new(TaskHandleInternal {
            sche: self.clone(),
            posted: AtomicBool::new(false),
            consumed: AtomicBool::new(false),
            err: AtomicI32::new(0),
        })));
    }

    pub fn RingCount(&self) -> usize {
        return self.ringRx.len();
    }

    pub fn Stat(&self) -> ScheStat {
        return ScheStat {
            taskMax: TASK_MAX,
            taskUsed: self.taskUsed.load(Ordering::Relaxed),
            taskWaiting: self.taskWaiting.load(Ordering::Relaxed),
            taskRunnable: self.ringRx.len(),
            runTime: self.runTime.swap(0, Ordering::Relaxed),
            ioTime: self.ioTime.swap(0, Ordering::Relaxed),
            queueCount: self.queueCount.swap(0, Ordering::Relaxed),
            counter: self.counter.load(Ordering::Relaxed),
        };
    }

    // io completion sample, feeds the per-core stat line
    pub fn IoSample(&self, usedUs: u64) {
        self.ioTime.fetch_add(usedUs, Ordering::Relaxed);
        self.queueCount.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct TaskHandleInternal {
    sche: Sche,
    posted: AtomicBool,
    consumed: AtomicBool,
    err: AtomicI32,
}

#[derive(Clone)]
pub struct TaskHandle(Arc<TaskHandleInternal>);

impl Deref for TaskHandle {
    type Target = Arc<TaskHandleInternal>;

    fn deref(&self) -> &Arc<TaskHandleInternal> {
        &self.0
    }
}

impl TaskHandle {
    // wake the parked owner, exactly once
    pub fn Post(&self, err: i32) {
        self.err.store(err, Ordering::SeqCst);
        if !self.posted.swap(true, Ordering::SeqCst) {
            self.sche.taskWaiting.fetch_sub(1, Ordering::SeqCst);
            self.sche.Post();
        }
    }

    pub fn Polled(&self) -> bool {
        return self.posted.load(Ordering::SeqCst);
    }

    pub fn Err(&self) -> i32 {
        return self.err.load(Ordering::SeqCst);
    }

    // return the slot. a handle that was never submitted releases its
    // waiting reservation as well
    pub fn Release(&self) {
        if !self.consumed.swap(true, Ordering::SeqCst) {
            self.sche.taskUsed.fetch_sub(1, Ordering::SeqCst);
            if !self.posted.swap(true, Ordering::SeqCst) {
                self.sche.taskWaiting.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn TestRequestFifo() {
        let sche = ScheCreate(false, "test").expect("sche");

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let o = order.clone();
            sche.Request(-1, "entry", Box::new(move || o.lock().unwrap().push(i)))
                .expect("request");
        }

        let ran = sche.Run();
        assert_eq!(ran, 8);
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
        assert_eq!(sche.counter.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn TestTaskSlotExhaustion() {
        let sche = ScheCreate(false, "test").expect("sche");

        let mut handles = Vec::new();
        for _ in 0..TASK_MAX {
            handles.push(sche.TaskGet1().expect("slot"));
        }

        let overflow = sche.TaskGet1();
        assert_eq!(overflow.err().map(|e| e.Errno()), Some(SysErr::EBUSY));

        for handle in &handles {
            handle.Release();
        }

        assert!(sche.TaskGet1().is_ok());
    }

    #[test]
    fn TestRunningDepth() {
        let sche = ScheCreate(false, "test").expect("sche");

        assert!(!ScheRunning());
        let seen = Arc::new(AtomicBool::new(false));
        let s = seen.clone();
        sche.Request(-1, "probe", Box::new(move || s.store(ScheRunning(), Ordering::SeqCst)))
            .expect("request");
        sche.Run();

        assert!(seen.load(Ordering::SeqCst));
        assert!(!ScheRunning());
    }

    #[test]
    fn TestRingFull() {
        let sche = ScheCreate(false, "test").expect("sche");

        for _ in 0..RING_MAX {
            sche.Request(-1, "fill", Box::new(|| ())).expect("request");
        }

        let ret = sche.Request(-1, "overflow", Box::new(|| ()));
        assert_eq!(ret.err().map(|e| e.Errno()), Some(SysErr::EBUSY));
    }
}
