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
use std::ops::Deref;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use spin::Mutex;

use super::common::*;

pub const MEM_RING_BUF_SIZE: usize = 4096;
pub const MEM_RING_DEPTH: usize = 1024;

#[derive(Default)]
struct HugepagePool {
    inited: bool,
    daemon: bool,
    useHuge: bool,
    mask: u64,
}

lazy_static! {
    static ref HUGEPAGE: Mutex<HugepagePool> = Mutex::new(HugepagePool::default());
    static ref SLAB_STREAM_BYTES: AtomicU64 = AtomicU64::new(0);
    static ref SLAB_STATIC_BYTES: AtomicU64 = AtomicU64::new(0);
}

thread_local! {
    static SLAB_STREAM_READY: Cell<bool> = Cell::new(false);
    static SLAB_STATIC_READY: Cell<bool> = Cell::new(false);
}

pub fn HugepageInit(daemon: bool, mask: u64, useHuge: bool) -> Result<()> {
    let mut pool = HUGEPAGE.lock();
    pool.daemon = daemon;
    pool.useHuge = useHuge;
    pool.mask = mask;
    pool.inited = true;

    info!("hugepage init, daemon {} mask {:#x} huge {}", daemon, mask, useHuge);

    return Ok(());
}

pub struct HugepageArenaInternal {
    pub hash: usize,
    pub nodeId: i32,
    allocated: AtomicU64,
}

#[derive(Clone)]
pub struct HugepageArena(Arc<HugepageArenaInternal>);

impl Deref for HugepageArena {
    type Target = Arc<HugepageArenaInternal>;

    fn deref(&self) -> &Arc<HugepageArenaInternal> {
        &self.0
    }
}

// per-core arena bound to the core's numa node
pub fn HugepagePrivateInit(hash: usize, nodeId: i32) -> Result<HugepageArena> {
    if !HUGEPAGE.lock().inited {
        return Err(Error::SysError(SysErr::ENOSYS));
    }

    info!("hugepage arena[{}] node {}", hash, nodeId);

    return Ok(HugepageArena(Arc::new(HugepageArenaInternal {
        hash: hash,
        nodeId: nodeId,
        allocated: AtomicU64::new(0),
    })));
}

impl HugepageArena {
    pub fn Alloc(&self, size: usize) -> Box<[u8]> {
        self.allocated.fetch_add(size as u64, Ordering::Relaxed);
        return vec![0u8; size].into_boxed_slice();
    }

    pub fn Allocated(&self) -> u64 {
        return self.allocated.load(Ordering::Relaxed);
    }
}

pub fn MemRingInit() -> Result<()> {
    info!("mem ring init, buf {} depth {}", MEM_RING_BUF_SIZE, MEM_RING_DEPTH);
    return Ok(());
}

pub struct MemRingInternal {
    pub hash: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

#[derive(Clone)]
pub struct MemRing(Arc<MemRingInternal>);

impl Deref for MemRing {
    type Target = Arc<MemRingInternal>;

    fn deref(&self) -> &Arc<MemRingInternal> {
        &self.0
    }
}

pub fn MemRingPrivateInit(hash: usize) -> Result<MemRing> {
    return Ok(MemRing(Arc::new(MemRingInternal {
        hash: hash,
        free: Mutex::new(Vec::new()),
    })));
}

impl MemRing {
    pub fn Get(&self) -> Box<[u8]> {
        if let Some(buf) = self.free.lock().pop() {
            return buf;
        }

        return vec![0u8; MEM_RING_BUF_SIZE].into_boxed_slice();
    }

    pub fn Put(&self, buf: Box<[u8]>) {
        let mut free = self.free.lock();
        if free.len() < MEM_RING_DEPTH {
            free.push(buf);
        }
    }
}

pub fn SlabStreamInit() -> Result<()> {
    SLAB_STREAM_BYTES.store(0, Ordering::Relaxed);
    return Ok(());
}

pub fn SlabStaticInit() -> Result<()> {
    SLAB_STATIC_BYTES.store(0, Ordering::Relaxed);
    return Ok(());
}

pub fn SlabStreamPrivateInit() -> Result<()> {
    SLAB_STREAM_READY.with(|r| r.set(true));
    return Ok(());
}

pub fn SlabStaticPrivateInit() -> Result<()> {
    SLAB_STATIC_READY.with(|r| r.set(true));
    return Ok(());
}

// process lifetime allocation, accounted against the static slab
pub fn SlabStaticAlloc<T>(val: T) -> Result<Box<T>> {
    SLAB_STATIC_BYTES.fetch_add(core::mem::size_of::<T>() as u64, Ordering::Relaxed);
    return Ok(Box::new(val));
}

pub fn SlabStaticBytes() -> u64 {
    return SLAB_STATIC_BYTES.load(Ordering::Relaxed);
}
