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

use std::collections::BTreeMap;

use spin::Mutex;

use super::common::*;

// physical cpu reserved for one core. nodeId is kept for the hugepage
// arena; core_affinity exposes no numa topology so it is always 0.
#[derive(Debug, Clone, Copy)]
pub struct CpuDesc {
    pub cpuId: usize,
    pub nodeId: i32,
}

#[derive(Default)]
pub struct CpuSetInternal {
    inited: bool,
    available: Vec<usize>,
    // core hash -> cpu id
    locked: BTreeMap<usize, usize>,
}

lazy_static! {
    static ref CPUSET: Mutex<CpuSetInternal> = Mutex::new(CpuSetInternal::default());
}

pub fn CpusetInit() -> Result<()> {
    let ids = match core_affinity::get_core_ids() {
        Some(ids) => ids,
        None => return Err(Error::SysError(SysErr::ENOSYS)),
    };

    let mut cpuset = CPUSET.lock();
    cpuset.available = ids.iter().map(|c| c.id).collect();
    cpuset.locked.clear();
    cpuset.inited = true;

    info!("cpuset init, {} cpu useable, {} online", cpuset.available.len(), num_cpus::get());

    return Ok(());
}

pub fn CpusetUseable() -> usize {
    return CPUSET.lock().available.len();
}

// reserve a physical cpu for the given core, unique within the process
pub fn CpusetLock(hash: usize) -> Result<CpuDesc> {
    let mut cpuset = CPUSET.lock();
    if !cpuset.inited {
        return Err(Error::SysError(SysErr::ENOSYS));
    }

    if cpuset.locked.contains_key(&hash) {
        return Err(Error::SysError(SysErr::EEXIST));
    }

    let cpu = match cpuset.available.pop() {
        Some(cpu) => cpu,
        None => return Err(Error::SysError(SysErr::EBUSY)),
    };

    cpuset.locked.insert(hash, cpu);

    return Ok(CpuDesc {
        cpuId: cpu,
        nodeId: 0,
    });
}

// pin the current thread to the given cpu
pub fn CpusetSet(name: &str, cpuId: usize) -> Result<()> {
    core_affinity::set_for_current(core_affinity::CoreId { id: cpuId });
    info!("{} bind to cpu {}", name, cpuId);
    return Ok(());
}
