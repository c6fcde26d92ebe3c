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
use std::ops::Deref;
use std::sync::Arc;

use spin::Mutex;
use spin::RwLock;

use super::common::*;
use super::config::CONFIG;
use super::core::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SockId {
    pub sd: i32,
    pub seq: u32,
}

// event handler of an attached descriptor, runs on the owning core
pub type NetExec = Arc<dyn Fn(&Core, &SockId) -> Result<()> + Send + Sync>;
// teardown hook
pub type NetReset = Arc<dyn Fn(&SockId) + Send + Sync>;
// liveness probe
pub type NetCheck = Arc<dyn Fn(&SockId) -> bool + Send + Sync>;

#[derive(Clone)]
struct CoreNetEntry {
    sockid: SockId,
    name: String,
    exec: NetExec,
    reset: NetReset,
    check: NetCheck,
}

pub struct CoreNetInternal {
    pub hash: usize,
    pub flag: CoreFlags,
    entries: Mutex<Vec<CoreNetEntry>>,
}

#[derive(Clone)]
pub struct CoreNet(Arc<CoreNetInternal>);

impl Deref for CoreNet {
    type Target = Arc<CoreNetInternal>;

    fn deref(&self) -> &Arc<CoreNetInternal> {
        &self.0
    }
}

impl CoreNet {
    pub fn New(hash: usize, flag: CoreFlags) -> Self {
        return Self(Arc::new(CoreNetInternal {
            hash: hash,
            flag: flag,
            entries: Mutex::new(Vec::new()),
        }));
    }

    // register a descriptor; the owning core notices it on its next tick
    pub fn Attach(
        &self,
        sockid: &SockId,
        name: &str,
        exec: NetExec,
        reset: NetReset,
        check: NetCheck,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.sockid == *sockid) {
            return Err(Error::SysError(SysErr::EEXIST));
        }

        entries.push(CoreNetEntry {
            sockid: *sockid,
            name: name.to_string(),
            exec: exec,
            reset: reset,
            check: check,
        });

        return Ok(());
    }

    fn Detach(&self, sockid: &SockId) {
        self.entries.lock().retain(|e| e.sockid != *sockid);
    }

    pub fn Count(&self) -> usize {
        return self.entries.lock().len();
    }

    // service every attached descriptor once. the table lock is not held
    // across callbacks, they may attach further descriptors
    pub fn Poll(&self, core: &Core) {
        let mut i = 0;
        loop {
            let entry = {
                let entries = self.entries.lock();
                if i >= entries.len() {
                    break;
                }
                entries[i].clone()
            };

            if !(entry.check)(&entry.sockid) {
                info!(
                    "corenet[{}] {} fd {} closed",
                    self.hash, entry.name, entry.sockid.sd
                );
                (entry.reset)(&entry.sockid);
                self.Detach(&entry.sockid);
                continue;
            }

            match (entry.exec)(core, &entry.sockid) {
                Ok(()) => i += 1,
                Err(e) => {
                    warn!(
                        "corenet[{}] {} fd {} error {:?}",
                        self.hash, entry.name, entry.sockid.sd, e
                    );
                    (entry.reset)(&entry.sockid);
                    self.Detach(&entry.sockid);
                }
            }
        }
    }
}

// install a corenet table and its poller on every active core
pub fn CorenetInit(flag: CoreFlags) -> Result<()> {
    CoreInitModules("corenet", move |core| {
        let net = CoreNet::New(core.hash, flag);
        *core.corenet.write() = Some(net.clone());

        let poll = net.clone();
        CoreRegisterPoller("corenet_poll", move |core: &Core| {
            poll.Poll(core);
        })?;

        return Ok(0);
    })?;

    return Ok(());
}

pub fn CorerpcInit() -> Result<()> {
    let timeout = CONFIG.read().rpcTimeout;
    if timeout == 0 {
        return Err(Error::SysError(SysErr::EINVAL));
    }

    info!("corerpc init, timeout {}s", timeout);

    return Ok(());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId {
    pub id: u32,
}

lazy_static! {
    static ref LOCAL_NID: NodeId = NodeId {
        id: HostnameHash() | 1,
    };
    // node id -> that node's active core mask
    static ref CORENET_MAPING: RwLock<BTreeMap<NodeId, u64>> = RwLock::new(BTreeMap::new());
}

fn Hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(_) => "localhost".to_string(),
    }
}

fn HostnameHash() -> u32 {
    // fnv-1a
    let mut hash: u32 = 0x811c9dc5;
    for b in Hostname().as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }

    return hash;
}

pub fn NetGetnid() -> NodeId {
    return *LOCAL_NID;
}

pub fn NetIslocal(nid: &NodeId) -> bool {
    return *nid == *LOCAL_NID;
}

pub fn NetworkRname(nid: &NodeId) -> String {
    if NetIslocal(nid) {
        return Hostname();
    }

    return format!("node[{}]", nid.id);
}

// publish the local node's active mask
pub fn CorenetMapingInit() -> Result<()> {
    let nid = NetGetnid();
    let mask = CoreMaskGet();
    CORENET_MAPING.write().insert(nid, mask);

    info!("corenet maping init, nid {} mask {:#x}", nid.id, mask);

    return Ok(());
}

pub fn CorenetMapingGet(nid: &NodeId) -> Option<u64> {
    return CORENET_MAPING.read().get(nid).cloned();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn TestNidStable() {
        let a = NetGetnid();
        let b = NetGetnid();
        assert_eq!(a, b);
        assert_ne!(a.id, 0);
        assert!(NetIslocal(&a));
    }

    #[test]
    fn TestRemoteRname() {
        let remote = NodeId { id: NetGetnid().id.wrapping_add(2) };
        assert!(!NetIslocal(&remote));
        assert_eq!(NetworkRname(&remote), format!("node[{}]", remote.id));
    }
}
