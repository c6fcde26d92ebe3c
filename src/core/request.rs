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

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use spin::Mutex;

use super::super::common::*;
use super::super::sche::*;
use super::super::sem::Semaphore;
use super::mask::*;
use super::*;

// the submitter picks the wake path by inspecting its own execution
// context: a task parks its handle, everything else blocks on a semaphore
enum RequestWake {
    Task(TaskHandle),
    Sem(Semaphore),
}

struct RequestCtxInternal {
    retval: Mutex<Option<Result<i32>>>,
    wake: RequestWake,
}

#[derive(Clone)]
struct RequestCtx(Arc<RequestCtxInternal>);

impl Deref for RequestCtx {
    type Target = Arc<RequestCtxInternal>;

    fn deref(&self) -> &Arc<RequestCtxInternal> {
        &self.0
    }
}

impl RequestCtx {
    fn New(wake: RequestWake) -> Self {
        return Self(Arc::new(RequestCtxInternal {
            retval: Mutex::new(None),
            wake: wake,
        }));
    }

    // store the callee's return and wake the submitter, exactly once
    fn Complete(&self, retval: Result<i32>) {
        *self.retval.lock() = Some(retval);

        match &self.wake {
            RequestWake::Task(task) => task.Post(0),
            RequestWake::Sem(sem) => sem.Post(),
        }
    }

    fn Retval(&self) -> Result<i32> {
        match self.retval.lock().take() {
            Some(retval) => retval,
            None => Err(Error::SysError(SysErr::EIO)),
        }
    }
}

// run exec on the scheduler of core hash and return its value. callable
// from a task on any core or from a foreign thread
pub fn CoreRequest<F>(hash: usize, group: i32, name: &str, exec: F) -> Result<i32>
where
    F: FnOnce() -> Result<i32> + Send + 'static,
{
    let core = CoreGet(hash);
    let sche = core.Sche()?;

    if ScheRunning() {
        // task path: park a slot on the caller's own scheduler, submit,
        // then yield by pumping the caller's loop until the target posts.
        // a self-request is served by the pump itself on a later pass
        let selfSche = ScheSelf().ok_or(Error::SysError(SysErr::ENOSYS))?;
        let selfCore = CoreSelf().ok_or(Error::SysError(SysErr::ENOSYS))?;

        let task = selfSche.TaskGet1()?;

        let ctx = RequestCtx::New(RequestWake::Task(task.clone()));
        let completion = ctx.clone();
        let ret = sche.Request(
            group,
            name,
            Box::new(move || completion.Complete(exec())),
        );
        if let Err(e) = ret {
            task.Release();
            return Err(e);
        }

        while !task.Polled() {
            CoreWorkerRun(&selfCore);
        }
        task.Release();

        return ctx.Retval();
    }

    // semaphore path, for submitters without a task
    let sem = Semaphore::New();
    let ctx = RequestCtx::New(RequestWake::Sem(sem.clone()));
    let completion = ctx.clone();
    sche.Request(
        group,
        name,
        Box::new(move || completion.Complete(exec())),
    )?;

    match CoreSelf() {
        Some(selfCore) => {
            // a core worker must keep its own loop alive while it waits
            let mut retry = 0;
            loop {
                match sem.TimedWait(Duration::from_micros(10)) {
                    Ok(()) => break,
                    Err(Error::SysError(SysErr::ETIMEDOUT)) => {
                        retry += 1;
                        debug!("{} wait {}", name, retry);
                        CoreWorkerRun(&selfCore);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        None => sem.Wait(),
    }

    return ctx.Retval();
}

// submit the same call to every active core in index order, stopping at
// the first failure
pub fn CoreInitModules<F>(name: &str, exec: F) -> Result<()>
where
    F: Fn(&Core) -> Result<i32> + Send + Sync + 'static,
{
    return CoreInitModules1(name, CoreMaskGet(), exec);
}

pub fn CoreInitModules1<F>(name: &str, coremask: u64, exec: F) -> Result<()>
where
    F: Fn(&Core) -> Result<i32> + Send + Sync + 'static,
{
    // the sub-mask must be contained in the active mask
    assert!(coremask & !CoreMaskGet() == 0);

    let exec = Arc::new(exec);

    for i in 0..CORE_MAX {
        if !CoreUsedby(coremask, i) {
            continue;
        }

        let exec = exec.clone();
        CoreRequest(i, -1, name, move || {
            let core = CoreSelf().ok_or(Error::SysError(SysErr::ENOSYS))?;
            return exec(&core);
        })?;
    }

    return Ok(());
}
