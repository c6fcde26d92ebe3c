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
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use super::common::*;

pub struct SemaphoreInternal {
    count: Mutex<u64>,
    cond: Condvar,
}

#[derive(Clone)]
pub struct Semaphore(Arc<SemaphoreInternal>);

impl Deref for Semaphore {
    type Target = Arc<SemaphoreInternal>;

    fn deref(&self) -> &Arc<SemaphoreInternal> {
        &self.0
    }
}

impl Semaphore {
    pub fn New() -> Self {
        return Self(Arc::new(SemaphoreInternal {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }));
    }

    pub fn Post(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.cond.notify_one();
    }

    pub fn Wait(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count == 0 {
            count = self
                .cond
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }

        *count -= 1;
    }

    pub fn TimedWait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::SysError(SysErr::ETIMEDOUT));
            }

            let (guard, _) = self
                .cond
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            count = guard;
        }

        *count -= 1;
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn TestPostThenWait() {
        let sem = Semaphore::New();
        sem.Post();
        sem.Wait();
    }

    #[test]
    fn TestTimedWaitTimeout() {
        let sem = Semaphore::New();
        let ret = sem.TimedWait(Duration::from_micros(10));
        assert_eq!(ret, Err(Error::SysError(SysErr::ETIMEDOUT)));
    }

    #[test]
    fn TestCrossThreadPost() {
        let sem = Semaphore::New();
        let poster = sem.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            poster.Post();
        });

        let ret = sem.TimedWait(Duration::from_secs(5));
        assert_eq!(ret, Ok(()));
        handle.join().expect("poster");
    }
}
