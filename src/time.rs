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
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::Instant;

use super::common::*;

lazy_static! {
    static ref BOOT: Instant = Instant::now();
}

thread_local! {
    static CLOCK_CACHE: Cell<Option<u64>> = Cell::new(None);
    static TIMER: RefCell<Option<TimerWheel>> = RefCell::new(None);
}

// microseconds since process start, always live
pub fn ExactUsecs() -> u64 {
    return BOOT.elapsed().as_micros() as u64;
}

pub fn GettimePrivateInit() {
    CLOCK_CACHE.with(|c| c.set(Some(ExactUsecs() / 1000_000)));
}

// seconds since process start. core workers read the per-tick cache,
// foreign threads fall back to a live reading
pub fn Gettime() -> u64 {
    let cached = CLOCK_CACHE.with(|c| c.get());
    match cached {
        Some(t) => t,
        None => ExactUsecs() / 1000_000,
    }
}

pub fn GettimeRefresh() {
    CLOCK_CACHE.with(|c| {
        if c.get().is_some() {
            c.set(Some(ExactUsecs() / 1000_000));
        }
    });
}

struct TimerEntry {
    deadline: u64,
    seq: u64,
    func: Box<dyn FnOnce()>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        return self.deadline == other.deadline && self.seq == other.seq;
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        return Some(self.cmp(other));
    }
}

impl Ord for TimerEntry {
    // reversed, BinaryHeap is a max-heap and expiry wants the earliest
    fn cmp(&self, other: &Self) -> CmpOrdering {
        return other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq));
    }
}

struct TimerWheel {
    granularity: u64,
    seq: u64,
    entries: BinaryHeap<TimerEntry>,
}

pub fn TimerInit(granularity: u64) -> Result<()> {
    TIMER.with(|t| {
        *t.borrow_mut() = Some(TimerWheel {
            granularity: granularity,
            seq: 0,
            entries: BinaryHeap::new(),
        });
    });

    return Ok(());
}

// arm a one-shot timer on the calling core
pub fn TimerInsert(delayUs: u64, func: Box<dyn FnOnce()>) -> Result<()> {
    TIMER.with(|t| {
        let mut wheel = t.borrow_mut();
        let wheel = match wheel.as_mut() {
            Some(w) => w,
            None => return Err(Error::SysError(SysErr::ENOSYS)),
        };

        wheel.seq += 1;
        let seq = wheel.seq;
        wheel.entries.push(TimerEntry {
            deadline: ExactUsecs() + delayUs,
            seq: seq,
            func: func,
        });

        return Ok(());
    })
}

// microseconds until the next deadline on the calling core
pub fn TimerNextUs() -> Option<u64> {
    TIMER.with(|t| {
        let wheel = t.borrow();
        let wheel = wheel.as_ref()?;
        let next = wheel.entries.peek()?;
        return Some(next.deadline.saturating_sub(ExactUsecs()));
    })
}

pub fn TimerExpire() {
    let now = ExactUsecs();

    // expired callbacks run after the wheel borrow is released so that
    // they can arm new timers
    let mut due = Vec::new();
    TIMER.with(|t| {
        let mut wheel = t.borrow_mut();
        let wheel = match wheel.as_mut() {
            Some(w) => w,
            None => return,
        };

        while let Some(entry) = wheel.entries.peek() {
            if entry.deadline > now {
                break;
            }

            if let Some(entry) = wheel.entries.pop() {
                due.push(entry);
            }
        }
    });

    for entry in due {
        (entry.func)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn TestClockCache() {
        GettimePrivateInit();
        let t1 = Gettime();
        GettimeRefresh();
        let t2 = Gettime();
        assert!(t2 >= t1);
    }

    #[test]
    fn TestTimerOrder() {
        TimerInit(1).expect("timer init");

        let fired = Rc::new(RefCell::new(Vec::new()));

        let f1 = fired.clone();
        TimerInsert(0, Box::new(move || f1.borrow_mut().push(1))).expect("insert");
        let f2 = fired.clone();
        TimerInsert(0, Box::new(move || f2.borrow_mut().push(2))).expect("insert");
        let f3 = fired.clone();
        TimerInsert(1000 * 1000 * 3600, Box::new(move || f3.borrow_mut().push(3))).expect("insert");

        TimerExpire();
        assert_eq!(*fired.borrow(), vec![1, 2]);
        assert!(TimerNextUs().is_some());
    }

    #[test]
    fn TestTimerRearmFromCallback() {
        TimerInit(1).expect("timer init");

        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        TimerInsert(
            0,
            Box::new(move || {
                let f1 = f.clone();
                TimerInsert(0, Box::new(move || f1.set(true))).expect("rearm");
            }),
        )
        .expect("insert");

        TimerExpire();
        assert!(!fired.get());
        TimerExpire();
        assert!(fired.get());
    }
}
