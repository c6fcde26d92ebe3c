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
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use spin::Mutex;

use super::common::*;
use super::config::CONFIG;
use super::core::TlsAnalysis;

// samples above this age are worth a log line
pub fn IoWarnUs() -> u64 {
    return CONFIG.read().rpcTimeout / 2 * 1000 * 1000;
}

pub struct AnalysisEntry {
    pub name: String,
    pub usedUs: u64,
}

pub struct AnalysisInternal {
    pub name: String,
    queue: Mutex<Vec<AnalysisEntry>>,
}

#[derive(Clone)]
pub struct Analysis(Arc<AnalysisInternal>);

impl Deref for Analysis {
    type Target = Arc<AnalysisInternal>;

    fn deref(&self) -> &Arc<AnalysisInternal> {
        &self.0
    }
}

// per-core analysis sink
pub fn AnalysisPrivateCreate(name: &str) -> Result<Analysis> {
    info!("analysis {} created", name);

    return Ok(Analysis(Arc::new(AnalysisInternal {
        name: name.to_string(),
        queue: Mutex::new(Vec::new()),
    })));
}

// record a sample on the calling core, dropped silently elsewhere
pub fn AnalysisPrivateQueue(name: &str, usedUs: u64) {
    let analysis = match TlsAnalysis() {
        Some(a) => a,
        None => return,
    };

    analysis.queue.lock().push(AnalysisEntry {
        name: name.to_string(),
        usedUs: usedUs,
    });
}

// flush the calling core's sink
pub fn AnalysisMerge() {
    let analysis = match TlsAnalysis() {
        Some(a) => a,
        None => return,
    };

    let entries: Vec<AnalysisEntry> = analysis.queue.lock().drain(..).collect();
    let warn = IoWarnUs();
    for entry in entries {
        CoreLatencyUpdate(entry.usedUs);
        if entry.usedUs > warn {
            warn!(
                "analysis {} used {} s {}",
                analysis.name,
                entry.usedUs as f64 / 1000.0 / 1000.0,
                entry.name
            );
        }
    }
}

pub struct LatencyInternal {
    totalUs: AtomicU64,
    count: AtomicU64,
}

lazy_static! {
    static ref CORE_LATENCY: LatencyInternal = LatencyInternal {
        totalUs: AtomicU64::new(0),
        count: AtomicU64::new(0),
    };
}

pub fn CoreLatencyInit() -> Result<()> {
    CORE_LATENCY.totalUs.store(0, Ordering::Relaxed);
    CORE_LATENCY.count.store(0, Ordering::Relaxed);
    return Ok(());
}

pub fn CoreLatencyUpdate(usedUs: u64) {
    CORE_LATENCY.totalUs.fetch_add(usedUs, Ordering::Relaxed);
    CORE_LATENCY.count.fetch_add(1, Ordering::Relaxed);
}

pub fn CoreLatencyUs() -> u64 {
    let count = CORE_LATENCY.count.load(Ordering::Relaxed);
    if count == 0 {
        return 0;
    }

    return CORE_LATENCY.totalUs.load(Ordering::Relaxed) / count;
}
