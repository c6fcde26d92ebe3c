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

use spin::RwLock;

use super::common::*;

lazy_static! {
    pub static ref CONFIG: RwLock<CoreConfig> = RwLock::new(CoreConfig::default());
}

// process wide configuration, read-only after CoreInit
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CoreConfig {
    pub coremask: u64,
    pub daemon: bool,
    // idle wait granularity of interrupt-driven cores, microseconds
    pub pollingTimeout: u64,
    pub useHuge: bool,
    // seconds
    pub rpcTimeout: u64,
    pub performanceAnalysis: bool,

    // liveness cadence, seconds
    pub keepaliveInterval: u64,
    pub scanInterval: u64,
    pub healthInterval: u64,
    pub healthTimeout: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        return Self {
            coremask: 1,
            daemon: false,
            pollingTimeout: 100 * 1000,
            useHuge: false,
            rpcTimeout: 10,
            performanceAnalysis: false,
            keepaliveInterval: 1,
            scanInterval: 3,
            healthInterval: 30,
            healthTimeout: 180,
        };
    }
}

pub fn ConfigLoad(path: &str) -> Result<CoreConfig> {
    let mut settings = config::Config::new();
    settings
        .merge(config::File::with_name(path))
        .map_err(|e| Error::Common(format!("config {}: {}", path, e)))?;

    let conf = settings
        .try_into::<CoreConfig>()
        .map_err(|e| Error::Common(format!("config {}: {}", path, e)))?;

    return Ok(conf);
}

pub fn ConfigSet(conf: CoreConfig) {
    *CONFIG.write() = conf;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn TestDefaults() {
        let conf = CoreConfig::default();
        assert_eq!(conf.coremask, 1);
        assert_eq!(conf.keepaliveInterval, 1);
        assert_eq!(conf.scanInterval, 3);
        assert_eq!(conf.healthInterval, 30);
        assert_eq!(conf.healthTimeout, 180);
        assert!(conf.pollingTimeout > 0);
    }
}
