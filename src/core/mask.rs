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

pub const CORE_MAX: usize = 64;

pub fn CoreUsedby(mask: u64, idx: usize) -> bool {
    assert!(idx < CORE_MAX);
    return mask & (1u64 << idx) != 0;
}

// dense ascending translation of a mask, the owner map for hashing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coremask {
    pub coreid: Vec<usize>,
}

impl Coremask {
    pub fn Count(&self) -> usize {
        return self.coreid.len();
    }
}

pub fn CoremaskTrans(mask: u64) -> Coremask {
    let mut coremask = Coremask::default();
    for i in 0..CORE_MAX {
        if !CoreUsedby(mask, i) {
            continue;
        }

        coremask.coreid.push(i);
    }

    assert!(coremask.Count() > 0);

    info!("mask {:#x} {:?}", mask, coremask.coreid);

    return coremask;
}

// stable owner of an arbitrary key within the dense list
pub fn CoremaskHash(coremask: &Coremask, id: u64) -> usize {
    assert!(coremask.Count() > 0);

    let hash = (id % coremask.Count() as u64) as usize;

    return coremask.coreid[hash];
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn TestTransDense() {
        let coremask = CoremaskTrans(0b10110);
        assert_eq!(coremask.coreid, vec![1, 2, 4]);
        assert_eq!(coremask.Count(), 3);
    }

    #[test]
    fn TestTransRoundtrip() {
        let mask: u64 = 0xdead_beef;
        let coremask = CoremaskTrans(mask);

        let expected: Vec<usize> = (0..CORE_MAX).filter(|i| mask & (1 << i) != 0).collect();
        assert_eq!(coremask.coreid, expected);
    }

    #[test]
    fn TestHashStable() {
        let coremask = CoremaskTrans(0b10110);
        // 7 mod 3 == 1, dense[1] == 2
        assert_eq!(CoremaskHash(&coremask, 7), 2);
    }

    #[test]
    fn TestHashCongruent() {
        let coremask = CoremaskTrans(0b1101_0011);
        let count = coremask.Count() as u64;

        let mut rng = rand::thread_rng();
        for _ in 0..256 {
            let k: u64 = rng.gen_range(0, 1u64 << 32);
            let stride: u64 = rng.gen_range(0, 1024);
            assert_eq!(
                CoremaskHash(&coremask, k),
                CoremaskHash(&coremask, k + count * stride)
            );
        }
    }

    #[test]
    fn TestHashCountPreserving() {
        let coremask = CoremaskTrans(0b111000);
        for id in 0..64u64 {
            assert!(coremask.coreid.contains(&CoremaskHash(&coremask, id)));
        }
    }
}
