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

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    None,
    SysError(i32),
    Common(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    // the errno carried by this error; Common errors map to EIO
    pub fn Errno(&self) -> i32 {
        match self {
            Error::None => 0,
            Error::SysError(e) => *e,
            Error::Common(_) => SysErr::EIO,
        }
    }

    pub fn IsBusy(&self) -> bool {
        return *self == Error::SysError(SysErr::EBUSY);
    }
}

pub struct SysErr {}

impl SysErr {
    pub const EAGAIN: i32 = libc::EAGAIN;
    pub const EBUSY: i32 = libc::EBUSY;
    pub const EEXIST: i32 = libc::EEXIST;
    pub const EINVAL: i32 = libc::EINVAL;
    pub const EIO: i32 = libc::EIO;
    pub const ENOENT: i32 = libc::ENOENT;
    pub const ENOSYS: i32 = libc::ENOSYS;
    pub const ETIMEDOUT: i32 = libc::ETIMEDOUT;
}
