// Copyright 2025 The Drasi Authors.
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

//! Digital outputs driven by control messages.
//!
//! Anything implementing [`embedded_hal::digital::OutputPin`] can be handed
//! to the agent. This module ships two hosted implementations.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_hal::digital::{Error, ErrorKind, ErrorType, OutputPin, StatefulOutputPin};
use log::debug;

/// In-memory output. Clones share the same level.
#[derive(Debug, Clone, Default)]
pub struct MemoryPin {
    level: Arc<AtomicBool>,
}

impl MemoryPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl ErrorType for MemoryPin {
    type Error = Infallible;
}

impl OutputPin for MemoryPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl StatefulOutputPin for MemoryPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.is_high())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.is_high())
    }
}

/// Error raised by file-backed pins.
#[derive(Debug)]
pub struct PinError(io::Error);

impl fmt::Display for PinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pin write failed: {}", self.0)
    }
}

impl std::error::Error for PinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl Error for PinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<Infallible> for PinError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// Output backed by a value file such as `/sys/class/gpio/gpio17/value`.
/// Writes `1` for high and `0` for low.
#[derive(Debug, Clone)]
pub struct FilePin {
    path: PathBuf,
}

impl FilePin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, value: &str) -> Result<(), PinError> {
        debug!("Writing {value} to {}", self.path.display());
        std::fs::write(&self.path, value).map_err(PinError)
    }
}

impl ErrorType for FilePin {
    type Error = PinError;
}

impl OutputPin for FilePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write("0\n")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write("1\n")
    }
}

/// Output selected at runtime.
#[derive(Debug, Clone)]
pub enum RelayPin {
    Memory(MemoryPin),
    File(FilePin),
}

impl ErrorType for RelayPin {
    type Error = PinError;
}

impl OutputPin for RelayPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        match self {
            RelayPin::Memory(pin) => Ok(pin.set_low()?),
            RelayPin::File(pin) => pin.set_low(),
        }
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        match self {
            RelayPin::Memory(pin) => Ok(pin.set_high()?),
            RelayPin::File(pin) => pin.set_high(),
        }
    }
}
