// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use spin::Mutex;

pub use crate::{print, println};

/// Interface for a console driver.
pub trait ConsoleDriver: Sync {
    /// Writes `bytes` to the console.
    fn write_bytes(&self, bytes: &[u8]);
}

/// Represents the system console, used by the `print!` and `println!` macros.
/// Writes are dropped until a platform driver is installed with `set_driver()`.
pub struct Console {
    driver: Option<&'static dyn ConsoleDriver>,
}

impl Console {
    const fn new() -> Self {
        Self { driver: None }
    }

    /// Sets the driver for the system console.
    pub fn set_driver(driver: &'static dyn ConsoleDriver) {
        CONSOLE.lock().driver = Some(driver);
    }
}

/// The `Console` singleton.
pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// `print` macro based on writing to `CONSOLE`.
#[macro_export]
macro_rules! print {
    ($($args:tt)*) => {
        {
            use core::fmt::Write;
            write!($crate::print::CONSOLE.lock(), $($args)*).unwrap();
        }
    };
}

/// `println` macro based on writing to `CONSOLE`.
#[macro_export]
macro_rules! println {
    ($($args:tt)*) => {
        {
            use core::fmt::Write;
            writeln!($crate::print::CONSOLE.lock(), $($args)*).unwrap();
        }
    };
}

impl core::fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        if let Some(w) = self.driver {
            w.write_bytes(s.as_bytes());
        }
        Ok(())
    }
}
