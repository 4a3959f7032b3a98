//! Blocking delay adapter for bring-up settle waits.
//!
//! - **`target_os = "espidf"`**: delegates to `esp_idf_hal::delay::FreeRtos`
//!   so a settling modem yields the CPU to other tasks.
//! - **`not(target_os = "espidf")`**: `std::thread::sleep`, for host-side
//!   testing and simulation.

use embedded_hal::delay::DelayNs;

/// Delay that parks the calling task.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskDelay;

impl TaskDelay {
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(all(target_os = "espidf", feature = "espidf"))]
impl DelayNs for TaskDelay {
    fn delay_ns(&mut self, ns: u32) {
        esp_idf_hal::delay::FreeRtos.delay_ns(ns);
    }

    fn delay_ms(&mut self, ms: u32) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }
}

#[cfg(not(all(target_os = "espidf", feature = "espidf")))]
impl DelayNs for TaskDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(core::time::Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(core::time::Duration::from_millis(u64::from(ms)));
    }
}
