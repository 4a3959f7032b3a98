//! Core-pinned spawning for the notification parser task.
//!
//! ESP-IDF implements `std::thread` on top of pthreads, which are thin
//! wrappers around FreeRTOS tasks.  `esp_pthread_set_cfg()` configures the
//! *next* `pthread_create()` from the calling thread, so the config/spawn
//! pair must not interleave with other thread creation on that thread.

use crate::error::{Error, Result};

/// CPU core identifiers for dual-core ESP32 parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU), shared with the protocol stacks.
    Pro = 0,
    /// Core 1 (APP_CPU).
    App = 1,
}

/// Placement of a spawned task.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// NUL-terminated task name, e.g. `"at-parser\0"`.
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

/// The parser reads the UART alongside lwIP on the protocol core.
pub const AT_PARSER: TaskSpec = TaskSpec {
    name: "at-parser\0",
    core: Core::Pro,
    priority: 10,
    stack_kb: 8,
};

/// Spawn `f` as a FreeRTOS task with the given placement.
#[cfg(all(target_os = "espidf", feature = "espidf"))]
pub fn spawn_pinned(
    spec: TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>> {
    // SAFETY: the config struct is fully initialised by the default
    // constructor and `thread_name` points at a 'static NUL-terminated str.
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = spec.priority as i32;
        cfg.stack_size = (spec.stack_kb * 1024) as i32;
        cfg.thread_name = spec.name.as_ptr() as *const _;
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK as i32 {
        log::error!("TASK: esp_pthread_set_cfg failed: {}", ret);
        return Err(Error::Io);
    }

    let display_name = spec.name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        spec.core,
        spec.priority,
        spec.stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
        .map_err(|_| Error::Io)
}

/// Host fallback: ignores core affinity and priority.
#[cfg(not(all(target_os = "espidf", feature = "espidf")))]
pub fn spawn_pinned(
    spec: TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> Result<std::thread::JoinHandle<()>> {
    let display_name = spec.name.trim_end_matches('\0');
    log::debug!(
        "Spawning '{}' (host, no core pinning, stack={}KB)",
        display_name,
        spec.stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(spec.stack_kb.max(64) * 1024)
        .spawn(f)
        .map_err(|_| Error::Io)
}
