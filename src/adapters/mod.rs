//! Adapters: concrete implementations of the port traits the session
//! layer is generic over.
//!
//! | Adapter | Implements   | Connects to                        |
//! |---------|--------------|------------------------------------|
//! | `delay` | DelayNs      | FreeRTOS `vTaskDelay` / host sleep |
//! | `uart`  | SerialPort   | ESP-IDF UART driver                |

pub mod delay;
#[cfg(all(target_os = "espidf", feature = "espidf"))]
pub mod uart;
