//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives a real `AtAgent` and its
//! parser task against a scripted serial modem.  All tests run on the
//! host (x86_64) with no real hardware required.

#![cfg(not(target_os = "espidf"))]

mod mock_modem;
mod session_tests;
