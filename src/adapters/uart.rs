//! ESP-IDF UART adapter for the modem link.
//!
//! The EC600S sits on UART1 at 115200 8N1 without flow control.  The
//! parser task reads while callers write, so the driver is shared by
//! reference across tasks.

use core::time::Duration;

use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::{AnyIOPin, InputPin, OutputPin};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::uart::{config::Config, Uart, UartDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::sys::EspError;
use log::info;

use crate::at::SerialPort;

/// Default modem baud rate.
pub const BAUD: u32 = 115_200;

/// `SerialPort` over an installed ESP-IDF UART driver.
pub struct UartPort {
    driver: UartDriver<'static>,
}

// SAFETY: `uart_read_bytes` and `uart_write_bytes` take the driver's
// internal RX and TX locks respectively, so concurrent `&self` calls
// from the parser task and a caller task do not race.
unsafe impl Sync for UartPort {}

impl UartPort {
    /// Install the UART driver on `uart` with the given pins.
    pub fn new<U: Uart>(
        uart: impl Peripheral<P = U> + 'static,
        tx: impl Peripheral<P = impl OutputPin> + 'static,
        rx: impl Peripheral<P = impl InputPin> + 'static,
        baud: u32,
    ) -> Result<Self, EspError> {
        let config = Config::new().baudrate(Hertz(baud));
        let driver = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &config,
        )?;
        info!("MODEM: UART{} up at {} baud", U::port() as u32, baud);
        Ok(Self { driver })
    }
}

impl SerialPort for UartPort {
    type Error = EspError;

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
        self.driver.read(buf, TickType::from(timeout).ticks())
    }

    fn write_all(&self, mut data: &[u8]) -> Result<(), Self::Error> {
        while !data.is_empty() {
            let n = self.driver.write(data)?;
            data = &data[n..];
        }
        Ok(())
    }
}
