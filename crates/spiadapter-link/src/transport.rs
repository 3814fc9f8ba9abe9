//! Transport layer abstraction for adapter communication
//!
//! The link only needs a byte stream with a bounded blocking read. The
//! native implementation is a serial port, tests use an in-memory
//! emulator.

use crate::error::Result;

/// Transport trait for reading and writing bytes
pub trait Transport {
    /// Write all bytes to the transport
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read with the transport's timeout
    ///
    /// Blocks until `buf` is full or the read timeout elapses and returns
    /// the number of bytes read. A short count is not an error here, the
    /// caller decides what it means.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Discard any bytes received but not yet read
    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }
}

#[cfg(feature = "serial")]
pub mod serial {
    //! Serial port transport implementation

    use super::*;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{ErrorKind, Read, Write};
    use std::time::{Duration, Instant};

    /// Baud rate used to open the port, the adapter is USB CDC so it is nominal
    const DEFAULT_BAUD: u32 = 115200;

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
        timeout: Duration,
    }

    impl SerialTransport {
        /// Open a serial port with the given read timeout
        pub fn open(device: &str, timeout: Duration) -> Result<Self> {
            let port = serialport::new(device, DEFAULT_BAUD)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(timeout)
                .open()?;

            log::info!("Opened serial port {} (timeout {:?})", device, timeout);

            Ok(Self { port, timeout })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            self.port.flush()?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let deadline = Instant::now() + self.timeout;
            let mut filled = 0;

            while filled < buf.len() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                self.port.set_timeout(remaining)?;

                match self.port.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::TimedOut => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.port.set_timeout(self.timeout)?;
                        return Err(e.into());
                    }
                }
            }

            // Restore timeout
            self.port.set_timeout(self.timeout)?;
            Ok(filled)
        }

        fn clear_input(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::Input)?;
            Ok(())
        }
    }
}
