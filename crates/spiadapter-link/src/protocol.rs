//! Adapter wire protocol constants, types and frame encoding
//!
//! Every command is a one-byte ASCII opcode followed by fixed and
//! variable fields. Every response (except the raw echo used for the
//! handshake) starts with a status byte, [`STATUS_OK`] or [`STATUS_ERROR`].

use crate::error::{AdapterError, Result};

// Command opcodes
/// Echo a byte back (handshake probe). The reply has no status byte.
pub const CMD_ECHO: u8 = b'e';
/// Query adapter identity
pub const CMD_INFO: u8 = b'i';
/// Perform an SPI transaction
pub const CMD_SPI_SEND: u8 = b's';
/// Set auxiliary pin mode
pub const CMD_AUX_MODE: u8 = b'm';
/// Read all auxiliary pins
pub const CMD_AUX_READ: u8 = b'a';
/// Write auxiliary pins under a mask
pub const CMD_AUX_WRITE: u8 = b'b';

/// Status byte for a successful response
pub const STATUS_OK: u8 = b'K';
/// Status byte for an error response, followed by one error code byte
pub const STATUS_ERROR: u8 = b'E';

/// Probe bytes sent during the echo handshake, one full pass must succeed
pub const ECHO_PROBES: [u8; 4] = [0x00, 0xFF, 0x5A, 0xA5];

/// Identification signature at the start of the identity payload
pub const ADAPTER_SIGNATURE: [u8; 3] = *b"SPI";
/// Size of the identity OK payload
pub const ADAPTER_INFO_SIZE: usize = 7;

/// Size of the SPI transaction header following the opcode
pub const SPI_HEADER_SIZE: usize = 6;
/// Size of the OK payload of an SPI transaction (big-endian byte count)
pub const SPI_COUNT_SIZE: usize = 2;

/// SPI clock granularity of the adapter
pub const SPI_SPEED_STEP_HZ: u32 = 25_000;
/// Lowest accepted SPI clock
pub const SPI_MIN_SPEED_HZ: u32 = 25_000;
/// Highest accepted SPI clock
pub const SPI_MAX_SPEED_HZ: u32 = 4_000_000;
/// Speed byte range on the wire
pub const SPI_SPEED_BYTE_MIN: u8 = 1;
pub const SPI_SPEED_BYTE_MAX: u8 = 160;

/// Highest chip select index
pub const MAX_CHIP_SELECT: u8 = 3;
/// Number of auxiliary pins
pub const AUX_PIN_COUNT: u8 = 8;

/// Config byte bits of an SPI transaction
pub mod config {
    /// Chip select index, bits 1:0
    pub const CS_MASK: u8 = 0b0000_0011;
    /// SPI mode, bits 3:2
    pub const MODE_SHIFT: u8 = 2;
    pub const MODE_MASK: u8 = 0b0000_1100;
    /// Return the bytes clocked in on MISO
    pub const READ: u8 = 0b0001_0000;
}

/// Adapter protocol generation, taken from the identity version byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// 256-byte transaction buffer
    V3,
    /// 1024-byte transaction buffer
    V4,
}

impl ProtocolVersion {
    /// Map the identity version byte to a known protocol generation
    pub fn from_byte(version: u8) -> Option<Self> {
        match version {
            0x03 => Some(ProtocolVersion::V3),
            0x04 => Some(ProtocolVersion::V4),
            _ => None,
        }
    }

    /// Version byte as reported by the adapter
    pub fn as_byte(self) -> u8 {
        match self {
            ProtocolVersion::V3 => 0x03,
            ProtocolVersion::V4 => 0x04,
        }
    }

    /// Maximum number of bytes (data + extra) in one SPI transaction
    pub fn max_transaction_size(self) -> usize {
        match self {
            ProtocolVersion::V3 => 256,
            ProtocolVersion::V4 => 1024,
        }
    }
}

impl core::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_byte())
    }
}

/// Adapter identity returned by the `i` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Negotiated protocol generation
    pub version: ProtocolVersion,
    /// Raw identity payload
    pub raw: [u8; ADAPTER_INFO_SIZE],
}

impl AdapterInfo {
    /// Validate and decode an identity payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: [u8; ADAPTER_INFO_SIZE] = payload.try_into().map_err(|_| {
            AdapterError::Connection(format!(
                "unexpected adapter identity: expected {} bytes, got {}",
                ADAPTER_INFO_SIZE,
                payload.len()
            ))
        })?;

        if raw[..3] != ADAPTER_SIGNATURE {
            return Err(AdapterError::Connection(format!(
                "unexpected adapter identity: {:02X?}",
                raw
            )));
        }

        let version = ProtocolVersion::from_byte(raw[3]).ok_or_else(|| {
            AdapterError::Connection(format!("unsupported protocol version {}", raw[3]))
        })?;

        Ok(Self { version, raw })
    }

    /// Bytes following the version byte, reserved by the firmware
    pub fn reserved(&self) -> &[u8] {
        &self.raw[4..]
    }

    /// Maximum SPI transaction size for this adapter
    pub fn max_transaction_size(&self) -> usize {
        self.version.max_transaction_size()
    }
}

/// SPI clock polarity/phase mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    #[default]
    Mode0 = 0,
    /// CPOL=0, CPHA=1
    Mode1 = 1,
    /// CPOL=1, CPHA=0
    Mode2 = 2,
    /// CPOL=1, CPHA=1
    Mode3 = 3,
}

impl SpiMode {
    /// Get the mode from its two-bit number, ignoring higher bits
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => SpiMode::Mode0,
            1 => SpiMode::Mode1,
            2 => SpiMode::Mode2,
            _ => SpiMode::Mode3,
        }
    }

    /// Get the mode from its number, `None` if outside 0..=3
    pub fn from_number(n: u8) -> Option<Self> {
        (n <= 3).then(|| Self::from_bits(n))
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Clock polarity
    pub fn cpol(self) -> u8 {
        (self as u8 >> 1) & 1
    }

    /// Clock phase
    pub fn cpha(self) -> u8 {
        self as u8 & 1
    }
}

/// Decoded SPI transaction config byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    /// Return MISO data in the response
    pub read: bool,
    pub mode: SpiMode,
    /// Chip select index (0-3)
    pub cs: u8,
}

impl SpiConfig {
    /// Pack into the wire config byte
    ///
    /// # Panics
    ///
    /// Panics if `cs` is greater than [`MAX_CHIP_SELECT`].
    pub fn pack(&self) -> u8 {
        assert!(
            self.cs <= MAX_CHIP_SELECT,
            "chip select {} out of range 0..={}",
            self.cs,
            MAX_CHIP_SELECT
        );
        let read = if self.read { config::READ } else { 0 };
        read | (self.mode.bits() << config::MODE_SHIFT) | self.cs
    }

    /// Unpack a wire config byte, reserved bits are ignored
    pub fn unpack(byte: u8) -> Self {
        Self {
            read: byte & config::READ != 0,
            mode: SpiMode::from_bits((byte & config::MODE_MASK) >> config::MODE_SHIFT),
            cs: byte & config::CS_MASK,
        }
    }
}

/// Convert an SPI clock in Hz to the adapter's speed byte
///
/// The adapter only supports multiples of 25 kHz. The requested speed is
/// rounded to the nearest step (ties to even) and clamped to the wire
/// range, so `byte_to_speed(speed_to_byte(hz))` is only close to `hz`.
/// This quantization is the firmware's convention and is intentional.
pub fn speed_to_byte(speed_hz: u32) -> u8 {
    let quot = speed_hz / SPI_SPEED_STEP_HZ;
    let rem = speed_hz % SPI_SPEED_STEP_HZ;
    let half = SPI_SPEED_STEP_HZ / 2;
    let rounded = if rem > half || (rem == half && quot % 2 == 1) {
        quot + 1
    } else {
        quot
    };
    rounded.clamp(SPI_SPEED_BYTE_MIN as u32, SPI_SPEED_BYTE_MAX as u32) as u8
}

/// Convert a speed byte back to the SPI clock in Hz the adapter will use
pub fn byte_to_speed(speed_byte: u8) -> u32 {
    speed_byte as u32 * SPI_SPEED_STEP_HZ
}

/// An SPI transaction request
///
/// Built with a small builder API, the defaults are chip select 0, mode 0,
/// 1 MHz, no extra bytes and read-back enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiTransfer<'a> {
    /// Bytes written on MOSI
    pub data: &'a [u8],
    /// Number of 0x00 bytes written after `data`, typically to clock in a reply
    pub extra_bytes: usize,
    /// Chip select index (0-3)
    pub cs: u8,
    pub mode: SpiMode,
    /// SPI clock in Hz (25 kHz - 4 MHz)
    pub speed_hz: u32,
    /// Return the bytes read on MISO
    pub read: bool,
}

impl<'a> SpiTransfer<'a> {
    /// Default SPI clock
    pub const DEFAULT_SPEED_HZ: u32 = 1_000_000;

    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            extra_bytes: 0,
            cs: 0,
            mode: SpiMode::Mode0,
            speed_hz: Self::DEFAULT_SPEED_HZ,
            read: true,
        }
    }

    pub fn extra_bytes(mut self, extra_bytes: usize) -> Self {
        self.extra_bytes = extra_bytes;
        self
    }

    pub fn cs(mut self, cs: u8) -> Self {
        self.cs = cs;
        self
    }

    pub fn mode(mut self, mode: SpiMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn speed_hz(mut self, speed_hz: u32) -> Self {
        self.speed_hz = speed_hz;
        self
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Total number of bytes clocked on the bus
    pub fn total_len(&self) -> usize {
        self.data.len() + self.extra_bytes
    }

    /// Byte count the adapter must report in its OK response
    pub fn expected_response_len(&self) -> usize {
        if self.read {
            self.total_len()
        } else {
            0
        }
    }

    /// Config byte for this transaction
    pub fn config(&self) -> SpiConfig {
        SpiConfig {
            read: self.read,
            mode: self.mode,
            cs: self.cs,
        }
    }

    /// Check the request against the adapter limits
    ///
    /// # Panics
    ///
    /// Panics if any field is out of range for an adapter with a
    /// `max_transaction_size` byte buffer.
    pub fn validate(&self, max_transaction_size: usize) {
        assert!(
            self.data.len() <= max_transaction_size,
            "SPI data length {} exceeds adapter maximum {}",
            self.data.len(),
            max_transaction_size
        );
        assert!(
            self.extra_bytes <= max_transaction_size,
            "SPI extra byte count {} exceeds adapter maximum {}",
            self.extra_bytes,
            max_transaction_size
        );
        assert!(
            self.total_len() <= max_transaction_size,
            "SPI transaction length {} exceeds adapter maximum {}",
            self.total_len(),
            max_transaction_size
        );
        assert!(
            self.cs <= MAX_CHIP_SELECT,
            "chip select {} out of range 0..={}",
            self.cs,
            MAX_CHIP_SELECT
        );
        assert!(
            (SPI_MIN_SPEED_HZ..=SPI_MAX_SPEED_HZ).contains(&self.speed_hz),
            "SPI speed {} Hz out of range {}..={}",
            self.speed_hz,
            SPI_MIN_SPEED_HZ,
            SPI_MAX_SPEED_HZ
        );
    }

    /// Validate and build the command frame
    ///
    /// # Panics
    ///
    /// See [`SpiTransfer::validate`].
    pub fn encode(&self, max_transaction_size: usize) -> Vec<u8> {
        self.validate(max_transaction_size);

        let data_len = self.data.len() as u16;
        let extra = self.extra_bytes as u16;

        let mut frame = Vec::with_capacity(1 + SPI_HEADER_SIZE + self.data.len());
        frame.push(CMD_SPI_SEND);
        frame.push(self.config().pack());
        frame.push(speed_to_byte(self.speed_hz));
        frame.extend_from_slice(&data_len.to_be_bytes());
        frame.extend_from_slice(&extra.to_be_bytes());
        frame.extend_from_slice(self.data);
        frame
    }
}

/// Auxiliary pin mode, numeric values match the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxPinMode {
    InputPulldown = 1,
    InputPullup = 2,
    Output = 3,
}

impl AuxPinMode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(AuxPinMode::InputPulldown),
            2 => Some(AuxPinMode::InputPullup),
            3 => Some(AuxPinMode::Output),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Bit mask of a single auxiliary pin
///
/// # Panics
///
/// Panics if `pin` is not a valid aux pin index (0-7).
pub fn aux_pin_mask(pin: u8) -> u8 {
    assert!(
        pin < AUX_PIN_COUNT,
        "aux pin {} out of range 0..={}",
        pin,
        AUX_PIN_COUNT - 1
    );
    1 << pin
}

/// Build an aux pin mode frame
///
/// # Panics
///
/// Panics if `pin` is not a valid aux pin index (0-7).
pub fn aux_mode_frame(pin: u8, mode: AuxPinMode) -> [u8; 3] {
    aux_pin_mask(pin);
    [CMD_AUX_MODE, pin, mode.as_byte()]
}

/// Build an aux pin write frame, only bits set in `mask` are applied
pub fn aux_write_frame(values: u8, mask: u8) -> [u8; 3] {
    [CMD_AUX_WRITE, values, mask]
}
