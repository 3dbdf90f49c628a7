//! The mbus module contains the link-layer side of the customer interface:
//! the serial reader, the long frame codec and the splitter that turns a raw
//! window into a ciphered envelope.

pub mod envelope;
pub mod frame;
pub mod serial;
pub mod serial_mock;

pub use envelope::{split, FrameEnvelope, FrameError};
pub use frame::{pack_frame, parse_frame, verify_frame, MBusFrame};
pub use serial::{MeterLink, RawWindow, SerialConfig, SerialLink};
pub use serial_mock::MockSerialPort;
