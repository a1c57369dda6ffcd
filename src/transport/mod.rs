//! Length-prefixed binary channel from a capture endpoint to the processing endpoint.
//!
//! Wire format, one TCP stream per device:
//!
//! ```text
//! record    = length payload
//! length    = u64, little-endian, number of payload bytes
//! stream    = record(device id, UTF-8) record(encoded frame)*
//! ```
//!
//! Data flows one way only. There are no acknowledgements; TCP flow control is the only backpressure.
mod codec;
mod errors;
mod sender;

pub use self::{
    codec::{read_handshake, read_record, write_handshake, write_record, LENGTH_PREFIX_BYTES, MAX_DEVICE_ID_BYTES},
    errors::TransportError,
    sender::FrameSender,
};
