use crate::mot::BoundaryError;
use crate::transport::TransportError;

/// Frame payload could not be interpreted as an image
#[derive(Debug, thiserror::Error)]
#[error("frame of {bytes} bytes could not be decoded: {source}")]
pub struct DecodeError {
    pub bytes: usize,
    #[source]
    pub source: image::ImageError,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detection request failed: {0}")]
    Request(String),
    #[error("detection response could not be parsed: {0}")]
    Response(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("sink request failed: {0}")]
    Http(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("boundary store IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("boundary store is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid boundary for device {device_id}: {source}")]
    Invalid {
        device_id: String,
        #[source]
        source: BoundaryError,
    },
}

/// Reasons a device session ends abnormally
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{count} consecutive frames failed to decode")]
    TooManyDecodeFailures { count: u32 },
    #[error("device {0} is stopped")]
    DeviceStopped(String),
    #[error("processing worker failed: {0}")]
    Worker(String),
}

/// Malformed control-plane command line
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{command}' expects {expected} arguments, got {got}")]
    Arity {
        command: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid number '{0}'")]
    Number(String),
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
}
