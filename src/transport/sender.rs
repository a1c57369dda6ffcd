use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::Instant;

use crate::transport::{write_handshake, write_record, TransportError};

// Longest wait between frames; lower target rates are capped to it
const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(3600);

/// Minimum gap between frames for a target rate. None (unthrottled) for zero, negative or NaN.
fn frame_interval(target_fps: Option<f32>) -> Option<Duration> {
    target_fps.filter(|fps| *fps > 0.0).map(|fps| {
        Duration::try_from_secs_f32(1.0 / fps)
            .unwrap_or(MAX_FRAME_INTERVAL)
            .min(MAX_FRAME_INTERVAL)
    })
}

/// Capture-side end of a FrameTransport connection.
///
/// Frames are written back to back; when a target FPS is set, `send_frame` sleeps so that
/// consecutive frames are at least `1 / fps` apart.
pub struct FrameSender {
    stream: TcpStream,
    device_id: String,
    min_interval: Option<Duration>,
    last_sent: Option<Instant>,
    frames_sent: u64,
    bytes_sent: u64,
}

impl FrameSender {
    /// Connects and performs the device identifier handshake
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        device_id: &str,
        target_fps: Option<f32>,
    ) -> Result<Self, TransportError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        write_handshake(&mut stream, device_id).await?;
        tracing::info!(device_id, "handshake sent");
        Ok(FrameSender {
            stream,
            device_id: device_id.to_string(),
            min_interval: frame_interval(target_fps),
            last_sent: None,
            frames_sent: 0,
            bytes_sent: 0,
        })
    }
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
    /// Sends one encoded frame, waiting first if the target cadence would be exceeded
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if let (Some(interval), Some(last)) = (self.min_interval, self.last_sent) {
            tokio::time::sleep_until(last + interval).await;
        }
        let started = Instant::now();
        write_record(&mut self.stream, payload).await?;
        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(100) {
            tracing::warn!(device_id = %self.device_id, ms = elapsed.as_millis() as u64, "slow network: frame send took long");
        }
        self.last_sent = Some(started);
        self.frames_sent += 1;
        self.bytes_sent += payload.len() as u64;
        Ok(())
    }
    /// Shuts the write half down so the receiver sees a clean close
    pub async fn close(mut self) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt;
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        let interval = frame_interval(Some(10.0)).unwrap();
        assert!(interval >= Duration::from_millis(99) && interval <= Duration::from_millis(101));
        assert_eq!(frame_interval(Some(0.5)), Some(Duration::from_secs(2)));
        assert_eq!(frame_interval(None), None);
        assert_eq!(frame_interval(Some(0.0)), None);
        assert_eq!(frame_interval(Some(-5.0)), None);
        assert_eq!(frame_interval(Some(f32::NAN)), None);
    }

    #[test]
    fn test_tiny_rate_is_capped() {
        // 1 / 1e-40 overflows f32 to infinity
        assert_eq!(frame_interval(Some(1e-40)), Some(MAX_FRAME_INTERVAL));
        assert_eq!(frame_interval(Some(1e-9)), Some(MAX_FRAME_INTERVAL));
        assert_eq!(frame_interval(Some(f32::MIN_POSITIVE)), Some(MAX_FRAME_INTERVAL));
    }
}
