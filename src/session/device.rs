use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::mot::CalibratedBoundary;
use crate::session::{
    BoundaryStore, DetectorFactory, DeviceEvent, FramePipeline, FrameQueue, SessionError, SessionStats,
    SinkDispatcher,
};
use crate::transport::{read_handshake, read_record, TransportError};

// Read buffer in front of the socket
const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Everything a session needs from the server, shared by all sessions
pub struct SessionContext {
    pub config: Config,
    pub boundaries: Arc<dyn BoundaryStore>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub dispatcher: SinkDispatcher,
}

/// Manager-side handle of a registered session. Dropping it stops the session.
pub(crate) struct SessionHandle {
    pub(crate) session_id: Uuid,
    stop: oneshot::Sender<()>,
    boundary: crossbeam_channel::Sender<Option<CalibratedBoundary>>,
}

impl SessionHandle {
    pub(crate) fn stop(self) {
        let _ = self.stop.send(());
    }
    /// Forwards a boundary change to the processing worker; applied before its next frame
    pub(crate) fn update_boundary(&self, boundary: Option<CalibratedBoundary>) {
        let _ = self.boundary.send(boundary);
    }
}

/// Lifecycle messages from session tasks to the manager
pub(crate) enum Notice {
    Registered {
        device_id: String,
        handle: SessionHandle,
        // Manager answers false when the device is stopped
        ack: oneshot::Sender<bool>,
    },
    Finished {
        device_id: String,
        session_id: Uuid,
    },
}

enum Ending {
    Disconnected,
    Stopped,
    WorkerExited,
    Failed(SessionError),
}

/// Serves one accepted connection from handshake to teardown
pub(crate) async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    notices: mpsc::UnboundedSender<Notice>,
) {
    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, stream);
    let device_id = match read_handshake(&mut reader, ctx.config.server.handshake_timeout()).await {
        Ok(device_id) => device_id,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "handshake failed, closing connection");
            return;
        }
    };
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("session", %device_id, %session_id);
    serve(reader, peer, device_id, session_id, ctx, notices)
        .instrument(span)
        .await
}

async fn serve(
    mut reader: BufReader<TcpStream>,
    peer: SocketAddr,
    device_id: String,
    session_id: Uuid,
    ctx: Arc<SessionContext>,
    notices: mpsc::UnboundedSender<Notice>,
) {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let (boundary_tx, boundary_rx) = crossbeam_channel::unbounded();
    let (ack_tx, ack_rx) = oneshot::channel();
    let registered = notices.send(Notice::Registered {
        device_id: device_id.clone(),
        handle: SessionHandle {
            session_id,
            stop: stop_tx,
            boundary: boundary_tx,
        },
        ack: ack_tx,
    });
    if registered.is_err() || !ack_rx.await.unwrap_or(false) {
        let err = SessionError::DeviceStopped(device_id.clone());
        tracing::warn!(%peer, error = %err, "session refused");
        return;
    }
    tracing::info!(%peer, "device connected");

    let boundary = match ctx.boundaries.get_boundary(&device_id) {
        Ok(Some(boundary)) => Some(boundary),
        Ok(None) => {
            tracing::warn!("no boundary configured for device, crossings will not be reported");
            None
        }
        Err(err) => {
            tracing::error!(error = %err, "boundary lookup failed, crossings will not be reported");
            None
        }
    };
    let pipeline = FramePipeline::new(&ctx.config, ctx.detectors.create(&device_id), boundary);
    let (mut queue, frames) = FrameQueue::bounded(ctx.config.server.queue_capacity, ctx.config.server.overflow);
    let cancel = Arc::new(AtomicBool::new(false));
    let mut worker = {
        let cancel = cancel.clone();
        let dispatcher = ctx.dispatcher.clone();
        let device_id = device_id.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            run_worker(pipeline, frames, boundary_rx, cancel, dispatcher, &device_id, session_id)
        })
    };

    let max_record_bytes = ctx.config.server.max_record_bytes;
    let mut worker_outcome = None;
    let mut ending = loop {
        tokio::select! {
            _ = &mut stop_rx => break Ending::Stopped,
            joined = &mut worker => {
                worker_outcome = Some(joined);
                break Ending::WorkerExited;
            }
            record = read_record(&mut reader, max_record_bytes) => match record {
                Ok(payload) => queue.push(payload),
                Err(TransportError::Closed) => break Ending::Disconnected,
                Err(err) => break Ending::Failed(err.into()),
            },
        }
    };

    // Close the socket and the worker input before waiting on the worker
    if matches!(ending, Ending::Stopped) {
        cancel.store(true, Ordering::Relaxed);
    }
    let frames_dropped = queue.dropped();
    drop(queue);
    drop(reader);
    let worker_outcome = match worker_outcome {
        Some(outcome) => outcome,
        None => worker.await,
    };
    let stats = match worker_outcome {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(err)) => {
            ending = Ending::Failed(err);
            None
        }
        Err(err) => {
            ending = Ending::Failed(SessionError::Worker(err.to_string()));
            None
        }
    };

    match &ending {
        Ending::Disconnected => tracing::info!("device disconnected"),
        Ending::Stopped => tracing::info!("session stopped"),
        Ending::WorkerExited => tracing::info!("processing ended"),
        Ending::Failed(err) => tracing::warn!(error = %err, "session closed"),
    }
    if let Some(stats) = stats {
        let stats = SessionStats { frames_dropped, ..stats };
        tracing::info!(
            frames = stats.frames_processed,
            dropped = stats.frames_dropped,
            decode_failures = stats.decode_failures,
            detect_failures = stats.detect_failures,
            events = stats.events,
            fps = %format!("{:.2}", stats.fps()),
            "session summary"
        );
    }
    let _ = notices.send(Notice::Finished { device_id, session_id });
}

fn run_worker(
    mut pipeline: FramePipeline,
    frames: Receiver<Vec<u8>>,
    boundary_updates: Receiver<Option<CalibratedBoundary>>,
    cancel: Arc<AtomicBool>,
    dispatcher: SinkDispatcher,
    device_id: &str,
    session_id: Uuid,
) -> Result<SessionStats, SessionError> {
    while let Ok(payload) = frames.recv() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        for boundary in boundary_updates.try_iter() {
            tracing::info!(configured = boundary.is_some(), "boundary updated");
            pipeline.set_boundary(boundary);
        }
        let Some(processed) = pipeline.process(payload)? else {
            continue;
        };
        for event in processed.events {
            tracing::info!(
                object_id = event.object_id,
                label = %event.label,
                direction = event.direction.as_str(),
                "boundary crossed"
            );
            dispatcher.dispatch(DeviceEvent::new(device_id, session_id, event));
        }
    }
    Ok(pipeline.stats())
}
