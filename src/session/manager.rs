use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::mot::{Boundary, CalibratedBoundary};
use crate::session::device::{run_session, Notice, SessionContext, SessionHandle};
use crate::session::CommandParseError;
use crate::utils::{Point, Resolution};

// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
// Sessions still running after this long at shutdown are aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Control-plane requests accepted by a running `SessionManager`
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Allows the device to connect again after a `Stop`
    Start { device_id: String },
    /// Ends the device's session and refuses its connections until `Start`
    Stop { device_id: String },
    /// Stores a new calibration boundary (or clears it) and applies it to the live session
    UpdateBoundary {
        device_id: String,
        boundary: Option<CalibratedBoundary>,
    },
    Shutdown,
}

fn expect_args(command: &'static str, args: &[&str], expected: usize) -> Result<(), CommandParseError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CommandParseError::Arity {
            command,
            expected,
            got: args.len(),
        })
    }
}

fn number<T: FromStr>(raw: &str) -> Result<T, CommandParseError> {
    raw.parse().map_err(|_| CommandParseError::Number(raw.to_string()))
}

/// Text form used on the server console:
///
/// ```text
/// start <device>
/// stop <device>
/// boundary <device> <x1> <y1> <x2> <y2> <calib_width> <calib_height>
/// clear-boundary <device>
/// shutdown
/// ```
impl FromStr for SessionCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandParseError::Empty)?;
        let args: Vec<&str> = words.collect();
        match name.to_lowercase().as_str() {
            "start" => {
                expect_args("start", &args, 1)?;
                Ok(SessionCommand::Start {
                    device_id: args[0].to_string(),
                })
            }
            "stop" => {
                expect_args("stop", &args, 1)?;
                Ok(SessionCommand::Stop {
                    device_id: args[0].to_string(),
                })
            }
            "boundary" => {
                expect_args("boundary", &args, 7)?;
                let line = Boundary::new(
                    Point::new(number(args[1])?, number(args[2])?),
                    Point::new(number(args[3])?, number(args[4])?),
                );
                let calibration = Resolution::new(number(args[5])?, number(args[6])?);
                Ok(SessionCommand::UpdateBoundary {
                    device_id: args[0].to_string(),
                    boundary: Some(CalibratedBoundary::new(line, calibration)?),
                })
            }
            "clear-boundary" => {
                expect_args("clear-boundary", &args, 1)?;
                Ok(SessionCommand::UpdateBoundary {
                    device_id: args[0].to_string(),
                    boundary: None,
                })
            }
            "shutdown" | "quit" => {
                expect_args("shutdown", &args, 0)?;
                Ok(SessionCommand::Shutdown)
            }
            _ => Err(CommandParseError::Unknown(name.to_string())),
        }
    }
}

/// Accepts device connections and runs one independent session per device.
///
/// A failure inside one session never reaches the others: each runs in its own task with its
/// own tracker, crossing state and detector.
pub struct SessionManager {
    ctx: Arc<SessionContext>,
    // At most one live session per device id
    sessions: HashMap<String, SessionHandle>,
    stopped: HashSet<String>,
    tasks: JoinSet<()>,
    // Latest boundary store write; each write waits for the previous one
    persisting: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(ctx: SessionContext) -> Self {
        SessionManager {
            ctx: Arc::new(ctx),
            sessions: HashMap::new(),
            stopped: HashSet::new(),
            tasks: JoinSet::new(),
            persisting: None,
        }
    }
    /// Runs until `Shutdown` is received, then stops every session and waits for them.
    ///
    /// If the command channel is closed, the manager keeps serving without a control plane.
    pub async fn run(mut self, listener: TcpListener, mut commands: mpsc::Receiver<SessionCommand>) {
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
        let mut commands_open = true;
        match listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "listening for devices"),
            Err(err) => tracing::warn!(error = %err, "listening on unknown address"),
        }
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "connection accepted");
                        self.tasks.spawn(run_session(stream, peer, self.ctx.clone(), notice_tx.clone()));
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(notice) = notice_rx.recv() => self.on_notice(notice),
                command = commands.recv(), if commands_open => match command {
                    Some(SessionCommand::Shutdown) => break,
                    Some(command) => self.on_command(command),
                    None => {
                        tracing::warn!("command channel closed");
                        commands_open = false;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!(error = %err, "session task failed");
                    }
                }
            }
        }

        tracing::info!(sessions = self.sessions.len(), "shutting down");
        for (_, handle) in self.sessions.drain() {
            handle.stop();
        }
        drop(listener);
        // Sessions still in handshake get refused once their registration finds no manager
        drop(notice_rx);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "session task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "aborting sessions that did not stop in time");
            self.tasks.shutdown().await;
        }
        if let Some(persisting) = self.persisting.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, persisting).await.is_err() {
                tracing::warn!("boundary store write still pending at shutdown");
            }
        }
        tracing::info!("all sessions closed");
    }
    fn on_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Registered { device_id, handle, ack } => {
                if self.stopped.contains(&device_id) {
                    let _ = ack.send(false);
                    return;
                }
                let session_id = handle.session_id;
                if let Some(previous) = self.sessions.insert(device_id.clone(), handle) {
                    tracing::info!(%device_id, previous = %previous.session_id, "device reconnected, replacing session");
                    previous.stop();
                }
                if ack.send(true).is_err() {
                    // Session went away while waiting
                    self.remove_if_current(&device_id, session_id);
                }
            }
            Notice::Finished { device_id, session_id } => self.remove_if_current(&device_id, session_id),
        }
    }
    fn remove_if_current(&mut self, device_id: &str, session_id: uuid::Uuid) {
        if self.sessions.get(device_id).map(|h| h.session_id) == Some(session_id) {
            self.sessions.remove(device_id);
        }
    }
    /// Writes a boundary to the store off the control loop, in command order
    fn persist_boundary(&mut self, device_id: String, boundary: Option<CalibratedBoundary>) {
        let store = self.ctx.boundaries.clone();
        let previous = self.persisting.take();
        self.persisting = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let written = tokio::task::spawn_blocking(move || {
                if let Err(err) = store.set_boundary(&device_id, boundary) {
                    tracing::error!(%device_id, error = %err, "failed to store boundary");
                }
            })
            .await;
            if let Err(err) = written {
                tracing::error!(error = %err, "boundary store task failed");
            }
        }));
    }
    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { device_id } => {
                if self.stopped.remove(&device_id) {
                    tracing::info!(%device_id, "device started");
                } else {
                    tracing::debug!(%device_id, "device already started");
                }
            }
            SessionCommand::Stop { device_id } => {
                self.stopped.insert(device_id.clone());
                match self.sessions.remove(&device_id) {
                    Some(handle) => {
                        tracing::info!(%device_id, session_id = %handle.session_id, "stopping device");
                        handle.stop();
                    }
                    None => tracing::info!(%device_id, "device stopped while not connected"),
                }
            }
            SessionCommand::UpdateBoundary { device_id, boundary } => {
                if let Some(Err(err)) = boundary.as_ref().map(CalibratedBoundary::validate) {
                    tracing::warn!(%device_id, error = %err, "rejecting boundary update");
                    return;
                }
                if let Some(handle) = self.sessions.get(&device_id) {
                    handle.update_boundary(boundary);
                }
                self.persist_boundary(device_id.clone(), boundary);
                tracing::info!(%device_id, configured = boundary.is_some(), "boundary updated");
            }
            SessionCommand::Shutdown => {}
        }
    }
}
