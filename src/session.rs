use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::client::{Callback, CloseReason, SessionState};
use crate::codec::CommandCodec;
use crate::commands::{Command, CommandName};
use crate::decoder;
use crate::frame::Frame;
use crate::subscription::{Flow, Subscription};
use crate::transport::Transport;
use crate::{Error, Result};

/// A command waiting to be written.
pub(crate) struct Request {
    pub(crate) command: Command,
    pub(crate) callback: Callback,
}

/// A written command waiting for its reply.
pub(crate) struct Pending {
    pub(crate) name: CommandName,
    /// The channel or pattern arguments of subscription commands; empty for anything else.
    pub(crate) channels: Vec<Bytes>,
    pub(crate) callback: Callback,
}

/// Server error replies are delivered as failed outcomes.
pub(crate) fn into_reply(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(msg) => Err(Error::Server(msg)),
        frame => Ok(frame),
    }
}

impl From<&Error> for CloseReason {
    fn from(error: &Error) -> Self {
        match error {
            Error::ConnectionClosed => CloseReason::PeerClosed,
            error => CloseReason::Fault(error.to_string()),
        }
    }
}

/// Moves the session to `Closed`. Only the first reason is kept.
fn close(state: &watch::Sender<SessionState>, reason: CloseReason) {
    state.send_if_modified(|current| match current {
        SessionState::Connected => {
            info!(?reason, "session closed");
            *current = SessionState::Closed(reason);
            true
        }
        SessionState::Closed(_) => false,
    });
}

/// One connection: a writer task encoding commands in call order, and a reader task decoding
/// replies in the same order.
pub(crate) struct Session {
    id: Uuid,
    requests: mpsc::UnboundedSender<Request>,
    state: Arc<watch::Sender<SessionState>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    pub(crate) fn start<S>(handle: &Handle, stream: S) -> Session
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (read_half, write_half) = tokio::io::split(stream);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Connected);
        let state = Arc::new(state);

        let reader = Reader {
            transport: Transport::new(read_half),
            pending: pending_rx,
            backlog: VecDeque::new(),
        };

        let reader = handle.spawn(until_closed(
            state.subscribe(),
            reader.run(id, state.clone()),
        ));
        let writer = handle.spawn(until_closed(
            state.subscribe(),
            write_loop(id, write_half, requests_rx, pending_tx, state.clone()),
        ));

        info!(session = %id, "session started");

        Session {
            id,
            requests: requests_tx,
            state,
            reader,
            writer,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn send(&self, request: Request) -> Result<()> {
        if *self.state.borrow() != SessionState::Connected {
            return Err(Error::NotConnected);
        }

        self.requests
            .send(request)
            .map_err(|_| Error::NotConnected)
    }

    /// Stops both tasks. Callbacks still waiting for a reply are dropped without being called.
    pub(crate) fn shutdown(&self) {
        self.reader.abort();
        self.writer.abort();
        close(&self.state, CloseReason::Disconnected);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Waits until the session is closed and returns why.
pub(crate) async fn wait_closed(state: &mut watch::Receiver<SessionState>) -> CloseReason {
    loop {
        let current = state.borrow_and_update().clone();
        if let SessionState::Closed(reason) = current {
            return reason;
        }
        if state.changed().await.is_err() {
            return CloseReason::Disconnected;
        }
    }
}

/// Runs `task` until it finishes or the session closes, whichever comes first.
async fn until_closed(mut state: watch::Receiver<SessionState>, task: impl Future<Output = ()>) {
    tokio::select! {
        _ = task => {}
        _ = wait_closed(&mut state) => {}
    }
}

#[instrument(name = "writer", skip_all, fields(session = %id))]
async fn write_loop<W>(
    id: Uuid,
    writer: W,
    mut requests: mpsc::UnboundedReceiver<Request>,
    pending: mpsc::UnboundedSender<Pending>,
    state: Arc<watch::Sender<SessionState>>,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, CommandCodec);

    while let Some(Request { command, callback }) = requests.recv().await {
        debug!(command = %command.name(), args = command.args().len(), "writing command");

        // The reader has to know about the reply before the server can possibly send it.
        let name = command.name();
        let channels = if name.takes_channels() {
            command.args().to_vec()
        } else {
            Vec::new()
        };
        if pending
            .send(Pending {
                name,
                channels,
                callback,
            })
            .is_err()
        {
            break;
        }

        if let Err(e) = sink.send(command).await {
            error!(%e, "failed to write command");
            close(&state, CloseReason::from(&e));
            break;
        }
    }
}

struct Reader<R> {
    transport: Transport<R>,
    pending: mpsc::UnboundedReceiver<Pending>,
    /// Commands taken off the channel but not decoded yet, in issue order.
    backlog: VecDeque<Pending>,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    #[instrument(name = "reader", skip_all, fields(session = %id))]
    async fn run(mut self, id: Uuid, state: Arc<watch::Sender<SessionState>>) {
        let reason = loop {
            let next = match self.next_pending().await {
                Ok(Some(next)) => next,
                Ok(None) => break CloseReason::Disconnected,
                Err(reason) => break reason,
            };

            let result = if next.name.is_subscription() {
                self.subscription(next).await
            } else {
                self.reply(next).await
            };

            if let Err(reason) = result {
                break reason;
            }
        };

        close(&state, reason);
    }

    /// Waits for the next command to decode a reply for. While idle, the stream is watched so
    /// that a peer close is noticed without a command in flight.
    async fn next_pending(&mut self) -> std::result::Result<Option<Pending>, CloseReason> {
        if let Some(next) = self.backlog.pop_front() {
            return Ok(Some(next));
        }

        tokio::select! {
            biased;
            next = self.pending.recv() => Ok(next),
            readable = self.transport.wait_readable() => match readable {
                Ok(true) => {
                    warn!("received data with no command pending");
                    Err(CloseReason::Fault("unsolicited data on the stream".to_string()))
                }
                Ok(false) => Err(CloseReason::PeerClosed),
                Err(e) => Err(CloseReason::from(&e)),
            },
        }
    }

    async fn reply(&mut self, mut pending: Pending) -> std::result::Result<(), CloseReason> {
        match decoder::read_frame(&mut self.transport).await {
            Ok(frame) => {
                debug!(command = %pending.name, %frame, "received reply");
                (pending.callback)(into_reply(frame));
                Ok(())
            }
            Err(e) => {
                error!(command = %pending.name, %e, "failed to decode reply");
                let reason = CloseReason::from(&e);
                (pending.callback)(Err(e));
                Err(reason)
            }
        }
    }

    async fn subscription(&mut self, pending: Pending) -> std::result::Result<(), CloseReason> {
        let mut subscription = Subscription::new(pending);
        for pending in self.backlog.drain(..) {
            subscription.adopt(pending);
        }

        loop {
            let frame = match decoder::read_frame(&mut self.transport).await {
                Ok(frame) => frame,
                Err(e) => {
                    error!(%e, "failed to decode pushed message");
                    let reason = CloseReason::from(&e);
                    subscription.fail(e);
                    return Err(reason);
                }
            };

            // Anything written since the last read may be answered by this frame.
            while let Ok(pending) = self.pending.try_recv() {
                subscription.adopt(pending);
            }

            debug!(%frame, open_channels = subscription.open_channels(), "received pushed message");
            if subscription.deliver(frame) == Flow::Done {
                debug!("subscription ended");
                self.backlog = subscription.into_adopted();
                return Ok(());
            }
        }
    }
}
