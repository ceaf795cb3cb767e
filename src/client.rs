use std::fmt;
use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{info, instrument};

use crate::commands::{with_commands, Command, CommandName, IntoArgs};
use crate::frame::Frame;
use crate::session::{self, Request, Session};
use crate::{Error, Result};

/// Receives the outcome of a command: the decoded reply, a server error reply as
/// `Err(Error::Server)`, or the fault that closed the session.
///
/// Called exactly once per command, except for `subscribe` and `psubscribe`, whose callback
/// receives every confirmation and message of the channels named in that call.
pub type Callback = Box<dyn FnMut(Result<Frame>) + Send + 'static>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Closed(CloseReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect` was called or the client was dropped.
    Disconnected,
    /// The server closed the connection.
    PeerClosed,
    /// Decoding or I/O failed. The stream can no longer be trusted.
    Fault(String),
}

/// A Redis client owning at most one connection.
///
/// Every command method writes the command and returns right away; the reply is delivered to
/// the callback from the client's runtime once it has been decoded. Replies are matched to
/// commands by order, so callbacks run in the order their commands were issued.
pub struct Client {
    handle: Handle,
    session: Option<Session>,
}

impl Client {
    /// Creates a disconnected client. Session tasks and callbacks run on `handle`.
    pub fn new(handle: Handle) -> Client {
        Client {
            handle,
            session: None,
        }
    }

    #[instrument(skip(self))]
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        info!("connected to {}:{}", host, port);
        self.attach(stream);

        Ok(())
    }

    /// Starts a session over an already established stream, replacing any previous one.
    pub fn attach<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.session = Some(Session::start(&self.handle, stream));
    }

    /// Closes the connection. Callbacks of commands still waiting for a reply are never called.
    pub fn disconnect(&mut self) {
        if let Some(session) = &self.session {
            info!(session = %session.id(), "disconnecting");
            session.shutdown();
        }
    }

    /// The state of the current session, or `None` if `connect` was never called.
    pub fn state(&self) -> Option<SessionState> {
        self.session.as_ref().map(Session::state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == Some(SessionState::Connected)
    }

    /// Waits until the current session closes, whether by `disconnect`, by the server, or after
    /// a protocol fault. Returns `None` if `connect` was never called.
    pub async fn closed(&self) -> Option<CloseReason> {
        let mut state = self.session.as_ref()?.watch();
        Some(session::wait_closed(&mut state).await)
    }

    /// Sends a command by name.
    ///
    /// Fails with `UnknownCommand` for names outside the recognized set, `NotConnected` when no
    /// session is open and `MissingCallback` when `callback` is `None`. Nothing is written in
    /// any of these cases.
    pub fn send(
        &self,
        name: &str,
        args: impl IntoArgs,
        callback: Option<Callback>,
    ) -> Result<&Self> {
        let command = Command::parse(name, args)?;
        self.dispatch(command, callback)
    }

    /// Sends an already built command.
    pub fn call<F>(&self, command: Command, callback: F) -> Result<&Self>
    where
        F: FnMut(Result<Frame>) + Send + 'static,
    {
        self.dispatch(command, Some(Box::new(callback)))
    }

    /// Sends a command by name and resolves to its reply.
    ///
    /// The command is written when `execute` is called, not when the future is first polled,
    /// so its place in the pipeline is fixed by call order.
    pub fn execute(
        &self,
        name: &str,
        args: impl IntoArgs,
    ) -> impl Future<Output = Result<Frame>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let callback: Callback = Box::new(move |reply| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(reply);
            }
        });

        let sent = self.send(name, args, Some(callback)).map(|_| ());

        async move {
            sent?;
            rx.await.map_err(|_| Error::ConnectionClosed)?
        }
    }

    fn dispatch(&self, command: Command, callback: Option<Callback>) -> Result<&Self> {
        let session = match &self.session {
            Some(session) if session.state() == SessionState::Connected => session,
            _ => return Err(Error::NotConnected),
        };
        let callback = callback.ok_or(Error::MissingCallback)?;

        session.send(Request { command, callback })?;
        Ok(self)
    }
}

macro_rules! define_client_methods {
    ($($(#[$meta:meta])* $variant:ident => $wire:literal, $method:ident;)*) => {
        impl Client {
            $(
                #[doc = concat!("Sends `", $wire, "`.")]
                ///
                $(#[$meta])*
                pub fn $method<A, F>(&self, args: A, callback: F) -> Result<&Self>
                where
                    A: IntoArgs,
                    F: FnMut(Result<Frame>) + Send + 'static,
                {
                    self.dispatch(Command::new(CommandName::$variant, args), Some(Box::new(callback)))
                }
            )*
        }
    };
}

with_commands!(define_client_methods);

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session.as_ref().map(Session::id))
            .field("state", &self.state())
            .finish()
    }
}
