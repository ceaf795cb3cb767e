//! A small non-blocking client for the Redis serialization protocol (RESP v2).
//!
//! Commands are written to a single duplex stream and replies are decoded incrementally as bytes
//! arrive. Replies are paired with their commands purely by order: the reader task decodes one
//! reply per pending command, in the order the commands were written. `SUBSCRIBE` and
//! `PSUBSCRIBE` are the exception, their callback keeps receiving pushed messages until every
//! channel is unsubscribed.
//!
//! ```no_run
//! use toredis::Client;
//!
//! # async fn run() -> toredis::Result<()> {
//! let mut client = Client::new(tokio::runtime::Handle::current());
//! client.connect("127.0.0.1", 6379).await?;
//!
//! client.set(("greeting", "hello"), |reply| println!("{:?}", reply))?;
//! let value = client.execute("GET", ["greeting"]).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod commands;
pub mod decoder;
pub mod error;
pub mod frame;
mod session;
pub mod subscription;
pub mod transport;

pub use client::{Callback, Client, CloseReason, SessionState};
pub use commands::{Arg, Command, CommandName, IntoArgs};
pub use error::Error;
pub use frame::Frame;

pub type Result<T> = std::result::Result<T, Error>;
