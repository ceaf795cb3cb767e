use clap::Parser;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use toredis::{Client, CommandName, Error};

const HOST: &str = "127.0.0.1";
const PORT: u16 = 6379;

#[derive(Parser, Debug)]
struct Args {
    /// The server host
    #[arg(long, env = "REDIS_HOST", default_value = HOST)]
    host: String,

    /// The server port
    #[arg(short, long, env = "REDIS_PORT", default_value_t = PORT)]
    port: u16,

    /// The command to send, e.g. `GET` or `"CONFIG GET"`
    command: String,

    /// Command arguments
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();
    let name = CommandName::parse(&args.command)?;

    let mut client = Client::new(Handle::current());
    client.connect(&args.host, args.port).await?;

    if name.is_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.send(
            name.as_str(),
            args.args,
            Some(Box::new(move |reply| {
                let _ = tx.send(reply);
            })),
        )?;

        // The sender lives in the subscription, so the channel closes with it.
        while let Some(reply) = rx.recv().await {
            print_reply(reply);
        }
    } else {
        print_reply(client.execute(name.as_str(), args.args).await);
    }

    client.disconnect();
    Ok(())
}

fn print_reply(reply: toredis::Result<toredis::Frame>) {
    match reply {
        Ok(frame) => println!("{}", frame),
        Err(Error::Server(msg)) => println!("(error) {}", msg),
        Err(e) => eprintln!("{}", e),
    }
}
