//! topicsub - interactive subscriber for the topic relay.
//!
//! Commands on stdin:
//!
//! - `subscribe <pattern>`
//! - `unsubscribe <pattern>`
//! - `exit`
//!
//! Posts are printed as `<topic> - <TYPE> - <value>`.

use anyhow::{Context, Result};
use clap::Parser;
use giztoy_topicrelay::{Client, ClientConfig, Error};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Interactive topic relay subscriber.
#[derive(Parser, Debug)]
#[command(name = "topicsub")]
#[command(about = "Subscribe to topics on a topic relay")]
#[command(version)]
struct Args {
    /// Client identity (up to 10 bytes)
    client_id: String,

    /// Relay address
    server_ip: String,

    /// Relay port
    server_port: u16,
}

enum Command<'a> {
    Subscribe(&'a str),
    Unsubscribe(&'a str),
    Exit,
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next()) {
        ("subscribe", Some(pattern)) => Command::Subscribe(pattern),
        ("unsubscribe", Some(pattern)) => Command::Unsubscribe(pattern),
        ("exit", None) => Command::Exit,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(command)
}

/// Whether the shell keeps reading commands.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Exit,
}

/// Errors that end the session. Anything else is reported and the shell
/// keeps going.
fn is_fatal(err: &Error) -> bool {
    matches!(err, Error::ConnectionClosed | Error::Io(_))
}

/// Run one line of input against the broker.
async fn execute(client: &mut Client, line: &str) -> Result<Step> {
    let result = match parse_command(line) {
        Some(Command::Subscribe(pattern)) => client
            .subscribe(pattern)
            .await
            .map(|()| println!("Subscribed to topic {}", pattern)),
        Some(Command::Unsubscribe(pattern)) => client
            .unsubscribe(pattern)
            .await
            .map(|()| println!("Unsubscribed from topic {}", pattern)),
        Some(Command::Exit) => return Ok(Step::Exit),
        None if line.trim().is_empty() => Ok(()),
        None => {
            eprintln!("Invalid command: {}", line.trim());
            Ok(())
        }
    };

    match result {
        Err(e) if is_fatal(&e) => Err(e.into()),
        Err(e) => {
            eprintln!("Command failed: {}", e);
            Ok(Step::Continue)
        }
        Ok(()) => Ok(Step::Continue),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.server_ip, args.server_port);
    let mut client = Client::connect(ClientConfig::new(&addr, &args.client_id))
        .await
        .with_context(|| format!("failed to connect to {} as {}", addr, args.client_id))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if execute(&mut client, &line).await? == Step::Exit {
                    break;
                }
            }
            post = client.recv() => match post {
                Ok(post) => println!("{}", post),
                Err(Error::ConnectionClosed) => return Ok(()),
                Err(e) if is_fatal(&e) => return Err(e.into()),
                Err(e) => eprintln!("Dropped record: {}", e),
            },
        }
    }

    client.disconnect().await?;
    Ok(())
}
