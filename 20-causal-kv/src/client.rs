use std::io::IsTerminal;

use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{Message, MessageReader, Response, write_message},
    protocol::{ConsoleCommand, HELP},
};

/// Runs the line-oriented client against one datacenter over a single
/// long-lived connection.
pub async fn run(args: ClientArgs) -> Result<()> {
    let topology = args.topology.topology()?;
    let addr = topology.addr(args.index)?.to_string();
    let (mut reader, mut writer) = establish_connection(&addr).await?;

    let interactive = std::io::stdin().is_terminal();
    if interactive {
        write_stdout(HELP).await?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        if interactive {
            write_prompt().await?;
        }
        input.clear();
        if stdin.read_line(&mut input).await? == 0 {
            break;
        }
        if input.trim().is_empty() {
            continue;
        }

        match ConsoleCommand::parse(&input) {
            Ok(ConsoleCommand::Exit) => break,
            Ok(ConsoleCommand::Help) => write_stdout(HELP).await?,
            Ok(command) => {
                let Some(request) = command.into_message() else {
                    continue;
                };
                let response = round_trip(&mut reader, &mut writer, &request).await?;
                write_stdout(&render_response(&request, &response)).await?;
            }
            Err(err) => write_stderr(&format!("error: {err}")).await?,
        }
    }

    shutdown_connection(&mut writer).await;
    Ok(())
}

async fn establish_connection(addr: &str) -> Result<(MessageReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("datacenter at {addr} is not online"))?;

    info!("connected to {}", addr);

    let (reader, writer) = stream.into_split();
    Ok((MessageReader::new(reader), writer))
}

/// Sends one request and waits for its response on the same connection.
pub async fn round_trip(
    reader: &mut MessageReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    request: &Message,
) -> Result<Response> {
    write_message(writer, request)
        .await
        .context("failed to send request")?;
    match reader.read_message::<Response>().await? {
        Some(response) => Ok(response),
        None => bail!("datacenter closed the connection"),
    }
}

pub fn render_response(request: &Message, response: &Response) -> String {
    match (request, response.is_ok()) {
        (Message::Write { key, value }, true) => format!("wrote {value} to {key}"),
        (Message::Read { key }, true) => format!(
            "{key} = {}",
            response.value.as_deref().unwrap_or_default()
        ),
        (Message::Read { key }, false) => format!("{key} not found"),
        (_, _) => format!("request for {} failed", response.key),
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_prompt() -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"> ").await?;
    stdout.flush().await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
