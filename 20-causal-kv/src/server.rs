use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    io::AsyncWrite,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::context::SessionId;
use crate::message::{Message, MessageReader, Response, write_message};
use crate::runtime::NodeHandle;

/// Accepts client and peer connections for one datacenter.
///
/// Both kinds of connection share the listener; the `type` of each incoming
/// message tells them apart.
pub struct Server {
    listener: TcpListener,
    node: NodeHandle,
}

impl Server {
    pub fn new(listener: TcpListener, node: NodeHandle) -> Self {
        Self { listener, node }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, node } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(id = node.id(), "datacenter shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &node);
                }
            }
        }

        node.shutdown().await?;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, node: &NodeHandle) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, node),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, node: &NodeHandle) {
    let node = node.clone();
    let session = node.open_session();
    debug!(%peer, session, "accepted connection");
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, session, &node).await {
            warn!(%peer, session, error = ?err, "connection closed with error");
        }
        if let Err(err) = node.close_session(session).await {
            debug!(session, error = ?err, "could not release session");
        }
    });
}

async fn handle_connection(stream: TcpStream, session: SessionId, node: &NodeHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = MessageReader::new(reader);

    while let Some(message) = reader.read_message::<Message>().await? {
        handle_message(message, session, node, &mut writer).await?;
    }

    debug!(session, "connection closed by remote");
    Ok(())
}

async fn handle_message<W>(
    message: Message,
    session: SessionId,
    node: &NodeHandle,
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match message {
        Message::Write { key, value } => {
            node.write(session, key.clone(), value.clone()).await?;
            write_message(writer, &Response::written(key, value)).await?;
        }
        Message::Read { key } => {
            let response = match node.read(session, key.clone()).await? {
                Some(value) => Response::found(key, value),
                None => Response::missing(key),
            };
            write_message(writer, &response).await?;
        }
        Message::Replicated(write) => {
            let outcome = node.replicated(write).await?;
            debug!(
                committed = outcome.committed.len(),
                parked = outcome.parked,
                "handled replicated write"
            );
        }
    }
    Ok(())
}
