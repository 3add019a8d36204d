//! TCP substrate: accepts client connections, dials the upstream server and
//! drives one [`Session`] per connection pair.

use crate::{
    journal::JournalWriter,
    protocol::Direction,
    proxy::Proxy,
    session::Session,
};
use anyhow::Context;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

const READ_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address clients connect to.
    pub listen: SocketAddr,
    /// `host:port` of the real server.
    pub upstream: String,
    /// When set, every connection gets a debug journal file in this directory.
    pub journal_dir: Option<PathBuf>,
}

/// Binds `config.listen` and serves connections until an accept fails.
pub async fn run(config: ServerConfig, proxy: Proxy) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    tracing::info!(
        "Listening on {}, proxying to {}",
        listener.local_addr()?,
        config.upstream
    );
    serve(listener, config, proxy).await
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(listener: TcpListener, config: ServerConfig, proxy: Proxy) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let mut connection_id = 0u64;
    loop {
        let (client, peer) = listener.accept().await.context("listener closed")?;
        connection_id += 1;
        tracing::info!("Accepted connection {connection_id} from {peer}");

        let mut session = proxy.session();
        if let Some(dir) = &config.journal_dir {
            let path = dir.join(format!("connection-{connection_id}.journal"));
            match JournalWriter::create(&path) {
                Ok(journal) => session = session.with_journal(Box::new(journal)),
                Err(e) => tracing::warn!("Cannot open debug journal: {e}"),
            }
        }

        let config = config.clone();
        tokio::spawn(async move {
            match drive_connection(client, &config.upstream, session).await {
                Ok(()) => tracing::info!("Connection {connection_id} closed"),
                Err(e) => tracing::info!("Connection {connection_id} lost: {e:#}"),
            }
        });
    }
}

async fn drive_connection(
    client: TcpStream,
    upstream: &str,
    mut session: Session,
) -> anyhow::Result<()> {
    let server = TcpStream::connect(upstream)
        .await
        .with_context(|| format!("failed to connect to upstream {upstream}"))?;
    tracing::debug!("Connected to upstream {upstream}");
    client.set_nodelay(true)?;
    server.set_nodelay(true)?;

    let (mut client_read, mut client_write) = client.into_split();
    let (mut server_read, mut server_write) = server.into_split();
    let mut client_buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut server_buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let result = tokio::select! {
            read = client_read.read(&mut client_buffer) => {
                let n = read.context("client read failed")?;
                if n == 0 {
                    tracing::debug!("Client closed the connection");
                    break;
                }
                relay(
                    &mut session,
                    Direction::Serverbound,
                    &client_buffer[..n],
                    &mut server_write,
                    &mut client_write,
                )
                .await
            }
            read = server_read.read(&mut server_buffer) => {
                let n = read.context("upstream read failed")?;
                if n == 0 {
                    tracing::debug!("Upstream closed the connection");
                    break;
                }
                relay(
                    &mut session,
                    Direction::Clientbound,
                    &server_buffer[..n],
                    &mut client_write,
                    &mut server_write,
                )
                .await
            }
        };

        if let Err(e) = result {
            client_write.shutdown().await.ok();
            server_write.shutdown().await.ok();
            return Err(e);
        }
    }

    client_write.shutdown().await.ok();
    server_write.shutdown().await.ok();
    Ok(())
}

/// Feeds bytes that travel in `direction` through the session and writes the
/// result to `forward`. Packets injected for the opposite direction go to
/// `back`.
async fn relay<F, B>(
    session: &mut Session,
    direction: Direction,
    data: &[u8],
    forward: &mut F,
    back: &mut B,
) -> anyhow::Result<()>
where
    F: AsyncWrite + Unpin,
    B: AsyncWrite + Unpin,
{
    let output = session.on_inbound(direction, data)?;
    if !output.is_empty() {
        forward.write_all(&output).await?;
    }

    let injected = session.take_injected(direction.opposite());
    if !injected.is_empty() {
        back.write_all(&injected).await?;
    }
    Ok(())
}
