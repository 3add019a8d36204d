use clap::Parser;
use minecraft_mitm_proxy::{
    handler::Verdict,
    protocol::packet::PacketData,
    proxy::Proxy,
    server::{self, ServerConfig},
};
use std::{net::SocketAddr, path::PathBuf};

/// Man-in-the-middle proxy for Minecraft 1.8 connections.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to accept client connections on.
    #[arg(long, default_value = "127.0.0.1:25566")]
    listen: SocketAddr,
    /// Server to forward connections to.
    #[arg(long, default_value = "127.0.0.1:25565")]
    upstream: String,
    /// Directory receiving one debug journal per connection.
    #[arg(long)]
    journal_dir: Option<PathBuf>,
    /// Log chat messages in both directions.
    #[arg(long)]
    log_chat: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut proxy = Proxy::builder();
    if args.log_chat {
        proxy = proxy
            .handler(["ClientBound", "Play", "ChatMessage"], |packet, _| {
                if let PacketData::ClientboundChat(chat) = &packet.data {
                    tracing::info!("[server] {}", chat.json);
                }
                Ok(Verdict::Pass)
            })
            .handler(["ServerBound", "Play", "ChatMessage"], |packet, _| {
                if let PacketData::ServerboundChat(chat) = &packet.data {
                    tracing::info!("[client] {}", chat.message);
                }
                Ok(Verdict::Pass)
            });
    }

    if let Some(dir) = &args.journal_dir {
        fs_err::create_dir_all(dir)?;
    }

    server::run(
        ServerConfig {
            listen: args.listen,
            upstream: args.upstream,
            journal_dir: args.journal_dir,
        },
        proxy.build(),
    )
    .await
}
