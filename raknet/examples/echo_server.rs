use clap::Parser;
use raknet::config::RakNetConfig;
use raknet::end_point::{EndPoint, ServerEvent};
use raknet::protocol::reliability::PacketReliability;
use raknet::send_reliability_layer::OutboundMessage;
use tokio::select;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    #[clap(default_value = "0.0.0.0:19132")]
    bind_address: String,

    #[clap(long, default_value = "MCPE;RakNet echo server;0;0.0.0;0;10")]
    server_name: String,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = RakNetConfig {
        bind_addr: args.bind_address.parse()?,
        server_name: args.server_name,
        ..RakNetConfig::default()
    };

    let (end_point, handle, mut events) = EndPoint::bind(config).await?;

    let echo = async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::SessionOpened { session_id, addr, client_guid } => {
                    info!("session {} opened by {:?} (client GUID {})", session_id, addr, client_guid);
                }
                ServerEvent::SessionClosed { session_id, reason } => {
                    info!("session {} closed: {}", session_id, reason);
                }
                ServerEvent::Message { session_id, payload } => {
                    let reply = OutboundMessage::new(PacketReliability::ReliableOrdered, 0, payload);
                    handle.send(session_id, reply, false)?;
                }
                ServerEvent::PacketAck { .. } => {}
                ServerEvent::PingMeasured { session_id, rtt_ms } => {
                    info!("session {}: RTT {} ms", session_id, rtt_ms);
                }
            }
        }
        Ok::<_, anyhow::Error>(())
    };

    select! {
        _ = end_point.run() => Ok(()),
        result = echo => result,
    }
}
