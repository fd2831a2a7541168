//! Minimal length server: accepts one TCP peer and answers every string
//! with its length.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1 7420 alan --format pretty

use wirechan::frame::RecvOptions;
use wirechan::peer::{create_server_channel, create_server_listener, ServerOptions};
use wirechan::transport::SocketKind;

const PORT: u16 = 7420;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = create_server_listener(PORT, SocketKind::Stream)?;
    eprintln!("Listening on {}", listener.local_addr());

    let (mut channel, _) = create_server_channel(listener, &ServerOptions::default())?;
    eprintln!("Peer connected: {:?}", channel.peer_addr());

    loop {
        match channel.accept_string(RecvOptions::blocking()) {
            Ok(text) => {
                let text = text.unwrap_or_default();
                eprintln!("Received {text:?}");
                channel.send(text.len() as i32)?;
            }
            Err(e) => {
                eprintln!("Peer disconnected: {e}");
                break;
            }
        }
    }

    Ok(())
}
