//! Pass typed values through a local pipe, with the buffered variant on
//! both ends and a value trace on stderr.
//!
//! Run with:
//!   cargo run --example pipe-exchange --features peer

use wirechan::frame::{ChannelConfig, Diagnostics, RecvOptions, TraceSink};
use wirechan::peer::pipe_channels;
use wirechan::transport::Buffered;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ChannelConfig {
        diagnostics: Diagnostics::with_trace(TraceSink::from_writer(std::io::stderr())),
        ..ChannelConfig::default()
    };
    let (reader, writer) = pipe_channels(&config)?;
    let mut reader = reader.map_transport(Buffered::new);
    let mut writer = writer.map_transport(Buffered::new);

    writer.traced(0, "point count").send(3i32)?;
    writer
        .traced(1, "points")
        .send_array(&[1.0f64, 2.5, -4.0])?;
    writer
        .traced(1, "labels")
        .send_string_array(&[Some("origin"), None, Some("far")])?;
    writer.flush()?;

    let wait = RecvOptions::millis(1000);
    let count: i32 = reader.traced(0, "point count").accept(wait)?;
    let points: Vec<f64> = reader
        .traced(1, "points")
        .accept_array(count as usize, wait)?;
    let labels = reader.accept_string_array(wait)?;

    for (point, label) in points.iter().zip(&labels) {
        println!("{point:>6} {}", label.as_deref().unwrap_or("-"));
    }
    println!(
        "{} bytes written, {} bytes read",
        writer.bytes_sent(),
        reader.bytes_received()
    );
    Ok(())
}
