use wirechan_frame::{ChannelConfig, Diagnostics, RecvOptions, TraceSink};
use wirechan_peer::{create_client, ClientOptions};
use wirechan_transport::timeout_from_millis;

use crate::cmd::{socket_kind, SendArgs};
use crate::exit::{channel_error, io_error, CliResult, SUCCESS};
use crate::output::{print_send_report, OutputFormat, SendReport};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let kind = socket_kind(args.udp);
    let options = ClientOptions {
        connect_timeout: timeout_from_millis(args.connect_timeout),
        quiet: true,
        config: channel_config(&args)?,
        ..ClientOptions::default()
    };

    let mut channel = create_client(&args.host, args.port, kind, &options)
        .map_err(|err| channel_error("connect failed", err))?;

    let sent = match &args.terminator {
        Some(terminator) => channel
            .traced(0, "message")
            .send_terminated(&args.text, terminator),
        None => channel.traced(0, "message").send_string(Some(args.text.as_str())),
    };
    sent.map_err(|err| channel_error("send failed", err))?;

    let reply_length: i32 = channel
        .traced(0, "reply length")
        .accept(RecvOptions::millis(args.wait_timeout))
        .map_err(|err| channel_error("receive failed", err))?;

    let report = SendReport {
        peer: channel
            .peer_addr()
            .map_or_else(|| format!("{}:{}", args.host, args.port), |addr| addr.to_string()),
        transport: kind.to_string(),
        framing: framing(&args),
        message: args.text.clone(),
        reply_length,
        bytes_sent: channel.bytes_sent(),
        bytes_received: channel.bytes_received(),
    };
    print_send_report(&report, format);

    Ok(SUCCESS)
}

fn channel_config(args: &SendArgs) -> CliResult<ChannelConfig> {
    let mut config = ChannelConfig::default();
    if let Some(path) = &args.trace {
        let sink = TraceSink::create(path).map_err(|err| {
            io_error(&format!("failed creating trace file {}", path.display()), err)
        })?;
        config.diagnostics = Diagnostics::with_trace(sink);
    }
    Ok(config)
}

fn framing(args: &SendArgs) -> &'static str {
    if args.terminator.is_some() {
        "terminated"
    } else {
        "length"
    }
}
