use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wirechan_frame::{Channel, ChannelConfig, ChannelError, RecvOptions};
use wirechan_peer::{create_server_listener, ChannelListener};
use wirechan_transport::{timeout_from_millis, Deadline, RawRead, RawWrite, SocketKind};

use crate::cmd::{socket_kind, EchoArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_echo, print_listening, EchoEvent, OutputFormat};

/// Longest blocking step between checks for Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug)]
enum Session {
    /// Peer went away; wait for the next one.
    Ended,
    /// Stop serving.
    Done,
}

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    let kind = socket_kind(args.udp);
    let listener = create_server_listener(args.port, kind)
        .map_err(|err| channel_error("bind failed", err))?
        .with_config(ChannelConfig {
            suppress_messages: true,
            ..ChannelConfig::default()
        });
    print_listening(listener.local_addr(), &kind.to_string(), format);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut served = 0usize;
    let accept_deadline = Deadline::after(timeout_from_millis(args.accept_timeout));

    while running.load(Ordering::SeqCst) {
        let Some(mut channel) = wait_for_peer(&listener, &accept_deadline, &running)? else {
            break;
        };
        tracing::info!(peer = ?channel.peer_addr(), %kind, "peer connected");

        match serve(&mut channel, &args, &running, &mut served, format)? {
            Session::Ended => {
                tracing::info!(served, "peer disconnected");
                if kind == SocketKind::Datagram {
                    break;
                }
            }
            Session::Done => break,
        }
    }

    Ok(SUCCESS)
}

fn wait_for_peer(
    listener: &ChannelListener,
    deadline: &Deadline,
    running: &AtomicBool,
) -> CliResult<Option<Channel<wirechan_transport::SocketChannel>>> {
    loop {
        if !running.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let wait = deadline
            .remaining()
            .map_or(POLL_INTERVAL, |left| left.min(POLL_INTERVAL));

        match listener.accept(Some(wait)) {
            Ok(channel) => return Ok(Some(channel)),
            Err(err) if err.is_timeout() => {
                if deadline.remaining() == Some(Duration::ZERO) {
                    return Err(CliError::new(TIMEOUT, "no peer connected before the accept timeout"));
                }
            }
            Err(err) => return Err(channel_error("accept failed", err)),
        }
    }
}

fn serve<T: RawRead + RawWrite>(
    channel: &mut Channel<T>,
    args: &EchoArgs,
    running: &AtomicBool,
    served: &mut usize,
    format: OutputFormat,
) -> CliResult<Session> {
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| *served >= count) {
            return Ok(Session::Done);
        }
        let ready = channel
            .message_ready(Some(POLL_INTERVAL))
            .map_err(|err| channel_error("readiness check failed", err))?;
        if !ready {
            continue;
        }

        let stall = RecvOptions::timeout(Duration::from_millis(args.stall_timeout));
        let message = match receive(channel, args.terminator.as_deref(), stall) {
            Ok(message) => message,
            Err(err) if err.is_peer_gone() => return Ok(Session::Ended),
            Err(err) if err.is_timeout() => {
                tracing::warn!(error = %err, "peer stalled mid-message, dropping it");
                return Ok(Session::Ended);
            }
            Err(err) if is_recoverable(&err) => {
                tracing::warn!(error = %err, "dropping malformed message");
                continue;
            }
            Err(err) => return Err(channel_error("receive failed", err)),
        };

        let length = i32::try_from(message.len()).unwrap_or(i32::MAX);
        match channel.send(length) {
            Ok(()) => {}
            Err(err) if err.is_peer_gone() => return Ok(Session::Ended),
            Err(err) => return Err(channel_error("reply failed", err)),
        }

        *served += 1;
        print_echo(
            &EchoEvent {
                event: "echo",
                message,
                length,
            },
            format,
        );
    }
    Ok(Session::Done)
}

fn receive<T: RawRead>(
    channel: &mut Channel<T>,
    terminator: Option<&str>,
    opts: RecvOptions,
) -> Result<String, ChannelError> {
    match terminator {
        Some(terminator) => channel.accept_terminated_string(terminator, opts),
        None => Ok(channel.accept_string(opts)?.unwrap_or_default()),
    }
}

/// Framing errors that leave the channel aligned are skipped; anything else
/// ends the server.
fn is_recoverable(err: &ChannelError) -> bool {
    matches!(
        err.root(),
        ChannelError::TerminatorOverflow { .. }
            | ChannelError::TerminatorNotFound { .. }
            | ChannelError::InvalidUtf8(_)
    )
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
