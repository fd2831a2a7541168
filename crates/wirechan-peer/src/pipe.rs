use tracing::warn;
use wirechan_frame::{Channel, ChannelConfig, Result};
use wirechan_transport::{pipe_pair, PipeReader, PipeWriter, Role};

/// Create a fresh pipe and wrap both ends in channels sharing `config`.
pub fn pipe_channels(config: &ChannelConfig) -> Result<(Channel<PipeReader>, Channel<PipeWriter>)> {
    match pipe_pair() {
        Ok((reader, writer)) => Ok((
            Channel::with_config(reader, Role::Local, config.clone()),
            Channel::with_config(writer, Role::Local, config.clone()),
        )),
        Err(err) => {
            if !config.suppress_messages {
                warn!(error = %err, "pipe creation failed");
            }
            Err(config.escalate(err.into()))
        }
    }
}
