use bytes::BytesMut;
use tracing::trace;
use wirechan_transport::RawWrite;

use crate::channel::Channel;
use crate::codec::{put_canonical, Primitive, MAX_CANONICAL_WIDTH, NULL_LENGTH};
use crate::error::{ChannelError, Result};

/// Sending side of a channel.
///
/// Each call below hands its bytes to the transport in one or more
/// transmits. A length prefix and the bytes it describes always go out as
/// separate transmits, so a datagram peer reads them with matching sizes.
impl<T: RawWrite> Channel<T> {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        if let Err(err) = self.transport.transmit(bytes) {
            return Err(self.fail(err));
        }
        self.count_sent(bytes.len());
        trace!(bytes = bytes.len(), "sent");
        Ok(())
    }

    /// Send one primitive in canonical form.
    pub fn send<P: Primitive>(&mut self, value: P) -> Result<()> {
        let mut scratch = [0u8; MAX_CANONICAL_WIDTH];
        let wire = &mut scratch[..P::CANONICAL_WIDTH];
        if let Err(err) = value.encode(wire) {
            return Err(self.fail(err));
        }
        self.send_raw(wire)
    }

    /// Send `values` back to back, with no count prefix.
    pub fn send_array<P: Primitive>(&mut self, values: &[P]) -> Result<()> {
        let mut wire = BytesMut::with_capacity(values.len() * P::CANONICAL_WIDTH);
        for &value in values {
            if let Err(err) = put_canonical(&mut wire, value) {
                return Err(self.fail(err));
            }
        }
        self.send_raw(&wire)
    }

    /// Send a length-prefixed string; `None` is sent as the null marker.
    pub fn send_string(&mut self, value: Option<&str>) -> Result<()> {
        self.send_string_bytes(value.map(str::as_bytes))
    }

    pub fn send_string_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        let Some(bytes) = value else {
            return self.send(NULL_LENGTH);
        };

        let max = self.config.max_string_len;
        let len = match i32::try_from(bytes.len()) {
            Ok(len) if bytes.len() <= max => len,
            _ => {
                return Err(self.fail(ChannelError::StringTooLong {
                    len: bytes.len(),
                    max,
                }))
            }
        };

        self.send(len)?;
        self.send_raw(bytes)
    }

    /// Send `payload` immediately followed by `terminator`, as one transmit.
    pub fn send_terminated(&mut self, payload: &str, terminator: &str) -> Result<()> {
        self.send_terminated_bytes(payload.as_bytes(), terminator.as_bytes())
    }

    pub fn send_terminated_bytes(&mut self, payload: &[u8], terminator: &[u8]) -> Result<()> {
        if terminator.is_empty() {
            return Err(self.fail(ChannelError::EmptyTerminator));
        }
        let mut wire = BytesMut::with_capacity(payload.len() + terminator.len());
        wire.extend_from_slice(payload);
        wire.extend_from_slice(terminator);
        self.send_raw(&wire)
    }

    /// Send an int32 count followed by each element as a length-prefixed
    /// string.
    pub fn send_string_array(&mut self, values: &[Option<&str>]) -> Result<()> {
        let count = match i32::try_from(values.len()) {
            Ok(count) => count,
            Err(_) => {
                return Err(self.fail(ChannelError::StringTooLong {
                    len: values.len(),
                    max: i32::MAX as usize,
                }))
            }
        };
        self.send(count)?;
        for value in values {
            self.send_string(*value)?;
        }
        Ok(())
    }

    /// Send raw bytes with no framing.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.send_raw(bytes)
    }

    /// Push bytes held by a buffered transport to the OS.
    pub fn flush(&mut self) -> Result<()> {
        match self.transport.flush_raw() {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use wirechan_transport::{
        Buffered, Result as TransportResult, Role, Transport, TransportError, TransportKind,
    };

    use super::*;
    use crate::channel::ChannelConfig;

    /// Records every transmit as its own piece.
    #[derive(Default)]
    struct Pieces {
        sent: Vec<Vec<u8>>,
        closed: bool,
    }

    impl Transport for Pieces {
        fn kind(&self) -> TransportKind {
            TransportKind::Datagram
        }
    }

    impl RawWrite for Pieces {
        fn write_raw(&mut self, buf: &[u8]) -> TransportResult<usize> {
            if self.closed {
                return Err(TransportError::Io(std::io::Error::from(
                    std::io::ErrorKind::BrokenPipe,
                )));
            }
            self.sent.push(buf.to_vec());
            Ok(buf.len())
        }
    }

    fn channel() -> Channel<Pieces> {
        Channel::new(Pieces::default(), Role::Client)
    }

    #[test]
    fn send_primitive_is_canonical() {
        let mut ch = channel();
        ch.send(4i32).unwrap();
        ch.send(0x0102u16).unwrap();
        ch.send(1usize).unwrap();
        assert_eq!(
            ch.get_ref().sent,
            vec![
                vec![0, 0, 0, 4],
                vec![1, 2],
                vec![0, 0, 0, 0, 0, 0, 0, 1],
            ]
        );
        assert_eq!(ch.bytes_sent(), 14);
    }

    #[test]
    fn string_prefix_and_body_are_separate_transmits() {
        let mut ch = channel();
        ch.send_string(Some("alan")).unwrap();
        assert_eq!(ch.get_ref().sent, vec![vec![0, 0, 0, 4], b"alan".to_vec()]);
    }

    #[test]
    fn null_and_empty_strings() {
        let mut ch = channel();
        ch.send_string(None).unwrap();
        ch.send_string(Some("")).unwrap();
        assert_eq!(
            ch.get_ref().sent,
            vec![vec![0xff, 0xff, 0xff, 0xff], vec![0, 0, 0, 0]]
        );
        assert_eq!(ch.bytes_sent(), 8);
    }

    #[test]
    fn terminated_string_is_one_transmit() {
        let mut ch = channel();
        ch.send_terminated("hi", "alan").unwrap();
        assert_eq!(ch.get_ref().sent, vec![b"hialan".to_vec()]);
    }

    #[test]
    fn empty_terminator_is_rejected() {
        let mut ch = channel();
        let err = ch.send_terminated("hi", "").unwrap_err();
        assert!(matches!(err, ChannelError::EmptyTerminator));
        assert!(ch.get_ref().sent.is_empty());
    }

    #[test]
    fn array_is_one_transmit_without_count() {
        let mut ch = channel();
        ch.send_array(&[1i16, -1, 2]).unwrap();
        assert_eq!(ch.get_ref().sent, vec![vec![0, 1, 0xff, 0xff, 0, 2]]);
    }

    #[test]
    fn string_array_layout() {
        let mut ch = channel();
        ch.send_string_array(&[Some("a"), None]).unwrap();
        assert_eq!(
            ch.get_ref().sent,
            vec![
                vec![0, 0, 0, 2],
                vec![0, 0, 0, 1],
                b"a".to_vec(),
                vec![0xff, 0xff, 0xff, 0xff],
            ]
        );
    }

    #[test]
    fn oversized_string_is_rejected_before_sending() {
        let config = ChannelConfig {
            max_string_len: 3,
            ..ChannelConfig::default()
        };
        let mut ch = Channel::with_config(Pieces::default(), Role::Client, config);
        let err = ch.send_string(Some("four")).unwrap_err();
        assert!(matches!(err, ChannelError::StringTooLong { len: 4, max: 3 }));
        assert!(ch.get_ref().sent.is_empty());
    }

    #[test]
    fn transport_failure_follows_policy() {
        let config = ChannelConfig {
            errors_fatal: true,
            ..ChannelConfig::default()
        };
        let mut ch = Channel::with_config(
            Pieces {
                closed: true,
                ..Pieces::default()
            },
            Role::Client,
            config,
        );
        let err = ch.send(1u8).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.is_peer_gone());
        assert_eq!(ch.bytes_sent(), 0);
        assert!(ch.last_error().is_some());
    }

    #[test]
    fn buffered_writes_wait_for_flush() {
        let mut ch = Channel::new(Buffered::new(Pieces::default()), Role::Client);
        ch.send(7i32).unwrap();
        ch.send_terminated("x", "\n").unwrap();
        assert!(ch.get_ref().get_ref().sent.is_empty());

        ch.flush().unwrap();
        assert_eq!(ch.get_ref().get_ref().sent, vec![vec![0, 0, 0, 7, b'x', b'\n']]);
    }
}
