use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;
use wirechan_transport::{Deadline, RawRead, TransportKind};

use crate::channel::{Channel, RecvOptions};
use crate::codec::{Primitive, MAX_CANONICAL_WIDTH, NULL_LENGTH};
use crate::error::{ChannelError, Result};

/// Cap on capacity reserved up front from an untrusted count prefix.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Receiving side of a channel.
///
/// Every operation takes [`RecvOptions`]; an operation made of several
/// receives shares one deadline across all of them.
impl<T: RawRead> Channel<T> {
    fn recv_raw(&mut self, buf: &mut [u8], opts: RecvOptions) -> Result<usize> {
        match self
            .transport
            .receive(buf, opts.timeout, opts.read_everything)
        {
            Ok(n) => {
                self.count_received(n);
                trace!(bytes = n, "received");
                Ok(n)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn recv_exact(&mut self, buf: &mut [u8], opts: RecvOptions) -> Result<()> {
        let got = self.recv_raw(buf, opts)?;
        if got < buf.len() {
            return Err(self.fail(ChannelError::ShortRead {
                wanted: buf.len(),
                got,
            }));
        }
        Ok(())
    }

    /// Whether a receive would find data within `timeout`.
    ///
    /// `None` does not wait; it reports ready so the caller proceeds straight
    /// to a blocking receive.
    pub fn message_ready(&mut self, timeout: Option<Duration>) -> Result<bool> {
        match self.transport.poll_readable(timeout) {
            Ok(ready) => Ok(ready),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Receive raw bytes into `buf`, returning how many arrived.
    pub fn accept_bytes(&mut self, buf: &mut [u8], opts: RecvOptions) -> Result<usize> {
        self.recv_raw(buf, opts)
    }

    /// Receive one primitive.
    pub fn accept<P: Primitive>(&mut self, opts: RecvOptions) -> Result<P> {
        let mut scratch = [0u8; MAX_CANONICAL_WIDTH];
        let wire = &mut scratch[..P::CANONICAL_WIDTH];
        self.recv_exact(wire, RecvOptions {
            read_everything: true,
            ..opts
        })?;
        P::decode(wire).map_err(|err| self.fail(err))
    }

    /// Fill `out` with primitives sent as one array.
    pub fn accept_into<P: Primitive>(&mut self, out: &mut [P], opts: RecvOptions) -> Result<()> {
        let mut wire = vec![0u8; out.len() * P::CANONICAL_WIDTH];
        self.recv_exact(&mut wire, RecvOptions {
            read_everything: true,
            ..opts
        })?;
        for (slot, chunk) in out.iter_mut().zip(wire.chunks_exact(P::CANONICAL_WIDTH)) {
            *slot = P::decode(chunk).map_err(|err| self.fail(err))?;
        }
        Ok(())
    }

    pub fn accept_array<P: Primitive>(&mut self, count: usize, opts: RecvOptions) -> Result<Vec<P>> {
        let mut values = vec![P::default(); count];
        self.accept_into(&mut values, opts)?;
        Ok(values)
    }

    /// Receive a length-prefixed string as bytes. `None` is the null marker.
    pub fn accept_string_bytes(&mut self, opts: RecvOptions) -> Result<Option<Vec<u8>>> {
        let deadline = Deadline::after(opts.timeout);
        let len: i32 = self.accept(opts)?;
        let len = match len {
            NULL_LENGTH => return Ok(None),
            len if len < NULL_LENGTH => return Err(self.fail(ChannelError::InvalidLength(len))),
            len => len as usize,
        };

        let max = self.config.max_string_len;
        if len > max {
            return Err(self.fail(ChannelError::StringTooLong { len, max }));
        }

        let mut bytes = vec![0u8; len];
        self.recv_exact(&mut bytes, RecvOptions {
            read_everything: true,
            ..opts.within(&deadline)
        })?;
        Ok(Some(bytes))
    }

    /// Receive a length-prefixed UTF-8 string.
    pub fn accept_string(&mut self, opts: RecvOptions) -> Result<Option<String>> {
        match self.accept_string_bytes(opts)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|err| self.fail(err)),
        }
    }

    /// Receive an int32 count followed by that many length-prefixed strings.
    pub fn accept_string_array(&mut self, opts: RecvOptions) -> Result<Vec<Option<String>>> {
        let deadline = Deadline::after(opts.timeout);
        let count: i32 = self.accept(opts)?;
        let count = match usize::try_from(count) {
            Ok(count) => count,
            Err(_) => return Err(self.fail(ChannelError::InvalidLength(count))),
        };

        let mut values = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        for _ in 0..count {
            values.push(self.accept_string(opts.within(&deadline))?);
        }
        Ok(values)
    }

    /// Receive bytes up to `terminator`, which is consumed but not returned.
    ///
    /// On a datagram transport one datagram is one message: it is received
    /// whole, cut at the first terminator, and anything after the
    /// terminator is dropped. A datagram without the terminator is
    /// [`ChannelError::TerminatorNotFound`].
    ///
    /// On streams and pipes bytes are taken one at a time so nothing past
    /// the terminator is consumed. A message that does not fit in
    /// `terminated_buffer_size` bytes (terminator included) is read through
    /// its terminator and discarded, then reported as
    /// [`ChannelError::TerminatorOverflow`].
    pub fn accept_terminated(&mut self, terminator: &[u8], opts: RecvOptions) -> Result<Vec<u8>> {
        if terminator.is_empty() {
            return Err(self.fail(ChannelError::EmptyTerminator));
        }

        match self.transport.kind() {
            TransportKind::Datagram => self.accept_terminated_datagram(terminator, opts),
            TransportKind::Stream | TransportKind::Pipe => {
                self.accept_terminated_stream(terminator, opts)
            }
        }
    }

    pub fn accept_terminated_string(&mut self, terminator: &str, opts: RecvOptions) -> Result<String> {
        let bytes = self.accept_terminated(terminator.as_bytes(), opts)?;
        String::from_utf8(bytes).map_err(|err| self.fail(err))
    }

    fn accept_terminated_datagram(&mut self, terminator: &[u8], opts: RecvOptions) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.config.terminated_buffer_size];
        let received = self.recv_raw(&mut buf, opts.partial())?;
        buf.truncate(received);

        match find(&buf, terminator) {
            Some(end) => {
                buf.truncate(end);
                Ok(buf)
            }
            None => Err(self.fail(ChannelError::TerminatorNotFound { received })),
        }
    }

    fn accept_terminated_stream(&mut self, terminator: &[u8], opts: RecvOptions) -> Result<Vec<u8>> {
        let capacity = self.config.terminated_buffer_size;
        let deadline = Deadline::after(opts.timeout);
        let mut buf = Vec::with_capacity(capacity.min(256));

        while buf.len() < capacity {
            buf.push(self.recv_byte(opts, &deadline)?);
            if buf.ends_with(terminator) {
                buf.truncate(buf.len() - terminator.len());
                return Ok(buf);
            }
        }

        // Resynchronise: drop everything through the next terminator.
        let keep = buf.len().min(terminator.len() - 1);
        let mut window: VecDeque<u8> = buf[buf.len() - keep..].iter().copied().collect();
        let mut consumed = buf.len();
        loop {
            window.push_back(self.recv_byte(opts, &deadline)?);
            consumed += 1;
            if window.len() > terminator.len() {
                window.pop_front();
            }
            if window.iter().eq(terminator.iter()) {
                break;
            }
        }

        Err(self.fail(ChannelError::TerminatorOverflow {
            capacity,
            discarded: consumed - terminator.len(),
        }))
    }

    fn recv_byte(&mut self, opts: RecvOptions, deadline: &Deadline) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.recv_exact(&mut byte, RecvOptions {
            read_everything: true,
            ..opts.within(deadline)
        })?;
        Ok(byte[0])
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
