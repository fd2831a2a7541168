//! Shared diagnostics: the optional value trace and the last error text.
//!
//! A trace line has the form `<direction> <depth> <indent><description> = <value>`
//! and is flushed as soon as it is written, so a crashed process still leaves
//! a complete record behind.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::warn;
use wirechan_transport::{RawRead, RawWrite};

use crate::channel::{Channel, RecvOptions};
use crate::codec::Primitive;
use crate::error::Result;

/// Which way a traced value travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Send => "send",
            Direction::Receive => "recv",
        })
    }
}

/// Destination for trace lines.
pub struct TraceSink {
    out: Box<dyn Write + Send>,
}

impl TraceSink {
    /// Create (or truncate) a trace file.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    pub fn record(
        &mut self,
        direction: Direction,
        depth: usize,
        description: &str,
        value: &dyn fmt::Display,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "{direction} {depth:>2} {:indent$}{description} = {value}",
            "",
            indent = depth * 2
        )?;
        self.out.flush()
    }
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSink").finish_non_exhaustive()
    }
}

/// Diagnostics shared by every channel holding a clone.
#[derive(Clone, Default)]
pub struct Diagnostics {
    trace: Option<Arc<Mutex<TraceSink>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(sink: TraceSink) -> Self {
        Self {
            trace: Some(Arc::new(Mutex::new(sink))),
            last_error: Arc::default(),
        }
    }

    /// Install a trace sink. Clones made earlier keep their old sink.
    pub fn set_trace(&mut self, sink: TraceSink) {
        self.trace = Some(Arc::new(Mutex::new(sink)));
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace.is_some()
    }

    /// Append a trace line if tracing is on. Sink failures are logged and
    /// otherwise ignored.
    pub fn trace(
        &self,
        direction: Direction,
        depth: usize,
        description: &str,
        value: &dyn fmt::Display,
    ) {
        let Some(sink) = &self.trace else {
            return;
        };
        let mut sink = match sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = sink.record(direction, depth, description, value) {
            warn!(error = %err, "failed to write trace line");
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let mut slot = match self.last_error.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(message.into());
    }

    /// Text of the most recent error recorded by any channel sharing these
    /// diagnostics.
    pub fn last_error(&self) -> Option<String> {
        match self.last_error.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear_error(&self) {
        let mut slot = match self.last_error.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("trace", &self.trace_enabled())
            .field("last_error", &self.last_error())
            .finish()
    }
}

/// One channel operation whose value is written to the trace on success.
///
/// Created by [`Channel::traced`].
pub struct Traced<'a, T> {
    channel: &'a mut Channel<T>,
    depth: usize,
    description: &'a str,
}

impl<'a, T> Traced<'a, T> {
    pub(crate) fn new(channel: &'a mut Channel<T>, depth: usize, description: &'a str) -> Self {
        Self {
            channel,
            depth,
            description,
        }
    }

    fn record(&self, direction: Direction, value: &dyn fmt::Display) {
        self.channel
            .config()
            .diagnostics
            .trace(direction, self.depth, self.description, value);
    }
}

struct Listed<'a, P>(&'a [P]);

impl<P: fmt::Display> fmt::Display for Listed<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            value.fmt(f)?;
        }
        f.write_str("]")
    }
}

struct Nullable<'a>(Option<&'a str>);

impl fmt::Display for Nullable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(s) => write!(f, "{s:?}"),
            None => f.write_str("(null)"),
        }
    }
}

impl<T: RawWrite> Traced<'_, T> {
    pub fn send<P: Primitive>(self, value: P) -> Result<()> {
        self.channel.send(value)?;
        self.record(Direction::Send, &value);
        Ok(())
    }

    pub fn send_array<P: Primitive>(self, values: &[P]) -> Result<()> {
        self.channel.send_array(values)?;
        self.record(Direction::Send, &Listed(values));
        Ok(())
    }

    pub fn send_string(self, value: Option<&str>) -> Result<()> {
        self.channel.send_string(value)?;
        self.record(Direction::Send, &Nullable(value));
        Ok(())
    }

    pub fn send_string_array(self, values: &[Option<&str>]) -> Result<()> {
        self.channel.send_string_array(values)?;
        let shown: Vec<Nullable<'_>> = values.iter().map(|value| Nullable(*value)).collect();
        self.record(Direction::Send, &Listed(&shown));
        Ok(())
    }

    pub fn send_terminated(self, payload: &str, terminator: &str) -> Result<()> {
        self.channel.send_terminated(payload, terminator)?;
        self.record(Direction::Send, &Nullable(Some(payload)));
        Ok(())
    }

    pub fn send_bytes(self, bytes: &[u8]) -> Result<()> {
        self.channel.send_bytes(bytes)?;
        self.record(Direction::Send, &format_args!("<{} bytes>", bytes.len()));
        Ok(())
    }
}

impl<T: RawRead> Traced<'_, T> {
    pub fn accept<P: Primitive>(self, opts: RecvOptions) -> Result<P> {
        let value = self.channel.accept::<P>(opts)?;
        self.record(Direction::Receive, &value);
        Ok(value)
    }

    pub fn accept_array<P: Primitive>(self, count: usize, opts: RecvOptions) -> Result<Vec<P>> {
        let values = self.channel.accept_array::<P>(count, opts)?;
        self.record(Direction::Receive, &Listed(&values));
        Ok(values)
    }

    pub fn accept_string(self, opts: RecvOptions) -> Result<Option<String>> {
        let value = self.channel.accept_string(opts)?;
        self.record(Direction::Receive, &Nullable(value.as_deref()));
        Ok(value)
    }

    pub fn accept_string_array(self, opts: RecvOptions) -> Result<Vec<Option<String>>> {
        let values = self.channel.accept_string_array(opts)?;
        let shown: Vec<Nullable<'_>> = values.iter().map(|value| Nullable(value.as_deref())).collect();
        self.record(Direction::Receive, &Listed(&shown));
        Ok(values)
    }

    pub fn accept_terminated(self, terminator: &str, opts: RecvOptions) -> Result<String> {
        let value = self.channel.accept_terminated_string(terminator, opts)?;
        self.record(Direction::Receive, &Nullable(Some(&value)));
        Ok(value)
    }

    pub fn accept_bytes(self, buf: &mut [u8], opts: RecvOptions) -> Result<usize> {
        let n = self.channel.accept_bytes(buf, opts)?;
        self.record(Direction::Receive, &format_args!("<{n} bytes>"));
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn trace_line_format() {
        let buf = SharedBuf::default();
        let diagnostics = Diagnostics::with_trace(TraceSink::from_writer(buf.clone()));

        diagnostics.trace(Direction::Send, 0, "count", &3);
        diagnostics.trace(Direction::Receive, 2, "name", &Nullable(Some("alan")));
        diagnostics.trace(Direction::Receive, 1, "missing", &Nullable(None));

        assert_eq!(
            buf.text(),
            "send  0 count = 3\nrecv  2     name = \"alan\"\nrecv  1   missing = (null)\n"
        );
    }

    #[test]
    fn clones_share_sink_and_last_error() {
        let buf = SharedBuf::default();
        let first = Diagnostics::with_trace(TraceSink::from_writer(buf.clone()));
        let second = first.clone();

        first.trace(Direction::Send, 0, "a", &1);
        second.trace(Direction::Send, 0, "b", &2);
        assert_eq!(buf.text().lines().count(), 2);

        second.record_error("peer went away");
        assert_eq!(first.last_error().as_deref(), Some("peer went away"));
        first.clear_error();
        assert_eq!(second.last_error(), None);
    }

    #[test]
    fn disabled_trace_is_silent() {
        let diagnostics = Diagnostics::new();
        assert!(!diagnostics.trace_enabled());
        diagnostics.trace(Direction::Send, 0, "ignored", &0);
    }

    #[test]
    fn listed_values() {
        assert_eq!(Listed(&[1, 2, 3]).to_string(), "[1, 2, 3]");
        assert_eq!(Listed::<u8>(&[]).to_string(), "[]");
    }

    #[cfg(unix)]
    #[test]
    fn traced_channel_operations_write_lines() {
        use std::time::Duration;

        use wirechan_transport::{pipe_pair, Role};

        use crate::channel::ChannelConfig;

        let buf = SharedBuf::default();
        let config = ChannelConfig {
            diagnostics: Diagnostics::with_trace(TraceSink::from_writer(buf.clone())),
            ..ChannelConfig::default()
        };
        let (reader, writer) = pipe_pair().unwrap();
        let mut writer = Channel::with_config(writer, Role::Local, config.clone());
        let mut reader = Channel::with_config(reader, Role::Local, config);
        let wait = RecvOptions::timeout(Duration::from_secs(1));

        writer.traced(0, "n").send(3i32).unwrap();
        assert_eq!(reader.traced(1, "n").accept::<i32>(wait).unwrap(), 3);

        writer.traced(0, "pair").send_array(&[1u16, 2]).unwrap();
        reader.traced(0, "pair").accept_array::<u16>(2, wait).unwrap();

        writer.traced(1, "name").send_string(Some("alan")).unwrap();
        writer.traced(1, "none").send_string(None).unwrap();
        assert_eq!(
            reader.traced(1, "name").accept_string(wait).unwrap().as_deref(),
            Some("alan")
        );
        assert_eq!(reader.traced(1, "none").accept_string(wait).unwrap(), None);

        assert_eq!(
            buf.text(),
            concat!(
                "send  0 n = 3\n",
                "recv  1   n = 3\n",
                "send  0 pair = [1, 2]\n",
                "recv  0 pair = [1, 2]\n",
                "send  1   name = \"alan\"\n",
                "send  1   none = (null)\n",
                "recv  1   name = \"alan\"\n",
                "recv  1   none = (null)\n",
            )
        );
    }

    #[cfg(unix)]
    #[test]
    fn failed_traced_operation_writes_nothing() {
        use wirechan_transport::{pipe_pair, Role};

        use crate::channel::ChannelConfig;

        let buf = SharedBuf::default();
        let config = ChannelConfig {
            diagnostics: Diagnostics::with_trace(TraceSink::from_writer(buf.clone())),
            ..ChannelConfig::default()
        };
        let (reader, writer) = pipe_pair().unwrap();
        drop(writer);
        let mut reader = Channel::with_config(reader, Role::Local, config);

        assert!(reader
            .traced(0, "n")
            .accept::<i32>(RecvOptions::blocking())
            .is_err());
        assert_eq!(buf.text(), "");
    }
}
