/// Communication layer for GDB/MI protocol
///
/// This module handles the byte-level plumbing between the engine and
/// the GDB process: reader tasks that forward raw chunks, framers that
/// cut those chunks into complete records, and the sink commands are
/// written to.

use std::fmt;
use std::io::Write;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const PROMPT: &[u8] = b"(gdb)";
const OVERLOADS_PROMPT: &[u8] = b"> ";
const READ_CHUNK: usize = 4096;

/// Default cap for a single buffered record
pub const DEFAULT_MAX_RECORD_BYTES: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to write command: {0}")]
    WriteError(#[from] std::io::Error),
    #[error("Command channel closed")]
    Closed,
    #[error("No command channel attached")]
    NotAttached,
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// The streams the engine reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
    /// Master side of GDB's terminal
    Terminal,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
            Channel::Terminal => "terminal",
        };
        write!(f, "{}", s)
    }
}

/// What a reader task delivers to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Data { channel: Channel, bytes: Vec<u8> },
    Closed(Channel),
}

/// Destination of command lines
pub trait CommandSink {
    /// Write `line` followed by a newline and flush
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// Writes commands to GDB's terminal (or stdin pipe)
pub struct TerminalWriter {
    file: Option<std::fs::File>,
}

impl TerminalWriter {
    pub fn new(file: std::fs::File) -> Self {
        Self { file: Some(file) }
    }

    pub fn close(&mut self) {
        self.file = None;
    }
}

impl CommandSink for TerminalWriter {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let file = self.file.as_mut().ok_or(ChannelError::Closed)?;
        log::debug!("SEND: {}", line);
        let written = file
            .write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush());
        if let Err(e) = written {
            log::error!("SEND failed: {}", e);
            self.file = None;
            return Err(ChannelError::WriteError(e));
        }
        Ok(())
    }
}

/// Accumulates output bytes until they end with a prompt, then yields
/// the whole buffer as one record
#[derive(Debug)]
pub struct RecordFramer {
    buffer: Vec<u8>,
    max_record_bytes: usize,
    accept_overloads_prompt: bool,
}

impl RecordFramer {
    /// Framer for GDB's stdout, complete on `(gdb)`
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_record_bytes,
            accept_overloads_prompt: false,
        }
    }

    /// Framer for GDB's terminal, also complete on the overloads `> ` prompt
    pub fn for_terminal(max_record_bytes: usize) -> Self {
        Self {
            accept_overloads_prompt: true,
            ..Self::new(max_record_bytes)
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn ends_with_prompt(&self) -> bool {
        let end = self
            .buffer
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |pos| pos + 1);
        if self.buffer[..end].ends_with(PROMPT) {
            return true;
        }
        self.accept_overloads_prompt
            && (self.buffer.ends_with(b"\n> ") || self.buffer.as_slice() == OVERLOADS_PROMPT)
    }

    /// Add a chunk. Returns the buffered record once it is complete.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.buffer.extend_from_slice(bytes);
        if self.ends_with_prompt() {
            return Some(self.take());
        }
        if self.buffer.len() > self.max_record_bytes {
            log::warn!(
                "record exceeds {} bytes without a prompt, flushing",
                self.max_record_bytes
            );
            return Some(self.take());
        }
        None
    }

    /// Empty the buffer, returning whatever it held
    pub fn take(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
    }
}

/// Cuts a byte stream into lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return the complete, non-blank lines it finished
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim_end().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// The unterminated tail, if any
    pub fn flush(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer))
            .trim_end()
            .to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Start a task that forwards everything read from `reader` to the
/// engine, followed by a `Closed` event at EOF or on error
pub fn spawn_reader<R>(
    channel: Channel,
    mut reader: R,
    sender: mpsc::UnboundedSender<ChannelEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        log::debug!("GDB {} reader started", channel);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    log::debug!("GDB {}: EOF reached", channel);
                    break;
                }
                Ok(n) => {
                    log::trace!("GDB_OUT[{}]: {:?}", channel, String::from_utf8_lossy(&chunk[..n]));
                    let event = ChannelEvent::Data {
                        channel,
                        bytes: chunk[..n].to_vec(),
                    };
                    if sender.send(event).is_err() {
                        log::debug!("GDB {}: engine gone", channel);
                        return;
                    }
                }
                Err(e) => {
                    // A terminal master reports EIO once the slave side hangs up
                    if channel == Channel::Terminal && e.raw_os_error() == Some(5) {
                        log::debug!("GDB {}: hang-up", channel);
                    } else {
                        log::error!("GDB {} read error: {}", channel, e);
                    }
                    break;
                }
            }
        }
        let _ = sender.send(ChannelEvent::Closed(channel));
        log::debug!("GDB {} reader finished", channel);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_waits_for_prompt() {
        let mut framer = RecordFramer::new(DEFAULT_MAX_RECORD_BYTES);
        assert_eq!(framer.push(b"^done,value=\"4"), None);
        assert_eq!(framer.push(b"2\"\n(gd"), None);
        assert_eq!(
            framer.push(b"b) \n"),
            Some("^done,value=\"42\"\n(gdb) \n".to_string())
        );
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_framer_ignores_prompt_text_mid_buffer() {
        let mut framer = RecordFramer::new(DEFAULT_MAX_RECORD_BYTES);
        assert_eq!(framer.push(b"~\"(gdb)\"\n^do"), None);
        assert!(framer.push(b"ne\n(gdb)\n").is_some());
    }

    #[test]
    fn test_terminal_framer_accepts_overloads_prompt() {
        let mut stdout = RecordFramer::new(DEFAULT_MAX_RECORD_BYTES);
        assert_eq!(stdout.push(b"[0] cancel\n[1] all\n> "), None);

        let mut terminal = RecordFramer::for_terminal(DEFAULT_MAX_RECORD_BYTES);
        assert_eq!(terminal.push(b"[0] cancel\n"), None);
        assert_eq!(
            terminal.push(b"[1] all\n> "),
            Some("[0] cancel\n[1] all\n> ".to_string())
        );
    }

    #[test]
    fn test_framer_flushes_oversized_records() {
        let mut framer = RecordFramer::new(8);
        assert_eq!(framer.push(b"~\"abc"), None);
        assert_eq!(framer.push(b"defgh\""), Some("~\"abcdefgh\"".to_string()));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_line_framer() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"warning: no").is_empty());
        assert_eq!(
            framer.push(b" symbols\r\n\nsecond\nthi"),
            vec!["warning: no symbols".to_string(), "second".to_string()]
        );
        assert_eq!(framer.flush(), Some("thi".to_string()));
        assert_eq!(framer.flush(), None);
    }

    #[test]
    fn test_terminal_writer_appends_newline() {
        let path = std::env::temp_dir().join(format!("gdbengine-writer-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = TerminalWriter::new(file);
        writer.write_line("-exec-run").unwrap();
        writer.close();
        assert!(matches!(writer.write_line("-exec-next"), Err(ChannelError::Closed)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "-exec-run\n");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_reader_forwards_chunks_then_closes() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let input: &[u8] = b"^done\n(gdb) \n";
        spawn_reader(Channel::Stdout, input, sender).await.unwrap();

        let mut bytes = Vec::new();
        loop {
            match receiver.recv().await {
                Some(ChannelEvent::Data { channel, bytes: chunk }) => {
                    assert_eq!(channel, Channel::Stdout);
                    bytes.extend(chunk);
                }
                Some(ChannelEvent::Closed(channel)) => {
                    assert_eq!(channel, Channel::Stdout);
                    break;
                }
                None => panic!("reader dropped the sender without closing"),
            }
        }
        assert_eq!(bytes, b"^done\n(gdb) \n");
    }
}
