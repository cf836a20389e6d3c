//! Receiving side of chunked file transfers
//!
//! The server only relays `FILE`, `BUFFER` and `ENDOFFILE` envelopes. The
//! client that receives them feeds every envelope into a
//! [`FileTransferCoordinator`], which keeps one open sink per sender and hands
//! the finished transfer to a [`TransferHook`].

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};

use crate::errors::{ChatError, ProtocolError, Result};
use crate::protocol::wire::{decode_b64, ServerMessage};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Default raw bytes per `BUFFER` chunk (16KB)
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// Output target accumulating one transfer
pub trait TransferSink: Send {
    /// Append decoded bytes
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush and close, returning where the data landed (if anywhere)
    fn close(self: Box<Self>) -> io::Result<Option<PathBuf>>;
}

/// Opens a sink for `(sender, filename)` on `FILE`
pub trait SinkFactory: Send {
    fn open(&self, sender: &str, filename: &str) -> io::Result<Box<dyn TransferSink>>;
}

/// Writes transfers to `<root>/<sender>/<filename>`
#[derive(Debug, Clone)]
pub struct DirectorySinkFactory {
    root: PathBuf,
}

impl DirectorySinkFactory {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SinkFactory for DirectorySinkFactory {
    fn open(&self, sender: &str, filename: &str) -> io::Result<Box<dyn TransferSink>> {
        let dir = self.root.join(sender);
        fs::create_dir_all(&dir)?;
        let path = dir.join(filename);
        let file = File::create(&path)?;
        Ok(Box::new(FileSink {
            writer: BufWriter::new(file),
            path,
        }))
    }
}

struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl TransferSink for FileSink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn close(mut self: Box<Self>) -> io::Result<Option<PathBuf>> {
        self.writer.flush()?;
        Ok(Some(self.path))
    }
}

// ----------------------------------------------------------------------------
// Post-processing
// ----------------------------------------------------------------------------

/// Summary of a finished transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTransfer {
    pub sender: String,
    pub filename: String,
    pub bytes: u64,
    /// Hex SHA-256 of the received bytes
    pub digest: String,
    pub location: Option<PathBuf>,
}

/// Invoked once per transfer after its sink is closed
pub trait TransferHook: Send + Sync {
    fn on_complete(&self, transfer: &CompletedTransfer) -> Result<()>;
}

/// Default hook: log the completed transfer
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

impl TransferHook for LoggingHook {
    fn on_complete(&self, transfer: &CompletedTransfer) -> Result<()> {
        info!(
            sender = %transfer.sender,
            filename = %transfer.filename,
            bytes = transfer.bytes,
            sha256 = %transfer.digest,
            "File transfer complete"
        );
        Ok(())
    }
}

/// Reduce a peer-supplied name to a single safe path component
pub fn sanitize_component(name: &str) -> core::result::Result<String, ProtocolError> {
    let candidate = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(ProtocolError::InvalidFileName {
            filename: name.to_string(),
        });
    }
    Ok(candidate.to_string())
}

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

struct ActiveTransfer {
    filename: String,
    sink: Box<dyn TransferSink>,
    hasher: Sha256,
    bytes: u64,
}

/// Tracks open transfers, one per sender
pub struct FileTransferCoordinator {
    factory: Box<dyn SinkFactory>,
    hook: Box<dyn TransferHook>,
    active: HashMap<String, ActiveTransfer>,
}

impl FileTransferCoordinator {
    pub fn new(factory: Box<dyn SinkFactory>, hook: Box<dyn TransferHook>) -> Self {
        Self {
            factory,
            hook,
            active: HashMap::new(),
        }
    }

    /// Coordinator writing under `root` with the logging hook
    pub fn with_directory<P: Into<PathBuf>>(root: P) -> Self {
        Self::new(
            Box::new(DirectorySinkFactory::new(root)),
            Box::new(LoggingHook),
        )
    }

    /// Whether `sender` has a transfer between `FILE` and `ENDOFFILE`
    pub fn is_active(&self, sender: &str) -> bool {
        self.active.contains_key(sender)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Feed a server line; non-transfer messages are ignored
    pub fn handle(&mut self, message: &ServerMessage) -> Result<Option<CompletedTransfer>> {
        match message {
            ServerMessage::File { sender, filename } => {
                self.open(sender, filename)?;
                Ok(None)
            }
            ServerMessage::Buffer { sender, chunk } => {
                self.append(sender, chunk)?;
                Ok(None)
            }
            ServerMessage::EndOfFile { sender, filename } => {
                self.finish(sender, filename).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// `FILE <sender> <filename>`: open a sink, replacing any open one
    ///
    /// The previous transfer from `sender` is closed even when the new header
    /// is rejected, so later chunks never land in the old file.
    pub fn open(&mut self, sender: &str, filename: &str) -> Result<()> {
        if let Some(previous) = self.active.remove(sender) {
            warn!(
                sender,
                previous = %previous.filename,
                next = %filename,
                "New FILE replaces an unfinished transfer"
            );
            if let Err(e) = previous.sink.close() {
                warn!(sender, error = %e, "Failed to close replaced sink");
            }
        }

        let sender_dir = sanitize_component(sender)?;
        let filename = sanitize_component(filename)?;

        let sink = self
            .factory
            .open(&sender_dir, &filename)
            .map_err(|e| ChatError::transfer_io(sender, e))?;

        debug!(sender, filename = %filename, "File transfer opened");
        self.active.insert(
            sender.to_string(),
            ActiveTransfer {
                filename,
                sink,
                hasher: Sha256::new(),
                bytes: 0,
            },
        );
        Ok(())
    }

    /// `BUFFER <sender> <base64>`: append one decoded chunk
    pub fn append(&mut self, sender: &str, chunk: &str) -> Result<()> {
        let Some(transfer) = self.active.get_mut(sender) else {
            return Err(ProtocolError::BufferWithoutHeader {
                sender: sender.to_string(),
            }
            .into());
        };

        let bytes = decode_b64(chunk)?;
        transfer
            .sink
            .append(&bytes)
            .map_err(|e| ChatError::transfer_io(sender, e))?;
        transfer.hasher.update(&bytes);
        transfer.bytes += bytes.len() as u64;

        trace!(sender, chunk_len = bytes.len(), total = transfer.bytes, "Chunk appended");
        Ok(())
    }

    /// `ENDOFFILE <sender> <filename>`: close the sink and run the hook
    pub fn finish(&mut self, sender: &str, filename: &str) -> Result<CompletedTransfer> {
        let transfer = self
            .active
            .remove(sender)
            .ok_or(ProtocolError::EndWithoutTransfer)?;

        if sanitize_component(filename).ok().as_deref() != Some(transfer.filename.as_str()) {
            warn!(
                sender,
                opened = %transfer.filename,
                closed = %filename,
                "ENDOFFILE names a different file than FILE"
            );
        }

        let location = transfer
            .sink
            .close()
            .map_err(|e| ChatError::transfer_io(sender, e))?;

        let completed = CompletedTransfer {
            sender: sender.to_string(),
            filename: transfer.filename,
            bytes: transfer.bytes,
            digest: hex::encode(transfer.hasher.finalize()),
            location,
        };

        self.hook.on_complete(&completed)?;
        Ok(completed)
    }
}

// ----------------------------------------------------------------------------
// In-memory sinks (tests)
// ----------------------------------------------------------------------------

#[cfg(any(test, feature = "testing"))]
pub use self::memory::{MemorySinkFactory, ReceivedFiles};

#[cfg(any(test, feature = "testing"))]
mod memory {
    use std::collections::HashMap;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use super::{SinkFactory, TransferSink};

    /// Finished transfers keyed by `(sender, filename)`
    pub type ReceivedFiles = Arc<Mutex<HashMap<(String, String), Vec<u8>>>>;

    /// Sink factory collecting transfers in memory
    #[derive(Debug, Clone, Default)]
    pub struct MemorySinkFactory {
        received: ReceivedFiles,
    }

    impl MemorySinkFactory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Shared view of the finished transfers
        pub fn received(&self) -> ReceivedFiles {
            Arc::clone(&self.received)
        }
    }

    impl SinkFactory for MemorySinkFactory {
        fn open(&self, sender: &str, filename: &str) -> io::Result<Box<dyn TransferSink>> {
            Ok(Box::new(MemorySink {
                key: (sender.to_string(), filename.to_string()),
                buffer: Vec::new(),
                received: Arc::clone(&self.received),
            }))
        }
    }

    struct MemorySink {
        key: (String, String),
        buffer: Vec<u8>,
        received: ReceivedFiles,
    }

    impl TransferSink for MemorySink {
        fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.buffer.extend_from_slice(bytes);
            Ok(())
        }

        fn close(self: Box<Self>) -> io::Result<Option<PathBuf>> {
            let mut received = self
                .received
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            received.insert(self.key, self.buffer);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::encode_b64;
    use std::sync::{Arc, Mutex};

    struct RecordingHook(Arc<Mutex<Vec<CompletedTransfer>>>);

    impl TransferHook for RecordingHook {
        fn on_complete(&self, transfer: &CompletedTransfer) -> Result<()> {
            self.0.lock().unwrap().push(transfer.clone());
            Ok(())
        }
    }

    fn coordinator() -> (FileTransferCoordinator, ReceivedFiles, Arc<Mutex<Vec<CompletedTransfer>>>) {
        let factory = MemorySinkFactory::new();
        let received = factory.received();
        let completed = Arc::new(Mutex::new(Vec::new()));
        let coordinator = FileTransferCoordinator::new(
            Box::new(factory),
            Box::new(RecordingHook(Arc::clone(&completed))),
        );
        (coordinator, received, completed)
    }

    #[test]
    fn test_chunks_reassembled_in_order() {
        let (mut coordinator, received, completed) = coordinator();

        coordinator.open("alice", "report.txt").unwrap();
        assert!(coordinator.is_active("alice"));
        coordinator.append("alice", &encode_b64(b"hello ")).unwrap();
        coordinator.append("alice", &encode_b64(b"world")).unwrap();
        let done = coordinator.finish("alice", "report.txt").unwrap();

        assert!(!coordinator.is_active("alice"));
        assert_eq!(done.bytes, 11);
        assert_eq!(done.digest, hex::encode(Sha256::digest(b"hello world")));
        assert_eq!(
            received.lock().unwrap()[&("alice".to_string(), "report.txt".to_string())],
            b"hello world"
        );
        assert_eq!(completed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_buffer_without_file_is_dropped() {
        let (mut coordinator, received, _) = coordinator();
        let err = coordinator.append("bob", &encode_b64(b"stray")).unwrap_err();
        assert!(matches!(
            err,
            ChatError::Protocol(ProtocolError::BufferWithoutHeader { .. })
        ));
        assert!(received.lock().unwrap().is_empty());
        assert!(coordinator.finish("bob", "x").is_err());
    }

    #[test]
    fn test_senders_never_merge() {
        let (mut coordinator, received, _) = coordinator();
        coordinator.open("alice", "a.bin").unwrap();
        coordinator.open("carol", "c.bin").unwrap();
        coordinator.append("alice", &encode_b64(b"AAA")).unwrap();
        coordinator.append("carol", &encode_b64(b"CCC")).unwrap();
        coordinator.finish("carol", "c.bin").unwrap();
        coordinator.finish("alice", "a.bin").unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received[&("alice".to_string(), "a.bin".to_string())], b"AAA");
        assert_eq!(received[&("carol".to_string(), "c.bin".to_string())], b"CCC");
    }

    #[test]
    fn test_second_file_replaces_sink() {
        let (mut coordinator, received, _) = coordinator();
        coordinator.open("alice", "first.txt").unwrap();
        coordinator.append("alice", &encode_b64(b"old")).unwrap();
        coordinator.open("alice", "second.txt").unwrap();
        coordinator.append("alice", &encode_b64(b"new")).unwrap();
        let done = coordinator.finish("alice", "second.txt").unwrap();

        assert_eq!(done.filename, "second.txt");
        assert_eq!(done.bytes, 3);
        assert_eq!(coordinator.active_count(), 0);
        assert_eq!(
            received.lock().unwrap()[&("alice".to_string(), "second.txt".to_string())],
            b"new"
        );
    }

    #[test]
    fn test_rejected_file_header_closes_previous_transfer() {
        let (mut coordinator, received, completed) = coordinator();
        coordinator.open("alice", "a.txt").unwrap();
        coordinator.append("alice", &encode_b64(b"AAA")).unwrap();

        let err = coordinator.open("alice", "..").unwrap_err();
        assert!(matches!(
            err,
            ChatError::Protocol(ProtocolError::InvalidFileName { .. })
        ));
        assert!(!coordinator.is_active("alice"));

        assert!(coordinator.append("alice", &encode_b64(b"BBB")).is_err());
        assert!(coordinator.finish("alice", "a.txt").is_err());
        assert_eq!(
            received.lock().unwrap()[&("alice".to_string(), "a.txt".to_string())],
            b"AAA"
        );
        assert!(completed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handle_dispatches_envelopes() {
        let (mut coordinator, _, _) = coordinator();
        let lines = [
            "FILE alice notes.txt",
            "BUFFER alice bm90ZXM",
            "[MSG] alice > unrelated",
            "ENDOFFILE alice notes.txt",
        ];
        let mut finished = Vec::new();
        for line in lines {
            if let Some(done) = coordinator.handle(&ServerMessage::parse(line)).unwrap() {
                finished.push(done);
            }
        }
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].bytes, 5);
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("report.txt").unwrap(), "report.txt");
        assert_eq!(sanitize_component("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_component("C:\\tmp\\a.txt").unwrap(), "a.txt");
        assert!(sanitize_component("..").is_err());
        assert!(sanitize_component("dir/").is_err());
    }

    #[test]
    fn test_directory_sink_layout() {
        let root = std::env::temp_dir().join(format!("chatsec-sink-{}", std::process::id()));
        let mut coordinator = FileTransferCoordinator::with_directory(&root);
        coordinator.open("alice", "hello.txt").unwrap();
        coordinator.append("alice", &encode_b64(b"hi")).unwrap();
        let done = coordinator.finish("alice", "hello.txt").unwrap();

        let path = root.join("alice").join("hello.txt");
        assert_eq!(done.location.as_deref(), Some(path.as_path()));
        assert_eq!(fs::read(&path).unwrap(), b"hi");
        let _ = fs::remove_dir_all(&root);
    }
}
