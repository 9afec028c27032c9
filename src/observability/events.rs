//! Structured contest event stream.
//!
//! Milestones of a contest (start, each resolved round and escape, the
//! final result) serialized as JSONL with a monotonically increasing
//! sequence number. Meant for spectators and post-game analysis; the
//! wire protocol is separate.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::contest::participant::{ParticipantId, Standing};

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A contest milestone.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The server is listening.
    ServerStarted {
        timestamp: DateTime<Utc>,
        bind: String,
        contest_id: String,
    },

    /// The server has stopped.
    ServerStopped {
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// The lobby closed and round 1 is about to begin.
    ContestStarted {
        timestamp: DateTime<Utc>,
        contest_id: String,
        participants: Vec<ParticipantId>,
    },

    /// The adversary searched and stakes were paid.
    RoundResolved {
        timestamp: DateTime<Utc>,
        round: u32,
        searched: String,
        caught: Vec<ParticipantId>,
    },

    /// A caught participant's escape played out.
    EscapeResolved {
        timestamp: DateTime<Utc>,
        round: u32,
        participant: ParticipantId,
        choice: String,
        guess: String,
        escaped: bool,
        points_kept: u32,
    },

    /// The contest is over.
    ContestFinished {
        timestamp: DateTime<Utc>,
        contest_id: String,
        winner: Option<ParticipantId>,
        rounds_played: u32,
        standings: Vec<Standing>,
    },
}

/// Wraps an [`Event`] with its sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization and I/O failures are dropped; the event stream must never
/// stall or fault a contest.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes one event as a JSON line and flushes.
    pub fn emit(&self, event: Event) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope { sequence, event };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[derive(Clone)]
    struct TestWriter(Arc<StdMutex<Vec<u8>>>);

    impl TestWriter {
        fn new() -> Self {
            Self(Arc::new(StdMutex::new(Vec::new())))
        }

        fn lines(&self) -> Vec<serde_json::Value> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn emits_flat_jsonl_with_sequence() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(Event::RoundResolved {
            timestamp: Utc::now(),
            round: 2,
            searched: "Bank Vault".to_string(),
            caught: vec![ParticipantId::new("p1")],
        });
        emitter.emit(Event::ServerStopped {
            timestamp: Utc::now(),
            reason: "contest finished".to_string(),
        });

        assert_eq!(emitter.event_count(), 2);
        let lines = tw.lines();
        assert_eq!(lines[0]["sequence"], 0);
        assert_eq!(lines[0]["type"], "RoundResolved");
        assert_eq!(lines[0]["searched"], "Bank Vault");
        assert_eq!(lines[0]["caught"][0], "p1");
        assert!(lines[0].get("event").is_none());
        assert_eq!(lines[1]["sequence"], 1);
        assert_eq!(lines[1]["type"], "ServerStopped");
    }

    #[test]
    fn noop_counts_but_writes_nothing() {
        let emitter = EventEmitter::noop();
        emitter.emit(Event::ServerStopped {
            timestamp: Utc::now(),
            reason: "test".to_string(),
        });
        assert_eq!(emitter.event_count(), 1);
    }
}
