//! Replay command implementation.
//!
//! Serves a recorded snapshot and change feed to a real `SyncSession` and
//! writes the replica it ends up with. The feed file holds one change-stream
//! document per line:
//!
//! ```text
//! {"operationType":"insert","fullDocument":{"_id":2,"createdAt":20}}
//! {"operationType":"delete","documentKey":{"_id":1}}
//! ```

use async_trait::async_trait;
use clap::ValueEnum;
use livereplica_core::{Document, RawChange};
use livereplica_sync::{
    ChannelFeed, FeedHandle, FeedMessage, FeedSource, MemoryUpstream, SessionConfig,
    SessionState, SessionStats, Sources, SyncError, SyncResult, SyncSession,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Output encoding of the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON array.
    Json,
    /// CBOR array.
    Cbor,
}

/// Options of the replay command.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Snapshot file, a JSON array of documents.
    pub snapshot: PathBuf,
    /// Feed file, one change-stream document per line.
    pub feed: PathBuf,
    /// Collection name.
    pub collection: String,
    /// Sort key field.
    pub sort_key: String,
    /// Document id field.
    pub id_field: String,
    /// Snapshot limit.
    pub limit: usize,
    /// Output format.
    pub format: OutputFormat,
    /// Output file; stdout if absent.
    pub output: Option<PathBuf>,
}

/// Errors of the replay command.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// An input file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An input file is malformed.
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What is wrong.
        message: String,
    },

    /// The session failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The output could not be written.
    #[error("cannot write output: {0}")]
    Write(String),
}

/// What a replay produced.
#[derive(Debug)]
pub struct ReplayOutcome {
    /// Replica in sort order.
    pub documents: Vec<Document>,
    /// State the session ended in.
    pub state: SessionState,
    /// Session statistics.
    pub stats: SessionStats,
}

/// A feed that delivers a fixed list of messages, then ends.
struct RecordedFeed {
    messages: Mutex<Option<Vec<FeedMessage>>>,
}

#[async_trait]
impl FeedSource for RecordedFeed {
    async fn subscribe(&self, collection: &str) -> SyncResult<Box<dyn FeedHandle>> {
        let messages = self.messages.lock().take().unwrap_or_default();
        debug!(collection, messages = messages.len(), "replaying feed");

        let (sender, feed) = ChannelFeed::channel();
        for message in messages {
            sender
                .send(message)
                .map_err(|_| SyncError::feed("recorded feed closed early"))?;
        }
        Ok(Box::new(feed))
    }
}

/// Runs the replay command.
pub fn run(options: ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(replay(&options))?;

    info!(
        state = %outcome.state,
        documents = outcome.documents.len(),
        applied = outcome.stats.events_applied,
        skipped = outcome.stats.events_skipped,
        "replay finished"
    );

    let bytes = encode(&outcome.documents, options.format)?;
    match &options.output {
        Some(path) => fs::write(path, bytes).map_err(|err| ReplayError::Write(err.to_string()))?,
        None => std::io::stdout()
            .write_all(&bytes)
            .map_err(|err| ReplayError::Write(err.to_string()))?,
    }
    Ok(())
}

/// Replays the recorded inputs through a session.
pub async fn replay(options: &ReplayOptions) -> Result<ReplayOutcome, ReplayError> {
    let snapshot = load_snapshot(&options.snapshot, &options.id_field)?;
    let messages = load_feed(&options.feed, &options.id_field)?;

    let upstream = Arc::new(MemoryUpstream::with_id_field(options.id_field.clone()));
    upstream.seed(&options.collection, snapshot);
    let feed = Arc::new(RecordedFeed {
        messages: Mutex::new(Some(messages)),
    });
    let sources = Sources::new(upstream.clone(), feed, upstream);

    let config = SessionConfig::new(options.collection.clone())
        .with_sort_key(options.sort_key.clone())
        .with_limit(options.limit);
    // The recorded feed ends on its own, so wait for a terminal state
    // rather than readiness.
    let session = SyncSession::spawn(config, sources)?;

    let state = {
        let mut states = session.watch_state();
        let state = *states
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|err| SyncError::Task(err.to_string()))?;
        state
    };

    match state {
        SessionState::Failed => {
            return Err(session
                .error()
                .unwrap_or_else(|| SyncError::Task("session failed".into()))
                .into())
        }
        SessionState::Invalidated => warn!("feed was invalidated; replica reflects events up to the invalidation"),
        _ => {}
    }

    let outcome = ReplayOutcome {
        documents: session.documents(),
        state,
        stats: session.stats(),
    };
    session.stop().await;
    Ok(outcome)
}

/// Reads the snapshot file.
pub fn load_snapshot(path: &Path, id_field: &str) -> Result<Vec<Document>, ReplayError> {
    let text = read(path)?;
    let values: Vec<Value> = serde_json::from_str(&text).map_err(|err| ReplayError::Parse {
        path: path.to_path_buf(),
        line: err.line(),
        message: err.to_string(),
    })?;

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            Document::from_value(value, id_field).map_err(|err| ReplayError::Parse {
                path: path.to_path_buf(),
                line: 0,
                message: format!("document {index}: {err}"),
            })
        })
        .collect()
}

/// Reads the feed file. Operations the replica ignores are dropped.
pub fn load_feed(path: &Path, id_field: &str) -> Result<Vec<FeedMessage>, ReplayError> {
    let text = read(path)?;
    let mut messages = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parse_error = |message: String| ReplayError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        };

        let value: Value = serde_json::from_str(line).map_err(|err| parse_error(err.to_string()))?;
        let change = RawChange::from_json(value).map_err(|err| parse_error(err.to_string()))?;
        let operation = change.operation_type.clone();
        match change
            .into_event(id_field)
            .map_err(|err| parse_error(err.to_string()))?
        {
            Some(event) => messages.push(FeedMessage::Change(event)),
            None => debug!(line = index + 1, %operation, "ignoring operation"),
        }
    }

    Ok(messages)
}

/// Encodes the replica.
pub fn encode(documents: &[Document], format: OutputFormat) -> Result<Vec<u8>, ReplayError> {
    match format {
        OutputFormat::Json => {
            let mut bytes = serde_json::to_vec_pretty(documents)
                .map_err(|err| ReplayError::Write(err.to_string()))?;
            bytes.push(b'\n');
            Ok(bytes)
        }
        OutputFormat::Cbor => {
            let mut bytes = Vec::new();
            ciborium::ser::into_writer(documents, &mut bytes)
                .map_err(|err| ReplayError::Write(err.to_string()))?;
            Ok(bytes)
        }
    }
}

fn read(path: &Path) -> Result<String, ReplayError> {
    fs::read_to_string(path).map_err(|source| ReplayError::Read {
        path: path.to_path_buf(),
        source,
    })
}
