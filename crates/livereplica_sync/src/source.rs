//! Collaborators a session reads from.
//!
//! A session needs three things from upstream: a way to make sure the
//! collection exists, a change feed, and a one-shot snapshot query. Each is
//! an async trait so that drivers, test doubles and recorded replays can
//! stand in for the real database.

use crate::config::SortSpec;
use crate::error::SyncResult;
use async_trait::async_trait;
use livereplica_core::{ChangeEvent, Document};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One message delivered by a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// A change to one document, or an invalidation.
    Change(ChangeEvent),
    /// A transport-level error. The feed may or may not deliver more.
    Error(String),
}

/// Point-in-time query over a collection.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Returns at most `limit` documents ordered by `sort`.
    async fn query(
        &self,
        collection: &str,
        sort: &SortSpec,
        limit: usize,
    ) -> SyncResult<Vec<Document>>;
}

/// Opens change feeds.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Subscribes to changes of `collection` from now on.
    async fn subscribe(&self, collection: &str) -> SyncResult<Box<dyn FeedHandle>>;
}

/// Makes sure a collection exists before it is watched.
#[async_trait]
pub trait CollectionEnsurer: Send + Sync {
    /// Creates `collection` if it does not exist yet.
    async fn ensure_exists(&self, collection: &str) -> SyncResult<()>;
}

/// An open change feed.
#[async_trait]
pub trait FeedHandle: Send {
    /// Waits for the next message. `None` means the feed has ended.
    ///
    /// Must be cancel-safe: dropping the future before it completes must
    /// not lose a message.
    async fn next(&mut self) -> Option<FeedMessage>;

    /// Closes the feed and releases its resources.
    async fn close(&mut self);
}

/// A feed handle backed by an unbounded channel.
#[derive(Debug)]
pub struct ChannelFeed {
    receiver: mpsc::UnboundedReceiver<FeedMessage>,
}

impl ChannelFeed {
    /// Creates a connected sender and feed.
    pub fn channel() -> (mpsc::UnboundedSender<FeedMessage>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

#[async_trait]
impl FeedHandle for ChannelFeed {
    async fn next(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }

    async fn close(&mut self) {
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }
}

/// The collaborators of one session.
#[derive(Clone)]
pub struct Sources {
    /// Snapshot query.
    pub snapshot: Arc<dyn SnapshotSource>,
    /// Change feed.
    pub feed: Arc<dyn FeedSource>,
    /// Collection creation.
    pub collections: Arc<dyn CollectionEnsurer>,
}

impl Sources {
    /// Bundles three collaborators.
    pub fn new(
        snapshot: Arc<dyn SnapshotSource>,
        feed: Arc<dyn FeedSource>,
        collections: Arc<dyn CollectionEnsurer>,
    ) -> Self {
        Self {
            snapshot,
            feed,
            collections,
        }
    }

    /// Uses one upstream for all three roles.
    pub fn from_upstream<U>(upstream: Arc<U>) -> Self
    where
        U: SnapshotSource + FeedSource + CollectionEnsurer + 'static,
    {
        Self {
            snapshot: upstream.clone(),
            feed: upstream.clone(),
            collections: upstream,
        }
    }
}

impl std::fmt::Debug for Sources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sources").finish_non_exhaustive()
    }
}
