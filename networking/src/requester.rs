use anyhow::Result;
use async_trait::async_trait;
use containers::{Block, Hash32};
use futures::Stream;
use libp2p_identity::PeerId;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Which block sequence a streaming request addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChainSelector {
    Beacon,
    Shard(u8),
    /// Cross-shard blocks produced by `source` and destined for `target`.
    CrossShard { source: u8, target: u8 },
    /// Condensed shard blocks for beacon producers.
    ShardToBeacon(u8),
}

impl fmt::Display for ChainSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainSelector::Beacon => write!(f, "beacon"),
            ChainSelector::Shard(id) => write!(f, "shard-{id}"),
            ChainSelector::CrossShard { source, target } => {
                write!(f, "cross-{source}-to-{target}")
            }
            ChainSelector::ShardToBeacon(id) => write!(f, "s2b-{id}"),
        }
    }
}

/// One item of a block stream.
///
/// `End` is the explicit completion sentinel; a stream that closes without
/// delivering it was cut short and the data received so far is a partial
/// result.
#[derive(Debug)]
pub enum StreamItem {
    Block(Block),
    End,
}

/// What the consumer saw when asking for the next item.
#[derive(Debug)]
pub enum StreamEvent {
    Block(Block),
    /// The sender signalled completion.
    End,
    /// The channel closed without the completion sentinel.
    Cut,
    /// The deadline passed before the next item arrived.
    TimedOut,
}

/// Receiver half of one streaming block request.
pub struct BlockStream {
    rx: mpsc::Receiver<StreamItem>,
}

impl BlockStream {
    pub fn new(rx: mpsc::Receiver<StreamItem>) -> Self {
        Self { rx }
    }

    /// A connected sender/stream pair, for responders and tests.
    pub fn channel(capacity: usize) -> (mpsc::Sender<StreamItem>, BlockStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, BlockStream::new(rx))
    }

    /// Next event, not waiting past `deadline`. Cancellation keeps partial
    /// progress: the caller treats everything received so far as valid.
    pub async fn next_before(&mut self, deadline: Instant) -> StreamEvent {
        match timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(StreamItem::Block(block))) => StreamEvent::Block(block),
            Ok(Some(StreamItem::End)) => StreamEvent::End,
            Ok(None) => StreamEvent::Cut,
            Err(_) => StreamEvent::TimedOut,
        }
    }
}

impl Stream for BlockStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamItem>> {
        self.rx.poll_recv(cx)
    }
}

/// Streaming fetch contract against the transport layer.
///
/// Abstracts the wire protocol so the sync drivers can be exercised with
/// mocks; a stream yields zero or more blocks followed by the end sentinel.
#[async_trait]
pub trait BlockRequester: Send + Sync {
    /// Whether the transport is up and able to serve requests.
    fn is_ready(&self) -> bool;

    /// Stream blocks with heights `from..=to` of `selector` from `peer`.
    async fn request_blocks_by_range(
        &self,
        peer: PeerId,
        selector: ChainSelector,
        from: u64,
        to: u64,
    ) -> Result<BlockStream>;

    /// Stream specific blocks addressed by hash.
    async fn request_blocks_by_hash(
        &self,
        peer: PeerId,
        selector: ChainSelector,
        hashes: Vec<Hash32>,
    ) -> Result<BlockStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_stream_yields_blocks_then_sentinel() {
        let (tx, mut stream) = BlockStream::channel(4);
        tx.send(StreamItem::End).await.unwrap();
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(matches!(stream.next_before(deadline).await, StreamEvent::End));
    }

    #[tokio::test]
    async fn test_dropped_sender_reads_as_cut() {
        let (tx, mut stream) = BlockStream::channel(4);
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(matches!(stream.next_before(deadline).await, StreamEvent::Cut));
    }

    #[tokio::test]
    async fn test_deadline_reads_as_timeout() {
        let (_tx, mut stream) = BlockStream::channel(4);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(
            stream.next_before(deadline).await,
            StreamEvent::TimedOut
        ));
    }
}
