pub mod requester;
pub mod sync;

pub use requester::{BlockRequester, BlockStream, ChainSelector, StreamEvent, StreamItem};
