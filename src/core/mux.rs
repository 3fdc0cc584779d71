//! Read multiplexing
//!
//! Every live connection contributes one read stream to a [`SelectAll`], so a
//! single `select!` waits on all of them at once. Streams are tagged with the
//! key of their connection and end with [`ReadEvent::Closed`]; dropping a
//! connection aborts its stream through the returned [`AbortHandle`].

use futures::stream::{self, AbortHandle, BoxStream, SelectAll, Stream, StreamExt};
use std::io;

/// Something happened on a connection
#[derive(Debug)]
pub enum ReadEvent<T> {
    /// Decoded data
    Data(T),
    /// Read failed; the stream ends after this
    Failed(io::Error),
    /// End of stream
    Closed,
}

/// All read streams of a daemon
pub type ReadStreams<K, T> = SelectAll<BoxStream<'static, (K, ReadEvent<T>)>>;

/// Tag a read stream with its connection key
pub fn watch<K, S, T>(key: K, reads: S) -> (BoxStream<'static, (K, ReadEvent<T>)>, AbortHandle)
where
    K: Clone + Send + 'static,
    S: Stream<Item = Result<T, io::Error>> + Send + 'static,
    T: Send + 'static,
{
    let (reads, handle) = stream::abortable(reads);
    let closing = key.clone();

    let tagged = reads
        .map(move |item| {
            let event = match item {
                Ok(data) => ReadEvent::Data(data),
                Err(e) => ReadEvent::Failed(e),
            };
            (key.clone(), event)
        })
        .chain(stream::once(async move { (closing, ReadEvent::Closed) }))
        .boxed();

    (tagged, handle)
}
