use futures::Stream;
use futures::stream;
use tokio::sync::watch;

/// Current value of `receiver` followed by every value it changes to.
///
/// Each call yields an independent stream. Updates published faster than a
/// subscriber polls are coalesced to the latest one.
pub fn watch_stream<T>(receiver: watch::Receiver<T>) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first {
            receiver.changed().await.ok()?;
        }
        let value = receiver.borrow_and_update().clone();
        Some((value, (receiver, false)))
    })
}
