//! Fan-out delivery of versioned values to subscribers.
//!
//! Grounded on the teacher's `Rx`/`Reader`/`Writer` pair: a `tokio::sync::watch`
//! channel already gives "deliver latest on subscribe" and "overflow drops
//! the oldest buffered value in favour of the newest" for free, so every
//! publisher's stream (address sets, opaque-port sets, profiles, splits) is
//! built directly on top of one rather than a hand-rolled bounded channel.

use tokio::sync::watch;

/// A value paired with a monotonically increasing version number.
///
/// Every `Topic`'s subscribers observe strictly increasing versions; a
/// `publish` that produces a value equal to the current one is a no-op and
/// does not bump the version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self { version: 0, value }
    }

    fn next(&self, value: T) -> Self {
        Self {
            version: self.version + 1,
            value,
        }
    }
}

/// The producer-side handle to a publisher's stream of versioned values.
///
/// Held exclusively by the publisher that owns this subscription key;
/// `publish` is the only way a new value is created, so version numbers only
/// ever increase.
#[derive(Clone)]
pub struct TopicWriter<T> {
    tx: watch::Sender<Versioned<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> TopicWriter<T> {
    pub fn new(initial: T) -> (Self, Topic<T>) {
        let (tx, rx) = watch::channel(Versioned::new(initial));
        (Self { tx }, Topic { rx })
    }

    /// Current value, without publishing a new one.
    pub fn current(&self) -> Versioned<T> {
        self.tx.borrow().clone()
    }

    /// Returns a fresh subscriber handle to this publisher's stream.
    pub fn subscribe(&self) -> Topic<T> {
        Topic {
            rx: self.tx.subscribe(),
        }
    }

    /// Derives and publishes the next value from the current one.
    ///
    /// No-op (and no version bump) if the computed value is identical to the
    /// current one, matching the "republish only if something actually
    /// changed" rule that several watchers rely on.
    pub fn publish(&self, compute: impl FnOnce(&T) -> T) {
        self.tx.send_if_modified(|current| {
            let next = compute(&current.value);
            if next == current.value {
                return false;
            }
            *current = current.next(next);
            true
        });
    }

    /// Unconditionally publishes `value`, bumping the version even if it is
    /// unchanged. Used for terminal notifications, where subscribers must
    /// observe a final delivery even if its payload repeats the last one.
    pub fn publish_always(&self, value: T) {
        self.tx.send_modify(|current| *current = current.next(value));
    }

    /// Number of live subscribers, including any not yet polled.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// The subscriber-facing handle returned from a watcher's subscribe API.
#[derive(Clone)]
pub struct Topic<T> {
    rx: watch::Receiver<Versioned<T>>,
}

impl<T: Clone + Send + Sync + 'static> Topic<T> {
    /// Subscribes, receiving the current value immediately followed by every
    /// subsequent change. The stream ends when the producer side is dropped.
    pub fn into_stream(self) -> impl futures::Stream<Item = Versioned<T>> {
        async_stream::stream! {
            let mut rx = self.rx;
            yield rx.borrow_and_update().clone();
            while rx.changed().await.is_ok() {
                yield rx.borrow_and_update().clone();
            }
        }
    }

    /// Reads the current value without waiting for a change.
    pub fn current(&mut self) -> Versioned<T> {
        self.rx.borrow_and_update().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscribe_delivers_current_value_immediately() {
        let (writer, topic) = TopicWriter::new(0u32);
        writer.publish(|_| 1);

        let mut stream = Box::pin(topic.into_stream());
        let first = stream.next().await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.value, 1);
    }

    #[tokio::test]
    async fn versions_strictly_increase_and_unchanged_values_do_not_republish() {
        let (writer, topic) = TopicWriter::new(0u32);
        let mut stream = Box::pin(topic.into_stream());

        let v0 = stream.next().await.unwrap();
        assert_eq!(v0.version, 0);

        writer.publish(|_| 1);
        writer.publish(|_| 1);
        writer.publish(|_| 2);

        let v1 = stream.next().await.unwrap();
        assert_eq!(v1.version, 1);
        let v2 = stream.next().await.unwrap();
        assert_eq!(v2.version, 2);
        assert!(v1.version < v2.version);
    }

    #[tokio::test]
    async fn stream_ends_after_writer_drop() {
        let (writer, topic) = TopicWriter::new(0u32);
        let mut stream = Box::pin(topic.into_stream());
        let _ = stream.next().await;

        writer.publish_always(0);
        let _ = stream.next().await;

        drop(writer);
        assert!(stream.next().await.is_none());
    }
}
