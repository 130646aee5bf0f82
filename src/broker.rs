//! In-process publish/subscribe fabric standing in for the external message
//! bus the design describes as "subjects". Lazily creates one
//! `tokio::sync::broadcast` channel per subject name the first time it is
//! published or subscribed to, and keeps the map behind a `DashMap` so
//! publish/subscribe can happen concurrently from the registrar, every race
//! session, and every player session without any outer lock (the same
//! concurrent-map-of-channels shape `iscsi-client-rs` uses to track
//! in-flight PDUs per connection).

use crate::error::{Result, TypeRaceError};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

const SUBJECT_CAPACITY: usize = 1024;

pub struct Broker {
    subjects: DashMap<String, broadcast::Sender<Bytes>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Broker {
            subjects: DashMap::new(),
        }
    }

    fn sender_for(&self, subject: &str) -> broadcast::Sender<Bytes> {
        if let Some(tx) = self.subjects.get(subject) {
            return tx.clone();
        }
        self.subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(SUBJECT_CAPACITY).0)
            .clone()
    }

    /// Publish raw bytes to a subject. Publishing to a subject with no
    /// subscribers is not an error -- the message is simply dropped, which
    /// mirrors ordinary broadcast-channel semantics.
    pub fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let tx = self.sender_for(subject);
        // SendError only occurs when there are zero receivers; that is a
        // normal condition here (e.g. publishing a RegResponse before the
        // player has subscribed is never expected, but an already-departed
        // subscriber is), so it is not treated as a broker failure.
        let _ = tx.send(payload);
        Ok(())
    }

    pub fn subscribe(&self, subject: &str) -> broadcast::Receiver<Bytes> {
        self.sender_for(subject).subscribe()
    }
}

/// A single subscription the caller can read two successive messages from
/// before dropping -- used by the player session for the duplex
/// RegResponse-then-RaceRegistration handshake on its own fingerprint
/// subject (see design notes).
pub struct Subscription {
    rx: broadcast::Receiver<Bytes>,
}

impl Subscription {
    pub fn new(broker: &Broker, subject: &str) -> Self {
        Subscription {
            rx: broker.subscribe(subject),
        }
    }

    pub async fn recv(&mut self) -> Result<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("broker subscription lagged, dropped {} messages", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TypeRaceError::broker("subject closed"));
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.try_recv() {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    log::debug!("broker subscription lagged, dropped {} messages", skipped);
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_on_different_subjects_do_not_cross() {
        let broker = Broker::new();
        let mut sub_a = Subscription::new(&broker, "a");
        let mut sub_b = Subscription::new(&broker, "b");
        broker.publish("a", Bytes::from_static(b"hello")).unwrap();
        let got = sub_a.recv().await.unwrap();
        assert_eq!(&got[..], b"hello");
        assert!(sub_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_message() {
        let broker = Broker::new();
        let mut sub1 = Subscription::new(&broker, "race-1");
        let mut sub2 = Subscription::new(&broker, "race-1");
        broker.publish("race-1", Bytes::from_static(b"progress")).unwrap();
        assert_eq!(&sub1.recv().await.unwrap()[..], b"progress");
        assert_eq!(&sub2.recv().await.unwrap()[..], b"progress");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let broker = Broker::new();
        assert!(broker.publish("nobody-listening", Bytes::from_static(b"x")).is_ok());
    }
}
