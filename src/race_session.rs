//! Per-race progress fan-out. Owned by a `PlayerSession` once its
//! `RaceRegistration` arrives; publishes this player's own progress on a
//! fixed cadence and keeps a last-write-wins snapshot of everyone else's.

use crate::broker::{Broker, Subscription};
use crate::codec;
use crate::codec::RaceProgress;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const PROGRESS_TICK: Duration = Duration::from_millis(200);

pub struct RaceSession {
    race_id: String,
    fingerprint: String,
    racer_id: u8,
    race_text_len: usize,
    broker: Arc<Broker>,
    progress: Arc<Mutex<HashMap<u8, RaceProgress>>>,
    cancel: CancellationToken,
    drain_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RaceSession {
    pub fn start(
        broker: Arc<Broker>,
        race_id: String,
        fingerprint: String,
        racer_id: u8,
        race_text_len: usize,
        parent_cancel: &CancellationToken,
    ) -> Self {
        let cancel = parent_cancel.child_token();
        let progress = Arc::new(Mutex::new(HashMap::new()));

        let mut subscription = Subscription::new(&broker, &race_id);
        let drain_progress = progress.clone();
        let drain_cancel = cancel.clone();
        let drain_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_cancel.cancelled() => break,
                    () = drain_once(&mut subscription, &drain_progress) => {}
                }
            }
        });

        RaceSession {
            race_id,
            fingerprint,
            racer_id,
            race_text_len,
            broker,
            progress,
            cancel,
            drain_handle: Some(drain_handle),
        }
    }

    /// Publishes this player's current progress given how many characters
    /// have been typed correctly so far.
    pub async fn publish_progress(&self, correct_pos: usize) -> Result<()> {
        let percentage_complete = if self.race_text_len == 0 {
            1.0
        } else {
            (correct_pos as f32 / self.race_text_len as f32).min(1.0)
        };
        let progress = RaceProgress {
            fingerprint: self.fingerprint.clone(),
            racer_id: self.racer_id,
            percentage_complete,
        };
        let bytes = codec::encode(&progress)?;
        self.broker.publish(&self.race_id, bytes::Bytes::from(bytes))
    }

    /// Snapshot of every racer's most recently observed progress, keyed by
    /// `racer_id`, for a transport adapter to render.
    pub async fn snapshot(&self) -> HashMap<u8, RaceProgress> {
        self.progress.lock().await.clone()
    }

    pub fn tick_interval() -> Duration {
        PROGRESS_TICK
    }

    /// Unsubscribes and tears down the drain task. Idempotent.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.drain_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn drain_once(subscription: &mut Subscription, progress: &Arc<Mutex<HashMap<u8, RaceProgress>>>) {
    match subscription.recv().await {
        Ok(bytes) => match codec::decode::<RaceProgress>(&bytes) {
            Ok(update) => {
                progress.lock().await.insert(update.racer_id, update);
            }
            Err(e) => {
                log::debug!("race session: dropping undecodable progress message: {}", e);
            }
        },
        Err(e) => {
            log::warn!("race session: subject closed or lagged: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;

    #[tokio::test]
    async fn publishes_progress_and_observes_own_message() {
        let broker = Arc::new(Broker::new());
        let parent = CancellationToken::new();
        let mut session = RaceSession::start(broker.clone(), "race-1".to_string(), "me".to_string(), 0, 20, &parent);

        session.publish_progress(10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot[&0].percentage_complete, 0.5);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn last_write_wins_per_racer_id() {
        let broker = Arc::new(Broker::new());
        let parent = CancellationToken::new();
        let mut session = RaceSession::start(broker.clone(), "race-2".to_string(), "me".to_string(), 0, 10, &parent);

        let other = RaceProgress {
            fingerprint: "other".to_string(),
            racer_id: 1,
            percentage_complete: 0.2,
        };
        broker
            .publish("race-2", bytes::Bytes::from(codec::encode(&other).unwrap()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let updated = RaceProgress {
            fingerprint: "other".to_string(),
            racer_id: 1,
            percentage_complete: 0.8,
        };
        broker
            .publish("race-2", bytes::Bytes::from(codec::encode(&updated).unwrap()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot[&1].percentage_complete, 0.8);

        session.shutdown().await;
    }
}
