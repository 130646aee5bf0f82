//! Single-writer matchmaker. One task owns all cohort state; it is never
//! shared, so there is nothing to lock. Modeled on the teacher's own
//! `tokio::select!` loop merging a ticker with a shutdown signal, with a
//! third arm added for inbound join messages.

use crate::broker::{Broker, Subscription};
use crate::codec;
use crate::codec::{RaceProgress, RaceRegistration, RegResponse};
use crate::config::Settings;
use crate::error::{Result, TypeRaceError};
use crate::health::{HealthEvent, HealthSink};
use crate::persistence::PersistenceLayer;
use crate::race_words;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const REQ_RACE_REG_SUBJECT: &str = "req_race_reg";
const TICK_INTERVAL: Duration = Duration::from_secs(1);

struct Cohort {
    race_id: String,
    deadline: Instant,
    race_start_time_millis: i64,
    slots: Vec<RaceProgress>,
}

pub struct Registrar {
    broker: Arc<Broker>,
    persistence: Arc<PersistenceLayer>,
    settings: Arc<Settings>,
    health: Arc<dyn HealthSink>,
}

impl Registrar {
    pub fn new(
        broker: Arc<Broker>,
        persistence: Arc<PersistenceLayer>,
        settings: Arc<Settings>,
        health: Arc<dyn HealthSink>,
    ) -> Self {
        Registrar {
            broker,
            persistence,
            settings,
            health,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut join_sub = Subscription::new(&self.broker, REQ_RACE_REG_SUBJECT);
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut cohort: Option<Cohort> = None;

        loop {
            tokio::select! {
                result = join_sub.recv() => {
                    let payload = match result {
                        Ok(p) => p,
                        Err(e) => {
                            self.health.record(HealthEvent::new("registrar", format!("join subscription failed: {}", e))).await;
                            return Err(e);
                        }
                    };
                    self.handle_join(&mut cohort, payload).await?;
                }
                _ = tick.tick() => {
                    if let Some(c) = &cohort {
                        if Instant::now() >= c.deadline && !c.slots.is_empty() {
                            log::info!("registrar: deadline reached for cohort {}, publishing with {} racers", c.race_id, c.slots.len());
                            self.publish(&mut cohort).await?;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    log::info!("registrar: shutting down, abandoning in-flight cohort");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_join(&self, cohort: &mut Option<Cohort>, payload: Bytes) -> Result<()> {
        let fingerprint = String::from_utf8(payload.to_vec())
            .map_err(|e| TypeRaceError::protocol(format!("join payload is not utf8: {}", e)))?;

        match cohort {
            None => {
                let deadline = Instant::now() + self.settings.race_start_timeout();
                let race_start_time_millis =
                    chrono::Utc::now().timestamp_millis() + self.settings.race_start_timeout_in_seconds as i64 * 1000;
                let new_cohort = Cohort {
                    race_id: fingerprint.clone(),
                    deadline,
                    race_start_time_millis,
                    slots: vec![RaceProgress {
                        fingerprint: fingerprint.clone(),
                        racer_id: 0,
                        percentage_complete: 0.0,
                    }],
                };
                self.reply(&fingerprint, &new_cohort.race_id, new_cohort.race_start_time_millis)?;
                *cohort = Some(new_cohort);
                Ok(())
            }
            Some(c) => {
                if c.slots.iter().any(|s| s.fingerprint == fingerprint) {
                    self.reply(&fingerprint, &c.race_id, c.race_start_time_millis)?;
                    return Ok(());
                }

                let racer_id = c.slots.len() as u8;
                c.slots.push(RaceProgress {
                    fingerprint: fingerprint.clone(),
                    racer_id,
                    percentage_complete: 0.0,
                });
                self.reply(&fingerprint, &c.race_id, c.race_start_time_millis)?;

                if c.slots.len() >= self.settings.max_players_per_race as usize {
                    log::info!("registrar: cohort {} reached capacity, publishing", c.race_id);
                    self.publish(cohort).await?;
                }
                Ok(())
            }
        }
    }

    fn reply(&self, fingerprint: &str, race_id: &str, race_start_time_millis: i64) -> Result<()> {
        let response = RegResponse {
            race_id: race_id.to_string(),
            race_start_time_millis,
        };
        let bytes = codec::encode(&response)?;
        self.broker.publish(fingerprint, Bytes::from(bytes))
    }

    async fn publish(&self, cohort: &mut Option<Cohort>) -> Result<()> {
        let c = cohort.take().expect("publish called with no in-flight cohort");

        let (race_words, word_count) = match race_words::pick_random_sentences(
            &self.persistence,
            self.settings.number_of_sentences_per_typing_test,
        )
        .await
        {
            Ok(words) => (words.text, words.word_count),
            Err(e) => {
                log::warn!(
                    "registrar: race words picker failed for cohort {}, publishing with empty text: {}",
                    c.race_id,
                    e
                );
                if !e.is_user_facing_only() {
                    self.health
                        .record(HealthEvent::new("registrar", format!("race words picker failed: {}", e)))
                        .await;
                }
                (String::new(), 0)
            }
        };

        let registration = RaceRegistration {
            race_id: c.race_id.clone(),
            race_words,
            word_count,
            racer_count: c.slots.len() as u8,
            slots: c.slots.clone(),
        };
        let bytes = codec::encode(&registration)?;

        for slot in &c.slots {
            self.broker.publish(&slot.fingerprint, Bytes::from(bytes.clone()))?;
        }
        Ok(())
    }
}
