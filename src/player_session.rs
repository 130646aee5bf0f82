//! Per-connection state machine. Transport-agnostic: nothing in here touches
//! a terminal or a socket directly, so an SSH/PTY adapter (or a test) can
//! drive it purely through `on_enter`/`on_key`/`on_backspace`/`on_ctrl_w`.

use crate::broker::{Broker, Subscription};
use crate::codec;
use crate::codec::{RaceRegistration, RegResponse};
use crate::config::Settings;
use crate::error::{Result, TypeRaceError};
use crate::persistence::PersistenceLayer;
use crate::race_session::RaceSession;
use crate::registrar::REQ_RACE_REG_SUBJECT;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Welcome,
    Loading,
    Race,
    Finished,
    Quit,
}

pub struct PlayerSession {
    state: State,
    fingerprint: String,
    broker: Arc<Broker>,
    persistence: Arc<PersistenceLayer>,
    settings: Arc<Settings>,
    cancel: CancellationToken,

    race_text: String,
    correct_pos: usize,
    incorrect_pos: usize,
    word_count: u32,
    start_millis: i64,
    race_session: Option<RaceSession>,
}

impl PlayerSession {
    pub fn new(
        fingerprint: String,
        broker: Arc<Broker>,
        persistence: Arc<PersistenceLayer>,
        settings: Arc<Settings>,
        parent_cancel: &CancellationToken,
    ) -> Self {
        PlayerSession {
            state: State::Welcome,
            fingerprint,
            broker,
            persistence,
            settings,
            cancel: parent_cancel.child_token(),
            race_text: String::new(),
            correct_pos: 0,
            incorrect_pos: 0,
            word_count: 0,
            start_millis: 0,
            race_session: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_quit(&self) -> bool {
        self.state == State::Quit
    }

    /// Drives Welcome/Finished -> Loading -> Race. Registers with the
    /// registrar, waits for its `RegResponse` then its `RaceRegistration`,
    /// both within `2 * race_start_timeout`, and starts the race session.
    pub async fn on_enter(&mut self) -> Result<()> {
        if !matches!(self.state, State::Welcome | State::Finished) {
            return Ok(());
        }
        self.state = State::Loading;

        let mut subscription = Subscription::new(&self.broker, &self.fingerprint);
        let fingerprint_bytes = bytes::Bytes::from(self.fingerprint.clone().into_bytes());
        self.broker.publish(REQ_RACE_REG_SUBJECT, fingerprint_bytes)?;

        let wait = self.settings.race_start_timeout() * 2;

        let reg_response_bytes = tokio::time::timeout(wait, subscription.recv())
            .await
            .map_err(|_| TypeRaceError::protocol("timed out waiting for registration response"))??;
        let reg_response: RegResponse = codec::decode(&reg_response_bytes)?;

        let registration_bytes = tokio::time::timeout(wait, subscription.recv())
            .await
            .map_err(|_| TypeRaceError::protocol("timed out waiting for race registration"))??;
        let registration: RaceRegistration = codec::decode(&registration_bytes)?;

        let racer_id = registration
            .slots
            .iter()
            .find(|s| s.fingerprint == self.fingerprint)
            .map(|s| s.racer_id)
            .ok_or_else(|| TypeRaceError::protocol("own fingerprint missing from race registration"))?;

        self.race_text = registration.race_words;
        self.word_count = registration.word_count.max(0) as u32;
        self.correct_pos = 0;
        self.incorrect_pos = 0;
        self.start_millis = reg_response.race_start_time_millis;

        self.race_session = Some(RaceSession::start(
            self.broker.clone(),
            registration.race_id,
            self.fingerprint.clone(),
            racer_id,
            self.race_text.chars().count(),
            &self.cancel,
        ));
        self.state = State::Race;
        Ok(())
    }

    fn start_of_word(&self, pos: usize) -> usize {
        let chars: Vec<char> = self.race_text.chars().collect();
        let mut p = pos;
        while p > 0 && chars[p - 1] != ' ' {
            p -= 1;
        }
        p
    }

    /// Returns `true` if this keystroke completed the race.
    pub fn on_key(&mut self, typed: char) -> bool {
        if self.state != State::Race {
            return false;
        }
        if self.incorrect_pos > self.correct_pos {
            return false;
        }

        let chars: Vec<char> = self.race_text.chars().collect();
        let Some(&expected) = chars.get(self.correct_pos) else {
            return false;
        };

        if typed == expected {
            self.correct_pos += 1;
            self.incorrect_pos = self.correct_pos;
            if self.correct_pos == chars.len() {
                self.state = State::Finished;
                return true;
            }
            false
        } else {
            self.correct_pos = self.start_of_word(self.correct_pos);
            self.incorrect_pos = self.correct_pos + 1;
            false
        }
    }

    pub fn on_backspace(&mut self) {
        if self.state != State::Race {
            return;
        }
        if self.incorrect_pos > self.correct_pos {
            self.incorrect_pos -= 1;
        } else {
            self.correct_pos = self.correct_pos.saturating_sub(1);
            self.incorrect_pos = self.correct_pos;
        }
    }

    pub fn on_ctrl_w(&mut self) {
        if self.state != State::Race {
            return;
        }
        let chars: Vec<char> = self.race_text.chars().collect();
        while self.incorrect_pos > 0 && chars[self.incorrect_pos - 1] == ' ' {
            self.incorrect_pos -= 1;
        }
        while self.incorrect_pos > 0 && chars[self.incorrect_pos - 1] != ' ' {
            self.incorrect_pos -= 1;
        }
        if self.correct_pos > self.incorrect_pos {
            self.correct_pos = self.incorrect_pos;
        }
    }

    pub fn on_ctrl_c(&mut self) {
        self.state = State::Quit;
        self.cancel.cancel();
    }

    /// Spawns the (fire-and-forget) completion-count increment and returns
    /// the words-per-minute figure for the race just finished.
    pub fn finish(&self, end_millis: i64) -> u32 {
        let wpm = calculate_words_per_minute(self.word_count, self.start_millis, end_millis);
        let persistence = self.persistence.clone();
        let fingerprint = self.fingerprint.clone();
        tokio::spawn(async move {
            if let Err(e) = persistence.increment_completion(fingerprint).await {
                log::error!("player session: failed to record completion: {}", e);
            }
        });
        wpm
    }

    pub fn correct_pos(&self) -> usize {
        self.correct_pos
    }

    pub fn incorrect_pos(&self) -> usize {
        self.incorrect_pos
    }

    pub fn race_text(&self) -> &str {
        &self.race_text
    }
}

pub fn calculate_words_per_minute(word_count: u32, start_millis: i64, end_millis: i64) -> u32 {
    let elapsed_millis = end_millis - start_millis;
    if elapsed_millis <= 0 {
        return 0;
    }
    let minutes = elapsed_millis as f64 / 60_000.0;
    (word_count as f64 / minutes).round() as u32
}
