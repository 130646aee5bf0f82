//! Background producer that keeps the sentence pool stocked. Modeled on the
//! teacher's own ticking `snapshot_task` in `main.rs`: a `tokio::select!`
//! loop merging an interval and a shutdown signal, run as a single spawned
//! task for the life of the process.

use crate::config::Settings;
use crate::error::{Result, TypeRaceError};
use crate::health::{HealthEvent, HealthSink};
use crate::persistence::PersistenceLayer;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REFILL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(120);
const MIN_COMBOS: i64 = 10;
const MAX_COMBOS: i64 = 1000;
const MIN_SENTENCE_LEN: usize = 5;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Byte-stream oracle for external sentence text. The only concrete
/// production implementation lives behind the `reqwest` client below; tests
/// use `FakeGenerator`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<ByteStream>;
}

/// Decides whether the pool has "enough" distinct race-text combinations,
/// per the adaptive rule: always refill below the floor, never refill above
/// the ceiling, and in between refill only once the pool stops exceeding
/// the most prolific racer's lifetime completion count.
pub fn is_enough_text_generated(sentence_count: i64, sentences_per_test: u32, highest_completion_count: i64) -> bool {
    if sentences_per_test == 0 {
        return true;
    }
    let combos = sentence_count / sentences_per_test as i64;
    if combos < MIN_COMBOS {
        return false;
    }
    if combos > MAX_COMBOS {
        return true;
    }
    combos > highest_completion_count
}

/// Folds curly quotes and single-diacritic Latin letters down to plain
/// ASCII. Built once, looked up per `char` -- not a substring search.
fn normalization_table() -> HashMap<char, char> {
    let pairs = [
        ('\u{201C}', '"'),
        ('\u{201D}', '"'),
        ('\u{2018}', '\''),
        ('\u{2019}', '\''),
        ('\u{00C0}', 'A'), ('\u{00C1}', 'A'), ('\u{00C2}', 'A'), ('\u{00C3}', 'A'), ('\u{00C4}', 'A'), ('\u{00C5}', 'A'),
        ('\u{00E0}', 'a'), ('\u{00E1}', 'a'), ('\u{00E2}', 'a'), ('\u{00E3}', 'a'), ('\u{00E4}', 'a'), ('\u{00E5}', 'a'),
        ('\u{00C7}', 'C'), ('\u{00E7}', 'c'),
        ('\u{00C8}', 'E'), ('\u{00C9}', 'E'), ('\u{00CA}', 'E'), ('\u{00CB}', 'E'),
        ('\u{00E8}', 'e'), ('\u{00E9}', 'e'), ('\u{00EA}', 'e'), ('\u{00EB}', 'e'),
        ('\u{00CC}', 'I'), ('\u{00CD}', 'I'), ('\u{00CE}', 'I'), ('\u{00CF}', 'I'),
        ('\u{00EC}', 'i'), ('\u{00ED}', 'i'), ('\u{00EE}', 'i'), ('\u{00EF}', 'i'),
        ('\u{00D1}', 'N'), ('\u{00F1}', 'n'),
        ('\u{00D2}', 'O'), ('\u{00D3}', 'O'), ('\u{00D4}', 'O'), ('\u{00D5}', 'O'), ('\u{00D6}', 'O'), ('\u{00D8}', 'O'),
        ('\u{00F2}', 'o'), ('\u{00F3}', 'o'), ('\u{00F4}', 'o'), ('\u{00F5}', 'o'), ('\u{00F6}', 'o'), ('\u{00F8}', 'o'),
        ('\u{00D9}', 'U'), ('\u{00DA}', 'U'), ('\u{00DB}', 'U'), ('\u{00DC}', 'U'),
        ('\u{00F9}', 'u'), ('\u{00FA}', 'u'), ('\u{00FB}', 'u'), ('\u{00FC}', 'u'),
        ('\u{00DD}', 'Y'), ('\u{00FD}', 'y'), ('\u{00FF}', 'y'),
    ];
    pairs.into_iter().collect()
}

fn normalize(raw: &str) -> String {
    let table = normalization_table();
    raw.chars().map(|c| table.get(&c).copied().unwrap_or(c)).collect()
}

/// Splits on `.`, trims, and drops anything shorter than the minimum
/// sentence length.
fn extract_sentences(normalized: &str) -> Vec<String> {
    normalized
        .split('.')
        .map(|s| s.trim().to_string())
        .filter(|s| s.len() >= MIN_SENTENCE_LEN)
        .collect()
}

async fn refill_once(persistence: &PersistenceLayer, generator: &dyn TextGenerator) -> Result<usize> {
    let mut stream = generator
        .generate("Generate a random series of unrelated but coherent sentences.")
        .await?;

    let mut raw = String::new();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        raw.push_str(&String::from_utf8_lossy(&bytes));
    }

    let normalized = normalize(&raw);
    let sentences = extract_sentences(&normalized);
    let count = sentences.len();
    if count > 0 {
        persistence.insert_sentences(sentences).await?;
    }
    Ok(count)
}

pub async fn run(
    persistence: Arc<PersistenceLayer>,
    generator: Arc<dyn TextGenerator>,
    settings: Arc<Settings>,
    health: Arc<dyn HealthSink>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(REFILL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sentence_count = match persistence.sentence_count().await {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("supply loop: unable to read sentence count: {}", e);
                        health.record(HealthEvent::new("supply_loop", format!("unable to read sentence count: {}", e))).await;
                        continue;
                    }
                };
                let highest = match persistence.highest_completion_count().await {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("supply loop: unable to read completion count: {}", e);
                        health.record(HealthEvent::new("supply_loop", format!("unable to read completion count: {}", e))).await;
                        continue;
                    }
                };
                if is_enough_text_generated(sentence_count, settings.number_of_sentences_per_typing_test, highest) {
                    log::debug!("supply loop: pool sufficient at {} sentences", sentence_count);
                    continue;
                }
                log::info!("supply loop: pool below threshold at {} sentences, refilling", sentence_count);
                match refill_once(&persistence, generator.as_ref()).await {
                    Ok(added) => log::info!("supply loop: added {} sentences", added),
                    Err(e) => {
                        log::error!("supply loop: refill failed, will retry next tick: {}", e);
                        health.record(HealthEvent::new("supply_loop", format!("refill failed: {}", e))).await;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                log::info!("supply loop: shutting down");
                break;
            }
        }
    }
}

/// `reqwest`-based production implementation. Points at an OpenAI-compatible
/// chat completions endpoint and streams the response body as raw bytes;
/// the supply loop treats the whole thing as an opaque byte source.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl HttpTextGenerator {
    pub fn new(api_key: String) -> Self {
        HttpTextGenerator {
            client: reqwest::Client::new(),
            api_key,
            endpoint: "https://api.openai.com/v1/completions".to_string(),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<ByteStream> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": "gpt-3.5-turbo-instruct", "prompt": prompt, "max_tokens": 512 }))
            .send()
            .await
            .map_err(|e| TypeRaceError::generator(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| TypeRaceError::generator(format!("non-success response: {}", e)))?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TypeRaceError::generator(format!("stream error: {}", e))));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
pub struct FakeGenerator {
    pub text: String,
}

#[cfg(test)]
#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, _prompt: &str) -> Result<ByteStream> {
        let bytes = Bytes::from(self.text.clone());
        let stream = futures::stream::once(async move { Ok(bytes) });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
struct FailingGenerator;

#[cfg(test)]
#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<ByteStream> {
        Err(TypeRaceError::generator("generator unreachable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::health::RecordingHealthSink;

    fn test_settings() -> Arc<Settings> {
        Arc::new(Settings {
            ssh_port: 2222,
            http_port: 8080,
            number_of_sentences_per_typing_test: 5,
            typing_test_desired_width: 80,
            race_start_timeout_in_seconds: 10,
            max_players_per_race: 5,
            host_key: "aGVsbG8=".to_string(),
            openai_api_key: "sk-test".to_string(),
            database: DatabaseConfig {
                data_directory: "/tmp/typerace-test-supply".to_string(),
                migration_directory: "migrations".to_string(),
            },
            ui_path: "ui".to_string(),
            local_mode: true,
        })
    }

    #[test]
    fn below_floor_is_never_enough() {
        assert!(!is_enough_text_generated(9, 1, 0));
        assert!(!is_enough_text_generated(90, 10, 0));
    }

    #[test]
    fn above_ceiling_is_always_enough() {
        assert!(is_enough_text_generated(1001 * 5, 5, 999_999));
    }

    #[test]
    fn middle_band_depends_on_highest_completion_count() {
        // combos = 500, which is between the floor and ceiling.
        assert!(is_enough_text_generated(2500, 5, 100));
        assert!(!is_enough_text_generated(2500, 5, 500));
    }

    // Invariant #7: monotone non-decreasing in sentence_count.
    #[test]
    fn monotone_in_sentence_count() {
        let sentences_per_test = 5;
        let highest = 50;
        let mut prev = false;
        for sentence_count in (0..6000).step_by(25) {
            let enough = is_enough_text_generated(sentence_count, sentences_per_test, highest);
            if prev {
                assert!(enough, "regressed to not-enough at sentence_count={}", sentence_count);
            }
            prev = enough;
        }
    }

    #[test]
    fn normalize_folds_curly_quotes_and_diacritics() {
        assert_eq!(normalize("\u{201C}cafe\u{201D} na\u{00EF}ve"), "\"cafe\" naive");
    }

    #[test]
    fn extract_sentences_drops_short_fragments() {
        let extracted = extract_sentences("This is fine. Ok. Also long enough");
        assert_eq!(extracted, vec!["This is fine".to_string(), "Also long enough".to_string()]);
    }

    #[tokio::test]
    async fn refill_once_inserts_parsed_sentences() {
        let persistence = PersistenceLayer::new_in_memory().unwrap();
        let generator = FakeGenerator {
            text: "A perfectly coherent sentence. Hi. Another coherent sentence.".to_string(),
        };
        let added = refill_once(&persistence, &generator).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(persistence.sentence_count().await.unwrap(), 2);
    }

    // Fix for dead HealthSink wiring: a refill failure is recorded, not just
    // logged. An empty store is always below the floor, so the loop's first
    // (immediate) tick always attempts a refill.
    #[tokio::test]
    async fn refill_failure_is_recorded_on_health_sink() {
        let persistence = Arc::new(PersistenceLayer::new_in_memory().unwrap());
        let generator: Arc<dyn TextGenerator> = Arc::new(FailingGenerator);
        let settings = test_settings();
        let health = Arc::new(RecordingHealthSink::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run(persistence, generator, settings, health.clone(), shutdown.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();
        let _ = handle.await;

        let events = health.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].service, "supply_loop");
    }
}
