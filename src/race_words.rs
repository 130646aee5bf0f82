//! Picks the text a race will be typed against: a set of distinct sentence
//! ids drawn by rejection sampling, fetched in one round trip, and joined
//! into a single paragraph.

use crate::error::{Result, TypeRaceError};
use crate::persistence::PersistenceLayer;
use rand::Rng;
use std::collections::HashSet;

pub struct RaceWords {
    pub text: String,
    pub word_count: i16,
}

/// Draws `count` distinct ids in `1..=max_id` by rejection sampling. Small
/// typing tests (5-10 sentences) out of a pool that is always much larger
/// make collisions rare, so a tight retry loop outperforms building and
/// shuffling a full index vector.
fn pick_distinct_ids(count: u32, max_id: i64, rng: &mut impl Rng) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(count as usize);
    let mut order = Vec::with_capacity(count as usize);
    while order.len() < count as usize {
        let id = rng.gen_range(1..=max_id);
        if seen.insert(id) {
            order.push(id);
        }
    }
    order
}

/// Assembles the race text from `count` randomly chosen, distinct sentences.
/// If the pool does not strictly exceed `count`, the caller gets a
/// `UserError` rather than a short or empty race (the registrar surfaces
/// this to players uniformly rather than starting a degenerate race).
pub async fn pick_random_sentences(persistence: &PersistenceLayer, count: u32) -> Result<RaceWords> {
    let max_id = persistence.sentence_count().await?;
    if max_id <= count as i64 {
        return Err(TypeRaceError::user("more sentences need to generate"));
    }

    let ids = pick_distinct_ids(count, max_id, &mut rand::thread_rng());
    let mut rows = persistence.fetch_sentences_by_ids(ids.clone()).await?;

    // Preserve the order the ids were drawn in, not the order they come
    // back from the store.
    let mut sentences: Vec<String> = Vec::with_capacity(ids.len());
    for id in &ids {
        let text = rows
            .remove(id)
            .ok_or_else(|| TypeRaceError::generator(format!("sentence {} missing from store", id)))?;
        sentences.push(text);
    }

    let joined = sentences.join(". ");
    let text = if joined.is_empty() {
        joined
    } else {
        format!("{}.", joined)
    };
    // Widened and saturating rather than truncating: a long race text
    // should read as `i16::MAX`, never silently wrap to a small or
    // negative count.
    let word_count = i16::try_from(text.split_whitespace().count()).unwrap_or(i16::MAX);

    Ok(RaceWords { text, word_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_distinct_ids_never_repeats() {
        let mut rng = rand::thread_rng();
        let ids = pick_distinct_ids(5, 5, &mut rng);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn errors_when_store_is_empty() {
        let persistence = PersistenceLayer::new_in_memory().unwrap();
        let err = pick_random_sentences(&persistence, 5).await.unwrap_err();
        assert!(matches!(err, TypeRaceError::User(_)));
    }

    #[tokio::test]
    async fn errors_when_pool_does_not_exceed_requested_count() {
        let persistence = PersistenceLayer::new_in_memory().unwrap();
        persistence
            .insert_sentences(vec!["only one sentence here".to_string()])
            .await
            .unwrap();
        let err = pick_random_sentences(&persistence, 5).await.unwrap_err();
        assert!(matches!(err, TypeRaceError::User(_)));
    }

    #[tokio::test]
    async fn joins_sentences_with_period_space() {
        let persistence = PersistenceLayer::new_in_memory().unwrap();
        persistence
            .insert_sentences(vec![
                "first one here".to_string(),
                "second one here".to_string(),
                "third one here".to_string(),
            ])
            .await
            .unwrap();
        let words = pick_random_sentences(&persistence, 2).await.unwrap();
        assert!(words.text.contains(". "));
        assert!(words.text.ends_with('.'));
        assert_eq!(words.word_count, 6);
    }
}
