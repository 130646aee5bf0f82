//! Wire format shared by the registrar, race sessions, and player sessions.
//!
//! All three record kinds go over the broker as JSON, the same enveloping
//! choice `persistence` makes for its own records. `serde_json` already
//! ignores unknown fields and errors on missing required ones, so that part
//! of the contract falls out of the derive for free.

use crate::error::{Result, TypeRaceError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceProgress {
    pub fingerprint: String,
    pub racer_id: u8,
    pub percentage_complete: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRegistration {
    pub race_id: String,
    pub race_words: String,
    pub word_count: i16,
    pub racer_count: u8,
    pub slots: Vec<RaceProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegResponse {
    pub race_id: String,
    pub race_start_time_millis: i64,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(TypeRaceError::from)
}

pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(TypeRaceError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn race_progress_roundtrip() {
        let rp = RaceProgress {
            fingerprint: "abc123".to_string(),
            racer_id: 2,
            percentage_complete: 0.42,
        };
        let bytes = encode(&rp).unwrap();
        let decoded: RaceProgress = decode(&bytes).unwrap();
        assert_eq!(rp, decoded);
    }

    #[test]
    fn reg_response_roundtrip() {
        let r = RegResponse {
            race_id: "race-1".to_string(),
            race_start_time_millis: 1_735_257_725_433,
        };
        let bytes = encode(&r).unwrap();
        let decoded: RegResponse = decode(&bytes).unwrap();
        assert_eq!(r, decoded);
    }

    #[test]
    fn race_registration_roundtrip() {
        let reg = RaceRegistration {
            race_id: "a".to_string(),
            race_words: "hello world.".to_string(),
            word_count: 2,
            racer_count: 2,
            slots: vec![
                RaceProgress {
                    fingerprint: "a".to_string(),
                    racer_id: 0,
                    percentage_complete: 0.0,
                },
                RaceProgress {
                    fingerprint: "b".to_string(),
                    racer_id: 1,
                    percentage_complete: 0.0,
                },
            ],
        };
        let bytes = encode(&reg).unwrap();
        let decoded: RaceRegistration = decode(&bytes).unwrap();
        assert_eq!(reg, decoded);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = br#"{"fingerprint":"x","racer_id":1,"percentage_complete":0.5,"extra":"ignored"}"#;
        let decoded: RaceProgress = decode(raw).unwrap();
        assert_eq!(decoded.fingerprint, "x");
    }

    #[test]
    fn missing_required_field_errors() {
        let raw = br#"{"fingerprint":"x","racer_id":1}"#;
        let decoded: Result<RaceProgress> = decode(raw);
        assert!(decoded.is_err());
    }
}
