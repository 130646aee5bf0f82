use crate::error::{Result, TypeRaceError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub ssh_port: u16,
    pub http_port: u16,
    pub number_of_sentences_per_typing_test: u32,
    pub typing_test_desired_width: u32,
    pub race_start_timeout_in_seconds: u64,
    pub max_players_per_race: u8,
    pub host_key: String,
    pub openai_api_key: String,
    pub database: DatabaseConfig,
    pub ui_path: String,
    pub local_mode: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub data_directory: String,
    /// Retained for schema fidelity with the original configuration
    /// contract. Migrations are compiled into the binary via `rust_embed`,
    /// so this value is not read at runtime (see design notes).
    pub migration_directory: String,
}

impl Settings {
    pub fn new() -> Result<Self> {
        let config = Config::builder()
            .set_default("ssh_port", 2222)?
            .set_default("http_port", 8080)?
            .set_default("number_of_sentences_per_typing_test", 5)?
            .set_default("typing_test_desired_width", 80)?
            .set_default("race_start_timeout_in_seconds", 10)?
            .set_default("max_players_per_race", 5)?
            .set_default("local_mode", false)?
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("TYPERACE").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.openai_api_key.is_empty() {
            return Err(TypeRaceError::config("openai_api_key must not be empty"));
        }
        if self.ssh_port == 0 {
            return Err(TypeRaceError::config("ssh_port must not be zero"));
        }
        if self.http_port == 0 {
            return Err(TypeRaceError::config("http_port must not be zero"));
        }
        if self.number_of_sentences_per_typing_test == 0 {
            return Err(TypeRaceError::config(
                "number_of_sentences_per_typing_test must not be zero",
            ));
        }
        if self.typing_test_desired_width <= 5 {
            return Err(TypeRaceError::config(
                "typing_test_desired_width must be greater than 5",
            ));
        }
        if self.host_key.is_empty() {
            return Err(TypeRaceError::config("host_key must not be empty"));
        }
        if self.race_start_timeout_in_seconds < 3 {
            return Err(TypeRaceError::config(
                "race_start_timeout_in_seconds must be at least 3",
            ));
        }
        if self.max_players_per_race == 0 {
            return Err(TypeRaceError::config("max_players_per_race must not be zero"));
        }
        if self.database.data_directory.is_empty() {
            return Err(TypeRaceError::config("database.data_directory must not be empty"));
        }
        if self.database.migration_directory.is_empty() {
            return Err(TypeRaceError::config(
                "database.migration_directory must not be empty",
            ));
        }
        if self.ui_path.is_empty() {
            return Err(TypeRaceError::config("ui_path must not be empty"));
        }
        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("0.0.0.0:{}", self.http_port)
    }

    pub fn race_start_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.race_start_timeout_in_seconds)
    }

    pub fn decoded_host_key(&self) -> Result<Vec<u8>> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&self.host_key)
            .map_err(|e| TypeRaceError::config(format!("unable to decode host_key: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Settings {
        Settings {
            ssh_port: 2222,
            http_port: 8080,
            number_of_sentences_per_typing_test: 5,
            typing_test_desired_width: 80,
            race_start_timeout_in_seconds: 10,
            max_players_per_race: 5,
            host_key: "aGVsbG8=".to_string(),
            openai_api_key: "sk-test".to_string(),
            database: DatabaseConfig {
                data_directory: "/tmp/typerace".to_string(),
                migration_directory: "migrations".to_string(),
            },
            ui_path: "ui".to_string(),
            local_mode: false,
        }
    }

    #[test]
    fn rejects_empty_api_key() {
        let mut s = valid();
        s.openai_api_key = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_narrow_width() {
        let mut s = valid();
        s.typing_test_desired_width = 5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_empty_ui_path() {
        let mut s = valid();
        s.ui_path = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn accepts_valid_settings() {
        assert!(valid().validate().is_ok());
    }
}
