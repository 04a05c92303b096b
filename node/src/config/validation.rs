use crate::config::Config;
use crate::error::ConfigError;

impl Config {
    /// Reject configurations that cannot serve requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.public_host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "SERVER_PUBLIC_HOST".to_string(),
                message: "public host must not be empty".to_string(),
            });
        }

        if self.wireguard.peer_count == 0 {
            return Err(ConfigError::Invalid {
                field: "WIREGUARD_PEER_COUNT".to_string(),
                message: "peer count must be at least 1".to_string(),
            });
        }

        if self.dante.user_count == 0 {
            return Err(ConfigError::Invalid {
                field: "USER_COUNT".to_string(),
                message: "user count must be at least 1".to_string(),
            });
        }

        if u32::from(self.priority_slots) >= self.dante.user_count {
            return Err(ConfigError::Invalid {
                field: "PRIORITY_SLOTS".to_string(),
                message: format!(
                    "priority slots ({}) must be below the user count ({})",
                    self.priority_slots, self.dante.user_count
                ),
            });
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "DATABASE_URL".to_string(),
                message: "database url must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().expect("default config valid");
    }

    #[test]
    fn rejects_priority_slots_above_user_count() {
        let mut config = Config::default();
        config.priority_slots = 2048;
        config.dante.user_count = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_public_host() {
        let mut config = Config::default();
        config.server.public_host = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_peer_count() {
        let mut config = Config::default();
        config.wireguard.peer_count = 0;
        assert!(config.validate().is_err());
    }
}
