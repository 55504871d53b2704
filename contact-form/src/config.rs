use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener both bind {0}")]
    SameAddress(String),
}

/// Contact form server configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener serving the contact endpoint
    pub listener: Listener,
    /// Admin listener for health and readiness checks
    pub admin_listener: Listener,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.listener == self.admin_listener {
            return Err(ValidationError::SameAddress(self.listener.address()));
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(host: &str, port: u16) -> Listener {
        Listener {
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener, listener("0.0.0.0", 3000));
        assert_eq!(config.admin_listener.address(), "127.0.0.1:3001");
    }

    #[test]
    fn test_validation_errors() {
        let base_config = Config {
            listener: listener("0.0.0.0", 3000),
            admin_listener: listener("127.0.0.1", 3001),
        };
        assert!(base_config.validate().is_ok());

        let mut config = base_config.clone();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base_config.clone();
        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base_config;
        config.admin_listener = config.listener.clone();
        assert_eq!(
            config.validate(),
            Err(ValidationError::SameAddress("0.0.0.0:3000".into()))
        );
    }

    #[test]
    fn test_missing_admin_listener_is_rejected() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
