use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub detector_onnx: String,
    pub emotion_onnx: String,
    #[serde(default = "default_num_instances")]
    pub num_instances: usize,
    #[serde(default = "default_min_face_confidence")]
    pub min_face_confidence: f32,
}

fn default_num_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_min_face_confidence() -> f32 {
    0.5
}

impl ModelConfig {
    pub fn get_detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_onnx)
    }

    pub fn get_emotion_path(&self) -> PathBuf {
        self.model_dir.join(&self.emotion_onnx)
    }

    pub fn validate(&self) -> Result<(), String> {
        for path in [self.get_detector_path(), self.get_emotion_path()] {
            if !path.exists() {
                return Err(format!("Model file not found: {:?}", path));
            }
        }
        Ok(())
    }
}

/// Per-session behavior. `close_on_error` is the single decision point for
/// the one-strike policy: when true, the first failing frame ends the
/// session after the error reply is sent; when false, the session stays
/// open and the bad frame is skipped.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_close_on_error")]
    pub close_on_error: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            close_on_error: default_close_on_error(),
        }
    }
}

fn default_close_on_error() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("ER")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    if let Err(e) = config.model.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_string() {
        let level: LogLevel = "DEBUG".to_string().try_into().unwrap();
        assert_eq!(level.as_str(), "debug");

        let err: Result<LogLevel, _> = "verbose".to_string().try_into();
        assert!(err.is_err());
    }

    #[test]
    fn test_model_paths() {
        let model_config = ModelConfig {
            model_dir: PathBuf::from("./models"),
            detector_onnx: "face_detector.onnx".to_string(),
            emotion_onnx: "emotion_net.onnx".to_string(),
            num_instances: 2,
            min_face_confidence: 0.5,
        };

        assert_eq!(
            model_config.get_detector_path(),
            PathBuf::from("./models/face_detector.onnx")
        );
        assert_eq!(
            model_config.get_emotion_path(),
            PathBuf::from("./models/emotion_net.onnx")
        );
    }

    #[test]
    fn test_session_config_defaults_to_one_strike() {
        let session = SessionConfig::default();
        assert!(session.close_on_error);
    }
}
