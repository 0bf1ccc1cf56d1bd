use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable that replaces the `-f` flag.
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

/// Agent configuration, read from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(rename = "openAIAPIKey")]
    pub openai_api_key: String,
    #[serde(rename = "openAIModel", default = "default_model")]
    pub openai_model: String,
    #[serde(rename = "openAIBaseURL", default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(rename = "apiURL", default)]
    pub api_url: String,
    #[serde(rename = "apiToken", default)]
    pub api_token: String,
    #[serde(rename = "logscaleURL", default)]
    pub logscale_url: String,
    #[serde(rename = "logscaleToken", default)]
    pub logscale_token: String,
    #[serde(default)]
    pub loopback: bool,
    #[serde(rename = "maxIterations", default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(rename = "toolTimeout", default = "default_tool_timeout")]
    tool_timeout: String,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_iterations() -> usize {
    20
}

fn default_tool_timeout() -> String {
    "30s".to_string()
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::parse(&content).map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", path, e))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: AgentConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.openai_api_key.trim().is_empty() {
            anyhow::bail!("openAIAPIKey is required");
        }
        if self.max_iterations == 0 {
            anyhow::bail!("maxIterations must be positive");
        }
        if !self.loopback && self.api_url.trim().is_empty() {
            anyhow::bail!("apiURL is required unless loopback is set");
        }
        self.tool_timeout()?;
        Ok(())
    }

    pub fn tool_timeout(&self) -> anyhow::Result<Duration> {
        humantime::parse_duration(&self.tool_timeout)
            .map_err(|e| anyhow::anyhow!("invalid toolTimeout {:?}: {}", self.tool_timeout, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal() {
        let config = AgentConfig::parse("openAIAPIKey: sk-test\nloopback: true\n").unwrap();
        assert_eq!(config.openai_model, "gpt-4o");
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.tool_timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_full() {
        let yaml = r#"
openAIAPIKey: sk-test
openAIModel: gpt-4o-mini
openAIBaseURL: http://localhost:8080/v1
apiURL: https://tenant.chronosphere.io
apiToken: secret
logscaleURL: https://logscale.example.com
logscaleToken: ls
maxIterations: 5
toolTimeout: 1m
"#;
        let config = AgentConfig::parse(yaml).unwrap();
        assert_eq!(config.openai_base_url, "http://localhost:8080/v1");
        assert_eq!(config.api_token, "secret");
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.tool_timeout().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid() {
        assert!(AgentConfig::parse("apiURL: https://x\n").is_err());
        assert!(AgentConfig::parse("openAIAPIKey: ''\nloopback: true\n").is_err());
        assert!(AgentConfig::parse("openAIAPIKey: k\n").is_err());
        assert!(AgentConfig::parse("openAIAPIKey: k\nloopback: true\ntoolTimeout: soon\n").is_err());
        assert!(AgentConfig::parse("openAIAPIKey: [").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "openAIAPIKey: sk\nloopback: true\n").unwrap();
        assert!(AgentConfig::from_file(&path).unwrap().loopback);
        let err = AgentConfig::from_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
