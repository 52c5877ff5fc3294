use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub openai: Option<OpenAiConfig>,
    pub recall: Option<RecallConfig>,
    #[serde(default)]
    pub app: AppInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_realtime_model")]
    pub model: String,
}

fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecallConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    #[serde(default = "default_recall_base_url")]
    pub base_url: String,
}

fn default_recall_base_url() -> String {
    "https://us-east-1.recall.ai".into()
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppInfo {
    /// Public base URL the meeting-bot service calls back on.
    pub webhook_base_url: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("PARLEY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app: AppConfig = config.try_deserialize()?;
        app.apply_well_known_env();
        Ok(app)
    }

    /// The collaborators also honor their conventional variable names, so a
    /// bare `OPENAI_API_KEY` is enough to enable the speech service.
    fn apply_well_known_env(&mut self) {
        if let Some(key) = env_value("OPENAI_API_KEY") {
            let model = self
                .openai
                .as_ref()
                .map(|o| o.model.clone())
                .unwrap_or_else(default_realtime_model);
            self.openai = Some(OpenAiConfig {
                api_key: key,
                model,
            });
        }
        if let Some(key) = env_value("RECALL_API_KEY") {
            let (webhook_secret, base_url) = match self.recall.take() {
                Some(recall) => (recall.webhook_secret, recall.base_url),
                None => (None, default_recall_base_url()),
            };
            self.recall = Some(RecallConfig {
                api_key: key,
                webhook_secret,
                base_url,
            });
        }
        if let Some(secret) = env_value("RECALL_WEBHOOK_SECRET") {
            // The secret must stick even when no bot API key is configured,
            // so webhook verification can never be silently disabled.
            let recall = self.recall.take().unwrap_or_else(|| RecallConfig {
                api_key: String::new(),
                webhook_secret: None,
                base_url: default_recall_base_url(),
            });
            self.recall = Some(RecallConfig {
                webhook_secret: Some(secret),
                ..recall
            });
        }
        if let Some(base_url) =
            env_value("WEBHOOK_BASE_URL").or_else(|| env_value("NEXT_PUBLIC_APP_URL"))
        {
            self.app.webhook_base_url = Some(base_url);
        }
    }
}
