//! Configuration types.
//!
//! Everything is read from the process environment once at startup (after an
//! optional `.env` file is loaded by `main`). Lookups go through a closure so
//! tests can feed a plain map instead of mutating the real environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::flow::MenuStyle;

/// Default webhook verification token.
const DEFAULT_VERIFY_TOKEN: &str = "mugo_verify";

/// Default human operator number (used to build the wa.me deep link).
const DEFAULT_HUMAN_NUMBER: &str = "5511973510549";

/// Default WhatsApp Graph API version.
const DEFAULT_GRAPH_VERSION: &str = "v20.0";

/// Default bound on every outbound HTTP call.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 12;

/// Origins always allowed by CORS (local panel dev server and the hosted panel).
const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = [
    "http://localhost:5173",
    "https://mugo-zap-web.onrender.com",
];

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub whatsapp: WhatsAppConfig,
    /// `None` selects the in-memory store (local mode).
    pub supabase: Option<SupabaseConfig>,
    /// `None` selects the keyword reply generator.
    pub openai: Option<OpenAiConfig>,
    pub flow: FlowConfig,
    pub handoff: HandoffConfig,
    /// Bound on every remote call (store, gateway, reply generator).
    pub http_timeout: Duration,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// HTTP surface settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Shared secret echoed back by the webhook verification handshake.
    pub verify_token: String,
    /// Log raw webhook bodies.
    pub debug_webhook: bool,
    pub allowed_origins: Vec<String>,
    /// Panel API key; the panel routes are disabled when unset.
    pub panel_api_key: Option<SecretString>,
}

/// WhatsApp Cloud API credentials.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub token: SecretString,
    pub phone_number_id: String,
    pub graph_version: String,
    /// App secret for `X-Hub-Signature-256` verification (optional).
    pub app_secret: Option<SecretString>,
}

/// Supabase (PostgREST) connection and table names.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: SecretString,
    pub flow_table: String,
    pub ai_state_table: String,
    pub messages_table: String,
    pub users_table: String,
}

/// OpenAI settings for the reply generator.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub model: String,
}

/// Flow engine settings.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// When false the engine declines every input and the reply generator answers.
    pub enabled: bool,
    pub menu_style: MenuStyle,
    /// JSON file replacing the built-in menu graph.
    pub graph_path: Option<PathBuf>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            menu_style: MenuStyle::List,
            graph_path: None,
        }
    }
}

/// Where qualified leads are sent.
#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// Base URL of the human operator contact, e.g. `https://wa.me/5511...`.
    pub contact_url: String,
}

impl HandoffConfig {
    /// Build the contact URL from a bare phone number.
    pub fn from_number(number: &str) -> Self {
        let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
        Self {
            contact_url: format!("https://wa.me/{digits}"),
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let port: u16 = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".into(),
                message: format!("'{raw}' is not a port number"),
            })?,
            None => 8000,
        };

        let mut allowed_origins: Vec<String> =
            DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect();
        if let Some(extra) = get("ALLOW_ORIGIN") {
            allowed_origins.extend(
                extra
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
        allowed_origins.sort();
        allowed_origins.dedup();

        let server = ServerConfig {
            port,
            verify_token: get("VERIFY_TOKEN").unwrap_or_else(|| DEFAULT_VERIFY_TOKEN.to_string()),
            debug_webhook: get("DEBUG_WEBHOOK").is_some_and(|v| is_truthy(&v)),
            allowed_origins,
            panel_api_key: get("PANEL_API_KEY").map(SecretString::from),
        };

        let token = get("WHATSAPP_TOKEN")
            .or_else(|| get("WA_TOKEN"))
            .or_else(|| get("META_WHATSAPP_TOKEN"))
            .ok_or_else(|| ConfigError::MissingEnvVar("WHATSAPP_TOKEN".into()))?;
        let phone_number_id = get("WHATSAPP_PHONE_NUMBER_ID")
            .or_else(|| get("PHONE_NUMBER_ID"))
            .or_else(|| get("WA_PHONE_NUMBER_ID"))
            .ok_or_else(|| ConfigError::MissingEnvVar("WHATSAPP_PHONE_NUMBER_ID".into()))?;
        let whatsapp = WhatsAppConfig {
            token: SecretString::from(token),
            phone_number_id,
            graph_version: get("WHATSAPP_GRAPH_VERSION")
                .unwrap_or_else(|| DEFAULT_GRAPH_VERSION.to_string()),
            app_secret: get("WHATSAPP_APP_SECRET").map(SecretString::from),
        };

        let supabase = match get("SUPABASE_URL") {
            Some(url) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                service_key: SecretString::from(require("SUPABASE_SERVICE_ROLE_KEY")?),
                flow_table: get("WA_FLOW_TABLE").unwrap_or_else(|| "whatsapp_flow".into()),
                ai_state_table: get("AI_STATE_TABLE").unwrap_or_else(|| "ai_state".into()),
                messages_table: get("WA_MESSAGES_TABLE")
                    .unwrap_or_else(|| "whatsapp_messages".into()),
                users_table: get("WA_USERS_TABLE").unwrap_or_else(|| "whatsapp_users".into()),
            }),
            None => None,
        };

        let openai = get("OPENAI_API_KEY").map(|key| OpenAiConfig {
            api_key: SecretString::from(key),
            model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
        });

        let menu_style = match get("FLOW_MENU_STYLE") {
            Some(raw) => raw.parse::<MenuStyle>().map_err(|message| ConfigError::InvalidValue {
                key: "FLOW_MENU_STYLE".into(),
                message,
            })?,
            None => MenuStyle::List,
        };
        let flow = FlowConfig {
            enabled: get("FLOW_ENABLED").is_none_or(|v| is_truthy(&v)),
            menu_style,
            graph_path: get("FLOW_GRAPH_PATH").map(PathBuf::from),
        };

        let handoff = match get("HUMAN_CONTACT_URL") {
            Some(url) => HandoffConfig { contact_url: url },
            None => HandoffConfig::from_number(
                &get("HUMAN_NUMBER").unwrap_or_else(|| DEFAULT_HUMAN_NUMBER.to_string()),
            ),
        };

        let http_timeout = Duration::from_secs(
            get("HTTP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );

        Ok(Self {
            server,
            whatsapp,
            supabase,
            openai,
            flow,
            handoff,
            http_timeout,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    const MINIMAL: [(&str, &str); 2] = [
        ("WHATSAPP_TOKEN", "tok"),
        ("WHATSAPP_PHONE_NUMBER_ID", "12345"),
    ];

    #[test]
    fn minimal_config_uses_defaults() {
        let config = load(&MINIMAL).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.verify_token, "mugo_verify");
        assert!(!config.server.debug_webhook);
        assert!(config.server.panel_api_key.is_none());
        assert!(config.supabase.is_none());
        assert!(config.openai.is_none());
        assert!(config.flow.enabled);
        assert_eq!(config.flow.menu_style, MenuStyle::List);
        assert_eq!(config.handoff.contact_url, "https://wa.me/5511973510549");
        assert_eq!(config.http_timeout, Duration::from_secs(12));
        assert_eq!(config.whatsapp.graph_version, "v20.0");
    }

    #[test]
    fn missing_whatsapp_token_is_fatal() {
        let err = load(&[("WHATSAPP_PHONE_NUMBER_ID", "1")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "WHATSAPP_TOKEN"));
    }

    #[test]
    fn legacy_whatsapp_aliases_are_accepted() {
        let config = load(&[("WA_TOKEN", "t"), ("PHONE_NUMBER_ID", "99")]).unwrap();
        assert_eq!(config.whatsapp.token.expose_secret(), "t");
        assert_eq!(config.whatsapp.phone_number_id, "99");
    }

    #[test]
    fn supabase_url_requires_service_key() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("SUPABASE_URL", "https://x.supabase.co/"));
        assert!(load(&pairs).is_err());

        pairs.push(("SUPABASE_SERVICE_ROLE_KEY", "svc"));
        let config = load(&pairs).unwrap();
        let supabase = config.supabase.unwrap();
        assert_eq!(supabase.url, "https://x.supabase.co");
        assert_eq!(supabase.flow_table, "whatsapp_flow");
        assert_eq!(supabase.users_table, "whatsapp_users");
    }

    #[test]
    fn flow_settings_parse() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("FLOW_MENU_STYLE", "paged"));
        pairs.push(("FLOW_ENABLED", "false"));
        let config = load(&pairs).unwrap();
        assert_eq!(config.flow.menu_style, MenuStyle::Paged);
        assert!(!config.flow.enabled);

        let mut bad = MINIMAL.to_vec();
        bad.push(("FLOW_MENU_STYLE", "carousel"));
        assert!(matches!(load(&bad), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn human_number_is_normalized_into_link() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("HUMAN_NUMBER", "+55 (11) 90000-0000"));
        let config = load(&pairs).unwrap();
        assert_eq!(config.handoff.contact_url, "https://wa.me/5511900000000");
    }

    #[test]
    fn extra_origins_are_merged() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("ALLOW_ORIGIN", "https://panel.example.com, http://localhost:5173"));
        let config = load(&pairs).unwrap();
        assert_eq!(config.server.allowed_origins.len(), 3);
        assert!(
            config
                .server
                .allowed_origins
                .contains(&"https://panel.example.com".to_string())
        );
    }

    #[test]
    fn invalid_timeout_falls_back_to_default() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("HTTP_TIMEOUT_SECS", "0"));
        assert_eq!(load(&pairs).unwrap().http_timeout, Duration::from_secs(12));
    }
}
