use std::{env, path::PathBuf};

use crate::error::{ConfigError, ErrorKind};

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub tls_key_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub directory_backend: DirectoryBackend,
    pub convex_url: Option<String>,
    pub directory_seed_file: Option<PathBuf>,
    pub stripe_secret_key: String,
    pub stripe_api_base: String,
    pub webhook: WebhookConfig,
    pub max_body_bytes: usize,
}

/// Everything the event processor needs, split out so it can be built
/// without the HTTP and storage settings.
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
    pub monthly_price_id: String,
    pub yearly_price_id: String,
    pub failure_policy: FailurePolicy,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DirectoryBackend {
    Convex,
    Memory,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureAction {
    /// Answer with a client error; redelivering the same bytes cannot succeed.
    Reject,
    /// Answer with a client error so the provider redelivers later.
    Retry,
    /// Answer 200 so the provider stops redelivering.
    Acknowledge,
}

/// Maps internal error kinds to the response the provider sees.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FailurePolicy {
    pub user_not_found: FailureAction,
    pub invalid_price: FailureAction,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            user_not_found: FailureAction::Retry,
            invalid_price: FailureAction::Retry,
        }
    }
}

impl FailurePolicy {
    pub fn action_for(&self, kind: ErrorKind) -> FailureAction {
        match kind {
            ErrorKind::Authentication | ErrorKind::MalformedEvent => FailureAction::Reject,
            ErrorKind::ProviderCall | ErrorKind::Directory => FailureAction::Retry,
            ErrorKind::UserNotFound => self.user_not_found,
            ErrorKind::InvalidPrice => self.invalid_price,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &'static str| non_empty(name).ok_or(ConfigError::Missing(name));

        let port = parse_u16(non_empty("PORT"), 9001);

        let directory_backend = match non_empty("DIRECTORY_BACKEND")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("convex") => DirectoryBackend::Convex,
            Some("memory") => DirectoryBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "DIRECTORY_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let convex_url = match directory_backend {
            DirectoryBackend::Convex => Some(normalize_convex_url(&required("CONVEX_URL")?)),
            DirectoryBackend::Memory => non_empty("CONVEX_URL").map(|url| normalize_convex_url(&url)),
        };

        let monthly_price_id = required("STRIPE_MONTHLY_PRICE_ID")?;
        let yearly_price_id = required("STRIPE_YEARLY_PRICE_ID")?;
        if monthly_price_id == yearly_price_id {
            return Err(ConfigError::DuplicatePriceIds);
        }

        let failure_policy = FailurePolicy {
            user_not_found: parse_failure_action(
                "WEBHOOK_USER_NOT_FOUND_POLICY",
                non_empty("WEBHOOK_USER_NOT_FOUND_POLICY"),
            )?,
            invalid_price: parse_failure_action(
                "WEBHOOK_INVALID_PRICE_POLICY",
                non_empty("WEBHOOK_INVALID_PRICE_POLICY"),
            )?,
        };

        let webhook = WebhookConfig {
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            signature_tolerance_secs: parse_i64(non_empty("STRIPE_SIGNATURE_TOLERANCE_SECS"), 300),
            monthly_price_id,
            yearly_price_id,
            failure_policy,
        };

        Ok(Self {
            port,
            tls_key_path: non_empty("TLS_KEY_PATH").map(PathBuf::from),
            tls_cert_path: non_empty("TLS_CERT_PATH").map(PathBuf::from),
            directory_backend,
            convex_url,
            directory_seed_file: non_empty("DIRECTORY_SEED_FILE").map(PathBuf::from),
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_api_base: non_empty("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            webhook,
            max_body_bytes: parse_usize(non_empty("WEBHOOK_MAX_BODY_BYTES"), 1024 * 1024),
        })
    }
}

fn parse_failure_action(
    name: &'static str,
    value: Option<String>,
) -> Result<FailureAction, ConfigError> {
    match value.map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("retry") => Ok(FailureAction::Retry),
        Some("acknowledge") | Some("ack") => Ok(FailureAction::Acknowledge),
        Some(other) => Err(ConfigError::Invalid {
            name,
            value: other.to_string(),
        }),
    }
}

fn parse_u16(value: Option<String>, fallback: u16) -> u16 {
    value
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn parse_i64(value: Option<String>, fallback: i64) -> i64 {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

fn normalize_convex_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed.strip_prefix("wss://") {
        return format!("https://{}", stripped);
    }
    if let Some(stripped) = trimmed.strip_prefix("ws://") {
        return format!("http://{}", stripped);
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("STRIPE_WEBHOOK_SECRET", "whsec_test"),
            ("STRIPE_SECRET_KEY", "sk_test"),
            ("STRIPE_MONTHLY_PRICE_ID", "price_monthly"),
            ("STRIPE_YEARLY_PRICE_ID", "price_yearly"),
            ("CONVEX_URL", "wss://happy-otter-123.convex.cloud"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env.get(name).map(|value| value.to_string()))
    }

    #[test]
    fn loads_defaults_and_normalizes_convex_url() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.directory_backend, DirectoryBackend::Convex);
        assert_eq!(
            config.convex_url.as_deref(),
            Some("https://happy-otter-123.convex.cloud")
        );
        assert_eq!(config.stripe_api_base, DEFAULT_STRIPE_API_BASE);
        assert_eq!(config.webhook.signature_tolerance_secs, 300);
        assert_eq!(config.webhook.failure_policy, FailurePolicy::default());
    }

    #[test]
    fn missing_secret_fails_fast() {
        let mut env = base_env();
        env.remove("STRIPE_WEBHOOK_SECRET");
        let error = load(&env).unwrap_err();
        assert!(matches!(error, ConfigError::Missing("STRIPE_WEBHOOK_SECRET")));
    }

    #[test]
    fn blank_price_id_counts_as_missing() {
        let mut env = base_env();
        env.insert("STRIPE_YEARLY_PRICE_ID", "   ");
        let error = load(&env).unwrap_err();
        assert!(matches!(error, ConfigError::Missing("STRIPE_YEARLY_PRICE_ID")));
    }

    #[test]
    fn identical_price_ids_are_rejected() {
        let mut env = base_env();
        env.insert("STRIPE_YEARLY_PRICE_ID", "price_monthly");
        assert!(matches!(load(&env), Err(ConfigError::DuplicatePriceIds)));
    }

    #[test]
    fn memory_backend_does_not_need_convex() {
        let mut env = base_env();
        env.remove("CONVEX_URL");
        env.insert("DIRECTORY_BACKEND", "memory");
        let config = load(&env).unwrap();
        assert_eq!(config.directory_backend, DirectoryBackend::Memory);
        assert!(config.convex_url.is_none());
    }

    #[test]
    fn failure_policy_is_configurable() {
        let mut env = base_env();
        env.insert("WEBHOOK_USER_NOT_FOUND_POLICY", "acknowledge");
        let config = load(&env).unwrap();
        let policy = config.webhook.failure_policy;
        assert_eq!(
            policy.action_for(ErrorKind::UserNotFound),
            FailureAction::Acknowledge
        );
        assert_eq!(policy.action_for(ErrorKind::InvalidPrice), FailureAction::Retry);
        assert_eq!(
            policy.action_for(ErrorKind::Authentication),
            FailureAction::Reject
        );
        assert_eq!(
            policy.action_for(ErrorKind::MalformedEvent),
            FailureAction::Reject
        );
    }

    #[test]
    fn unknown_policy_value_is_rejected() {
        let mut env = base_env();
        env.insert("WEBHOOK_INVALID_PRICE_POLICY", "sometimes");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid {
                name: "WEBHOOK_INVALID_PRICE_POLICY",
                ..
            })
        ));
    }
}
