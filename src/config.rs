//! Immutable configuration, loaded once from environment variables at
//! startup. There is no runtime-mutable configuration object:
//! once `AppConfig::load` returns, every field is fixed for the life of the
//! process.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub install_prefix: String,
    pub install_short_name: String,
    pub install_timezone: chrono_tz::Tz,

    pub outbound_from_addr: String,
    pub outbound_cc_addr: String,
    pub loop_guard_marker_phrase: String,

    pub llm_enabled: bool,
    pub llm_deadline_ms: u64,
    pub llm_model: String,
    pub llm_endpoint: String,
    pub llm_api_key: String,

    pub store_deadline_ms: u64,
    pub store_write_qps: u32,

    pub mail_deadline_ms: u64,
    pub mail_retries: u32,
    pub mail_base_delay_ms: u64,
    pub mail_endpoint: String,
    pub mail_api_key: String,

    pub dedup_ttl_hours: u64,
    pub request_deadline_ms: u64,

    pub ack_template_text: String,
    pub ack_template_html: String,

    pub database_url: String,
    pub bind_addr: String,
    pub default_boundary: String,
}

impl AppConfig {
    pub fn llm_deadline(&self) -> Duration {
        Duration::from_millis(self.llm_deadline_ms)
    }
    pub fn store_deadline(&self) -> Duration {
        Duration::from_millis(self.store_deadline_ms)
    }
    pub fn mail_deadline(&self) -> Duration {
        Duration::from_millis(self.mail_deadline_ms)
    }
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_hours * 3600)
    }
}

const DEFAULT_ACK_TEXT: &str = "{greeting},\n\n\
Thanks for getting in touch. Your query has been logged under reference {ticket_id}.\n\n\
Original subject: {original_subject}\n\
Priority: {priority}\n\n\
--- Original message ---\n\
{original_body}\n\n\
We will be back in touch shortly.\n";

const DEFAULT_ACK_HTML: &str = "<p>{greeting},</p>\
<p>Thanks for getting in touch. Your query has been logged under reference <strong>{ticket_id}</strong>.</p>\
<p>Original subject: {original_subject}<br/>Priority: {priority}</p>\
<blockquote>{original_body}</blockquote>\
<p>We will be back in touch shortly.</p>";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingField(String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("unrecognized configuration key: {0}")]
    UnknownKey(String),
}

/// Every environment variable this service reads. Anything sharing one of
/// `RECOGNIZED_PREFIXES` but absent from this list is almost certainly a
/// typo (`LLM_DEADLIN_MS`) rather than an unrelated process-level variable,
/// so it is rejected rather than silently ignored.
const RECOGNIZED_KEYS: &[&str] = &[
    "INSTALL_PREFIX",
    "INSTALL_SHORT_NAME",
    "INSTALL_TIMEZONE",
    "OUTBOUND_FROM_ADDR",
    "OUTBOUND_CC_ADDR",
    "LOOP_GUARD_MARKER_PHRASE",
    "LLM_ENABLED",
    "LLM_DEADLINE_MS",
    "LLM_MODEL",
    "LLM_ENDPOINT",
    "LLM_API_KEY",
    "STORE_DEADLINE_MS",
    "STORE_WRITE_QPS",
    "MAIL_DEADLINE_MS",
    "MAIL_RETRIES",
    "MAIL_BASE_DELAY_MS",
    "MAIL_ENDPOINT",
    "MAIL_API_KEY",
    "DEDUP_TTL_HOURS",
    "REQUEST_DEADLINE_MS",
    "ACK_TEMPLATE_TEXT",
    "ACK_TEMPLATE_HTML",
    "DATABASE_URL",
    "BIND_ADDR",
    "DEFAULT_MULTIPART_BOUNDARY",
    "LOG_LEVEL",
];

/// Namespaces this service owns. A present environment variable outside
/// these prefixes (`PATH`, `HOME`, ...) is none of our business and is left
/// alone; one inside them must be an exact match in `RECOGNIZED_KEYS`.
const RECOGNIZED_PREFIXES: &[&str] = &[
    "INSTALL_",
    "OUTBOUND_",
    "LOOP_GUARD_",
    "LLM_",
    "STORE_",
    "MAIL_",
    "DEDUP_",
    "REQUEST_",
    "ACK_TEMPLATE_",
    "DATABASE_",
    "BIND_",
    "DEFAULT_MULTIPART_",
    "LOG_LEVEL",
];

fn reject_unknown_keys(present_keys: &[String]) -> Result<(), ConfigError> {
    for key in present_keys {
        let owned = RECOGNIZED_PREFIXES.iter().any(|prefix| key.starts_with(prefix));
        if owned && !RECOGNIZED_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey(key.clone()));
        }
    }
    Ok(())
}

pub fn load() -> Result<AppConfig, ConfigError> {
    let present_keys: Vec<String> = std::env::vars().map(|(key, _)| key).collect();
    load_from(|key| std::env::var(key).ok(), &present_keys)
}

/// Testable indirection over the environment lookup. `present_keys` is the
/// full set of variable names visible to the process, used only to reject
/// unrecognized keys in our own namespace; `get` resolves individual values.
pub fn load_from(get: impl Fn(&str) -> Option<String>, present_keys: &[String]) -> Result<AppConfig, ConfigError> {
    reject_unknown_keys(present_keys)?;

    let install_prefix = get("INSTALL_PREFIX").unwrap_or_else(|| "ARG".to_owned());
    if install_prefix.is_empty() || !install_prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::InvalidValue(
            "INSTALL_PREFIX".to_owned(),
            install_prefix,
        ));
    }

    let install_short_name =
        get("INSTALL_SHORT_NAME").ok_or_else(|| ConfigError::MissingField("INSTALL_SHORT_NAME".to_owned()))?;

    let install_timezone_str = get("INSTALL_TIMEZONE").unwrap_or_else(|| "Europe/London".to_owned());
    let install_timezone: chrono_tz::Tz = install_timezone_str
        .parse()
        .map_err(|_| ConfigError::InvalidValue("INSTALL_TIMEZONE".to_owned(), install_timezone_str))?;

    let outbound_from_addr = get("OUTBOUND_FROM_ADDR")
        .ok_or_else(|| ConfigError::MissingField("OUTBOUND_FROM_ADDR".to_owned()))?
        .to_lowercase();
    let outbound_cc_addr =
        get("OUTBOUND_CC_ADDR").ok_or_else(|| ConfigError::MissingField("OUTBOUND_CC_ADDR".to_owned()))?;
    let loop_guard_marker_phrase =
        get("LOOP_GUARD_MARKER_PHRASE").unwrap_or_else(|| "call logged".to_owned());

    let llm_enabled = parse_bool(&get("LLM_ENABLED").unwrap_or_else(|| "true".to_owned()), "LLM_ENABLED")?;
    let llm_deadline_ms = parse_u64(&get("LLM_DEADLINE_MS").unwrap_or_else(|| "30000".to_owned()), "LLM_DEADLINE_MS")?;
    let llm_model = get("LLM_MODEL").unwrap_or_default();
    let llm_endpoint = get("LLM_ENDPOINT").unwrap_or_default();
    let llm_api_key = get("LLM_API_KEY").unwrap_or_default();
    if llm_enabled && (llm_model.is_empty() || llm_endpoint.is_empty()) {
        return Err(ConfigError::MissingField(
            "LLM_MODEL/LLM_ENDPOINT (required when LLM_ENABLED=true)".to_owned(),
        ));
    }

    let store_deadline_ms =
        parse_u64(&get("STORE_DEADLINE_MS").unwrap_or_else(|| "10000".to_owned()), "STORE_DEADLINE_MS")?;
    let store_write_qps =
        parse_u32(&get("STORE_WRITE_QPS").unwrap_or_else(|| "5".to_owned()), "STORE_WRITE_QPS")?;

    let mail_deadline_ms =
        parse_u64(&get("MAIL_DEADLINE_MS").unwrap_or_else(|| "15000".to_owned()), "MAIL_DEADLINE_MS")?;
    let mail_retries = parse_u32(&get("MAIL_RETRIES").unwrap_or_else(|| "3".to_owned()), "MAIL_RETRIES")?;
    let mail_base_delay_ms =
        parse_u64(&get("MAIL_BASE_DELAY_MS").unwrap_or_else(|| "2000".to_owned()), "MAIL_BASE_DELAY_MS")?;
    let mail_endpoint =
        get("MAIL_ENDPOINT").ok_or_else(|| ConfigError::MissingField("MAIL_ENDPOINT".to_owned()))?;
    let mail_api_key =
        get("MAIL_API_KEY").ok_or_else(|| ConfigError::MissingField("MAIL_API_KEY".to_owned()))?;

    let dedup_ttl_hours =
        parse_u64(&get("DEDUP_TTL_HOURS").unwrap_or_else(|| "168".to_owned()), "DEDUP_TTL_HOURS")?;
    let request_deadline_ms =
        parse_u64(&get("REQUEST_DEADLINE_MS").unwrap_or_else(|| "120000".to_owned()), "REQUEST_DEADLINE_MS")?;

    let ack_template_text = get("ACK_TEMPLATE_TEXT").unwrap_or_else(|| DEFAULT_ACK_TEXT.to_owned());
    let ack_template_html = get("ACK_TEMPLATE_HTML").unwrap_or_else(|| DEFAULT_ACK_HTML.to_owned());

    let database_url = get("DATABASE_URL").ok_or_else(|| ConfigError::MissingField("DATABASE_URL".to_owned()))?;
    let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned());
    let default_boundary = get("DEFAULT_MULTIPART_BOUNDARY").unwrap_or_else(|| "xYzZY".to_owned());

    Ok(AppConfig {
        install_prefix,
        install_short_name,
        install_timezone,
        outbound_from_addr,
        outbound_cc_addr,
        loop_guard_marker_phrase,
        llm_enabled,
        llm_deadline_ms,
        llm_model,
        llm_endpoint,
        llm_api_key,
        store_deadline_ms,
        store_write_qps,
        mail_deadline_ms,
        mail_retries,
        mail_base_delay_ms,
        mail_endpoint,
        mail_api_key,
        dedup_ttl_hours,
        request_deadline_ms,
        ack_template_text,
        ack_template_html,
        database_url,
        bind_addr,
        default_boundary,
    })
}

fn parse_bool(raw: &str, field: &str) -> Result<bool, ConfigError> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue(field.to_owned(), raw.to_owned())),
    }
}

fn parse_u64(raw: &str, field: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue(field.to_owned(), raw.to_owned()))
}

fn parse_u32(raw: &str, field: &str) -> Result<u32, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue(field.to_owned(), raw.to_owned()))
}
