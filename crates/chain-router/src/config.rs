//! Runtime configuration (ambient stack addition): small, environment-
//! loaded knobs, not a general file-based config system.

use std::time::Duration;

/// Tunables for the router and the socket layer it mounts.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub bind_addr: String,
    pub redirect_trailing_slash: bool,
    pub redirect_fixed_path: bool,
    pub handle_options: bool,
    pub handle_method_not_allowed: bool,
    /// Session resume window after a transport disconnect.
    pub resume_window: Duration,
    /// Bounded outbound queue capacity per session.
    pub outbound_queue_capacity: usize,
    /// Debounce before an adapter unsubscribe actually fires.
    pub unsubscribe_debounce: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            redirect_trailing_slash: true,
            redirect_fixed_path: true,
            handle_options: true,
            handle_method_not_allowed: true,
            resume_window: Duration::from_secs(15),
            outbound_queue_capacity: 32,
            unsubscribe_debounce: Duration::from_secs(15),
        }
    }
}

impl ChainConfig {
    /// Load overrides from `CHAIN_*` environment variables, falling back to
    /// [`Default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("CHAIN_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = std::env::var("CHAIN_REDIRECT_TRAILING_SLASH") {
            cfg.redirect_trailing_slash = parse_bool(&v, cfg.redirect_trailing_slash);
        }
        if let Ok(v) = std::env::var("CHAIN_REDIRECT_FIXED_PATH") {
            cfg.redirect_fixed_path = parse_bool(&v, cfg.redirect_fixed_path);
        }
        if let Ok(v) = std::env::var("CHAIN_HANDLE_OPTIONS") {
            cfg.handle_options = parse_bool(&v, cfg.handle_options);
        }
        if let Ok(v) = std::env::var("CHAIN_HANDLE_METHOD_NOT_ALLOWED") {
            cfg.handle_method_not_allowed = parse_bool(&v, cfg.handle_method_not_allowed);
        }
        if let Ok(v) = std::env::var("CHAIN_RESUME_WINDOW_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.resume_window = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("CHAIN_OUTBOUND_QUEUE_CAPACITY") {
            if let Ok(n) = v.parse() {
                cfg.outbound_queue_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("CHAIN_UNSUBSCRIBE_DEBOUNCE_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.unsubscribe_debounce = Duration::from_secs(secs);
            }
        }
        cfg
    }
}

fn parse_bool(v: &str, default: bool) -> bool {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
