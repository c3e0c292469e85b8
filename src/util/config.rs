//! Runtime configuration.
//!
//! Values are read from command line flags first, falling back to environment variables. A `.env`
//! file in the working directory is loaded into the environment before parsing, so local
//! development can keep secrets out of the shell history.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::constants::{
    DEFAULT_ENERGY_MAX, DEFAULT_ENERGY_REGEN_PER_HOUR, DEFAULT_SESSION_IDLE_SECS, SERVER_PORT,
};
use crate::energy::EnergyModel;

#[derive(Parser, Debug, Clone)]
#[command(name = "rather-server")]
#[command(about = "Game logic and auth proxy for the Would You Rather backend")]
pub struct Config {
    /// Base URL of the hosted backend (no trailing slash)
    #[arg(long, env = "BACKEND_URL")]
    pub backend_url: String,

    /// Public (anon) API key sent with every backend request
    #[arg(long, env = "BACKEND_ANON_KEY")]
    pub backend_anon_key: String,

    #[arg(long, env = "SERVER_API_PORT", default_value_t = SERVER_PORT)]
    pub server_api_port: u16,

    /// Either `*` or a domain suffix starting with a dot, such as `.example.com`
    #[arg(long, env = "CORS_ALLOW_ORIGINS", default_value = "*")]
    pub cors_allow_origins: String,

    /// How upstream `Set-Cookie` headers are rewritten by the backend proxy
    #[arg(long, env = "COOKIE_MODE", value_enum, default_value_t = CookieModeArg::Local)]
    pub cookie_mode: CookieModeArg,

    #[arg(long, env = "ENERGY_MAX", default_value_t = DEFAULT_ENERGY_MAX)]
    pub energy_max: u32,

    #[arg(long, env = "ENERGY_REGEN_PER_HOUR", default_value_t = DEFAULT_ENERGY_REGEN_PER_HOUR)]
    pub energy_regen_per_hour: u32,

    /// Play sessions untouched for this long are dropped
    #[arg(long, env = "SESSION_IDLE_SECS", default_value_t = DEFAULT_SESSION_IDLE_SECS)]
    pub session_idle_secs: u64,

    /// OTLP collector; telemetry export is disabled when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_exporter_otlp_endpoint: Option<String>,

    #[arg(long, env = "API_SERVICE_NAME", default_value = "rather-server")]
    pub api_service_name: String,

    #[arg(long, env = "API_TRACER_NAME", default_value = "rather-tracer")]
    pub api_tracer_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CookieModeArg {
    /// Deployed behind an HTTPS edge proxy
    Edge,
    /// Plain-http localhost development
    Local,
}

impl Config {
    pub fn load() -> ConfigResult<Self> {
        // a missing .env is fine; a malformed one is not
        match dotenvy::dotenv() {
            Ok(_) => (),
            Err(e) if e.not_found() => (),
            Err(e) => return Err(ConfigErr::Dotenvy(e)),
        }

        let config = Self::try_parse()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.energy_regen_per_hour == 0 {
            return Err(ConfigErr::Invalid(String::from(
                "ENERGY_REGEN_PER_HOUR must be greater than zero",
            )));
        }

        if self.backend_url.ends_with('/') {
            return Err(ConfigErr::Invalid(format!(
                "BACKEND_URL must not end with '/' (got '{}')",
                self.backend_url
            )));
        }

        if self.cors_allow_origins != "*" && !self.cors_allow_origins.starts_with('.') {
            return Err(ConfigErr::Invalid(format!(
                "CORS_ALLOW_ORIGINS must be '*' or start with '.' (got '{}')",
                self.cors_allow_origins
            )));
        }

        if self.session_idle_secs == 0 {
            return Err(ConfigErr::Invalid(String::from(
                "SESSION_IDLE_SECS must be greater than zero",
            )));
        }

        Ok(())
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn energy_model(&self) -> EnergyModel {
        EnergyModel::new(self.energy_max, self.energy_regen_per_hour)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.server_api_port)
    }
}

pub type ConfigResult<T> = core::result::Result<T, ConfigErr>;

#[derive(Debug, Error)]
pub enum ConfigErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    Clap(#[from] clap::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
pub(crate) fn test_config(backend_url: &str) -> Config {
    Config {
        backend_url: backend_url.to_string(),
        backend_anon_key: String::from("anon-key"),
        server_api_port: 0,
        cors_allow_origins: String::from("*"),
        cookie_mode: CookieModeArg::Local,
        energy_max: DEFAULT_ENERGY_MAX,
        energy_regen_per_hour: DEFAULT_ENERGY_REGEN_PER_HOUR,
        session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
        otel_exporter_otlp_endpoint: None,
        api_service_name: String::from("rather-server-test"),
        api_tracer_name: String::from("rather-tracer-test"),
    }
}
