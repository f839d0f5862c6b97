use crate::jobs;
use anyhow::Context;
use std::{io::Read, time::Duration};

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bind_address: String,
    pub bind_port: u16,
    pub database: tender_db::Config,
    pub workflow: WorkflowConfig,
    pub jobs: jobs::Config,
    pub tracing: TracingConfig,
    #[serde(default)]
    pub bootstrap_superadmin: Option<BootstrapSuperadmin>,
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowConfig {
    /// Base URL of the applicant cabinet, used to build activation and reset links
    pub frontend_url: String,
    #[serde(with = "humantime_serde", default = "default_activation_validity")]
    pub activation_validity: Duration,
    #[serde(with = "humantime_serde", default = "default_password_reset_validity")]
    pub password_reset_validity: Duration,
    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,
}

impl WorkflowConfig {
    pub fn link(&self, path: &str, secret: &uuid::Uuid) -> String {
        format!("{}/{path}/{secret}", self.frontend_url.trim_end_matches('/'))
    }
}

fn default_activation_validity() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_password_reset_validity() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_password_min_length() -> usize {
    8
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TracingConfig {
    pub console: bool,
}

#[derive(Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootstrapSuperadmin {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub fn load() -> anyhow::Result<Config> {
    let mut configuration = String::with_capacity(4096);
    std::fs::File::open("./app-config.toml")
        .context("unable to open configuration file ./app-config.toml")?
        .read_to_string(&mut configuration)
        .context("unable to read configuration file ./app-config.toml")?;
    let mut config = parse(&configuration)?;
    if let Ok(smtp_user_name) = std::env::var("TENDER_NOTIFICATIONS_SMTP_USER_NAME") {
        config.jobs.notifications.smtp_user_name = smtp_user_name;
    }
    if let Ok(smtp_password) = std::env::var("TENDER_NOTIFICATIONS_SMTP_PASSWORD") {
        config.jobs.notifications.smtp_password = smtp_password;
    }
    if let Some(superadmin) = config.bootstrap_superadmin.as_mut() {
        if let Ok(password) = std::env::var("TENDER_BOOTSTRAP_SUPERADMIN_PASSWORD") {
            superadmin.password = password;
        }
    }
    Ok(config)
}

pub fn parse(configuration: &str) -> anyhow::Result<Config> {
    toml::from_str::<Config>(configuration)
        .context("unable to parse configuration file ./app-config.toml")
}
