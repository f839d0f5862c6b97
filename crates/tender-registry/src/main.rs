use anyhow::Context;
use std::sync::Arc;
use tender_db::Repository;
use tokio_util::sync::CancellationToken;

mod accounts;
mod bootstrap;
mod config;
mod credentials;
mod departments;
mod error;
mod jobs;
mod login;
mod registration;
mod routes;
mod telemetry;
mod validation;
mod views;
mod workflow;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = config::load().context("loading configuration")?;
    telemetry::init(&config.tracing).context("installing tracing subscriber")?;
    let store: Arc<dyn Repository> = Arc::new(
        tender_db::create(&config.database)
            .await
            .context("creating database store")?,
    );
    let settings = Arc::new(config.workflow);
    if let Some(superadmin) = &config.bootstrap_superadmin {
        bootstrap::ensure_superadmin(store.as_ref(), superadmin, settings.password_min_length)
            .await
            .context("bootstrapping superadmin")?;
    }
    let cancellation_token = CancellationToken::new();
    let mailer = Arc::new(jobs::SmtpMailer::new(config.jobs.notifications.clone()));
    let jobs = jobs::create(config.jobs, store.clone(), mailer, settings.clone());
    let jobs_handle = {
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move { jobs.run(cancellation_token).await })
    };
    let app = routes::setup(AppState { store, settings });
    let bind = format!("{}:{}", config.bind_address, config.bind_port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding listener to {bind}"))?;
    tracing::info!("Listening on {bind}");
    let shutdown = {
        let cancellation_token = cancellation_token.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown requested"),
                _ = cancellation_token.cancelled() => (),
            }
        }
    };
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving application");
    cancellation_token.cancel();
    jobs_handle
        .await
        .context("joining background jobs")?
        .context("running background jobs")?;
    served
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Repository>,
    pub settings: Arc<config::WorkflowConfig>,
}

impl AppState {
    pub fn password_policy(&self) -> validation::PasswordPolicy {
        validation::PasswordPolicy::new(self.settings.password_min_length)
    }
}
