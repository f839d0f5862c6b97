use std::sync::Arc;
use tender_db::Repository;
use tokio_util::sync::CancellationToken;

use crate::config::WorkflowConfig;

mod notifications;

pub use notifications::{Mailer, SmtpMailer};

pub fn create(
    config: Config,
    store: Arc<dyn Repository>,
    mailer: Arc<dyn Mailer>,
    workflow: Arc<WorkflowConfig>,
) -> Jobs {
    Jobs {
        config: Arc::new(config),
        store,
        mailer,
        workflow,
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Notification delivery: {0}")]
    Notifications(#[from] notifications::Error),
}

pub struct Jobs {
    config: Arc<Config>,
    store: Arc<dyn Repository>,
    mailer: Arc<dyn Mailer>,
    workflow: Arc<WorkflowConfig>,
}

impl Jobs {
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<(), Error> {
        self.run_notification_sender(cancellation_token).await
    }

    #[tracing::instrument(skip(self, cancellation_token))]
    async fn run_notification_sender(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<(), Error> {
        use notifications::*;
        use tokio::time::sleep;
        let config = &self.config.notifications;
        let sender = notifications::Sender::new(
            self.store.clone(),
            self.mailer.clone(),
            config.batch_size,
            config.retry_delay,
            self.workflow.activation_validity,
            self.workflow.password_reset_validity,
        );
        loop {
            let pause = if config.run {
                match sender
                    .send_pending_notifications(cancellation_token.clone())
                    .await
                {
                    Ok(SendOutcome::Completed(stats)) => {
                        tracing::info!("Send Notification Statistics: {stats:?}");
                        if !stats.errors.is_empty() && stats.sent == 0 {
                            Some(config.error_sleep)
                        } else if stats.sent == 0 {
                            Some(config.sleep)
                        } else {
                            None
                        }
                    }
                    Ok(SendOutcome::Canceled(stats)) => {
                        tracing::info!("Send Notification Statistics: {stats:?}");
                        break;
                    }
                    Err(err) => {
                        tracing::error!("Send Notification Error: {err:?}");
                        Some(config.error_sleep)
                    }
                }
            } else {
                Some(config.error_sleep)
            };
            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancellation_token.cancelled() => (),
                    _ = sleep(pause) => ()
                }
            }
            if cancellation_token.is_cancelled() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub notifications: notifications::Config,
}
