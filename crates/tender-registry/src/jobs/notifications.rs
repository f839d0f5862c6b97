//! Delivery of the notification outbox.
//!
//! A notification is marked sent only after the SMTP server accepted it, so a crash between the
//! two steps can deliver it twice but never loses it.

use askama::Template;
use std::{sync::Arc, time::Duration};
use tender_db::{
    models::{Notification, NotificationKind},
    Repository,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub run: bool,
    #[serde(with = "humantime_serde")]
    pub sleep: Duration,
    #[serde(with = "humantime_serde")]
    pub error_sleep: Duration,
    pub batch_size: i64,
    /// Delay before the first retry of a failed delivery, doubled on every further failure
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,
    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(with = "humantime_serde")]
    pub smtp_connect_timeout: Duration,
    pub smtp_implicit_tls: bool,
    pub smtp_user_name: String,
    pub smtp_password: String,
    pub from_address: String,
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(60)
}

const MAX_RETRY_DOUBLINGS: u32 = 10;

/// How long a notification waits after its `attempts`-th consecutive failure.
fn retry_backoff(retry_delay: Duration, attempts: i32) -> Duration {
    let doublings = u32::try_from(attempts.max(1) - 1)
        .unwrap_or_default()
        .min(MAX_RETRY_DOUBLINGS);
    retry_delay.saturating_mul(1 << doublings)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), String>;
}

pub struct SmtpMailer {
    config: Config,
}

impl SmtpMailer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    #[tracing::instrument(skip(self, email), fields(to = %email.to))]
    async fn send(&self, email: OutgoingEmail) -> Result<(), String> {
        let message = mail_builder::MessageBuilder::new()
            .subject(email.subject.as_str())
            .from(self.config.from_address.as_str())
            .sender(self.config.from_address.as_str())
            .to(email.to.as_str())
            .html_body(email.html.as_str())
            .text_body(email.text.as_str());
        let mut builder =
            mail_send::SmtpClientBuilder::new(self.config.smtp_host.as_str(), self.config.smtp_port)
                .implicit_tls(self.config.smtp_implicit_tls)
                .timeout(self.config.smtp_connect_timeout);
        if !self.config.smtp_user_name.is_empty() {
            builder = builder.credentials((
                self.config.smtp_user_name.as_str(),
                self.config.smtp_password.as_str(),
            ));
        }
        builder
            .connect()
            .await
            .map_err(|err| format!("Connecting to SMTP Server: {err:?}"))?
            .send(message)
            .await
            .map_err(|err| format!("Sending Email: {err:?}"))
    }
}

pub struct Sender {
    store: Arc<dyn Repository>,
    mailer: Arc<dyn Mailer>,
    batch_size: i64,
    retry_delay: Duration,
    activation_validity: Duration,
    password_reset_validity: Duration,
}

impl Sender {
    pub fn new(
        store: Arc<dyn Repository>,
        mailer: Arc<dyn Mailer>,
        batch_size: i64,
        retry_delay: Duration,
        activation_validity: Duration,
        password_reset_validity: Duration,
    ) -> Self {
        Self {
            store,
            mailer,
            batch_size,
            retry_delay,
            activation_validity,
            password_reset_validity,
        }
    }

    #[tracing::instrument(skip(self, cancellation_token))]
    pub async fn send_pending_notifications(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<SendOutcome, Error> {
        let pending = self
            .store
            .list_pending_notifications(self.batch_size)
            .await?;
        let mut send_stats = SendStatistics::new(pending.len());
        for notification in pending {
            if cancellation_token.is_cancelled() {
                return Ok(SendOutcome::Canceled(send_stats));
            }
            match self.deliver(&notification).await {
                Ok(()) => send_stats.increment_sent(),
                Err(err) => {
                    tracing::warn!(notification_id = notification.id, "Delivery failed: {err}");
                    self.defer(&notification, &err).await;
                    send_stats.append_error(err)
                }
            }
        }
        Ok(SendOutcome::Completed(send_stats))
    }

    /// Pushes a failed notification back so due ones are not starved behind it.
    async fn defer(&self, notification: &Notification, err: &SendEmailError) {
        let backoff = retry_backoff(self.retry_delay, notification.attempts + 1);
        let next_attempt = jiff::SignedDuration::try_from(backoff)
            .ok()
            .and_then(|backoff| jiff::Timestamp::now().checked_add(backoff).ok())
            .unwrap_or(jiff::Timestamp::MAX);
        if let Err(record_err) = self
            .store
            .record_notification_failure(notification.id, err.to_string(), next_attempt.into())
            .await
        {
            tracing::error!(
                notification_id = notification.id,
                "Recording delivery failure: {record_err}"
            );
        }
    }

    #[tracing::instrument(skip(self, notification), fields(notification_id = notification.id, kind = %notification.kind))]
    async fn deliver(&self, notification: &Notification) -> Result<(), SendEmailError> {
        let email = self.render(notification)?;
        self.mailer
            .send(email)
            .await
            .map_err(SendEmailError::Sending)?;
        self.store
            .mark_notification_sent(notification.id)
            .await
            .map_err(SendEmailError::Recording)
    }

    fn render(&self, notification: &Notification) -> Result<OutgoingEmail, SendEmailError> {
        let tender_number = notification.tender_number.as_str();
        let link = notification.link.as_deref().unwrap_or_default();
        let (subject, text, html) = match notification.kind {
            NotificationKind::Approval => {
                let validity = humantime::format_duration(self.activation_validity).to_string();
                (
                    format!("Registration {tender_number} approved"),
                    ApprovalTextTemplate {
                        tender_number,
                        link,
                        validity: &validity,
                    }
                    .render()?,
                    ApprovalHtmlTemplate {
                        tender_number,
                        link,
                        validity: &validity,
                    }
                    .render()?,
                )
            }
            NotificationKind::Decline => {
                let reason = notification.reason.as_deref();
                (
                    format!("Registration {tender_number} declined"),
                    DeclineTextTemplate {
                        tender_number,
                        reason,
                    }
                    .render()?,
                    DeclineHtmlTemplate {
                        tender_number,
                        reason,
                    }
                    .render()?,
                )
            }
            NotificationKind::PasswordReset => {
                let validity =
                    humantime::format_duration(self.password_reset_validity).to_string();
                (
                    "Password reset requested".to_owned(),
                    PasswordResetTextTemplate {
                        tender_number,
                        link,
                        validity: &validity,
                    }
                    .render()?,
                    PasswordResetHtmlTemplate {
                        tender_number,
                        link,
                        validity: &validity,
                    }
                    .render()?,
                )
            }
        };
        Ok(OutgoingEmail {
            to: notification.recipient.clone(),
            subject,
            text,
            html,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Notification store error: {0}")]
    Store(#[from] tender_db::Error),
}

pub enum SendOutcome {
    Completed(SendStatistics),
    Canceled(SendStatistics),
}

#[derive(Debug)]
pub struct SendStatistics {
    pub(crate) sent: usize,
    pub(crate) remaining: usize,
    pub(crate) errors: Vec<SendEmailError>,
}

impl SendStatistics {
    fn new(count: usize) -> Self {
        Self {
            sent: 0,
            remaining: count,
            errors: Vec::new(),
        }
    }

    fn increment_sent(&mut self) {
        self.sent += 1;
        self.remaining -= 1;
    }

    fn append_error(&mut self, error: SendEmailError) {
        self.remaining -= 1;
        self.errors.push(error);
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SendEmailError {
    #[error("Template: {0}")]
    Template(#[from] askama::Error),
    #[error("Sending: {0}")]
    Sending(String),
    #[error("Recording: {0}")]
    Recording(tender_db::Error),
}

#[derive(Template)]
#[template(path = "email/approval.txt")]
struct ApprovalTextTemplate<'a> {
    tender_number: &'a str,
    link: &'a str,
    validity: &'a str,
}

#[derive(Template)]
#[template(path = "email/approval.html")]
struct ApprovalHtmlTemplate<'a> {
    tender_number: &'a str,
    link: &'a str,
    validity: &'a str,
}

#[derive(Template)]
#[template(path = "email/decline.txt")]
struct DeclineTextTemplate<'a> {
    tender_number: &'a str,
    reason: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/decline.html")]
struct DeclineHtmlTemplate<'a> {
    tender_number: &'a str,
    reason: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/password_reset.txt")]
struct PasswordResetTextTemplate<'a> {
    tender_number: &'a str,
    link: &'a str,
    validity: &'a str,
}

#[derive(Template)]
#[template(path = "email/password_reset.html")]
struct PasswordResetHtmlTemplate<'a> {
    tender_number: &'a str,
    link: &'a str,
    validity: &'a str,
}

/// Keeps every message instead of talking to an SMTP server.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<OutgoingEmail>>,
    pub fail: bool,
    pub rejected: Vec<String>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), String> {
        if self.fail {
            return Err("smtp unavailable".to_owned());
        }
        if self.rejected.contains(&email.to) {
            return Err(format!("550 mailbox unavailable: {}", email.to));
        }
        self.sent
            .lock()
            .map_err(|err| err.to_string())?
            .push(email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tender_db::{memory::MemoryStore, models};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    async fn queue_decline(store: &MemoryStore, reason: Option<&str>) -> models::Account {
        queue_decline_to(store, "T-77", "bidder@example.com", reason).await
    }

    async fn queue_decline_to(
        store: &MemoryStore,
        tender_number: &str,
        email: &str,
        reason: Option<&str>,
    ) -> models::Account {
        let stamp = tender_db::now();
        let account = store
            .register_account(crate::tests::applicant_record(tender_number, email, None))
            .await
            .expect("registers");
        store
            .record_decision(
                account.id,
                models::AccountChanges {
                    status: Some(models::AccountStatus::Declined),
                    decline_reason: Some(reason.map(str::to_owned)),
                    ..Default::default()
                },
                Some(models::NewNotification {
                    account_id: account.id,
                    kind: NotificationKind::Decline,
                    recipient: account.email.clone(),
                    tender_number: tender_number.to_owned(),
                    link: None,
                    reason: reason.map(str::to_owned),
                    created: stamp,
                }),
            )
            .await
            .expect("records decision")
    }

    fn sender(store: Arc<MemoryStore>, mailer: Arc<RecordingMailer>) -> Sender {
        Sender::new(store, mailer, 10, Duration::from_secs(60), 7 * DAY, DAY)
    }

    #[tokio::test]
    async fn it_sends_and_marks_pending_notifications() {
        let store = Arc::new(MemoryStore::new());
        queue_decline(&store, Some("incomplete documents")).await;
        let mailer = Arc::new(RecordingMailer::default());
        let outcome = sender(store.clone(), mailer.clone())
            .send_pending_notifications(CancellationToken::new())
            .await
            .expect("sends");
        let SendOutcome::Completed(stats) = outcome else {
            panic!("should complete");
        };
        assert_eq!((stats.sent, stats.remaining), (1, 0));
        let sent = mailer.sent.lock().expect("lock").clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "bidder@example.com");
        assert_eq!(sent[0].subject, "Registration T-77 declined");
        assert!(sent[0].text.contains("incomplete documents"));
        assert!(store
            .list_pending_notifications(10)
            .await
            .expect("lists")
            .is_empty());
    }

    #[tokio::test]
    async fn it_keeps_notifications_pending_when_sending_fails() {
        let store = Arc::new(MemoryStore::new());
        queue_decline(&store, None).await;
        let mailer = Arc::new(RecordingMailer {
            fail: true,
            ..Default::default()
        });
        let outcome = sender(store.clone(), mailer)
            .send_pending_notifications(CancellationToken::new())
            .await
            .expect("runs");
        let SendOutcome::Completed(stats) = outcome else {
            panic!("should complete");
        };
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.errors.len(), 1);
        let queued = store.notifications().expect("lists");
        assert_eq!(queued.len(), 1);
        assert!(queued[0].sent.is_none());
        assert_eq!(queued[0].attempts, 1);
        assert!(queued[0]
            .last_error
            .as_deref()
            .is_some_and(|err| err.contains("smtp unavailable")));
        assert!(
            store.list_pending_notifications(10).await.expect("lists").is_empty(),
            "a failed notification waits out its retry delay"
        );
    }

    #[tokio::test]
    async fn it_does_not_let_an_undeliverable_notification_block_the_rest() {
        let store = Arc::new(MemoryStore::new());
        queue_decline_to(&store, "T-78", "bad@example.com", None).await;
        queue_decline_to(&store, "T-79", "good@example.com", None).await;
        let mailer = Arc::new(RecordingMailer {
            rejected: vec!["bad@example.com".to_owned()],
            ..Default::default()
        });
        let sender = Sender::new(
            store.clone(),
            mailer.clone(),
            1,
            Duration::from_secs(60),
            7 * DAY,
            DAY,
        );
        for _ in 0..3 {
            sender
                .send_pending_notifications(CancellationToken::new())
                .await
                .expect("runs");
        }
        let delivered = mailer
            .sent
            .lock()
            .expect("lock")
            .iter()
            .map(|email| email.to.clone())
            .collect::<Vec<_>>();
        assert_eq!(delivered, vec!["good@example.com".to_owned()]);
        let unsent = store
            .notifications()
            .expect("lists")
            .into_iter()
            .filter(|n| n.sent.is_none())
            .map(|n| (n.recipient, n.attempts))
            .collect::<Vec<_>>();
        assert_eq!(unsent, vec![("bad@example.com".to_owned(), 1)]);
    }

    #[test]
    fn it_doubles_the_retry_delay_up_to_a_ceiling() {
        let minute = Duration::from_secs(60);
        assert_eq!(retry_backoff(minute, 1), minute);
        assert_eq!(retry_backoff(minute, 2), 2 * minute);
        assert_eq!(retry_backoff(minute, 4), 8 * minute);
        assert_eq!(retry_backoff(minute, 500), 1024 * minute);
    }

    #[tokio::test]
    async fn it_stops_when_cancelled() {
        let store = Arc::new(MemoryStore::new());
        queue_decline(&store, None).await;
        let cancellation_token = CancellationToken::new();
        cancellation_token.cancel();
        let outcome = sender(store, Arc::new(RecordingMailer::default()))
            .send_pending_notifications(cancellation_token)
            .await
            .expect("runs");
        assert!(matches!(outcome, SendOutcome::Canceled(stats) if stats.remaining == 1));
    }

    #[test]
    fn it_renders_the_activation_link_and_validity() {
        let text = ApprovalTextTemplate {
            tender_number: "T-1",
            link: "https://tenders.example.com/activate/abc",
            validity: "7days",
        }
        .render()
        .expect("renders");
        assert!(text.contains("https://tenders.example.com/activate/abc"));
        assert!(text.contains("7days"));
    }
}
