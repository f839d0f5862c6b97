use crate::{models, Error};

/// Which applicant accounts a listing should return.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplicantFilter {
    /// `None` means every department, including accounts without one.
    pub department_ids: Option<Vec<i32>>,
    pub department: Option<i32>,
    pub status: Option<models::AccountStatus>,
}

/// Storage seam of the registry so the service can run against Postgres or in memory.
///
/// Unique constraint violations surface as [`Error::Duplicate`] naming the offending field and
/// updates against missing rows surface as [`Error::NotFound`].
#[async_trait::async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    async fn list_active_departments(&self) -> Result<Vec<models::Department>, Error>;

    async fn create_department(
        &self,
        new_department: models::NewDepartment,
    ) -> Result<models::Department, Error>;

    async fn department_name(&self, department_id: i32) -> Result<Option<String>, Error>;

    async fn department_exists(&self, department_id: i32) -> Result<bool, Error>;

    async fn register_account(&self, new_account: models::NewAccount)
        -> Result<models::Account, Error>;

    /// Creates an administrator and grants it every listed department that exists.
    async fn create_admin(
        &self,
        new_account: models::NewAccount,
        department_ids: &[i32],
    ) -> Result<(models::Account, Vec<i32>), Error>;

    async fn load_account_by_id(&self, account_id: i32) -> Result<Option<models::Account>, Error>;

    /// Case-insensitive match against either the username or the e-mail address.
    async fn load_account_by_login(&self, login: &str) -> Result<Option<models::Account>, Error>;

    async fn load_account_by_email(&self, email: &str) -> Result<Option<models::Account>, Error>;

    async fn load_account_by_activation_token(
        &self,
        token: uuid::Uuid,
    ) -> Result<Option<models::Account>, Error>;

    /// Accounts with the `user` role, newest first.
    async fn list_applicants(&self, filter: &ApplicantFilter)
        -> Result<Vec<models::Account>, Error>;

    async fn update_account(
        &self,
        account_id: i32,
        changes: models::AccountChanges,
    ) -> Result<models::Account, Error>;

    /// Applies an administrator decision and queues its notification in one step.
    ///
    /// A decision that leaves the account declined or blocked also revokes its bearer token.
    async fn record_decision(
        &self,
        account_id: i32,
        changes: models::AccountChanges,
        notification: Option<models::NewNotification>,
    ) -> Result<models::Account, Error>;

    async fn granted_departments(&self, admin_id: i32) -> Result<Vec<i32>, Error>;

    /// Replaces any bearer token the account already has.
    async fn issue_auth_token(&self, account_id: i32, digest: String) -> Result<(), Error>;

    async fn load_account_by_auth_token(
        &self,
        digest: &str,
    ) -> Result<Option<models::Account>, Error>;

    /// Returns whether a token was actually removed.
    async fn revoke_auth_token(&self, account_id: i32) -> Result<bool, Error>;

    async fn create_password_reset(
        &self,
        new_token: models::NewPasswordResetToken,
        notification: models::NewNotification,
    ) -> Result<models::PasswordResetToken, Error>;

    async fn load_password_reset(
        &self,
        token: uuid::Uuid,
    ) -> Result<Option<models::PasswordResetToken>, Error>;

    /// Marks the token used, stores the new password hash and revokes the bearer token.
    ///
    /// Fails with [`Error::NotFound`] when the token was already used.
    async fn complete_password_reset(
        &self,
        token: uuid::Uuid,
        password_hash: String,
    ) -> Result<(), Error>;

    /// Unsent notifications that are due, the longest waiting first.
    async fn list_pending_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<models::Notification>, Error>;

    async fn mark_notification_sent(&self, notification_id: i32) -> Result<(), Error>;

    /// Counts a failed delivery and defers the notification until `next_attempt`.
    async fn record_notification_failure(
        &self,
        notification_id: i32,
        error: String,
        next_attempt: jiff_diesel::Timestamp,
    ) -> Result<(), Error>;
}
