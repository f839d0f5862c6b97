//! In-process [`Repository`] keeping every table in a mutex-guarded set of vectors.
//!
//! Enforces the same unique constraints as the Postgres schema, so service tests observe the
//! same duplicate and not-found errors.

use std::sync::{Mutex, MutexGuard};

use crate::{models, now, ApplicantFilter, Error, Repository};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    departments: Vec<models::Department>,
    accounts: Vec<models::Account>,
    grants: Vec<models::AdminDepartmentAccess>,
    auth_tokens: Vec<models::AuthToken>,
    password_resets: Vec<models::PasswordResetToken>,
    notifications: Vec<models::Notification>,
    next_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_account_unique(
        &self,
        skip_id: Option<i32>,
        username: Option<&str>,
        email: Option<&str>,
        tender_number: Option<&str>,
    ) -> Result<(), Error> {
        let username = username.map(str::to_lowercase);
        let email = email.map(str::to_lowercase);
        let others = self.accounts.iter().filter(|a| Some(a.id) != skip_id);
        for other in others {
            if tender_number.is_some() && other.tender_number.as_deref() == tender_number {
                return Err(Error::Duplicate {
                    field: "tender_number",
                });
            }
            let logins = [other.username.to_lowercase(), other.email.to_lowercase()];
            if username.as_ref().is_some_and(|v| logins.contains(v)) {
                return Err(Error::Duplicate { field: "username" });
            }
            if email.as_ref().is_some_and(|v| logins.contains(v)) {
                return Err(Error::Duplicate { field: "email" });
            }
        }
        Ok(())
    }

    fn insert_account(&mut self, new_account: models::NewAccount) -> Result<models::Account, Error> {
        self.check_account_unique(
            None,
            Some(new_account.username.as_str()),
            Some(new_account.email.as_str()),
            new_account.tender_number.as_deref(),
        )?;
        let account = models::Account {
            id: self.next_id(),
            username: new_account.username,
            email: new_account.email,
            password_hash: new_account.password_hash,
            first_name: new_account.first_name,
            last_name: new_account.last_name,
            phone: new_account.phone,
            company_name: new_account.company_name,
            edrpou: new_account.edrpou,
            legal_address: new_account.legal_address,
            actual_address: new_account.actual_address,
            director_name: new_account.director_name,
            contact_person: new_account.contact_person,
            tender_number: new_account.tender_number,
            department_id: new_account.department_id,
            status: new_account.status,
            role: new_account.role,
            decline_reason: None,
            is_activated: new_account.is_activated,
            activation_token: None,
            activation_expires: None,
            last_login: None,
            created: new_account.created,
            updated: new_account.updated,
        };
        self.accounts.push(account.clone());
        Ok(account)
    }

    fn apply_changes(
        &mut self,
        account_id: i32,
        changes: models::AccountChanges,
    ) -> Result<models::Account, Error> {
        self.check_account_unique(
            Some(account_id),
            changes.username.as_deref(),
            changes.email.as_deref(),
            None,
        )?;
        let account = self
            .accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or(Error::NotFound)?;
        let models::AccountChanges {
            username,
            email,
            password_hash,
            phone,
            company_name,
            edrpou,
            legal_address,
            actual_address,
            director_name,
            contact_person,
            department_id,
            status,
            decline_reason,
            is_activated,
            activation_token,
            activation_expires,
            last_login,
            updated,
        } = changes;
        macro_rules! assign {
            ($($field:ident),+) => {
                $(if let Some(value) = $field {
                    account.$field = value;
                })+
            };
        }
        assign!(
            username,
            email,
            password_hash,
            phone,
            company_name,
            edrpou,
            legal_address,
            actual_address,
            director_name,
            contact_person,
            department_id,
            status,
            decline_reason,
            is_activated,
            activation_token,
            activation_expires,
            last_login
        );
        account.updated = updated.unwrap_or_else(now);
        Ok(account.clone())
    }

    fn insert_notification(&mut self, new_notification: models::NewNotification) {
        let id = self.next_id();
        self.notifications.push(models::Notification {
            id,
            account_id: new_notification.account_id,
            kind: new_notification.kind,
            recipient: new_notification.recipient,
            tender_number: new_notification.tender_number,
            link: new_notification.link,
            reason: new_notification.reason,
            created: new_notification.created,
            attempts: 0,
            last_error: None,
            next_attempt: new_notification.created,
            sent: None,
        });
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, Error> {
        self.tables
            .lock()
            .map_err(|err| Error::OtherGeneral(format!("memory store poisoned: {err}")))
    }

    /// Every notification ever queued, sent or not.
    pub fn notifications(&self) -> Result<Vec<models::Notification>, Error> {
        Ok(self.tables()?.notifications.clone())
    }
}

#[async_trait::async_trait]
impl Repository for MemoryStore {
    async fn list_active_departments(&self) -> Result<Vec<models::Department>, Error> {
        let mut departments = self
            .tables()?
            .departments
            .iter()
            .filter(|d| d.is_active)
            .cloned()
            .collect::<Vec<_>>();
        departments.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(departments)
    }

    async fn create_department(
        &self,
        new_department: models::NewDepartment,
    ) -> Result<models::Department, Error> {
        let mut tables = self.tables()?;
        if tables
            .departments
            .iter()
            .any(|d| d.code == new_department.code)
        {
            return Err(Error::Duplicate { field: "code" });
        }
        let department = models::Department {
            id: tables.next_id(),
            name: new_department.name,
            code: new_department.code,
            description: new_department.description,
            is_active: new_department.is_active,
            created: new_department.created,
        };
        tables.departments.push(department.clone());
        Ok(department)
    }

    async fn department_name(&self, department_id: i32) -> Result<Option<String>, Error> {
        Ok(self
            .tables()?
            .departments
            .iter()
            .find(|d| d.id == department_id)
            .map(|d| d.name.clone()))
    }

    async fn department_exists(&self, department_id: i32) -> Result<bool, Error> {
        Ok(self
            .tables()?
            .departments
            .iter()
            .any(|d| d.id == department_id))
    }

    async fn register_account(
        &self,
        new_account: models::NewAccount,
    ) -> Result<models::Account, Error> {
        self.tables()?.insert_account(new_account)
    }

    async fn create_admin(
        &self,
        new_account: models::NewAccount,
        department_ids: &[i32],
    ) -> Result<(models::Account, Vec<i32>), Error> {
        let mut tables = self.tables()?;
        let admin = tables.insert_account(new_account)?;
        let mut granted = tables
            .departments
            .iter()
            .map(|d| d.id)
            .filter(|id| department_ids.contains(id))
            .collect::<Vec<_>>();
        granted.sort_unstable();
        for &department_id in &granted {
            let id = tables.next_id();
            tables.grants.push(models::AdminDepartmentAccess {
                id,
                admin_id: admin.id,
                department_id,
                created: admin.created,
            });
        }
        Ok((admin, granted))
    }

    async fn load_account_by_id(&self, account_id: i32) -> Result<Option<models::Account>, Error> {
        Ok(self
            .tables()?
            .accounts
            .iter()
            .find(|a| a.id == account_id)
            .cloned())
    }

    async fn load_account_by_login(&self, login: &str) -> Result<Option<models::Account>, Error> {
        let login = login.to_lowercase();
        Ok(self
            .tables()?
            .accounts
            .iter()
            .find(|a| a.username.to_lowercase() == login || a.email.to_lowercase() == login)
            .cloned())
    }

    async fn load_account_by_email(&self, email: &str) -> Result<Option<models::Account>, Error> {
        let email = email.to_lowercase();
        Ok(self
            .tables()?
            .accounts
            .iter()
            .find(|a| a.email.to_lowercase() == email)
            .cloned())
    }

    async fn load_account_by_activation_token(
        &self,
        token: uuid::Uuid,
    ) -> Result<Option<models::Account>, Error> {
        Ok(self
            .tables()?
            .accounts
            .iter()
            .find(|a| a.activation_token == Some(token))
            .cloned())
    }

    async fn list_applicants(
        &self,
        filter: &ApplicantFilter,
    ) -> Result<Vec<models::Account>, Error> {
        let mut accounts = self
            .tables()?
            .accounts
            .iter()
            .filter(|a| a.role == models::Role::User)
            .filter(|a| match &filter.department_ids {
                Some(ids) => a.department_id.is_some_and(|id| ids.contains(&id)),
                None => true,
            })
            .filter(|a| filter.department.is_none() || a.department_id == filter.department)
            .filter(|a| filter.status.is_none_or(|status| a.status == status))
            .cloned()
            .collect::<Vec<_>>();
        accounts.sort_by(|a, b| {
            b.created
                .to_jiff()
                .cmp(&a.created.to_jiff())
                .then(b.id.cmp(&a.id))
        });
        Ok(accounts)
    }

    async fn update_account(
        &self,
        account_id: i32,
        changes: models::AccountChanges,
    ) -> Result<models::Account, Error> {
        self.tables()?.apply_changes(account_id, changes)
    }

    async fn record_decision(
        &self,
        account_id: i32,
        changes: models::AccountChanges,
        notification: Option<models::NewNotification>,
    ) -> Result<models::Account, Error> {
        let mut tables = self.tables()?;
        let updated = tables.apply_changes(account_id, changes)?;
        if updated.status.ends_sessions() {
            tables.auth_tokens.retain(|t| t.account_id != account_id);
        }
        if let Some(notification) = notification {
            tables.insert_notification(notification);
        }
        Ok(updated)
    }

    async fn granted_departments(&self, admin_id: i32) -> Result<Vec<i32>, Error> {
        let mut granted = self
            .tables()?
            .grants
            .iter()
            .filter(|g| g.admin_id == admin_id)
            .map(|g| g.department_id)
            .collect::<Vec<_>>();
        granted.sort_unstable();
        Ok(granted)
    }

    async fn issue_auth_token(&self, account_id: i32, digest: String) -> Result<(), Error> {
        let mut tables = self.tables()?;
        tables.auth_tokens.retain(|t| t.account_id != account_id);
        let id = tables.next_id();
        tables.auth_tokens.push(models::AuthToken {
            id,
            digest,
            account_id,
            created: now(),
        });
        Ok(())
    }

    async fn load_account_by_auth_token(
        &self,
        digest: &str,
    ) -> Result<Option<models::Account>, Error> {
        let tables = self.tables()?;
        Ok(tables
            .auth_tokens
            .iter()
            .find(|t| t.digest == digest)
            .and_then(|t| tables.accounts.iter().find(|a| a.id == t.account_id))
            .cloned())
    }

    async fn revoke_auth_token(&self, account_id: i32) -> Result<bool, Error> {
        let mut tables = self.tables()?;
        let before = tables.auth_tokens.len();
        tables.auth_tokens.retain(|t| t.account_id != account_id);
        Ok(tables.auth_tokens.len() < before)
    }

    async fn create_password_reset(
        &self,
        new_token: models::NewPasswordResetToken,
        notification: models::NewNotification,
    ) -> Result<models::PasswordResetToken, Error> {
        let mut tables = self.tables()?;
        if tables
            .password_resets
            .iter()
            .any(|t| t.token == new_token.token)
        {
            return Err(Error::Duplicate { field: "token" });
        }
        let token = models::PasswordResetToken {
            id: tables.next_id(),
            account_id: new_token.account_id,
            token: new_token.token,
            used: new_token.used,
            created: new_token.created,
        };
        tables.password_resets.push(token.clone());
        tables.insert_notification(notification);
        Ok(token)
    }

    async fn load_password_reset(
        &self,
        token: uuid::Uuid,
    ) -> Result<Option<models::PasswordResetToken>, Error> {
        Ok(self
            .tables()?
            .password_resets
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn complete_password_reset(
        &self,
        token: uuid::Uuid,
        password_hash: String,
    ) -> Result<(), Error> {
        let mut tables = self.tables()?;
        let reset = tables
            .password_resets
            .iter_mut()
            .find(|t| t.token == token && !t.used)
            .ok_or(Error::NotFound)?;
        reset.used = true;
        let account_id = reset.account_id;
        tables.apply_changes(
            account_id,
            models::AccountChanges {
                password_hash: Some(Some(password_hash)),
                ..Default::default()
            },
        )?;
        tables.auth_tokens.retain(|t| t.account_id != account_id);
        Ok(())
    }

    async fn list_pending_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<models::Notification>, Error> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let due = jiff::Timestamp::now();
        let mut pending = self
            .tables()?
            .notifications
            .iter()
            .filter(|n| n.sent.is_none() && n.next_attempt.to_jiff() <= due)
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by(|a, b| {
            a.next_attempt
                .to_jiff()
                .cmp(&b.next_attempt.to_jiff())
                .then(a.id.cmp(&b.id))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_notification_sent(&self, notification_id: i32) -> Result<(), Error> {
        let mut tables = self.tables()?;
        let notification = tables
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.sent.is_none())
            .ok_or(Error::NotFound)?;
        notification.sent = Some(now());
        Ok(())
    }

    async fn record_notification_failure(
        &self,
        notification_id: i32,
        error: String,
        next_attempt: jiff_diesel::Timestamp,
    ) -> Result<(), Error> {
        let mut tables = self.tables()?;
        let notification = tables
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.sent.is_none())
            .ok_or(Error::NotFound)?;
        notification.attempts += 1;
        notification.last_error = Some(error);
        notification.next_attempt = next_attempt;
        Ok(())
    }
}
