use diesel::{prelude::*, result::DatabaseErrorKind};
use diesel_async::{
    pooled_connection::{
        mobc::{Builder, Pool},
        AsyncDieselConnectionManager,
    },
    scoped_futures::ScopedFutureExt,
    AsyncConnection, AsyncPgConnection, RunQueryDsl,
};
use std::{sync::Arc, time::Duration};

mod department_cache;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod models;
mod repository;
mod schema;
mod sql_functions;

pub use repository::{ApplicantFilter, Repository};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("getting connection from pool: {0}")]
    GetConnectionPool(#[from] mobc::Error<diesel_async::pooled_connection::PoolError>),
    #[error("result failure: {0}")]
    Result(#[from] diesel::result::Error),
    #[error("duplicate value for {field}")]
    Duplicate { field: &'static str },
    #[error("Other General: {0}")]
    OtherGeneral(String),
    #[error("Not Found")]
    NotFound,
}

/// Current time in the representation stored by the database.
pub fn now() -> jiff_diesel::Timestamp {
    jiff::Timestamp::now().into()
}

pub fn to_jiff(value: jiff_diesel::Timestamp) -> jiff::Timestamp {
    value.to_jiff()
}

pub(crate) fn duplicate_field(constraint: Option<&str>) -> Option<&'static str> {
    match constraint? {
        "account_username_key" => Some("username"),
        "account_email_key" => Some("email"),
        "account_tender_number_key" => Some("tender_number"),
        "department_code_key" => Some("code"),
        _ => None,
    }
}

fn classify(err: diesel::result::Error) -> Error {
    if let diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) = &err {
        if let Some(field) = duplicate_field(info.constraint_name()) {
            return Error::Duplicate { field };
        }
    }
    match err {
        diesel::result::Error::NotFound => Error::NotFound,
        err => Error::Result(err),
    }
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: Pool<AsyncPgConnection>,
    department_names: Arc<department_cache::DepartmentNames>,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    db_url: String,
    max_open: u64,
    max_idle: u64,
    #[serde(with = "humantime_serde", default)]
    max_lifetime: Option<Duration>,
    #[serde(with = "humantime_serde", default)]
    max_idle_lifetime: Option<Duration>,
    #[serde(with = "humantime_serde")]
    timeout_for_get: Duration,
}

pub async fn create(config: &Config) -> Result<Store, Error> {
    let pool = create_pool(config);
    let department_names = create_department_names(pool.clone()).await?;
    Ok(Store {
        pool,
        department_names: Arc::new(department_names),
    })
}

fn create_pool(config: &Config) -> mobc::Pool<AsyncDieselConnectionManager<AsyncPgConnection>> {
    let builder = Builder::new()
        .max_open(config.max_open)
        .max_idle(config.max_idle)
        .max_lifetime(
            config
                .max_lifetime
                .map(|v| v.max(Duration::from_secs(3600))),
        )
        .max_idle_lifetime(
            config
                .max_idle_lifetime
                .map(|v| v.max(Duration::from_secs(900))),
        )
        .get_timeout(Some(config.timeout_for_get.max(Duration::from_secs(5))));
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.db_url);
    builder.build(manager)
}

async fn create_department_names(
    pool: mobc::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>,
) -> Result<department_cache::DepartmentNames, Error> {
    let mut conn = pool.get().await?;
    let names = department_cache::DepartmentNames::new();
    names.populate(department_cache::DepartmentNames::load_from_db(&mut conn).await?);
    Ok(names)
}

/// Rejects a username that is another account's e-mail address and vice versa.
///
/// Same-column collisions are left to the `lower()` unique indexes.
async fn check_login_collision(
    conn: &mut AsyncPgConnection,
    skip_id: Option<i32>,
    username: Option<&str>,
    email: Option<&str>,
) -> Result<(), Error> {
    use schema::tender::account;
    use sql_functions::lower;
    if let Some(username) = username {
        let holders = account::table
            .filter(lower(account::email).eq(lower(username)))
            .select(account::id)
            .load::<i32>(conn)
            .await?;
        if holders.iter().any(|&id| Some(id) != skip_id) {
            return Err(Error::Duplicate { field: "username" });
        }
    }
    if let Some(email) = email {
        let holders = account::table
            .filter(lower(account::username).eq(lower(email)))
            .select(account::id)
            .load::<i32>(conn)
            .await?;
        if holders.iter().any(|&id| Some(id) != skip_id) {
            return Err(Error::Duplicate { field: "email" });
        }
    }
    Ok(())
}

impl Store {
    async fn connection(
        &self,
    ) -> Result<mobc::Connection<AsyncDieselConnectionManager<AsyncPgConnection>>, Error> {
        self.pool.get().await.map_err(Into::into)
    }

    async fn refresh_department_names(
        &self,
        conn: &mut mobc::Connection<AsyncDieselConnectionManager<AsyncPgConnection>>,
    ) -> Result<(), Error> {
        self.department_names
            .populate(department_cache::DepartmentNames::load_from_db(conn).await?);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Repository for Store {
    #[tracing::instrument(skip(self))]
    async fn list_active_departments(&self) -> Result<Vec<models::Department>, Error> {
        use schema::tender::department;
        let mut conn = self.connection().await?;
        let departments = department::table
            .filter(department::is_active.eq(true))
            .order((department::name.asc(), department::id.asc()))
            .select(models::Department::as_select())
            .load(&mut conn)
            .await?;
        Ok(departments)
    }

    #[tracing::instrument(skip(self))]
    async fn create_department(
        &self,
        new_department: models::NewDepartment,
    ) -> Result<models::Department, Error> {
        use schema::tender::department;
        let mut conn = self.connection().await?;
        let created = diesel::insert_into(department::table)
            .values(new_department)
            .returning(models::Department::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(classify)?;
        self.refresh_department_names(&mut conn).await?;
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn department_name(&self, department_id: i32) -> Result<Option<String>, Error> {
        if let Some(name) = self.department_names.name_of(department_id) {
            return Ok(Some(name));
        }
        use schema::tender::department;
        let mut conn = self.connection().await?;
        let name = department::table
            .find(department_id)
            .select(department::name)
            .first::<String>(&mut conn)
            .await
            .optional()?;
        if let Some(name) = &name {
            self.department_names.insert(department_id, name.clone());
        }
        Ok(name)
    }

    #[tracing::instrument(skip(self))]
    async fn department_exists(&self, department_id: i32) -> Result<bool, Error> {
        use schema::tender::department;
        if self.department_names.name_of(department_id).is_some() {
            return Ok(true);
        }
        let mut conn = self.connection().await?;
        Ok(
            diesel::select(diesel::dsl::exists(department::table.find(department_id)))
                .get_result::<bool>(&mut conn)
                .await?,
        )
    }

    #[tracing::instrument(skip(self, new_account), fields(username = %new_account.username))]
    async fn register_account(
        &self,
        new_account: models::NewAccount,
    ) -> Result<models::Account, Error> {
        self.connection()
            .await?
            .transaction(|conn| {
                use schema::tender::account;
                async move {
                    check_login_collision(
                        conn,
                        None,
                        Some(new_account.username.as_str()),
                        Some(new_account.email.as_str()),
                    )
                    .await?;
                    diesel::insert_into(account::table)
                        .values(new_account)
                        .returning(models::Account::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(classify)
                }
                .scope_boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self, new_account), fields(username = %new_account.username))]
    async fn create_admin(
        &self,
        new_account: models::NewAccount,
        department_ids: &[i32],
    ) -> Result<(models::Account, Vec<i32>), Error> {
        let now = now();
        let department_ids = department_ids.to_vec();
        self.connection()
            .await?
            .transaction(|conn| {
                use schema::tender::{account, admin_department_access, department};
                async move {
                    check_login_collision(
                        conn,
                        None,
                        Some(new_account.username.as_str()),
                        Some(new_account.email.as_str()),
                    )
                    .await?;
                    let admin = diesel::insert_into(account::table)
                        .values(new_account)
                        .returning(models::Account::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(classify)?;
                    let existing = department::table
                        .filter(department::id.eq_any(department_ids))
                        .order(department::id.asc())
                        .select(department::id)
                        .load::<i32>(conn)
                        .await?;
                    let grants = existing
                        .iter()
                        .map(|&department_id| models::NewAdminDepartmentAccess {
                            admin_id: admin.id,
                            department_id,
                            created: now,
                        })
                        .collect::<Vec<_>>();
                    if !grants.is_empty() {
                        diesel::insert_into(admin_department_access::table)
                            .values(grants)
                            .on_conflict_do_nothing()
                            .execute(conn)
                            .await?;
                    }
                    Ok::<_, Error>((admin, existing))
                }
                .scope_boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn load_account_by_id(&self, account_id: i32) -> Result<Option<models::Account>, Error> {
        use schema::tender::account;
        let mut conn = self.connection().await?;
        match account::table
            .find(account_id)
            .select(models::Account::as_select())
            .first(&mut conn)
            .await
        {
            Ok(loaded) => Ok(Some(loaded)),
            Err(diesel::result::Error::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn load_account_by_login(&self, login: &str) -> Result<Option<models::Account>, Error> {
        use schema::tender::account;
        use sql_functions::lower;
        let mut conn = self.connection().await?;
        match account::table
            .filter(
                lower(account::username)
                    .eq(lower(login))
                    .or(lower(account::email).eq(lower(login))),
            )
            .order(account::id.asc())
            .select(models::Account::as_select())
            .first(&mut conn)
            .await
        {
            Ok(loaded) => Ok(Some(loaded)),
            Err(diesel::result::Error::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn load_account_by_email(&self, email: &str) -> Result<Option<models::Account>, Error> {
        use schema::tender::account;
        use sql_functions::lower;
        let mut conn = self.connection().await?;
        Ok(account::table
            .filter(lower(account::email).eq(lower(email)))
            .select(models::Account::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    #[tracing::instrument(skip(self, token))]
    async fn load_account_by_activation_token(
        &self,
        token: uuid::Uuid,
    ) -> Result<Option<models::Account>, Error> {
        use schema::tender::account;
        let mut conn = self.connection().await?;
        Ok(account::table
            .filter(account::activation_token.eq(token))
            .select(models::Account::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    #[tracing::instrument(skip(self))]
    async fn list_applicants(
        &self,
        filter: &ApplicantFilter,
    ) -> Result<Vec<models::Account>, Error> {
        use schema::tender::account;
        let mut conn = self.connection().await?;
        let mut query = account::table
            .select(models::Account::as_select())
            .filter(account::role.eq(models::Role::User))
            .into_boxed();
        if let Some(department_ids) = &filter.department_ids {
            query = query.filter(account::department_id.eq_any(department_ids.clone()));
        }
        if let Some(department_id) = filter.department {
            query = query.filter(account::department_id.eq(department_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(account::status.eq(status));
        }
        let accounts: Vec<models::Account> = query
            .order((account::created.desc(), account::id.desc()))
            .load(&mut conn)
            .await?;
        Ok(accounts)
    }

    #[tracing::instrument(skip(self, changes))]
    async fn update_account(
        &self,
        account_id: i32,
        mut changes: models::AccountChanges,
    ) -> Result<models::Account, Error> {
        changes.updated = Some(now());
        self.connection()
            .await?
            .transaction(move |conn| {
                use schema::tender::account;
                async move {
                    check_login_collision(
                        conn,
                        Some(account_id),
                        changes.username.as_deref(),
                        changes.email.as_deref(),
                    )
                    .await?;
                    diesel::update(account::table.find(account_id))
                        .set(changes)
                        .returning(models::Account::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(classify)
                }
                .scope_boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self, changes, notification))]
    async fn record_decision(
        &self,
        account_id: i32,
        mut changes: models::AccountChanges,
        notification: Option<models::NewNotification>,
    ) -> Result<models::Account, Error> {
        changes.updated = Some(now());
        self.connection()
            .await?
            .transaction(move |conn| {
                use schema::tender::{account, auth_token, notification as outbox};
                async move {
                    let updated = diesel::update(account::table.find(account_id))
                        .set(changes)
                        .returning(models::Account::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(classify)?;
                    if updated.status.ends_sessions() {
                        diesel::delete(
                            auth_token::table.filter(auth_token::account_id.eq(account_id)),
                        )
                        .execute(conn)
                        .await?;
                    }
                    if let Some(notification) = notification {
                        diesel::insert_into(outbox::table)
                            .values(notification)
                            .execute(conn)
                            .await?;
                    }
                    Ok::<_, Error>(updated)
                }
                .scope_boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn granted_departments(&self, admin_id: i32) -> Result<Vec<i32>, Error> {
        use schema::tender::admin_department_access as access;
        let mut conn = self.connection().await?;
        let department_ids = access::table
            .filter(access::admin_id.eq(admin_id))
            .order(access::department_id.asc())
            .select(access::department_id)
            .load::<i32>(&mut conn)
            .await?;
        Ok(department_ids)
    }

    #[tracing::instrument(skip(self, digest))]
    async fn issue_auth_token(&self, account_id: i32, digest: String) -> Result<(), Error> {
        use schema::tender::auth_token;
        let new_token = models::NewAuthToken {
            digest,
            account_id,
            created: now(),
        };
        let mut conn = self.connection().await?;
        diesel::insert_into(auth_token::table)
            .values(&new_token)
            .on_conflict(auth_token::account_id)
            .do_update()
            .set((
                auth_token::digest.eq(&new_token.digest),
                auth_token::created.eq(new_token.created),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, digest))]
    async fn load_account_by_auth_token(
        &self,
        digest: &str,
    ) -> Result<Option<models::Account>, Error> {
        use schema::tender::{account, auth_token};
        let mut conn = self.connection().await?;
        Ok(auth_token::table
            .inner_join(account::table)
            .filter(auth_token::digest.eq(digest))
            .select(models::Account::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    #[tracing::instrument(skip(self))]
    async fn revoke_auth_token(&self, account_id: i32) -> Result<bool, Error> {
        use schema::tender::auth_token;
        let mut conn = self.connection().await?;
        let deleted = diesel::delete(auth_token::table.filter(auth_token::account_id.eq(account_id)))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    #[tracing::instrument(skip(self, new_token, notification), fields(account_id = new_token.account_id))]
    async fn create_password_reset(
        &self,
        new_token: models::NewPasswordResetToken,
        notification: models::NewNotification,
    ) -> Result<models::PasswordResetToken, Error> {
        self.connection()
            .await?
            .transaction(move |conn| {
                use schema::tender::{notification as outbox, password_reset_token};
                async move {
                    let created = diesel::insert_into(password_reset_token::table)
                        .values(new_token)
                        .returning(models::PasswordResetToken::as_returning())
                        .get_result(conn)
                        .await?;
                    diesel::insert_into(outbox::table)
                        .values(notification)
                        .execute(conn)
                        .await?;
                    Ok::<_, Error>(created)
                }
                .scope_boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self, token))]
    async fn load_password_reset(
        &self,
        token: uuid::Uuid,
    ) -> Result<Option<models::PasswordResetToken>, Error> {
        use schema::tender::password_reset_token;
        let mut conn = self.connection().await?;
        Ok(password_reset_token::table
            .filter(password_reset_token::token.eq(token))
            .select(models::PasswordResetToken::as_select())
            .first(&mut conn)
            .await
            .optional()?)
    }

    #[tracing::instrument(skip(self, token, password_hash))]
    async fn complete_password_reset(
        &self,
        token: uuid::Uuid,
        password_hash: String,
    ) -> Result<(), Error> {
        let now = now();
        self.connection()
            .await?
            .transaction(move |conn| {
                use schema::tender::{account, auth_token, password_reset_token as reset};
                async move {
                    let account_id = diesel::update(
                        reset::table.filter(reset::token.eq(token).and(reset::used.eq(false))),
                    )
                    .set(reset::used.eq(true))
                    .returning(reset::account_id)
                    .get_result::<i32>(conn)
                    .await
                    .map_err(classify)?;
                    diesel::update(account::table.find(account_id))
                        .set((
                            account::password_hash.eq(Some(password_hash)),
                            account::updated.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                    diesel::delete(auth_token::table.filter(auth_token::account_id.eq(account_id)))
                        .execute(conn)
                        .await?;
                    Ok::<_, Error>(())
                }
                .scope_boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_pending_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<models::Notification>, Error> {
        use schema::tender::notification;
        let due = now();
        let mut conn = self.connection().await?;
        let pending = notification::table
            .filter(notification::sent.is_null())
            .filter(notification::next_attempt.le(due))
            .order((notification::next_attempt.asc(), notification::id.asc()))
            .limit(limit)
            .select(models::Notification::as_select())
            .load(&mut conn)
            .await?;
        Ok(pending)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_notification_sent(&self, notification_id: i32) -> Result<(), Error> {
        use schema::tender::notification;
        let mut conn = self.connection().await?;
        match diesel::update(
            notification::table.filter(
                notification::id
                    .eq(notification_id)
                    .and(notification::sent.is_null()),
            ),
        )
        .set(notification::sent.eq(Some(now())))
        .execute(&mut conn)
        .await
        {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self, error))]
    async fn record_notification_failure(
        &self,
        notification_id: i32,
        error: String,
        next_attempt: jiff_diesel::Timestamp,
    ) -> Result<(), Error> {
        use schema::tender::notification;
        let mut conn = self.connection().await?;
        match diesel::update(
            notification::table.filter(
                notification::id
                    .eq(notification_id)
                    .and(notification::sent.is_null()),
            ),
        )
        .set((
            notification::attempts.eq(notification::attempts + 1),
            notification::last_error.eq(Some(error)),
            notification::next_attempt.eq(next_attempt),
        ))
        .execute(&mut conn)
        .await
        {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
