use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    prelude::*,
    serialize::{self, Output, ToSql},
    sql_types::Text,
};

#[derive(thiserror::Error, Debug)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! impl_text_enum {
    {
        Enum $enum_type:ident, Kind $kind:expr; $($variant:ident => $name:expr),+
    } => {
        impl $enum_type {
            pub const ALL: &'static [$enum_type] = &[$($enum_type::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($enum_type::$variant => $name),+
                }
            }
        }

        impl std::str::FromStr for $enum_type {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($name => Ok($enum_type::$variant)),+,
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_owned(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $enum_type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql<Text, Pg> for $enum_type {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $enum_type {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let value = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                value.parse().map_err(Into::into)
            }
        }
    };
}

/// Lifecycle of an applicant account.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, AsExpression, FromSqlRow, serde::Serialize, serde::Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Just registered, waiting for an administrator
    New,
    /// Approved, the applicant is activating the account and entering data
    InProgress,
    /// Documents uploaded, waiting for a decision
    Pending,
    Accepted,
    Declined,
    Blocked,
}

impl_text_enum! {
    Enum AccountStatus, Kind "account status";
    New => "new",
    InProgress => "in_progress",
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
    Blocked => "blocked"
}

impl AccountStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AccountStatus::New => "New",
            AccountStatus::InProgress => "In progress",
            AccountStatus::Pending => "Awaiting decision",
            AccountStatus::Accepted => "Accepted",
            AccountStatus::Declined => "Declined",
            AccountStatus::Blocked => "Blocked",
        }
    }

    /// Declined and blocked accounts may neither sign in nor keep a session.
    pub fn ends_sessions(&self) -> bool {
        matches!(self, AccountStatus::Declined | AccountStatus::Blocked)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, AsExpression, FromSqlRow, serde::Serialize, serde::Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl_text_enum! {
    Enum Role, Kind "role";
    User => "user",
    Admin => "admin",
    Superadmin => "superadmin"
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, AsExpression, FromSqlRow, serde::Serialize, serde::Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Approval,
    Decline,
    PasswordReset,
}

impl_text_enum! {
    Enum NotificationKind, Kind "notification kind";
    Approval => "approval",
    Decline => "decline",
    PasswordReset => "password_reset"
}

#[derive(Clone, Debug, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::tender::department)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Department {
    pub id: i32,
    pub name: String,
    pub code: String,
    pub description: String,
    pub is_active: bool,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = crate::schema::tender::department)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewDepartment {
    pub name: String,
    pub code: String,
    pub description: String,
    pub is_active: bool,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Identifiable, Queryable, Selectable, Associations)]
#[diesel(table_name = crate::schema::tender::account)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(belongs_to(Department))]
pub struct Account {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub company_name: String,
    pub edrpou: String,
    pub legal_address: String,
    pub actual_address: String,
    pub director_name: String,
    pub contact_person: String,
    pub tender_number: Option<String>,
    pub department_id: Option<i32>,
    pub status: AccountStatus,
    pub role: Role,
    pub decline_reason: Option<String>,
    pub is_activated: bool,
    pub activation_token: Option<uuid::Uuid>,
    pub activation_expires: Option<jiff_diesel::Timestamp>,
    pub last_login: Option<jiff_diesel::Timestamp>,
    pub created: jiff_diesel::Timestamp,
    pub updated: jiff_diesel::Timestamp,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Superadmin)
    }

    pub fn is_superadmin(&self) -> bool {
        self.role == Role::Superadmin
    }
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = crate::schema::tender::account)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub company_name: String,
    pub edrpou: String,
    pub legal_address: String,
    pub actual_address: String,
    pub director_name: String,
    pub contact_person: String,
    pub tender_number: Option<String>,
    pub department_id: Option<i32>,
    pub status: AccountStatus,
    pub role: Role,
    pub is_activated: bool,
    pub created: jiff_diesel::Timestamp,
    pub updated: jiff_diesel::Timestamp,
}

/// Partial update of an account - `None` leaves a column untouched, `Some(None)` clears a nullable one.
#[derive(Clone, Debug, Default, AsChangeset)]
#[diesel(table_name = crate::schema::tender::account)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AccountChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<Option<String>>,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub edrpou: Option<String>,
    pub legal_address: Option<String>,
    pub actual_address: Option<String>,
    pub director_name: Option<String>,
    pub contact_person: Option<String>,
    pub department_id: Option<Option<i32>>,
    pub status: Option<AccountStatus>,
    pub decline_reason: Option<Option<String>>,
    pub is_activated: Option<bool>,
    pub activation_token: Option<Option<uuid::Uuid>>,
    pub activation_expires: Option<Option<jiff_diesel::Timestamp>>,
    pub last_login: Option<Option<jiff_diesel::Timestamp>>,
    pub updated: Option<jiff_diesel::Timestamp>,
}

#[derive(Clone, Debug, Identifiable, Queryable, Selectable, Associations)]
#[diesel(table_name = crate::schema::tender::admin_department_access)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(belongs_to(Account, foreign_key = admin_id))]
#[diesel(belongs_to(Department))]
pub struct AdminDepartmentAccess {
    pub id: i32,
    pub admin_id: i32,
    pub department_id: i32,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = crate::schema::tender::admin_department_access)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewAdminDepartmentAccess {
    pub admin_id: i32,
    pub department_id: i32,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Identifiable, Queryable, Selectable, Associations)]
#[diesel(table_name = crate::schema::tender::auth_token)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(belongs_to(Account))]
pub struct AuthToken {
    pub id: i32,
    pub digest: String,
    pub account_id: i32,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = crate::schema::tender::auth_token)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewAuthToken {
    pub digest: String,
    pub account_id: i32,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Identifiable, Queryable, Selectable, Associations)]
#[diesel(table_name = crate::schema::tender::password_reset_token)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(belongs_to(Account))]
pub struct PasswordResetToken {
    pub id: i32,
    pub account_id: i32,
    pub token: uuid::Uuid,
    pub used: bool,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = crate::schema::tender::password_reset_token)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewPasswordResetToken {
    pub account_id: i32,
    pub token: uuid::Uuid,
    pub used: bool,
    pub created: jiff_diesel::Timestamp,
}

#[derive(Clone, Debug, Identifiable, Queryable, Selectable, Associations)]
#[diesel(table_name = crate::schema::tender::notification)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(belongs_to(Account))]
pub struct Notification {
    pub id: i32,
    pub account_id: i32,
    pub kind: NotificationKind,
    pub recipient: String,
    pub tender_number: String,
    pub link: Option<String>,
    pub reason: Option<String>,
    pub created: jiff_diesel::Timestamp,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt: jiff_diesel::Timestamp,
    pub sent: Option<jiff_diesel::Timestamp>,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = crate::schema::tender::notification)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewNotification {
    pub account_id: i32,
    pub kind: NotificationKind,
    pub recipient: String,
    pub tender_number: String,
    pub link: Option<String>,
    pub reason: Option<String>,
    pub created: jiff_diesel::Timestamp,
}
