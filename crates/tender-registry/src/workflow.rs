//! Who may see or review which accounts, and how an account's status may move.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tender_db::{
    models::{self, AccountStatus, Role},
    ApplicantFilter, Repository,
};

use crate::{error::ApiError, login::Principal, views::AccountView, AppState};

/// The accounts a principal is allowed to work with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessScope {
    Everything,
    Departments { admin_id: i32, department_ids: Vec<i32> },
    OwnAccount(i32),
}

pub async fn resolve_scope(
    store: &dyn Repository,
    principal: &models::Account,
) -> Result<AccessScope, tender_db::Error> {
    Ok(match principal.role {
        Role::Superadmin => AccessScope::Everything,
        Role::Admin => AccessScope::Departments {
            admin_id: principal.id,
            department_ids: store.granted_departments(principal.id).await?,
        },
        Role::User => AccessScope::OwnAccount(principal.id),
    })
}

impl AccessScope {
    fn grants(&self, department_id: Option<i32>) -> bool {
        match self {
            AccessScope::Everything => true,
            AccessScope::Departments { department_ids, .. } => {
                department_id.is_some_and(|id| department_ids.contains(&id))
            }
            AccessScope::OwnAccount(_) => false,
        }
    }

    pub fn can_view(&self, account: &models::Account) -> bool {
        match self {
            AccessScope::Departments { admin_id, .. } if *admin_id == account.id => true,
            AccessScope::OwnAccount(id) => *id == account.id,
            scope => scope.grants(account.department_id),
        }
    }

    pub fn can_review(&self, account: &models::Account) -> bool {
        self.grants(account.department_id)
    }

    /// Whether an account may be placed into the department.
    pub fn can_assign(&self, department_id: Option<i32>) -> bool {
        self.grants(department_id)
    }

    /// `None` when the principal sees no applicants at all.
    pub fn applicant_filter(
        &self,
        department: Option<i32>,
        status: Option<AccountStatus>,
    ) -> Option<ApplicantFilter> {
        let department_ids = match self {
            AccessScope::Everything => None,
            AccessScope::Departments { department_ids, .. } => Some(department_ids.clone()),
            AccessScope::OwnAccount(_) => return None,
        };
        Some(ApplicantFilter {
            department_ids,
            department,
            status,
        })
    }
}

/// Whether a status change is permitted. Staying put is always allowed.
pub fn allows(from: AccountStatus, to: AccountStatus) -> bool {
    use AccountStatus::*;
    if from == to {
        return true;
    }
    match from {
        New => matches!(to, InProgress | Declined | Blocked),
        InProgress => matches!(to, Pending | Declined | Blocked),
        Pending => matches!(to, InProgress | Accepted | Declined | Blocked),
        Accepted | Declined => to == Blocked,
        Blocked => false,
    }
}

pub fn check_transition(from: AccountStatus, to: AccountStatus) -> Result<(), ApiError> {
    if allows(from, to) {
        Ok(())
    } else {
        Err(ApiError::invalid(
            "status",
            format!("cannot change status from {from} to {to}"),
        ))
    }
}

/// Status changes made through the detail update.
///
/// Only the document review outcomes are set this way; approval, decline and block carry side
/// effects and have their own actions.
pub fn check_review_update(from: AccountStatus, to: AccountStatus) -> Result<(), ApiError> {
    check_transition(from, to)?;
    match to {
        _ if from == to => Ok(()),
        AccountStatus::Pending | AccountStatus::Accepted => Ok(()),
        AccountStatus::InProgress => Err(ApiError::invalid(
            "status",
            "use the approve action to move an account to in_progress",
        )),
        AccountStatus::Declined => Err(ApiError::invalid(
            "status",
            "use the decline action to decline an account",
        )),
        AccountStatus::Blocked => Err(ApiError::invalid(
            "status",
            "use the block action to block an account",
        )),
        AccountStatus::New => Err(ApiError::invalid(
            "status",
            format!("cannot change status from {from} to {to}"),
        )),
    }
}

/// Loads an applicant the principal is entitled to review.
async fn review_target(
    state: &AppState,
    principal: &models::Account,
    account_id: i32,
) -> Result<models::Account, ApiError> {
    if !principal.is_admin() {
        return Err(ApiError::Forbidden("administrator role required"));
    }
    let target = state
        .store
        .load_account_by_id(account_id)
        .await?
        .filter(|account| account.role == Role::User)
        .ok_or(ApiError::NotFound("user not found"))?;
    let scope = resolve_scope(state.store.as_ref(), principal).await?;
    if !scope.can_review(&target) {
        tracing::info!(
            principal_id = principal.id,
            account_id,
            "Review refused, department not granted"
        );
        return Err(ApiError::Forbidden("no access to this department"));
    }
    Ok(target)
}

fn tender_number_of(account: &models::Account) -> String {
    account
        .tender_number
        .clone()
        .unwrap_or_else(|| account.username.clone())
}

async fn respond(
    state: &AppState,
    message: &str,
    account: models::Account,
) -> Result<Json<Value>, ApiError> {
    let user = AccountView::load(state.store.as_ref(), account).await?;
    Ok(Json(json!({ "message": message, "user": user })))
}

pub mod approve {
    use super::*;

    #[tracing::instrument(skip(state, principal))]
    pub async fn post(
        State(state): State<AppState>,
        Principal(principal): Principal,
        Path(account_id): Path<i32>,
    ) -> Result<Json<Value>, ApiError> {
        let target = review_target(&state, &principal, account_id).await?;
        check_transition(target.status, AccountStatus::InProgress)?;
        let secret = uuid::Uuid::new_v4();
        let expires = jiff::Timestamp::now().checked_add(state.settings.activation_validity)?;
        let stamp = tender_db::now();
        let notification = models::NewNotification {
            account_id: target.id,
            kind: models::NotificationKind::Approval,
            recipient: target.email.clone(),
            tender_number: tender_number_of(&target),
            link: Some(state.settings.link("activate", &secret)),
            reason: None,
            created: stamp,
        };
        let account = state
            .store
            .record_decision(
                target.id,
                models::AccountChanges {
                    status: Some(AccountStatus::InProgress),
                    activation_token: Some(Some(secret)),
                    activation_expires: Some(Some(expires.into())),
                    decline_reason: Some(None),
                    updated: Some(stamp),
                    ..Default::default()
                },
                Some(notification),
            )
            .await?;
        tracing::info!(
            principal_id = principal.id,
            account_id,
            "Approved applicant, activation link queued"
        );
        respond(&state, "user approved", account).await
    }
}

pub mod decline {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(default)]
    pub struct Decline {
        reason: Option<String>,
    }

    #[tracing::instrument(skip(state, principal, body))]
    pub async fn post(
        State(state): State<AppState>,
        Principal(principal): Principal,
        Path(account_id): Path<i32>,
        body: Bytes,
    ) -> Result<Json<Value>, ApiError> {
        let Decline { reason } = if body.iter().all(u8::is_ascii_whitespace) {
            Decline::default()
        } else {
            serde_json::from_slice(&body)
                .map_err(|err| ApiError::invalid("non_field_errors", err.to_string()))?
        };
        let reason = reason
            .map(|reason| reason.trim().to_owned())
            .filter(|reason| !reason.is_empty());
        let target = review_target(&state, &principal, account_id).await?;
        check_transition(target.status, AccountStatus::Declined)?;
        let stamp = tender_db::now();
        let notification = models::NewNotification {
            account_id: target.id,
            kind: models::NotificationKind::Decline,
            recipient: target.email.clone(),
            tender_number: tender_number_of(&target),
            link: None,
            reason: reason.clone(),
            created: stamp,
        };
        let account = state
            .store
            .record_decision(
                target.id,
                models::AccountChanges {
                    status: Some(AccountStatus::Declined),
                    decline_reason: Some(reason),
                    activation_token: Some(None),
                    activation_expires: Some(None),
                    updated: Some(stamp),
                    ..Default::default()
                },
                Some(notification),
            )
            .await?;
        tracing::info!(principal_id = principal.id, account_id, "Declined applicant");
        respond(&state, "user declined", account).await
    }
}

pub mod block {
    use super::*;

    #[tracing::instrument(skip(state, principal))]
    pub async fn post(
        State(state): State<AppState>,
        Principal(principal): Principal,
        Path(account_id): Path<i32>,
    ) -> Result<Json<Value>, ApiError> {
        let target = review_target(&state, &principal, account_id).await?;
        check_transition(target.status, AccountStatus::Blocked)?;
        let account = state
            .store
            .record_decision(
                target.id,
                models::AccountChanges {
                    status: Some(AccountStatus::Blocked),
                    activation_token: Some(None),
                    activation_expires: Some(None),
                    updated: Some(tender_db::now()),
                    ..Default::default()
                },
                None,
            )
            .await?;
        tracing::info!(principal_id = principal.id, account_id, "Blocked account");
        respond(&state, "user blocked", account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AccountStatus::*;

    #[test]
    fn it_follows_the_transition_table() {
        let allowed = [
            (New, &[InProgress, Declined, Blocked][..]),
            (InProgress, &[Pending, Declined, Blocked][..]),
            (Pending, &[InProgress, Accepted, Declined, Blocked][..]),
            (Accepted, &[Blocked][..]),
            (Declined, &[Blocked][..]),
            (Blocked, &[][..]),
        ];
        for (from, targets) in allowed {
            for to in AccountStatus::ALL.iter().copied() {
                let expected = from == to || targets.contains(&to);
                assert_eq!(allows(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn it_limits_detail_updates_to_review_outcomes() {
        assert!(check_review_update(InProgress, Pending).is_ok());
        assert!(check_review_update(Pending, Accepted).is_ok());
        assert!(check_review_update(Declined, Declined).is_ok());
        assert!(check_review_update(New, InProgress).is_err());
        assert!(check_review_update(Pending, InProgress).is_err());
        assert!(check_review_update(InProgress, Declined).is_err());
        assert!(check_review_update(Accepted, Blocked).is_err());
        assert!(check_review_update(New, Accepted).is_err());
    }

    #[test]
    fn it_scopes_listing_by_role() {
        let admin = AccessScope::Departments {
            admin_id: 7,
            department_ids: vec![1, 2],
        };
        let filter = admin
            .applicant_filter(Some(3), Some(Pending))
            .expect("admins list applicants");
        assert_eq!(filter.department_ids, Some(vec![1, 2]));
        assert_eq!(filter.department, Some(3));
        assert_eq!(
            AccessScope::Everything
                .applicant_filter(None, None)
                .map(|f| f.department_ids),
            Some(None)
        );
        assert!(AccessScope::OwnAccount(4)
            .applicant_filter(None, None)
            .is_none());
        assert!(admin.can_assign(Some(2)));
        assert!(!admin.can_assign(Some(3)));
        assert!(!admin.can_assign(None));
        assert!(AccessScope::Everything.can_assign(None));
    }
}
