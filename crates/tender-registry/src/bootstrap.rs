use tender_db::{models, Repository};

use crate::{config::BootstrapSuperadmin, credentials, validation::PasswordPolicy};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Store: {0}")]
    Store(#[from] tender_db::Error),
    #[error("Credentials: {0}")]
    Credentials(#[from] credentials::Error),
    #[error("Superadmin password rejected: {0}")]
    WeakPassword(String),
}

/// Creates the configured superadmin unless an account with that login already exists.
#[tracing::instrument(skip_all, fields(username = %superadmin.username))]
pub async fn ensure_superadmin(
    store: &dyn Repository,
    superadmin: &BootstrapSuperadmin,
    password_min_length: usize,
) -> Result<Option<models::Account>, Error> {
    if store
        .load_account_by_login(&superadmin.username)
        .await?
        .is_some()
    {
        tracing::debug!("Superadmin already present");
        return Ok(None);
    }
    if superadmin.password.is_empty() {
        tracing::warn!("No superadmin password configured, skipping bootstrap");
        return Ok(None);
    }
    let email = superadmin.email.trim().to_lowercase();
    let violations = PasswordPolicy::new(password_min_length).check(
        &superadmin.password,
        &superadmin.username,
        &email,
    );
    if !violations.is_empty() {
        return Err(Error::WeakPassword(violations.join("; ")));
    }
    let stamp = tender_db::now();
    let account = store
        .register_account(models::NewAccount {
            username: superadmin.username.clone(),
            email,
            password_hash: Some(credentials::hash_password(&superadmin.password)?),
            first_name: String::new(),
            last_name: String::new(),
            phone: String::new(),
            company_name: String::new(),
            edrpou: String::new(),
            legal_address: String::new(),
            actual_address: String::new(),
            director_name: String::new(),
            contact_person: String::new(),
            tender_number: None,
            department_id: None,
            status: models::AccountStatus::New,
            role: models::Role::Superadmin,
            is_activated: true,
            created: stamp,
            updated: stamp,
        })
        .await?;
    tracing::info!(account_id = account.id, "Created superadmin");
    Ok(Some(account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tender_db::memory::MemoryStore;

    fn superadmin(password: &str) -> BootstrapSuperadmin {
        BootstrapSuperadmin {
            username: "root".to_owned(),
            email: "Root@Example.com".to_owned(),
            password: password.to_owned(),
        }
    }

    #[tokio::test]
    async fn it_creates_the_superadmin_once() {
        let store = MemoryStore::new();
        let created = ensure_superadmin(&store, &superadmin("Granite-Falcon-81"), 8)
            .await
            .expect("bootstraps")
            .expect("creates an account");
        assert_eq!(created.role, models::Role::Superadmin);
        assert_eq!(created.email, "root@example.com");
        assert!(created.is_activated);
        let again = ensure_superadmin(&store, &superadmin("Granite-Falcon-81"), 8)
            .await
            .expect("bootstraps");
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn it_skips_without_a_password_and_refuses_weak_ones() {
        let store = MemoryStore::new();
        assert!(ensure_superadmin(&store, &superadmin(""), 8)
            .await
            .expect("bootstraps")
            .is_none());
        assert!(matches!(
            ensure_superadmin(&store, &superadmin("12345678"), 8).await,
            Err(Error::WeakPassword(_))
        ));
    }
}
