use tender_db::{models, Repository};

/// JSON shape of an account as returned by every endpoint.
#[derive(Debug, serde::Serialize)]
pub struct AccountView {
    pub id: i32,
    pub username: String,
    pub email: String,
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
    pub department: Option<i32>,
    pub department_name: Option<String>,
    pub status: models::AccountStatus,
    pub status_display: &'static str,
    pub role: models::Role,
    pub decline_reason: Option<String>,
    pub is_activated: bool,
    pub last_login: Option<jiff::Timestamp>,
    pub created: jiff::Timestamp,
    pub updated: jiff::Timestamp,
}

impl AccountView {
    pub async fn load(
        store: &dyn Repository,
        account: models::Account,
    ) -> Result<Self, tender_db::Error> {
        let department_name = match account.department_id {
            Some(department_id) => store.department_name(department_id).await?,
            None => None,
        };
        Ok(Self::new(account, department_name))
    }

    pub async fn load_all(
        store: &dyn Repository,
        accounts: Vec<models::Account>,
    ) -> Result<Vec<Self>, tender_db::Error> {
        let mut views = Vec::with_capacity(accounts.len());
        for account in accounts {
            views.push(Self::load(store, account).await?);
        }
        Ok(views)
    }

    fn new(account: models::Account, department_name: Option<String>) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            phone: account.phone,
            company_name: account.company_name,
            edrpou: account.edrpou,
            legal_address: account.legal_address,
            actual_address: account.actual_address,
            director_name: account.director_name,
            contact_person: account.contact_person,
            tender_number: account.tender_number,
            department: account.department_id,
            department_name,
            status: account.status,
            status_display: account.status.label(),
            role: account.role,
            decline_reason: account.decline_reason,
            is_activated: account.is_activated,
            last_login: account.last_login.map(tender_db::to_jiff),
            created: tender_db::to_jiff(account.created),
            updated: tender_db::to_jiff(account.updated),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct DepartmentView {
    pub id: i32,
    pub name: String,
    pub code: String,
    pub description: String,
    pub is_active: bool,
}

impl From<models::Department> for DepartmentView {
    fn from(department: models::Department) -> Self {
        Self {
            id: department.id,
            name: department.name,
            code: department.code,
            description: department.description,
            is_active: department.is_active,
        }
    }
}
