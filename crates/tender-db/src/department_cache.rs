use arc_swap::ArcSwap;
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection};
use std::{collections::HashMap, sync::Arc};

/// Department names keyed by id, swapped in whole whenever departments change.
#[derive(Debug)]
pub struct DepartmentNames(ArcSwap<HashMap<i32, String>>);

impl DepartmentNames {
    pub fn new() -> Self {
        Self(ArcSwap::new(Arc::new(HashMap::new())))
    }

    pub fn populate(&self, entries: HashMap<i32, String>) {
        self.0.swap(Arc::new(entries));
    }

    pub fn insert(&self, id: i32, name: String) {
        self.0.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(id, name.clone());
            next
        });
    }

    pub fn name_of(&self, id: i32) -> Option<String> {
        self.0.load().get(&id).cloned()
    }

    pub(crate) async fn load_from_db(
        conn: &mut mobc::Connection<AsyncDieselConnectionManager<AsyncPgConnection>>,
    ) -> Result<HashMap<i32, String>, diesel::result::Error> {
        use super::schema::tender::department::dsl::*;
        use diesel::{QueryDsl, SelectableHelper};
        use diesel_async::RunQueryDsl;
        department
            .select(super::models::Department::as_select())
            .get_results(conn)
            .await
            .map(|v| {
                v.into_iter()
                    .map(|v| (v.id, v.name))
                    .collect::<HashMap<_, _>>()
            })
    }
}

impl Default for DepartmentNames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_replaces_previous_entries() {
        let names = DepartmentNames::new();
        names.populate(HashMap::from([(1, "Logistics".to_owned())]));
        assert_eq!(names.name_of(1).as_deref(), Some("Logistics"));
        names.populate(HashMap::from([(2, "Procurement".to_owned())]));
        assert_eq!(names.name_of(1), None, "old entry should be gone after repopulating");
        assert_eq!(names.name_of(2).as_deref(), Some("Procurement"));
    }

    #[test]
    fn insert_keeps_existing_entries() {
        let names = DepartmentNames::new();
        names.populate(HashMap::from([(1, "Logistics".to_owned())]));
        names.insert(2, "Procurement".to_owned());
        assert_eq!(names.name_of(1).as_deref(), Some("Logistics"));
        assert_eq!(names.name_of(2).as_deref(), Some("Procurement"));
    }
}
