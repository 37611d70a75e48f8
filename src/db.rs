// src/db.rs
//! Per-owner document storage.
//!
//! Records are stored as JSON text under `(owner_id, collection, id)`. Every
//! read, update and delete is scoped by owner, so one user can never see or
//! touch another user's records.
use crate::error::StoreError;
use crate::models::{Expense, Investment, Loan, User};
use async_trait::async_trait;
use log::{error, info};
use scylla::frame::response::result::Row;
use scylla::{query::Query, Session, SessionBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Expenses,
    Investments,
    Loans,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Expenses => "expenses",
            Collection::Investments => "investments",
            Collection::Loans => "loans",
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn put(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
        body: String,
    ) -> Result<(), StoreError>;

    async fn get(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Returns `(id, body)` pairs.
    async fn list(
        &self,
        owner_id: &str,
        collection: Collection,
    ) -> Result<Vec<(String, String)>, StoreError>;

    /// Returns `false` when the owner has no such record.
    async fn delete(&self, owner_id: &str, collection: Collection, id: &str)
        -> Result<bool, StoreError>;

    /// Inserts a user unless the email is taken. Returns `false` if it was.
    async fn create_user(&self, user: &User) -> Result<bool, StoreError>;

    async fn find_user(&self, email: &str) -> Result<Option<User>, StoreError>;
}

/// A document type kept in a [`Store`] collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
    fn owner_id(&self) -> &str;
}

impl Record for Loan {
    const COLLECTION: Collection = Collection::Loans;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.user_id
    }
}

impl Record for Investment {
    const COLLECTION: Collection = Collection::Investments;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.user_id
    }
}

impl Record for Expense {
    const COLLECTION: Collection = Collection::Expenses;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.user_id
    }
}

fn decode<T: Record>(id: &str, body: &str) -> Result<T, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

pub async fn save_record<T: Record>(store: &dyn Store, record: &T) -> Result<(), StoreError> {
    let body = serde_json::to_string(record)?;
    store
        .put(record.owner_id(), T::COLLECTION, record.id(), body)
        .await
}

pub async fn get_record<T: Record>(
    store: &dyn Store,
    owner_id: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(owner_id, T::COLLECTION, id).await? {
        Some(body) => Ok(Some(decode(id, &body)?)),
        None => Ok(None),
    }
}

pub async fn list_records<T: Record>(store: &dyn Store, owner_id: &str) -> Result<Vec<T>, StoreError> {
    store
        .list(owner_id, T::COLLECTION)
        .await?
        .iter()
        .map(|(id, body)| decode(id, body))
        .collect()
}

pub async fn delete_record<T: Record>(
    store: &dyn Store,
    owner_id: &str,
    id: &str,
) -> Result<bool, StoreError> {
    store.delete(owner_id, T::COLLECTION, id).await
}

type RecordKey = (String, Collection);

/// In-process store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RecordKey, BTreeMap<String, String>>>,
    users: RwLock<HashMap<String, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
        body: String,
    ) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .entry((owner_id.to_string(), collection))
            .or_default()
            .insert(id.to_string(), body);
        Ok(())
    }

    async fn get(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(owner_id.to_string(), collection))
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn list(
        &self,
        owner_id: &str,
        collection: Collection,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(owner_id.to_string(), collection))
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| (id.clone(), body.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        Ok(records
            .get_mut(&(owner_id.to_string(), collection))
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn create_user(&self, user: &User) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.email) {
            return Ok(false);
        }
        users.insert(user.email.clone(), user.clone());
        Ok(true)
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(email).cloned())
    }
}

/// ScyllaDB-backed store in the `finmate` keyspace.
pub struct ScyllaStore {
    session: Session,
}

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    error!("ScyllaDB query failed: {}", e);
    StoreError::Backend(e.to_string())
}

impl ScyllaStore {
    pub async fn connect(node: &str) -> Result<Self, StoreError> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(backend)?;

        session.query("CREATE KEYSPACE IF NOT EXISTS finmate WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await.map_err(backend)?;
        session.query("CREATE TABLE IF NOT EXISTS finmate.records (owner_id TEXT, collection TEXT, id TEXT, body TEXT, PRIMARY KEY ((owner_id, collection), id))", &[]).await.map_err(backend)?;
        session
            .query(
                "CREATE TABLE IF NOT EXISTS finmate.users (email TEXT PRIMARY KEY, body TEXT)",
                &[],
            )
            .await
            .map_err(backend)?;

        info!("Successfully connected to ScyllaDB at {}.", node);
        Ok(ScyllaStore { session })
    }
}

/// First column of each row as text.
fn text_bodies(rows: Option<Vec<Row>>) -> Vec<String> {
    rows.unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            row.columns
                .into_iter()
                .next()
                .flatten()
                .and_then(|value| value.as_text().cloned())
        })
        .collect()
}

/// First two columns of each row as text.
fn text_pairs(rows: Option<Vec<Row>>) -> Vec<(String, String)> {
    rows.unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            let mut columns = row.columns.into_iter().map(|column| {
                column.and_then(|value| value.as_text().cloned())
            });
            Some((columns.next()??, columns.next()??))
        })
        .collect()
}

#[async_trait]
impl Store for ScyllaStore {
    async fn put(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
        body: String,
    ) -> Result<(), StoreError> {
        let query = Query::new(
            "INSERT INTO finmate.records (owner_id, collection, id, body) VALUES (?, ?, ?, ?)",
        );
        self.session
            .query(query, (owner_id, collection.as_str(), id, body))
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        let query = Query::new(
            "SELECT body FROM finmate.records WHERE owner_id = ? AND collection = ? AND id = ?",
        );
        let rows = self
            .session
            .query(query, (owner_id, collection.as_str(), id))
            .await
            .map_err(backend)?
            .rows;
        Ok(text_bodies(rows).into_iter().next())
    }

    async fn list(
        &self,
        owner_id: &str,
        collection: Collection,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let query =
            Query::new("SELECT id, body FROM finmate.records WHERE owner_id = ? AND collection = ?");
        let rows = self
            .session
            .query(query, (owner_id, collection.as_str()))
            .await
            .map_err(backend)?
            .rows;
        Ok(text_pairs(rows))
    }

    async fn delete(
        &self,
        owner_id: &str,
        collection: Collection,
        id: &str,
    ) -> Result<bool, StoreError> {
        if self.get(owner_id, collection, id).await?.is_none() {
            return Ok(false);
        }
        let query = Query::new(
            "DELETE FROM finmate.records WHERE owner_id = ? AND collection = ? AND id = ?",
        );
        self.session
            .query(query, (owner_id, collection.as_str(), id))
            .await
            .map_err(backend)?;
        Ok(true)
    }

    async fn create_user(&self, user: &User) -> Result<bool, StoreError> {
        if self.find_user(&user.email).await?.is_some() {
            return Ok(false);
        }
        let body = serde_json::to_string(user)?;
        let query = Query::new("INSERT INTO finmate.users (email, body) VALUES (?, ?)");
        self.session
            .query(query, (user.email.as_str(), body))
            .await
            .map_err(backend)?;
        Ok(true)
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = Query::new("SELECT body FROM finmate.users WHERE email = ?");
        let rows = self
            .session
            .query(query, (email,))
            .await
            .map_err(backend)?
            .rows;
        match text_bodies(rows).into_iter().next() {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    id: email.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}
