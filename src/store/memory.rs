//! In-process stores, used by tests and when no database path is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::draft::style::ContactProfile;
use crate::error::DatabaseError;
use crate::pipeline::types::ChangeCursor;
use crate::store::traits::{ContactMemory, CursorStore};

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    value: Mutex<Option<ChangeCursor>>,
}

impl InMemoryCursorStore {
    pub fn new(initial: Option<ChangeCursor>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn read(&self) -> Result<Option<ChangeCursor>, DatabaseError> {
        Ok(*self.value.lock().await)
    }

    async fn compare_and_swap(
        &self,
        expected: Option<ChangeCursor>,
        new: ChangeCursor,
    ) -> Result<bool, DatabaseError> {
        let mut guard = self.value.lock().await;
        if *guard != expected {
            return Ok(false);
        }
        *guard = Some(new);
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryContactMemory {
    profiles: RwLock<HashMap<String, ContactProfile>>,
}

impl InMemoryContactMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactMemory for InMemoryContactMemory {
    async fn load(&self, email: &str) -> Result<Option<ContactProfile>, DatabaseError> {
        Ok(self.profiles.read().await.get(email).cloned())
    }

    async fn save(&self, profile: &ContactProfile) -> Result<(), DatabaseError> {
        self.profiles
            .write()
            .await
            .insert(profile.email.clone(), profile.clone());
        Ok(())
    }
}
