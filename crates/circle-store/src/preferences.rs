//! Typed, observable preferences over any [`PreferenceStore`].
//!
//! Four keys are kept: `hasSeenOnboarding`, `hasGrantedPermissions`,
//! `isDeviceCompatible` (booleans stored as `"true"`/`"false"`) and
//! `userProfile` (the profile as JSON). Every successful write is broadcast
//! to watchers as a fresh [`PreferencesSnapshot`].

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use circle_shared::constants::{
    PREF_HAS_GRANTED_PERMISSIONS, PREF_HAS_SEEN_ONBOARDING, PREF_IS_DEVICE_COMPATIBLE,
    PREF_USER_PROFILE,
};
use circle_shared::error::BridgeError;
use circle_shared::persistence::PreferenceStore;
use circle_shared::types::UserProfile;

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_preferences(&self) -> Result<usize> {
        Ok(self.conn().execute("DELETE FROM preferences", [])?)
    }
}

/// Everything the application keeps in preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencesSnapshot {
    pub has_seen_onboarding: bool,
    pub has_granted_permissions: bool,
    pub is_device_compatible: bool,
    pub user_profile: Option<UserProfile>,
}

#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
    tx: Arc<watch::Sender<PreferencesSnapshot>>,
}

impl Preferences {
    /// Read every key from `store` and start publishing changes.
    pub async fn load(store: Arc<dyn PreferenceStore>) -> std::result::Result<Self, BridgeError> {
        let snapshot = PreferencesSnapshot {
            has_seen_onboarding: read_flag(store.as_ref(), PREF_HAS_SEEN_ONBOARDING).await?,
            has_granted_permissions: read_flag(store.as_ref(), PREF_HAS_GRANTED_PERMISSIONS)
                .await?,
            is_device_compatible: read_flag(store.as_ref(), PREF_IS_DEVICE_COMPATIBLE).await?,
            user_profile: read_profile(store.as_ref()).await?,
        };
        let (tx, _rx) = watch::channel(snapshot);
        Ok(Self {
            store,
            tx: Arc::new(tx),
        })
    }

    pub fn watch(&self) -> watch::Receiver<PreferencesSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PreferencesSnapshot {
        self.tx.borrow().clone()
    }

    pub fn user_profile(&self) -> Option<UserProfile> {
        self.tx.borrow().user_profile.clone()
    }

    pub async fn set_has_seen_onboarding(&self, value: bool) -> std::result::Result<(), BridgeError> {
        self.store
            .set(PREF_HAS_SEEN_ONBOARDING, value.to_string())
            .await?;
        self.tx.send_modify(|s| s.has_seen_onboarding = value);
        Ok(())
    }

    pub async fn set_has_granted_permissions(
        &self,
        value: bool,
    ) -> std::result::Result<(), BridgeError> {
        self.store
            .set(PREF_HAS_GRANTED_PERMISSIONS, value.to_string())
            .await?;
        self.tx.send_modify(|s| s.has_granted_permissions = value);
        Ok(())
    }

    pub async fn set_device_compatible(&self, value: bool) -> std::result::Result<(), BridgeError> {
        self.store
            .set(PREF_IS_DEVICE_COMPATIBLE, value.to_string())
            .await?;
        self.tx.send_modify(|s| s.is_device_compatible = value);
        Ok(())
    }

    /// Store the profile, assigning a fresh identity if it has none.
    pub async fn save_user_profile(
        &self,
        mut profile: UserProfile,
    ) -> std::result::Result<UserProfile, BridgeError> {
        if !profile.has_identity() {
            profile.unique_id = Uuid::new_v4().to_string();
            info!(unique_id = %profile.unique_id, "Assigned profile identity");
        }
        let json = serde_json::to_string(&profile)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.store.set(PREF_USER_PROFILE, json).await?;

        let saved = profile.clone();
        self.tx.send_modify(|s| s.user_profile = Some(saved));
        Ok(profile)
    }

    /// Forget everything, including the profile.
    pub async fn logout(&self) -> std::result::Result<(), BridgeError> {
        self.store.clear().await?;
        self.tx.send_replace(PreferencesSnapshot::default());
        info!("Preferences cleared");
        Ok(())
    }
}

async fn read_flag(store: &dyn PreferenceStore, key: &str) -> std::result::Result<bool, BridgeError> {
    Ok(match store.get(key).await?.as_deref() {
        None => false,
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            warn!(key, value = other, "Ignoring invalid boolean preference");
            false
        }
    })
}

async fn read_profile(
    store: &dyn PreferenceStore,
) -> std::result::Result<Option<UserProfile>, BridgeError> {
    let Some(json) = store.get(PREF_USER_PROFILE).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&json) {
        Ok(profile) => Ok(Some(profile)),
        Err(e) => {
            warn!(error = %e, "Stored profile is unreadable, ignoring it");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, SqliteStore};

    #[tokio::test]
    async fn blank_profile_gets_identity() {
        let prefs = Preferences::load(Arc::new(MemoryStore::new())).await.unwrap();
        let mut profile = UserProfile::new();
        profile.unique_id = String::new();
        profile.nickname = "Alice".into();

        let saved = prefs.save_user_profile(profile).await.unwrap();
        assert!(saved.has_identity());
        assert_eq!(prefs.user_profile().unwrap().unique_id, saved.unique_id);
    }

    #[tokio::test]
    async fn stored_profile_without_id_loads_blank() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(PREF_USER_PROFILE, r#"{"nickname":"Alice"}"#.into())
            .await
            .unwrap();

        let first = Preferences::load(store.clone()).await.unwrap();
        let loaded = first.user_profile().unwrap();
        assert!(!loaded.has_identity());
        let again = Preferences::load(store.clone()).await.unwrap();
        assert_eq!(again.user_profile(), Some(loaded.clone()));

        let saved = first.save_user_profile(loaded).await.unwrap();
        assert!(saved.has_identity());
        let reloaded = Preferences::load(store).await.unwrap();
        assert_eq!(reloaded.user_profile().unwrap().unique_id, saved.unique_id);
    }

    #[tokio::test]
    async fn existing_identity_is_kept() {
        let prefs = Preferences::load(Arc::new(MemoryStore::new())).await.unwrap();
        let mut profile = UserProfile::new();
        profile.unique_id = "fixed".into();

        let saved = prefs.save_user_profile(profile).await.unwrap();
        assert_eq!(saved.unique_id, "fixed");
    }

    #[tokio::test]
    async fn changes_are_broadcast() {
        let prefs = Preferences::load(Arc::new(MemoryStore::new())).await.unwrap();
        let mut rx = prefs.watch();
        assert!(!rx.borrow().has_seen_onboarding);

        prefs.set_has_seen_onboarding(true).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().has_seen_onboarding);

        prefs.logout().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PreferencesSnapshot::default());
    }

    #[tokio::test]
    async fn values_reload_from_disk() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let prefs = Preferences::load(store.clone()).await.unwrap();
        prefs.set_has_granted_permissions(true).await.unwrap();
        prefs.set_device_compatible(true).await.unwrap();
        let mut profile = UserProfile::new();
        profile.nickname = "Bob".into();
        prefs.save_user_profile(profile.clone()).await.unwrap();

        let reloaded = Preferences::load(store).await.unwrap().snapshot();
        assert!(reloaded.has_granted_permissions);
        assert!(reloaded.is_device_compatible);
        assert!(!reloaded.has_seen_onboarding);
        assert_eq!(reloaded.user_profile, Some(profile));
    }

    #[tokio::test]
    async fn corrupt_values_fall_back() {
        let store = Arc::new(MemoryStore::new());
        store.set(PREF_HAS_SEEN_ONBOARDING, "yes".into()).await.unwrap();
        store.set(PREF_USER_PROFILE, "{not json".into()).await.unwrap();

        let snapshot = Preferences::load(store).await.unwrap().snapshot();
        assert!(!snapshot.has_seen_onboarding);
        assert!(snapshot.user_profile.is_none());
    }
}
