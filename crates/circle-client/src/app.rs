//! Application facade.
//!
//! [`App`] owns the preferences, the message store and the controller task,
//! and wires the saved user profile into discovery.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use circle_net::{
    AwareTransport, ControllerBuilder, ControllerHandle, ProfileProvider, TransportEvent,
};
use circle_shared::persistence::{MessageStore, PreferenceStore};
use circle_shared::types::UserProfile;
use circle_store::{Preferences, SqliteStore};

use crate::config::ClientConfig;
use crate::error::Result;

/// A running client: preferences plus a controller bound to one transport.
pub struct App {
    config: ClientConfig,
    preferences: Preferences,
    controller: ControllerHandle,
}

impl App {
    /// Open the SQLite store named by `config` and start the controller.
    pub async fn start(
        config: ClientConfig,
        transport: Arc<dyn AwareTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<Self> {
        let path = config.db_path.clone();
        let store = tokio::task::spawn_blocking(move || SqliteStore::open(path.as_deref())).await??;
        Self::with_store(config, Arc::new(store), transport, events).await
    }

    /// Start on an already opened store serving both messages and preferences.
    pub async fn with_store<S>(
        config: ClientConfig,
        store: Arc<S>,
        transport: Arc<dyn AwareTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<Self>
    where
        S: MessageStore + PreferenceStore,
    {
        let preferences = Preferences::load(store.clone()).await?;

        // Discovery reads the profile at start time, so edits apply to the next cycle.
        let profile: ProfileProvider = {
            let preferences = preferences.clone();
            Arc::new(move || preferences.user_profile())
        };

        let controller = ControllerBuilder::new(transport, events, profile)
            .config(config.controller_config())
            .store(store)
            .spawn();

        info!(
            auto_connect = config.auto_connect,
            precise_ranging = config.precise_ranging,
            has_profile = preferences.user_profile().is_some(),
            "Client started"
        );

        Ok(Self {
            config,
            preferences,
            controller,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    /// Save the local profile, assigning an identity when it has none.
    pub async fn save_profile(&self, profile: UserProfile) -> Result<UserProfile> {
        let saved = self.preferences.save_user_profile(profile).await?;
        info!(unique_id = %saved.unique_id, nickname = %saved.nickname, "Profile saved");
        Ok(saved)
    }

    /// Stop discovery and forget every preference, including the profile.
    pub async fn logout(&self) -> Result<()> {
        self.controller.stop_discovery().await?;
        self.preferences.logout().await?;
        info!("Logged out");
        Ok(())
    }

    /// Stop the controller task. Platform sessions are closed on the way out.
    pub async fn shutdown(&self) -> Result<()> {
        self.controller.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use circle_net::{DeviceSettings, LifecycleState, LoopbackMedium};
    use circle_store::MemoryStore;

    const WAIT: Duration = Duration::from_secs(5);

    fn config() -> ClientConfig {
        ClientConfig {
            attach_timeout: Duration::from_millis(500),
            discovery_timeout: Duration::from_millis(500),
            precise_ranging: false,
            ..ClientConfig::default()
        }
    }

    async fn memory_app(medium: &LoopbackMedium, store: Arc<MemoryStore>) -> App {
        let (transport, events) = medium.add_device(DeviceSettings::default());
        App::with_store(config(), store, Arc::new(transport), events)
            .await
            .unwrap()
    }

    fn named(nickname: &str) -> UserProfile {
        let mut profile = UserProfile::new();
        profile.unique_id = String::new();
        profile.nickname = nickname.to_string();
        profile
    }

    #[tokio::test]
    async fn test_discovery_uses_saved_profile() {
        let medium = LoopbackMedium::new();
        let app = memory_app(&medium, Arc::new(MemoryStore::new())).await;

        app.controller().start_discovery().await.unwrap();
        let mut chat = app.controller().chat_state();
        tokio::time::timeout(WAIT, chat.wait_for(|s| s.error.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            app.controller().snapshot().error.as_deref(),
            Some("Please complete your profile before scanning for peers.")
        );

        let saved = app.save_profile(named("Alice")).await.unwrap();
        assert!(saved.has_identity());
        assert_eq!(app.preferences().user_profile(), Some(saved));

        app.controller().start_discovery().await.unwrap();
        let mut lifecycle = app.controller().lifecycle();
        tokio::time::timeout(
            WAIT,
            lifecycle.wait_for(|s| matches!(s, LifecycleState::Attached { .. })),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_logout_stops_discovery_and_clears_profile() {
        let medium = LoopbackMedium::new();
        let store = Arc::new(MemoryStore::new());
        let app = memory_app(&medium, store.clone()).await;
        app.save_profile(named("Alice")).await.unwrap();
        app.preferences().set_has_seen_onboarding(true).await.unwrap();

        app.logout().await.unwrap();

        let mut chat = app.controller().chat_state();
        tokio::time::timeout(
            WAIT,
            chat.wait_for(|s| s.error.as_deref() == Some("Discovery stopped.")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(app.preferences().snapshot(), Default::default());
        assert_eq!(store.get("userProfile").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_app_keeps_profile_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            db_path: Some(dir.path().join("circle.db")),
            ..config()
        };
        let medium = LoopbackMedium::new();

        let (transport, events) = medium.add_device(DeviceSettings::default());
        let app = App::start(config.clone(), Arc::new(transport), events)
            .await
            .unwrap();
        let saved = app.save_profile(named("Alice")).await.unwrap();
        app.shutdown().await.unwrap();
        drop(app);

        let (transport, events) = medium.add_device(DeviceSettings::default());
        let reopened = App::start(config, Arc::new(transport), events).await.unwrap();
        assert_eq!(reopened.preferences().user_profile(), Some(saved));
    }
}
