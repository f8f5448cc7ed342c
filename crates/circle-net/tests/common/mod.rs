//! Common test utilities for controller integration tests.
//!
//! Devices run full controllers over a shared loopback medium; assertions
//! wait on the controllers' watch channels with a timeout.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use circle_net::{
    ControllerBuilder, ControllerConfig, ControllerHandle, DeviceSettings, LifecycleState,
    LoopbackMedium, LoopbackTransport, NoEstimate, PlaceholderRanging, ProfileProvider,
    SessionRole, TransportEvent,
};
use circle_shared::types::{ChatState, PeerDevice, PeerHandle, UserProfile};
use circle_store::MemoryStore;

/// Default timeout for waiting on controller state.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Safe to call multiple times.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("circle_net=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn profile(unique_id: &str, nickname: &str) -> UserProfile {
    let mut profile = UserProfile::new();
    profile.unique_id = unique_id.to_string();
    profile.nickname = nickname.to_string();
    profile
}

/// Controller settings with short deadlines and no precise ranging.
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        attach_timeout: Duration::from_millis(200),
        discovery_timeout: Duration::from_millis(200),
        precise_ranging: false,
        ..ControllerConfig::default()
    }
}

/// A simulated device running its own controller.
pub struct Device {
    pub transport: LoopbackTransport,
    pub controller: ControllerHandle,
    pub store: Arc<MemoryStore>,
    pub profile: Arc<Mutex<Option<UserProfile>>>,
}

impl Device {
    pub fn unique_id(&self) -> String {
        self.profile
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.unique_id.clone())
            .unwrap_or_default()
    }

    pub fn chat(&self) -> watch::Receiver<ChatState> {
        self.controller.chat_state()
    }

    pub fn peers(&self) -> watch::Receiver<Vec<PeerDevice>> {
        self.controller.discovered_peers()
    }

    /// Wait until `other` shows up in this device's registry.
    pub async fn discovered(&self, other: &Device) -> PeerDevice {
        let id = other.unique_id();
        let peers = wait_for(&mut self.peers(), "peer discovery", |peers| {
            peers.iter().any(|p| p.unique_id == id)
        })
        .await;
        peers
            .into_iter()
            .find(|p| p.unique_id == id)
            .expect("peer present")
    }
}

pub struct DeviceBuilder {
    settings: DeviceSettings,
    config: ControllerConfig,
    profile: Option<UserProfile>,
    store: Arc<MemoryStore>,
    placeholder_seed: Option<u64>,
}

impl DeviceBuilder {
    pub fn new(unique_id: &str, nickname: &str) -> Self {
        Self {
            settings: DeviceSettings::default(),
            config: fast_config(),
            profile: Some(profile(unique_id, nickname)),
            store: Arc::new(MemoryStore::new()),
            placeholder_seed: None,
        }
    }

    /// Estimate distances with a seeded placeholder instead of leaving them unknown.
    pub fn placeholder_ranging(mut self, seed: u64) -> Self {
        self.placeholder_seed = Some(seed);
        self
    }

    pub fn settings(mut self, f: impl FnOnce(&mut DeviceSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut ControllerConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn without_profile(mut self) -> Self {
        self.profile = None;
        self
    }

    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn spawn(self, medium: &LoopbackMedium) -> Device {
        let (transport, events) = medium.add_device(self.settings);
        let profile = Arc::new(Mutex::new(self.profile));
        let provider: ProfileProvider = {
            let profile = profile.clone();
            Arc::new(move || profile.lock().unwrap().clone())
        };

        let builder = ControllerBuilder::new(Arc::new(transport.clone()), events, provider)
            .config(self.config)
            .store(self.store.clone());
        let controller = match self.placeholder_seed {
            Some(seed) => builder.ranging(PlaceholderRanging::seeded(seed)),
            None => builder.ranging(NoEstimate),
        }
        .spawn();

        Device {
            transport,
            controller,
            store: self.store,
            profile,
        }
    }
}

/// Start discovery on a device and wait until both roles are up.
pub async fn start_attached(device: &Device) {
    device.controller.start_discovery().await.unwrap();
    wait_for(&mut device.controller.lifecycle(), "both discovery roles", |state| {
        *state
            == LifecycleState::Attached {
                publishing: true,
                subscribing: true,
            }
    })
    .await;
}

/// Deliver a raw payload to `device` as if `from` had sent it.
pub fn inject_message(device: &Device, from: PeerHandle, payload: &str) {
    device.transport.inject(TransportEvent::MessageReceived {
        role: SessionRole::Publish,
        peer: from,
        payload: Bytes::from(payload.to_string()),
    });
}

/// Two devices that discovered each other.
pub async fn discovered_pair(medium: &LoopbackMedium) -> (Device, Device) {
    let alice = DeviceBuilder::new("u1", "Alice").spawn(medium);
    let bob = DeviceBuilder::new("u2", "Bob").spawn(medium);
    alice.controller.start_discovery().await.unwrap();
    bob.controller.start_discovery().await.unwrap();
    alice.discovered(&bob).await;
    bob.discovered(&alice).await;
    (alice, bob)
}

/// Wait until `pred` holds for the watched value and return it.
pub async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, what: &str, pred: F) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    let waited = tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("controller stopped while waiting for {what}");
            }
        }
    })
    .await;

    match waited {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

/// Wait for the chat state to satisfy `pred`.
pub async fn wait_chat<F>(device: &Device, what: &str, pred: F) -> ChatState
where
    F: Fn(&ChatState) -> bool,
{
    wait_for(&mut device.chat(), what, pred).await
}

/// Let the controller drain whatever it has queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Poll `cond` until it holds.
pub async fn eventually<F>(what: &str, cond: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
