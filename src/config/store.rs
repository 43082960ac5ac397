use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::error::Result;
use crate::webrtc::config::{IceConfig, IceConfigUpdate};

/// Process-wide ICE configuration
///
/// Uses `ArcSwap` for lock-free reads; peers read it once at creation time.
/// Writers are serialized so two partial updates cannot lose each other's
/// fields.
#[derive(Clone)]
pub struct IceConfigStore {
    cache: Arc<ArcSwap<IceConfig>>,
    write_lock: Arc<Mutex<()>>,
    change_tx: broadcast::Sender<IceConfigChange>,
}

/// ICE configuration change event
#[derive(Debug, Clone)]
pub struct IceConfigChange {
    pub config: Arc<IceConfig>,
}

impl IceConfigStore {
    /// Create a store; the initial config must be valid
    pub fn new(initial: IceConfig) -> Result<Self> {
        initial.validate()?;
        let (change_tx, _) = broadcast::channel(16);
        Ok(Self {
            cache: Arc::new(ArcSwap::from_pointee(initial)),
            write_lock: Arc::new(Mutex::new(())),
            change_tx,
        })
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<IceConfig> {
        self.cache.load_full()
    }

    /// Replace the whole configuration
    pub fn set(&self, config: IceConfig) -> Result<Arc<IceConfig>> {
        config.validate()?;
        let _guard = self.write_lock.lock();
        Ok(self.swap(config))
    }

    /// Merge a partial update onto the current configuration.
    ///
    /// On a validation error nothing is stored and the previous
    /// configuration stays in effect.
    pub fn update(&self, update: IceConfigUpdate) -> Result<Arc<IceConfig>> {
        let _guard = self.write_lock.lock();
        let next = self.cache.load().apply(update)?;
        Ok(self.swap(next))
    }

    fn swap(&self, config: IceConfig) -> Arc<IceConfig> {
        let config = Arc::new(config);
        self.cache.store(config.clone());
        info!(
            use_turn = config.use_turn,
            relay_only = config.relay_only,
            "ICE config updated: {:?}",
            config.urls
        );
        let _ = self.change_tx.send(IceConfigChange {
            config: config.clone(),
        });
        config
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<IceConfigChange> {
        self.change_tx.subscribe()
    }
}

impl Default for IceConfigStore {
    fn default() -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            cache: Arc::new(ArcSwap::from_pointee(IceConfig::default())),
            write_lock: Arc::new(Mutex::new(())),
            change_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_rejects_invalid_initial() {
        let config = IceConfig {
            relay_only: true,
            ..Default::default()
        };
        assert!(matches!(IceConfigStore::new(config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_invalid_update_keeps_previous() {
        let store = IceConfigStore::default();
        let before = store.get();

        let result = store.update(IceConfigUpdate {
            urls: Some(vec!["ftp://nope".to_string()]),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(*store.get(), *before);
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let store = IceConfigStore::default();
        let mut rx = store.subscribe();

        let updated = store
            .update(IceConfigUpdate {
                urls: Some(vec!["stun:stun.example.com:3478".to_string()]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.urls, vec!["stun:stun.example.com:3478".to_string()]);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.config, updated);
        assert_eq!(store.get(), updated);
    }

    #[test]
    fn test_set_replaces_whole_config() {
        let store = IceConfigStore::default();
        let config = IceConfig {
            use_turn: true,
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: Some("u".to_string()),
            credential: Some("p".to_string()),
            relay_only: true,
        };
        store.set(config.clone()).unwrap();
        assert_eq!(*store.get(), config);
    }
}
