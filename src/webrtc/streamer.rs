//! Signaling handler
//!
//! Turns offer, ICE, close and cleanup requests into registry operations.
//! Negotiation happens before the registry lock is taken; only the final
//! evict-and-install swap is serialized.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{IceConfig, IceConfigUpdate};
use super::peer::{Peer, PeerTransport};
use super::session::{Session, SessionInfo, SessionRegistry};
use super::signaling::{IceCandidate, SdpAnswer, SdpOffer, SessionMode};
use crate::camera::DeviceSupervisor;
use crate::config::IceConfigStore;
use crate::error::{AppError, Result};

/// Idle age used by cleanup requests that do not give one
pub const DEFAULT_IDLE_MAX_AGE: Duration = Duration::from_secs(3600);

/// Single-viewer WebRTC streamer
pub struct WebRtcStreamer {
    supervisor: Arc<DeviceSupervisor>,
    transport: Arc<dyn PeerTransport>,
    registry: SessionRegistry,
    ice: IceConfigStore,
    idle_max_age: Duration,
}

impl WebRtcStreamer {
    pub fn new(
        supervisor: Arc<DeviceSupervisor>,
        transport: Arc<dyn PeerTransport>,
        ice: IceConfigStore,
        idle_max_age: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            transport,
            registry: SessionRegistry::new(),
            ice,
            idle_max_age,
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Attach media to a fresh peer and answer the offer
    async fn prepare(
        &self,
        peer: &Arc<dyn Peer>,
        offer: SdpOffer,
        mode: SessionMode,
    ) -> Result<SdpAnswer> {
        peer.add_video_track(self.supervisor.frames().subscribe()).await?;
        if mode.has_control_channel() {
            peer.create_control_channel().await?;
        }
        peer.negotiate(offer).await
    }

    /// Negotiate a new viewer and hand it the camera.
    ///
    /// Any previous viewer is closed before this returns. Returns the answer
    /// and the new client id.
    pub async fn handle_offer(
        &self,
        offer: SdpOffer,
        mode: SessionMode,
    ) -> Result<(SdpAnswer, String)> {
        self.supervisor.start();

        let client_id = Uuid::new_v4().to_string();
        let ice = self.ice.get();
        debug!(client_id = %client_id, %mode, "Creating peer");

        let peer = self
            .transport
            .create_peer(&client_id, &ice)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create peer: {}", e)))?;

        let answer = match self.prepare(&peer, offer, mode).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(client_id = %client_id, "Offer rejected: {}", e);
                if let Err(close_err) = peer.close().await {
                    debug!("Error closing rejected peer: {}", close_err);
                }
                return Err(match e {
                    AppError::Negotiation(_) => e,
                    other => AppError::Negotiation(other.to_string()),
                });
            }
        };

        let client_id = self
            .registry
            .install(Session::new(client_id, peer, mode))
            .await;
        Ok((answer, client_id))
    }

    /// Forward a remote ICE candidate to the current session
    pub async fn handle_ice_candidate(
        &self,
        client_id: &str,
        candidate: IceCandidate,
    ) -> Result<()> {
        let peer = self.registry.peer_for(client_id).await.ok_or_else(|| {
            debug!(client_id = %client_id, "ICE candidate for stale session");
            AppError::NotFound(format!("Session {} is not current", client_id))
        })?;
        peer.add_ice_candidate(candidate).await
    }

    /// Close a session. Stale ids are acknowledged without effect.
    pub async fn handle_close(&self, client_id: &str) -> bool {
        self.registry.evict(client_id).await
    }

    /// Release the camera regardless of who holds it
    pub async fn handle_force_release(&self) -> Option<String> {
        let released = self.registry.evict_current().await;
        match &released {
            Some(id) => info!(client_id = %id, "Camera force-released"),
            None => debug!("Force release with no active session"),
        }
        released
    }

    /// Evict the current session if it is older than `max_age`, or the
    /// configured idle age when none is given
    pub async fn handle_cleanup(&self, max_age: Option<Duration>) -> Option<String> {
        self.registry
            .evict_if_idle(max_age.unwrap_or(self.idle_max_age))
            .await
    }

    /// Evict the current session if its peer has failed or closed
    pub async fn reap_failed(&self) -> Option<String> {
        self.registry.evict_failed().await
    }

    /// Periodically evict sessions whose peer has gone away
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let streamer = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(streamer) = streamer.upgrade() else {
                    break;
                };
                if let Some(id) = streamer.reap_failed().await {
                    info!(client_id = %id, "Reaped dead session");
                }
            }
        })
    }

    pub async fn current_session(&self) -> Option<SessionInfo> {
        self.registry.current().await
    }

    pub fn ice_config(&self) -> Arc<IceConfig> {
        self.ice.get()
    }

    /// Validate and apply an ICE config update. Existing sessions keep the
    /// configuration they were created with.
    pub fn update_ice_config(&self, update: IceConfigUpdate) -> Result<Arc<IceConfig>> {
        self.ice.update(update)
    }

    pub fn idle_max_age(&self) -> Duration {
        self.idle_max_age
    }

    pub fn supervisor(&self) -> &Arc<DeviceSupervisor> {
        &self.supervisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{OpenStep, ScriptedBackend};
    use crate::camera::{FrameSource, SupervisorConfig};
    use crate::webrtc::signaling::ConnectionState;
    use crate::webrtc::testing::{FakeTransport, PeerEvent, BAD_SDP};

    fn streamer_with(transport: Arc<FakeTransport>) -> Arc<WebRtcStreamer> {
        let backend = Arc::new(ScriptedBackend::new(vec![], OpenStep::Stream));
        let supervisor = Arc::new(DeviceSupervisor::new(
            backend,
            Arc::new(FrameSource::new()),
            SupervisorConfig::default(),
        ));
        WebRtcStreamer::new(
            supervisor,
            transport,
            IceConfigStore::default(),
            DEFAULT_IDLE_MAX_AGE,
        )
    }

    fn offer() -> SdpOffer {
        SdpOffer::new("v=0")
    }

    #[tokio::test]
    async fn test_offer_starts_camera_and_installs() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());
        assert!(!streamer.supervisor().is_running());

        let (answer, id) = streamer
            .handle_offer(offer(), SessionMode::VideoWithControl)
            .await
            .unwrap();
        assert_eq!(answer.sdp, format!("answer-for-{}", id));
        assert!(streamer.supervisor().is_running());

        let peer = transport.find(&id).unwrap();
        assert!(peer.has_video());
        assert!(peer.has_control());
        assert_eq!(
            streamer.current_session().await.map(|s| s.client_id),
            Some(id)
        );
        streamer.supervisor().stop();
    }

    #[tokio::test]
    async fn test_video_only_has_no_control_channel() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());

        let (_, id) = streamer
            .handle_offer(offer(), SessionMode::VideoOnly)
            .await
            .unwrap();
        let peer = transport.find(&id).unwrap();
        assert!(peer.has_video());
        assert!(!peer.has_control());
        streamer.supervisor().stop();
    }

    #[tokio::test]
    async fn test_second_viewer_replaces_first() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());

        let (_, a1) = streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();
        let (_, b1) = streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();
        assert_ne!(a1, b1);

        // A was closed by the time B's answer came back
        assert!(transport.find(&a1).unwrap().is_closed());
        let log = &transport.log;
        let negotiated_b = log.position(&PeerEvent::Negotiated(b1.clone())).unwrap();
        let closed_a = log.position(&PeerEvent::Closed(a1.clone())).unwrap();
        assert!(negotiated_b < closed_a);

        let current = streamer.current_session().await.unwrap();
        assert_eq!(current.client_id, b1);

        // Late close from A changes nothing
        assert!(!streamer.handle_close(&a1).await);
        assert_eq!(streamer.current_session().await.unwrap().client_id, b1);
        assert!(!transport.find(&b1).unwrap().is_closed());
        streamer.supervisor().stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_offer_storm_leaves_one_session() {
        let transport = Arc::new(FakeTransport::with_negotiate_delay(Duration::from_millis(5)));
        let streamer = streamer_with(transport.clone());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let streamer = streamer.clone();
                tokio::spawn(async move {
                    streamer.handle_offer(offer(), SessionMode::default()).await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            let (_, id) = task.await.unwrap().unwrap();
            ids.push(id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);

        let current = streamer.current_session().await.unwrap().client_id;
        let open: Vec<_> = transport
            .peers()
            .into_iter()
            .filter(|p| !p.is_closed())
            .collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].client_id(), current);
        streamer.supervisor().stop();
    }

    #[tokio::test]
    async fn test_bad_offer_leaves_registry_alone() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());
        let (_, a1) = streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();

        let result = streamer
            .handle_offer(SdpOffer::new(BAD_SDP), SessionMode::default())
            .await;
        assert!(matches!(result, Err(AppError::Negotiation(_))));

        assert_eq!(streamer.current_session().await.unwrap().client_id, a1);
        assert!(!transport.find(&a1).unwrap().is_closed());
        // The rejected peer was torn down
        let rejected: Vec<_> = transport
            .peers()
            .into_iter()
            .filter(|p| p.client_id() != a1)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].is_closed());
        streamer.supervisor().stop();
    }

    #[tokio::test]
    async fn test_ice_candidate_routing() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());
        let (_, id) = streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();

        let result = streamer
            .handle_ice_candidate("stale", IceCandidate::new("candidate:stale"))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        streamer
            .handle_ice_candidate(&id, IceCandidate::new("candidate:1"))
            .await
            .unwrap();
        assert!(transport
            .log
            .snapshot()
            .contains(&PeerEvent::Candidate("candidate:1".to_string())));
        assert!(!transport
            .log
            .snapshot()
            .contains(&PeerEvent::Candidate("candidate:stale".to_string())));
        streamer.supervisor().stop();
    }

    #[tokio::test]
    async fn test_force_release_and_cleanup() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());
        assert!(streamer.handle_force_release().await.is_none());

        let (_, id) = streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();
        // Default idle age is an hour
        assert!(streamer.handle_cleanup(None).await.is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            streamer.handle_cleanup(Some(Duration::from_millis(1))).await,
            Some(id.clone())
        );
        assert!(transport.find(&id).unwrap().is_closed());

        let (_, id) = streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();
        assert_eq!(streamer.handle_force_release().await, Some(id));
        assert!(streamer.current_session().await.is_none());
        streamer.supervisor().stop();
    }

    #[tokio::test]
    async fn test_reap_failed_peer() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());
        let (_, id) = streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();

        assert!(streamer.reap_failed().await.is_none());
        transport.find(&id).unwrap().set_state(ConnectionState::Failed);
        assert_eq!(streamer.reap_failed().await, Some(id));
        streamer.supervisor().stop();
    }

    #[tokio::test]
    async fn test_ice_update_applies_to_next_session() {
        let transport = Arc::new(FakeTransport::new());
        let streamer = streamer_with(transport.clone());

        let bad = streamer.update_ice_config(IceConfigUpdate {
            relay_only: Some(true),
            ..Default::default()
        });
        assert!(matches!(bad, Err(AppError::Config(_))));
        assert!(!streamer.ice_config().relay_only);

        streamer
            .update_ice_config(IceConfigUpdate {
                use_turn: Some(true),
                urls: Some(vec!["turn:turn.example.com:3478".to_string()]),
                username: Some("user".to_string()),
                credential: Some("pass".to_string()),
                relay_only: Some(true),
            })
            .unwrap();

        streamer.handle_offer(offer(), SessionMode::default()).await.unwrap();
        let used = transport.last_ice().unwrap();
        assert!(used.use_turn);
        assert!(used.relay_only);
        streamer.supervisor().stop();
    }
}
