//! In-process media backend.
//!
//! Fabricates session descriptions and host candidates instead of opening
//! devices, and records everything applied to it. Used by the `simulate`
//! command and the integration tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BackendFuture, LocalDescription, MediaBackend};
use crate::config::MediaConfig;
use crate::error::{CallError, Result};
use crate::protocol::{IceCandidate, SdpType, SessionDescription};

/// Base port for fabricated host candidates
const BASE_PORT: u16 = 50_000;

/// Recorded backend state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopbackSnapshot {
    /// Camera/microphone currently held
    pub media_active: bool,
    /// Times media was acquired
    pub acquisitions: u32,
    /// Times media was released
    pub releases: u32,
    /// Glare rollbacks
    pub rollbacks: u32,
    /// Current local description
    pub local_description: Option<SessionDescription>,
    /// Current remote description
    pub remote_description: Option<SessionDescription>,
    /// Remote candidates applied, in order
    pub applied: Vec<IceCandidate>,
}

/// Loopback media backend
#[derive(Debug, Clone)]
pub struct LoopbackMedia {
    /// Local participant name, used as SDP origin
    origin: String,
    /// Tracks to advertise
    config: MediaConfig,
    /// Fail every acquisition
    deny_media: bool,
    /// Candidate lines that fail to apply
    rejected: HashSet<String>,
    /// Candidates gathered per local description
    candidates_per_description: usize,
    /// Artificial delay for description creation
    latency: Option<Duration>,
    /// Shared recorded state
    state: Arc<Mutex<LoopbackSnapshot>>,
}

impl LoopbackMedia {
    /// Create backend for a participant
    pub fn new(origin: impl Into<String>, config: MediaConfig) -> Self {
        Self {
            origin: origin.into(),
            config,
            deny_media: false,
            rejected: HashSet::new(),
            candidates_per_description: 2,
            latency: None,
            state: Arc::new(Mutex::new(LoopbackSnapshot::default())),
        }
    }

    /// Fail media acquisition, as if the user denied camera access
    pub fn deny_media(mut self) -> Self {
        self.deny_media = true;
        self
    }

    /// Fail to apply the given candidate line
    pub fn reject_candidate(mut self, candidate: impl Into<String>) -> Self {
        self.rejected.insert(candidate.into());
        self
    }

    /// Number of candidates gathered per description
    pub fn with_candidates(mut self, count: usize) -> Self {
        self.candidates_per_description = count;
        self
    }

    /// Delay offer/answer creation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Copy of the recorded state
    pub async fn snapshot(&self) -> LoopbackSnapshot {
        self.state.lock().await.clone()
    }

    fn fabricate(&self, sdp_type: SdpType, version: u32) -> LocalDescription {
        let setup = match sdp_type {
            SdpType::Offer => "actpass",
            SdpType::Answer => "active",
        };

        let mut sdp = format!(
            "v=0\r\no={} {} {} IN IP4 127.0.0.1\r\ns=peercall\r\nt=0 0\r\n",
            self.origin,
            uuid::Uuid::new_v4().as_u128() as u32,
            version
        );
        let mut mids = Vec::new();
        if self.config.audio {
            mids.push(("audio", "111 opus/48000/2"));
        }
        if self.config.video {
            mids.push(("video", "96 VP8/90000"));
        }
        for (index, (kind, codec)) in mids.iter().enumerate() {
            sdp.push_str(&format!(
                "m={kind} 9 UDP/TLS/RTP/SAVPF {}\r\na=mid:{index}\r\na=setup:{setup}\r\na=rtpmap:{codec}\r\n",
                &codec[..codec.find(' ').unwrap_or(codec.len())],
            ));
        }

        let mut candidates: Vec<IceCandidate> = (0..self.candidates_per_description)
            .map(|n| {
                let port = BASE_PORT + n as u16;
                IceCandidate::new(format!(
                    "candidate:{n} 1 udp {} 127.0.0.1 {port} typ host",
                    2_130_706_431u32.saturating_sub(n as u32)
                ))
                .with_mid("0", 0)
            })
            .collect();
        if !self.config.stun_servers.is_empty() && self.candidates_per_description > 0 {
            candidates.push(
                IceCandidate::new(format!(
                    "candidate:{} 1 udp 1694498815 203.0.113.7 {} typ srflx raddr 127.0.0.1 rport {BASE_PORT}",
                    self.candidates_per_description, BASE_PORT
                ))
                .with_mid("0", 0),
            );
        }

        let description = match sdp_type {
            SdpType::Offer => SessionDescription::offer(sdp),
            SdpType::Answer => SessionDescription::answer(sdp),
        };
        LocalDescription::new(description).with_candidates(candidates)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl MediaBackend for LoopbackMedia {
    fn acquire_media(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if self.deny_media {
                return Err(CallError::MediaAcquisition(
                    "permission denied for camera/microphone".to_string(),
                ));
            }

            let mut state = self.state.lock().await;
            if !state.media_active {
                state.media_active = true;
                state.acquisitions += 1;
                info!(
                    origin = %self.origin,
                    audio = self.config.audio,
                    video = self.config.video,
                    "Local media acquired"
                );
            }
            Ok(())
        })
    }

    fn create_offer(&self) -> BackendFuture<'_, LocalDescription> {
        Box::pin(async move {
            self.delay().await;
            let mut state = self.state.lock().await;
            if !state.media_active {
                return Err(CallError::Backend("no local media to offer".to_string()));
            }

            let created = self.fabricate(SdpType::Offer, state.rollbacks + 1);
            state.local_description = Some(created.description.clone());
            Ok(created)
        })
    }

    fn create_answer<'a>(
        &'a self,
        remote: &'a SessionDescription,
    ) -> BackendFuture<'a, LocalDescription> {
        Box::pin(async move {
            self.delay().await;
            let mut state = self.state.lock().await;
            if !state.media_active {
                return Err(CallError::Backend("no local media to answer with".to_string()));
            }
            if state.remote_description.as_ref() != Some(remote) {
                return Err(CallError::Backend(
                    "answer requested for an offer that was not applied".to_string(),
                ));
            }

            let created = self.fabricate(SdpType::Answer, 1);
            state.local_description = Some(created.description.clone());
            Ok(created)
        })
    }

    fn apply_remote_description<'a>(
        &'a self,
        description: &'a SessionDescription,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if !description.sdp.starts_with("v=0") {
                return Err(CallError::MalformedPayload(
                    "remote description does not start with v=0".to_string(),
                ));
            }
            let mut state = self.state.lock().await;
            state.remote_description = Some(description.clone());
            debug!(origin = %self.origin, sdp_type = ?description.sdp_type, "Remote description set");
            Ok(())
        })
    }

    fn apply_candidate<'a>(&'a self, candidate: &'a IceCandidate) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.remote_description.is_none() {
                return Err(CallError::Backend(
                    "candidate applied before remote description".to_string(),
                ));
            }
            if self.rejected.contains(&candidate.candidate) {
                return Err(CallError::Backend(format!(
                    "transport rejected {}",
                    candidate.candidate
                )));
            }
            state.applied.push(candidate.clone());
            Ok(())
        })
    }

    fn rollback(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.local_description = None;
            state.rollbacks += 1;
            debug!(origin = %self.origin, "Local offer rolled back");
            Ok(())
        })
    }

    fn release_media(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.media_active {
                state.releases += 1;
            }
            state.media_active = false;
            state.local_description = None;
            state.remote_description = None;
            info!(origin = %self.origin, "Local media released");
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}
