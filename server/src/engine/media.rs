use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::stage::StageCoordinator;

/// Shown after a retry unlocked the microphone but not the camera.
pub const CAMERA_UNAVAILABLE_NOTICE: &str = "Camera unavailable. Microphone access granted.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// What went wrong with local media, as far as the user is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFault {
    /// Nothing could be captured at all. Joining stays blocked until retried.
    NoDevices(String),
    /// The user or the browser refused access.
    AccessDenied(String),
    /// The transport session could not be established.
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Persistent banner; nothing happens until the user retries.
    Manual,
    /// Offer a "grant permission" action.
    GrantPermission,
    /// The next credential or authorization change will try again.
    Automatic,
}

impl MediaFault {
    pub fn classify(err: &MediaError) -> Self {
        match err {
            MediaError::DeviceNotFound(m) => MediaFault::NoDevices(m.clone()),
            MediaError::PermissionDenied(m) | MediaError::Hardware(m) => {
                MediaFault::AccessDenied(m.clone())
            }
            MediaError::Transport(m) => MediaFault::Transport(m.clone()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            MediaFault::NoDevices(_) => RetryPolicy::Manual,
            MediaFault::AccessDenied(_) => RetryPolicy::GrantPermission,
            MediaFault::Transport(_) => RetryPolicy::Automatic,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, MediaFault::NoDevices(_))
    }

    pub fn message(&self) -> &str {
        match self {
            MediaFault::NoDevices(m) | MediaFault::AccessDenied(m) | MediaFault::Transport(m) => m,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDevice {
    pub id: String,
    pub label: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
    pub device_id: Option<String>,
}

/// Everything needed to enter a transport session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcCredentials {
    pub app_id: String,
    pub channel: String,
    pub token: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Published { uid: String, kind: TrackKind },
    Unpublished { uid: String, kind: TrackKind },
    Left { uid: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { audio: bool, video: bool },
    AlreadyJoined,
    /// A previous attempt found no devices; retry access first.
    Blocked,
}

/// Capture devices plus the real-time audio/video transport.
#[async_trait]
pub trait MediaBackend: Send {
    async fn enumerate_browser_devices(&mut self) -> Result<Vec<MediaDevice>, MediaError>;
    async fn enumerate_sdk_devices(&mut self) -> Result<Vec<MediaDevice>, MediaError>;
    async fn join(&mut self, credentials: &RtcCredentials) -> Result<(), MediaError>;
    async fn create_microphone_track(
        &mut self,
        device_id: Option<&str>,
    ) -> Result<LocalTrack, MediaError>;
    async fn create_camera_track(&mut self, device_id: Option<&str>)
    -> Result<LocalTrack, MediaError>;
    async fn publish(&mut self, tracks: &[LocalTrack]) -> Result<(), MediaError>;
    async fn set_track_enabled(
        &mut self,
        track: &LocalTrack,
        enabled: bool,
    ) -> Result<(), MediaError>;
    async fn subscribe(&mut self, uid: &str, kind: TrackKind) -> Result<(), MediaError>;
    async fn play_remote_audio(&mut self, uid: &str);
    async fn stop_remote_audio(&mut self, uid: &str);
    /// Re-issue the device permission prompt.
    async fn request_access(&mut self, audio: bool, video: bool) -> Result<(), MediaError>;
    fn close_track(&mut self, track: &LocalTrack);
    async fn leave(&mut self) -> Result<(), MediaError>;
}

/// Owns local capture and the transport session for one room session.
pub struct MediaSessionManager<B> {
    backend: B,
    audio_devices: Vec<MediaDevice>,
    video_devices: Vec<MediaDevice>,
    selected_audio: Option<String>,
    selected_video: Option<String>,
    joined_with: Option<RtcCredentials>,
    mic: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    may_publish: bool,
    published: bool,
    mic_on: bool,
    camera_on: bool,
    remote_video: Vec<String>,
    remote_audio: HashSet<String>,
    fault: Option<MediaFault>,
    notice: Option<String>,
}

impl<B: MediaBackend> MediaSessionManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            audio_devices: Vec::new(),
            video_devices: Vec::new(),
            selected_audio: None,
            selected_video: None,
            joined_with: None,
            mic: None,
            camera: None,
            may_publish: false,
            published: false,
            mic_on: true,
            camera_on: true,
            remote_video: Vec::new(),
            remote_audio: HashSet::new(),
            fault: None,
            notice: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_joined(&self) -> bool {
        self.joined_with.is_some()
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn mic_on(&self) -> bool {
        self.mic_on
    }

    pub fn camera_on(&self) -> bool {
        self.camera_on
    }

    pub fn has_audio_track(&self) -> bool {
        self.mic.is_some()
    }

    pub fn has_video_track(&self) -> bool {
        self.camera.is_some()
    }

    pub fn fault(&self) -> Option<&MediaFault> {
        self.fault.as_ref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn audio_devices(&self) -> &[MediaDevice] {
        &self.audio_devices
    }

    pub fn video_devices(&self) -> &[MediaDevice] {
        &self.video_devices
    }

    pub fn selected_device(&self, kind: TrackKind) -> Option<&str> {
        match kind {
            TrackKind::Audio => self.selected_audio.as_deref(),
            TrackKind::Video => self.selected_video.as_deref(),
        }
    }

    // ── Devices ─────────────────────────────────────────────────────

    /// Enumerate inputs, falling back to the SDK's view when the browser reports nothing.
    pub async fn load_devices(&mut self) {
        let mut devices = self
            .backend
            .enumerate_browser_devices()
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "browser device enumeration failed");
                Vec::new()
            });
        if devices.is_empty() {
            devices = self
                .backend
                .enumerate_sdk_devices()
                .await
                .unwrap_or_else(|e| {
                    debug!(error = %e, "sdk device enumeration failed");
                    Vec::new()
                });
        }

        let (audio, video): (Vec<_>, Vec<_>) =
            devices.into_iter().partition(|d| d.kind == TrackKind::Audio);
        if self.selected_audio.is_none() {
            self.selected_audio = audio.first().map(|d| d.id.clone());
        }
        if self.selected_video.is_none() {
            self.selected_video = video.first().map(|d| d.id.clone());
        }
        self.audio_devices = audio;
        self.video_devices = video;
    }

    /// Remember a device choice. It is used the next time tracks are acquired.
    pub fn select_device(&mut self, kind: TrackKind, device_id: impl Into<String>) {
        let id = device_id.into();
        match kind {
            TrackKind::Audio => self.selected_audio = Some(id),
            TrackKind::Video => self.selected_video = Some(id),
        }
    }

    // ── Session ─────────────────────────────────────────────────────

    pub async fn join(
        &mut self,
        credentials: &RtcCredentials,
        may_publish: bool,
    ) -> Result<JoinOutcome, MediaError> {
        if self.joined_with.as_ref() == Some(credentials) {
            return Ok(JoinOutcome::AlreadyJoined);
        }
        if self.fault.as_ref().is_some_and(MediaFault::is_blocking) {
            return Ok(JoinOutcome::Blocked);
        }
        if self.joined_with.is_some() {
            self.leave().await;
        }
        self.may_publish = may_publish;

        if let Err(e) = self.backend.join(credentials).await {
            warn!(channel = %credentials.channel, error = %e, "media transport join failed");
            self.fault = Some(MediaFault::classify(&e));
            return Err(e);
        }
        self.joined_with = Some(credentials.clone());
        info!(channel = %credentials.channel, uid = %credentials.uid, "joined media session");

        let sdk = self.backend.enumerate_sdk_devices().await.unwrap_or_default();
        let browser = self
            .backend
            .enumerate_browser_devices()
            .await
            .unwrap_or_default();
        let has = |kind| sdk.iter().chain(browser.iter()).any(|d| d.kind == kind);
        let first_sdk = |kind| sdk.iter().find(|d| d.kind == kind).map(|d| d.id.clone());
        let audio_id = self.selected_audio.clone().or_else(|| first_sdk(TrackKind::Audio));
        let video_id = self.selected_video.clone().or_else(|| first_sdk(TrackKind::Video));

        if audio_id.is_some() || has(TrackKind::Audio) {
            self.mic = self.acquire(TrackKind::Audio, audio_id.as_deref()).await;
        }
        if video_id.is_some() || has(TrackKind::Video) {
            self.camera = self.acquire(TrackKind::Video, video_id.as_deref()).await;
        }

        if self.mic.is_none() && self.camera.is_none() {
            warn!("no microphone or camera could be acquired");
            self.fault = Some(MediaFault::NoDevices(
                "No microphone or camera devices found.".into(),
            ));
            return Ok(JoinOutcome::Joined {
                audio: false,
                video: false,
            });
        }
        self.fault = None;

        if may_publish {
            self.publish_tracks().await?;
        } else {
            // Keep local preview alive but transmit nothing.
            for track in self.mic.iter().chain(self.camera.iter()) {
                self.backend.set_track_enabled(track, false).await?;
            }
            self.mic_on = false;
            self.camera_on = false;
        }

        Ok(JoinOutcome::Joined {
            audio: self.mic.is_some(),
            video: self.camera.is_some(),
        })
    }

    /// Try the selected device, then the default one. Failure only loses this track.
    async fn acquire(&mut self, kind: TrackKind, device_id: Option<&str>) -> Option<LocalTrack> {
        let first = self.create_track(kind, device_id).await;
        let result = match first {
            Ok(track) => Ok(track),
            Err(e) if device_id.is_some() => {
                debug!(?kind, error = %e, "selected device failed, trying default");
                self.create_track(kind, None).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(track) => Some(track),
            Err(e) => {
                warn!(?kind, error = %e, "track acquisition failed");
                None
            }
        }
    }

    async fn create_track(
        &mut self,
        kind: TrackKind,
        device_id: Option<&str>,
    ) -> Result<LocalTrack, MediaError> {
        match kind {
            TrackKind::Audio => self.backend.create_microphone_track(device_id).await,
            TrackKind::Video => self.backend.create_camera_track(device_id).await,
        }
    }

    async fn publish_tracks(&mut self) -> Result<(), MediaError> {
        let tracks: Vec<LocalTrack> = self.mic.iter().chain(self.camera.iter()).cloned().collect();
        if tracks.is_empty() {
            return Ok(());
        }
        if !self.published {
            self.backend.publish(&tracks).await?;
            self.published = true;
            info!(count = tracks.len(), "published local tracks");
        }
        if let Some(mic) = &self.mic {
            self.backend.set_track_enabled(mic, self.mic_on).await?;
        }
        if let Some(camera) = &self.camera {
            self.backend.set_track_enabled(camera, self.camera_on).await?;
        }
        Ok(())
    }

    /// Publishing became allowed (or disallowed). Existing tracks are reused.
    pub async fn set_may_publish(&mut self, may_publish: bool) -> Result<(), MediaError> {
        if self.may_publish == may_publish {
            return Ok(());
        }
        self.may_publish = may_publish;
        if !self.is_joined() {
            return Ok(());
        }
        if may_publish {
            self.mic_on = true;
            self.camera_on = true;
            self.publish_tracks().await
        } else {
            self.set_mic_enabled(false).await?;
            self.set_camera_enabled(false).await
        }
    }

    pub async fn set_mic_enabled(&mut self, enabled: bool) -> Result<(), MediaError> {
        self.mic_on = enabled;
        if let Some(mic) = &self.mic
            && (self.published || !enabled)
        {
            self.backend.set_track_enabled(mic, enabled).await?;
        }
        Ok(())
    }

    pub async fn set_camera_enabled(&mut self, enabled: bool) -> Result<(), MediaError> {
        self.camera_on = enabled;
        if let Some(camera) = &self.camera
            && (self.published || !enabled)
        {
            self.backend.set_track_enabled(camera, enabled).await?;
        }
        Ok(())
    }

    /// The owner asked us to mute.
    pub async fn force_mute(&mut self) -> Result<(), MediaError> {
        info!("microphone muted by room owner");
        self.set_mic_enabled(false).await
    }

    // ── Remote participants ─────────────────────────────────────────

    pub async fn handle_remote_event(&mut self, event: RemoteEvent) -> Result<(), MediaError> {
        match event {
            RemoteEvent::Published { uid, kind } => {
                self.backend.subscribe(&uid, kind).await?;
                match kind {
                    TrackKind::Video => {
                        self.remote_video.retain(|u| *u != uid);
                        self.remote_video.push(uid);
                    }
                    TrackKind::Audio => {
                        self.backend.play_remote_audio(&uid).await;
                        self.remote_audio.insert(uid);
                    }
                }
            }
            RemoteEvent::Unpublished { uid, kind } => match kind {
                TrackKind::Video => self.remote_video.retain(|u| *u != uid),
                TrackKind::Audio => {
                    self.backend.stop_remote_audio(&uid).await;
                    self.remote_audio.remove(&uid);
                }
            },
            RemoteEvent::Left { uid } => {
                self.remote_video.retain(|u| *u != uid);
                self.remote_audio.remove(&uid);
            }
        }
        Ok(())
    }

    pub fn remote_video(&self) -> &[String] {
        &self.remote_video
    }

    pub fn is_hearing(&self, uid: &str) -> bool {
        self.remote_audio.contains(uid)
    }

    /// Remote video that should actually be rendered: only speakers on stage.
    pub fn visible_remote_video(&self, stage: &StageCoordinator) -> Vec<&str> {
        self.remote_video
            .iter()
            .filter(|uid| stage.is_on_stage(uid))
            .map(String::as_str)
            .collect()
    }

    // ── Recovery and teardown ───────────────────────────────────────

    /// Re-prompt for device access after a failure.
    ///
    /// Asks for both kinds, then microphone only. On success the session is
    /// torn down so the next `join` acquires fresh tracks.
    pub async fn retry_access(&mut self) -> Result<(), MediaError> {
        match self.backend.request_access(true, true).await {
            Ok(()) => self.notice = None,
            Err(e) => {
                debug!(error = %e, "camera and microphone refused, trying microphone only");
                if let Err(e) = self.backend.request_access(true, false).await {
                    self.notice = Some(e.to_string());
                    self.fault = Some(MediaFault::classify(&e));
                    return Err(e);
                }
                self.notice = Some(CAMERA_UNAVAILABLE_NOTICE.into());
            }
        }
        self.fault = None;
        self.leave().await;
        Ok(())
    }

    /// Release local tracks, forget remote ones and allow a future join.
    pub async fn leave(&mut self) {
        if self.joined_with.take().is_some()
            && let Err(e) = self.backend.leave().await
        {
            warn!(error = %e, "media transport leave failed");
        }
        for track in [self.mic.take(), self.camera.take()].into_iter().flatten() {
            self.backend.close_track(&track);
        }
        self.remote_video.clear();
        self.remote_audio.clear();
        self.published = false;
    }
}
