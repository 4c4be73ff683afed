use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::agenda::{Agenda, AgendaError, AgendaTimer};
use super::envelope::{ChannelMessage, ChatLog, Delivery, Inbound, parse_inbound};
use super::identity::{FALLBACK_DISPLAY_NAME, ResolvedIdentity};
use super::media::{MediaBackend, MediaError, MediaSessionManager, RemoteEvent};
use super::optimistic::Optimistic;
use super::permissions::StageRights;
use super::stage::{StageChange, StageCoordinator, StageEffect, StageError};
use super::transport::{ChannelError, ChannelTransport};
use super::validation::{MAX_CHAT_LENGTH, validate_chat_message};
use crate::client::room_api::{ApiError, MediaGrant, RoomApi};
use crate::db::models::RoomRow;

pub const JOIN_REQUEST_SENT_NOTICE: &str = "Join request sent";
pub const UPDATE_FAILED_NOTICE: &str = "Update failed";
pub const SESSION_UNAVAILABLE_NOTICE: &str = "Live session unavailable. Reload to try again.";

/// Default interval between join-request re-announcements.
pub const DEFAULT_JOIN_REQUEST_RESEND: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Agenda(#[from] AgendaError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("only the room owner can do that")]
    NotOwner,
    #[error("session has ended")]
    Closed,
    #[error("no room api configured")]
    NoApi,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub join_request_resend: Duration,
    pub max_chat_length: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            join_request_resend: DEFAULT_JOIN_REQUEST_RESEND,
            max_chat_length: MAX_CHAT_LENGTH,
        }
    }
}

/// What happened to a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRequestStatus {
    /// The channel is not connected yet; it goes out right after login.
    Queued,
    Sent,
    /// Nothing to ask for: the owner, or already approved.
    NotNeeded,
}

/// UI-originated actions fed into [`RoomSession::run`].
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SendChat(String),
    RequestJoin,
    Approve(String),
    Reject(String),
    SetStage { uid: String, on_stage: bool },
    Mute(String),
    ToggleDebate,
    SkipTopic,
    TogglePublic,
    SetMic(bool),
    SetCamera(bool),
    RetryAccess,
    RemoteMedia(RemoteEvent),
    Leave,
}

/// Everything one participant's view of a live room holds.
///
/// Single owner: every operation takes `&mut self`, so nothing in here is
/// shared or locked. Several sessions can run side by side in one process.
pub struct RoomSession<M, C> {
    identity: ResolvedIdentity,
    room: RoomRow,
    media: MediaSessionManager<M>,
    transport: C,
    api: Option<Arc<dyn RoomApi>>,
    grant: Option<MediaGrant>,
    stage: StageCoordinator,
    agenda: Agenda,
    timer: AgendaTimer,
    chat: ChatLog,
    notices: Vec<String>,
    visibility: Optimistic<bool>,
    options: SessionOptions,
    connected: bool,
    join_request_queued: bool,
    join_requested: bool,
    cancel: CancellationToken,
}

impl<M: MediaBackend, C: ChannelTransport> RoomSession<M, C> {
    pub fn new(
        identity: ResolvedIdentity,
        room: RoomRow,
        media: MediaSessionManager<M>,
        transport: C,
        options: SessionOptions,
    ) -> Self {
        let is_owner = identity.user_id.as_deref() == Some(room.owner_id.as_str());
        let mut stage = StageCoordinator::new(identity.uid.clone(), is_owner);
        stage.record_name(&identity.uid, &identity.display_name);
        Self {
            visibility: Optimistic::new(room.is_public),
            identity,
            room,
            media,
            transport,
            api: None,
            grant: None,
            stage,
            agenda: Agenda::default(),
            timer: AgendaTimer::new(),
            chat: ChatLog::default(),
            notices: Vec::new(),
            options,
            connected: false,
            join_request_queued: false,
            join_requested: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_api(mut self, api: Arc<dyn RoomApi>) -> Self {
        self.api = Some(api);
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn identity(&self) -> &ResolvedIdentity {
        &self.identity
    }

    pub fn room(&self) -> &RoomRow {
        &self.room
    }

    pub fn is_owner(&self) -> bool {
        self.stage.is_owner()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn stage(&self) -> &StageCoordinator {
        &self.stage
    }

    pub fn media(&self) -> &MediaSessionManager<M> {
        &self.media
    }

    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    pub fn agenda_mut(&mut self) -> &mut Agenda {
        &mut self.agenda
    }

    pub fn timer(&self) -> &AgendaTimer {
        &self.timer
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    pub fn is_public(&self) -> bool {
        *self.visibility.get()
    }

    /// Token that ends [`run`](Self::run) and discards late results.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn notify(&mut self, notice: impl Into<String>) {
        self.notices.push(notice.into());
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    // ── Start-up ────────────────────────────────────────────────────

    /// Connect the messaging channel and media session with freshly issued tokens.
    ///
    /// A channel failure leaves the session in the unavailable state. A media
    /// failure only records a fault; chat and stage keep working.
    pub async fn start(&mut self, grant: &MediaGrant) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.grant = Some(grant.clone());

        if let Err(e) = self.connect_channel(&grant.rtm_token).await {
            warn!(channel = %self.room.channel_name, error = %e, "messaging channel unavailable");
            self.notify(SESSION_UNAVAILABLE_NOTICE);
            return Err(e.into());
        }
        self.ensure_live()?;

        let introduce = ChannelMessage::Introduce {
            uid: self.identity.uid.clone(),
            name: self.identity.display_name.clone(),
        };
        self.publish_logged(&introduce).await;

        if let Some(update) = self.stage.init_owner_stage() {
            self.publish_logged(&update).await;
        }
        if std::mem::take(&mut self.join_request_queued) {
            self.send_join_request().await?;
        }

        self.media.load_devices().await;
        self.ensure_live()?;
        let credentials = grant.rtc_credentials();
        match self.media.join(&credentials, self.stage.can_publish()).await {
            Ok(outcome) => debug!(?outcome, "media join finished"),
            Err(e) => {
                warn!(error = %e, "media session unavailable");
                if let Some(fault) = self.media.fault() {
                    let message = fault.message().to_string();
                    self.notify(message);
                }
            }
        }
        self.ensure_live()?;

        if let Err(e) = self.load_template_topics().await {
            warn!(error = %e, "could not load template topics");
        }
        info!(
            room = %self.room.slug,
            uid = %self.identity.uid,
            owner = self.stage.is_owner(),
            "room session started"
        );
        Ok(())
    }

    /// Fetch tokens for this room through the API, then [`start`](Self::start).
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let api = self.api.clone().ok_or(SessionError::NoApi)?;
        let grant = api
            .fetch_credentials(&self.room.channel_name, &self.identity.uid)
            .await?;
        self.start(&grant).await
    }

    async fn connect_channel(&mut self, token: &str) -> Result<(), ChannelError> {
        if self.connected {
            return Ok(());
        }
        self.transport.login(&self.identity.uid, token).await?;
        self.transport.subscribe(&self.room.channel_name).await?;
        self.connected = true;
        Ok(())
    }

    // ── Channel traffic ─────────────────────────────────────────────

    async fn publish(&mut self, msg: &ChannelMessage) -> Result<(), ChannelError> {
        self.transport
            .publish(&self.room.channel_name, &msg.to_json())
            .await
    }

    /// Fire-and-forget publish. Failure is logged, nothing is rolled back.
    async fn publish_logged(&mut self, msg: &ChannelMessage) {
        if let Err(e) = self.publish(msg).await {
            warn!(error = %e, "channel publish failed");
        }
    }

    /// Apply one message from the channel.
    pub async fn handle_delivery(&mut self, delivery: Delivery) {
        if self.cancel.is_cancelled() {
            return;
        }
        match parse_inbound(&delivery.message, &delivery.publisher) {
            Inbound::Control(ChannelMessage::Chat { author, message }) => {
                let author = author
                    .filter(|a| !a.trim().is_empty())
                    .or_else(|| Some(delivery.publisher).filter(|p| !p.is_empty()))
                    .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
                self.chat.push(author, message);
            }
            Inbound::Control(msg) => {
                for effect in self.stage.apply_remote(&msg) {
                    self.apply_effect(effect).await;
                }
            }
            Inbound::PlainText { publisher, text } => {
                let author = if publisher.is_empty() {
                    FALLBACK_DISPLAY_NAME.to_string()
                } else {
                    publisher
                };
                self.chat.push(author, text);
            }
            Inbound::Unrecognized { kind } => {
                debug!(%kind, publisher = %delivery.publisher, "ignoring unknown channel message");
            }
        }
    }

    async fn apply_effect(&mut self, effect: StageEffect) {
        match effect {
            StageEffect::JoinRequested { uid, name } => {
                let who = name.unwrap_or_else(|| self.stage.display_name(&uid).to_string());
                info!(%uid, "join request received");
                self.notify(format!("{who} asked to join the stage"));
            }
            StageEffect::Publish(msg) => self.publish_logged(&msg).await,
            StageEffect::LocalApproved => {
                self.join_requested = false;
                info!(uid = %self.identity.uid, "approved to speak");
                if let Err(e) = self.media.set_may_publish(true).await {
                    warn!(error = %e, "could not start publishing after approval");
                }
                self.notify("You have been approved to speak");
            }
            StageEffect::LocalMuted => {
                if let Err(e) = self.media.force_mute().await {
                    warn!(error = %e, "could not mute microphone");
                }
                self.notify("The host muted your microphone");
            }
        }
    }

    // ── Chat ────────────────────────────────────────────────────────

    /// Publish a chat line and echo it locally once the channel accepted it.
    pub async fn send_chat(&mut self, text: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let text = text.trim();
        validate_chat_message(text, self.options.max_chat_length)
            .map_err(SessionError::InvalidMessage)?;
        let author = self.identity.display_name.clone();
        let msg = ChannelMessage::Chat {
            author: Some(author.clone()),
            message: text.to_string(),
        };
        self.publish(&msg).await?;
        self.chat.push(author, text);
        Ok(())
    }

    // ── Stage ───────────────────────────────────────────────────────

    pub async fn request_join(&mut self) -> Result<JoinRequestStatus, SessionError> {
        self.ensure_live()?;
        if self.stage.is_owner() || self.stage.is_approved(&self.identity.uid) {
            return Ok(JoinRequestStatus::NotNeeded);
        }
        self.join_requested = true;
        if !self.connected {
            self.join_request_queued = true;
            return Ok(JoinRequestStatus::Queued);
        }
        self.send_join_request().await?;
        Ok(JoinRequestStatus::Sent)
    }

    async fn send_join_request(&mut self) -> Result<(), SessionError> {
        let msg = ChannelMessage::RequestJoin {
            uid: self.identity.uid.clone(),
            name: Some(self.identity.display_name.clone()),
        };
        self.publish(&msg).await?;
        self.notify(JOIN_REQUEST_SENT_NOTICE);
        Ok(())
    }

    fn needs_join_resend(&self) -> bool {
        self.connected
            && self.join_requested
            && !self.stage.is_owner()
            && !self.stage.is_approved(&self.identity.uid)
    }

    /// Re-announce a pending join request in case the owner missed it.
    pub async fn resend_join_request(&mut self) {
        if !self.needs_join_resend() {
            return;
        }
        debug!(uid = %self.identity.uid, "re-sending join request");
        let msg = ChannelMessage::RequestJoin {
            uid: self.identity.uid.clone(),
            name: Some(self.identity.display_name.clone()),
        };
        self.publish_logged(&msg).await;
    }

    /// Publish the messages of an applied change, undoing it if any publish fails.
    async fn commit(&mut self, change: StageChange) -> Result<(), SessionError> {
        for msg in &change.messages {
            if let Err(e) = self.transport.publish(&self.room.channel_name, &msg.to_json()).await {
                warn!(error = %e, "stage change not delivered, rolling back");
                self.stage.rollback(change);
                self.notify(UPDATE_FAILED_NOTICE);
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub async fn approve(&mut self, uid: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let change = self.stage.approve(uid)?;
        self.commit(change).await?;
        info!(%uid, "participant approved");
        Ok(())
    }

    pub async fn reject(&mut self, uid: &str) -> Result<bool, SessionError> {
        self.ensure_live()?;
        Ok(self.stage.reject(uid)?)
    }

    pub async fn set_stage(&mut self, uid: &str, on_stage: bool) -> Result<(), SessionError> {
        self.ensure_live()?;
        let change = self.stage.set_stage(uid, on_stage)?;
        self.commit(change).await
    }

    pub async fn mute(&mut self, uid: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let msg = self.stage.mute(uid)?;
        if uid == self.identity.uid {
            self.media.force_mute().await?;
            return Ok(());
        }
        self.publish(&msg).await?;
        Ok(())
    }

    pub async fn set_mic(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.media.set_mic_enabled(enabled).await?;
        Ok(())
    }

    pub async fn set_camera(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.media.set_camera_enabled(enabled).await?;
        Ok(())
    }

    /// Re-prompt for device access, then rejoin with the tokens the session started with.
    pub async fn retry_media_access(&mut self) -> Result<(), SessionError> {
        self.media.retry_access().await?;
        let Some(grant) = self.grant.as_ref() else {
            return Ok(());
        };
        let credentials = grant.rtc_credentials();
        if let Err(e) = self.media.join(&credentials, self.stage.can_publish()).await {
            warn!(error = %e, "media rejoin failed");
            if let Some(fault) = self.media.fault() {
                let message = fault.message().to_string();
                self.notify(message);
            }
            return Err(e.into());
        }
        Ok(())
    }

    // ── Agenda ──────────────────────────────────────────────────────

    fn require_agenda_rights(&self) -> Result<(), SessionError> {
        if self.stage.rights().contains(StageRights::RUN_AGENDA) {
            Ok(())
        } else {
            Err(SessionError::NotOwner)
        }
    }

    /// Start, pause or resume the debate.
    pub fn toggle_debate(&mut self) -> Result<(), SessionError> {
        self.require_agenda_rights()?;
        self.timer.toggle(self.agenda.topics());
        Ok(())
    }

    pub fn skip_topic(&mut self) -> Result<(), SessionError> {
        self.require_agenda_rights()?;
        self.timer.skip(self.agenda.topics());
        Ok(())
    }

    pub fn tick_agenda(&mut self) {
        self.timer.tick(self.agenda.topics());
    }

    /// Fill an empty agenda from the room's template, if it has one.
    pub async fn load_template_topics(&mut self) -> Result<bool, SessionError> {
        let (Some(template_id), Some(api)) = (self.room.template.clone(), self.api.clone()) else {
            return Ok(false);
        };
        if !self.agenda.is_empty() {
            return Ok(false);
        }
        let template = api.fetch_template(&template_id).await?;
        self.ensure_live()?;
        let adopted = self.agenda.adopt_template(template.topics);
        if adopted {
            debug!(template = %template_id, topics = self.agenda.topics().len(), "agenda loaded from template");
        }
        Ok(adopted)
    }

    // ── Room record ─────────────────────────────────────────────────

    /// Flip the room's public flag, showing the new value until the server answers.
    pub async fn toggle_public(&mut self) -> Result<(), SessionError> {
        self.ensure_live()?;
        if !self.stage.is_owner() {
            return Err(SessionError::NotOwner);
        }
        let api = self.api.clone().ok_or(SessionError::NoApi)?;
        let owner = self.room.owner_username.clone();
        let slug = self.room.slug.clone();
        let next = !*self.visibility.get();

        let result = self
            .visibility
            .reconcile(next, |value| async move {
                api.set_visibility(&owner, &slug, value).await.map(|_| ())
            })
            .await;
        match result {
            Ok(()) => {
                self.room.is_public = next;
                info!(room = %self.room.slug, is_public = next, "room visibility changed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "visibility update failed");
                self.notify(UPDATE_FAILED_NOTICE);
                Err(e.into())
            }
        }
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Leave the room: stop the loop, release media, log out of the channel
    /// and, for the owner, mark the room ended.
    pub async fn leave(&mut self) {
        if self.cancel.is_cancelled() && !self.connected && !self.media.is_joined() {
            return;
        }
        self.cancel.cancel();
        self.timer.pause();
        self.media.leave().await;

        if self.connected {
            if let Err(e) = self.transport.unsubscribe(&self.room.channel_name).await {
                debug!(error = %e, "channel unsubscribe failed");
            }
            if let Err(e) = self.transport.logout().await {
                debug!(error = %e, "channel logout failed");
            }
            self.connected = false;
        }

        if self.stage.is_owner()
            && let Some(api) = self.api.clone()
        {
            match api.mark_ended(&self.room.owner_username, &self.room.slug).await {
                Ok(room) => self.room = room,
                Err(e) => warn!(error = %e, "could not mark room ended"),
            }
        }
        info!(room = %self.room.slug, uid = %self.identity.uid, "left room session");
    }

    // ── Event loop ──────────────────────────────────────────────────

    async fn execute(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        match command {
            SessionCommand::SendChat(text) => self.send_chat(&text).await,
            SessionCommand::RequestJoin => self.request_join().await.map(|_| ()),
            SessionCommand::Approve(uid) => self.approve(&uid).await,
            SessionCommand::Reject(uid) => self.reject(&uid).await.map(|_| ()),
            SessionCommand::SetStage { uid, on_stage } => self.set_stage(&uid, on_stage).await,
            SessionCommand::Mute(uid) => self.mute(&uid).await,
            SessionCommand::ToggleDebate => self.toggle_debate(),
            SessionCommand::SkipTopic => self.skip_topic(),
            SessionCommand::TogglePublic => self.toggle_public().await,
            SessionCommand::SetMic(on) => self.set_mic(on).await,
            SessionCommand::SetCamera(on) => self.set_camera(on).await,
            SessionCommand::RetryAccess => self.retry_media_access().await,
            SessionCommand::RemoteMedia(event) => {
                self.media.handle_remote_event(event).await?;
                Ok(())
            }
            SessionCommand::Leave => {
                self.leave().await;
                Ok(())
            }
        }
    }

    /// Drive the session until it is cancelled, the command queue closes or
    /// the channel goes away. Always leaves the room on the way out.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let resend_every = self.options.join_request_resend;
        let mut resend = interval_at(Instant::now() + resend_every, resend_every);
        resend.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut agenda_clock: Option<Interval> = None;
        let cancel = self.cancel.clone();

        loop {
            // The one-second clock only exists while a topic is counting down.
            if self.timer.needs_ticks() {
                if agenda_clock.is_none() {
                    let second = Duration::from_secs(1);
                    let mut clock = interval_at(Instant::now() + second, second);
                    clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    agenda_clock = Some(clock);
                }
            } else {
                agenda_clock = None;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.execute(command).await {
                            debug!(error = %e, "session command failed");
                        }
                    }
                    None => break,
                },
                delivery = self.transport.next_delivery(), if self.connected => match delivery {
                    Some(delivery) => self.handle_delivery(delivery).await,
                    None => {
                        warn!(channel = %self.room.channel_name, "messaging channel closed");
                        self.notify(SESSION_UNAVAILABLE_NOTICE);
                        break;
                    }
                },
                _ = next_tick(&mut agenda_clock) => self.tick_agenda(),
                _ = resend.tick(), if self.needs_join_resend() => self.resend_join_request().await,
            }
        }
        self.leave().await;
    }
}

async fn next_tick(clock: &mut Option<Interval>) {
    match clock {
        Some(clock) => {
            clock.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::db::models::TopicTemplate;
    use crate::engine::agenda::Topic;
    use crate::engine::hub::ChannelHub;
    use crate::engine::media::tests::FakeBackend;
    use crate::engine::transport::HubTransport;

    type TestSession = RoomSession<FakeBackend, HubTransport>;

    const CHANNEL: &str = "ana-debate";

    #[derive(Default)]
    struct FakeApi {
        fail_visibility: bool,
        template: Option<TopicTemplate>,
        ended: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RoomApi for FakeApi {
        async fn fetch_room(&self, _owner: &str, _slug: &str) -> Result<RoomRow, ApiError> {
            Ok(room(None))
        }

        async fn set_visibility(
            &self,
            _owner: &str,
            _slug: &str,
            is_public: bool,
        ) -> Result<RoomRow, ApiError> {
            if self.fail_visibility {
                return Err(ApiError::Status {
                    status: 500,
                    message: "database error".into(),
                });
            }
            let mut room = room(None);
            room.is_public = is_public;
            Ok(room)
        }

        async fn mark_ended(&self, _owner: &str, slug: &str) -> Result<RoomRow, ApiError> {
            self.ended.lock().unwrap().push(slug.to_string());
            let mut room = room(None);
            room.status = "ended".into();
            Ok(room)
        }

        async fn fetch_template(&self, _id: &str) -> Result<TopicTemplate, ApiError> {
            self.template.clone().ok_or(ApiError::NotFound)
        }

        async fn fetch_credentials(&self, channel: &str, uid: &str) -> Result<MediaGrant, ApiError> {
            Ok(grant_for(channel, uid))
        }
    }

    fn room(template: Option<&str>) -> RoomRow {
        RoomRow {
            id: "room-1".into(),
            owner_id: "owner-id".into(),
            owner_username: "ana".into(),
            title: "Debate".into(),
            slug: "debate".into(),
            template: template.map(str::to_string),
            channel_name: CHANNEL.into(),
            status: "active".into(),
            is_public: false,
            header_image_url: None,
            created_at: "2026-01-01T00:00:00.000Z".into(),
            ended_at: None,
        }
    }

    fn grant_for(channel: &str, uid: &str) -> MediaGrant {
        MediaGrant {
            app_id: "app".into(),
            channel: channel.into(),
            uid: uid.into(),
            rtc_token: "rtc".into(),
            rtm_token: "rtm".into(),
            expires_in: 3600,
        }
    }

    fn identity(uid: &str, user_id: Option<&str>, name: &str) -> ResolvedIdentity {
        ResolvedIdentity {
            uid: uid.into(),
            display_name: name.into(),
            avatar_url: None,
            user_id: user_id.map(str::to_string),
        }
    }

    fn session(hub: &Arc<ChannelHub>, who: ResolvedIdentity, room: RoomRow) -> TestSession {
        RoomSession::new(
            who,
            room,
            MediaSessionManager::new(FakeBackend::with_devices()),
            HubTransport::new(hub.clone()),
            SessionOptions::default(),
        )
    }

    fn owner(hub: &Arc<ChannelHub>) -> TestSession {
        session(hub, identity("owner-uid", Some("owner-id"), "Ana"), room(None))
    }

    fn guest(hub: &Arc<ChannelHub>, uid: &str) -> TestSession {
        session(hub, identity(uid, None, "Bob"), room(None))
    }

    async fn started(mut s: TestSession) -> TestSession {
        let grant = grant_for(CHANNEL, &s.identity().uid.clone());
        s.start(&grant).await.unwrap();
        s
    }

    /// Deliver everything queued for `s` right now.
    async fn pump(s: &mut TestSession) -> usize {
        let mut n = 0;
        while let Ok(Some(d)) =
            tokio::time::timeout(Duration::from_millis(20), s.transport.next_delivery()).await
        {
            s.handle_delivery(d).await;
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_owner_start_goes_on_stage_once() {
        let hub = Arc::new(ChannelHub::new());
        let (_id, mut observer) = hub.subscribe(CHANNEL, "observer");
        let mut host = started(owner(&hub)).await;

        assert!(host.is_owner());
        assert!(host.stage().is_on_stage("owner-uid"));
        assert!(host.media().is_published());

        let intro = observer.recv().await.unwrap();
        assert!(matches!(
            parse_inbound(&intro.message, &intro.publisher),
            Inbound::Control(ChannelMessage::Introduce { .. })
        ));
        let update = observer.recv().await.unwrap();
        assert_eq!(
            parse_inbound(&update.message, &update.publisher),
            Inbound::Control(ChannelMessage::StageUpdate {
                uid: "owner-uid".into(),
                on_stage: true
            })
        );

        // Re-entering start does not re-announce the owner.
        host.start(&grant_for(CHANNEL, "owner-uid")).await.unwrap();
        let again = observer.recv().await.unwrap();
        assert!(matches!(
            parse_inbound(&again.message, &again.publisher),
            Inbound::Control(ChannelMessage::Introduce { .. })
        ));
        assert!(observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_guest_is_not_published_until_approved() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = started(owner(&hub)).await;
        let mut bob = guest(&hub, "bob-uid");

        assert_eq!(bob.request_join().await.unwrap(), JoinRequestStatus::Queued);
        let mut bob = started(bob).await;
        assert!(!bob.media().is_published());
        assert!(bob.notices().iter().any(|n| n == JOIN_REQUEST_SENT_NOTICE));

        pump(&mut host).await;
        assert_eq!(host.stage().pending_requests(), ["bob-uid".to_string()]);
        assert!(host.notices().iter().any(|n| n.contains("Bob")));

        host.approve("bob-uid").await.unwrap();
        assert!(host.stage().is_approved("bob-uid"));
        assert!(host.stage().is_on_stage("bob-uid"));
        assert!(host.stage().pending_requests().is_empty());

        pump(&mut bob).await;
        assert!(bob.stage().is_approved("bob-uid"));
        assert!(bob.stage().is_on_stage("bob-uid"));
        assert!(bob.media().is_published());
        assert!(!bob.needs_join_resend());
    }

    #[tokio::test]
    async fn test_owner_needs_no_join_request() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = started(owner(&hub)).await;
        assert_eq!(host.request_join().await.unwrap(), JoinRequestStatus::NotNeeded);
    }

    #[tokio::test]
    async fn test_chat_round_trip_and_local_echo() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = started(owner(&hub)).await;
        let mut bob = started(guest(&hub, "bob-uid")).await;
        pump(&mut host).await;

        bob.send_chat("  hello room  ").await.unwrap();
        assert_eq!(bob.chat().messages()[0].author, "Bob");
        assert_eq!(bob.chat().messages()[0].message, "hello room");

        pump(&mut host).await;
        let last = host.chat().messages().last().unwrap();
        assert_eq!(last.author, "Bob");
        assert_eq!(last.message, "hello room");

        assert!(matches!(
            bob.send_chat("   ").await,
            Err(SessionError::InvalidMessage(_))
        ));
        assert_eq!(bob.chat().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_becomes_chat() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = owner(&hub);
        host.handle_delivery(Delivery {
            channel: CHANNEL.into(),
            publisher: "carol-uid".into(),
            message: "not json {".into(),
        })
        .await;
        host.handle_delivery(Delivery {
            channel: CHANNEL.into(),
            publisher: String::new(),
            message: r#"{"type":"chat","message":"anon"}"#.into(),
        })
        .await;
        let log = host.chat().messages();
        assert_eq!(log[0].author, "carol-uid");
        assert_eq!(log[0].message, "not json {");
        assert_eq!(log[1].author, FALLBACK_DISPLAY_NAME);
    }

    #[tokio::test]
    async fn test_mute_reaches_target_mic_only() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = started(owner(&hub)).await;
        let mut bob = started(guest(&hub, "bob-uid")).await;
        host.approve("bob-uid").await.unwrap();
        pump(&mut bob).await;
        assert!(bob.media().mic_on());

        host.mute("bob-uid").await.unwrap();
        pump(&mut bob).await;
        assert!(!bob.media().mic_on());
        assert!(bob.stage().is_on_stage("bob-uid"));
    }

    #[tokio::test]
    async fn test_guest_cannot_manage_others() {
        let hub = Arc::new(ChannelHub::new());
        let mut bob = started(guest(&hub, "bob-uid")).await;
        assert!(matches!(
            bob.approve("carol").await,
            Err(SessionError::Stage(StageError::NotOwner))
        ));
        assert!(matches!(
            bob.mute("carol").await,
            Err(SessionError::Stage(StageError::NotOwner))
        ));
        assert!(matches!(bob.toggle_debate(), Err(SessionError::NotOwner)));
    }

    #[tokio::test]
    async fn test_failed_publish_rolls_stage_back() {
        let hub = Arc::new(ChannelHub::new());
        // Never started, so every publish fails.
        let mut host = owner(&hub);
        let err = host.set_stage("bob-uid", true).await.unwrap_err();
        assert!(matches!(err, SessionError::Channel(ChannelError::NotLoggedIn)));
        assert!(!host.stage().is_approved("bob-uid"));
        assert!(!host.stage().is_on_stage("bob-uid"));
        assert_eq!(host.notices(), [UPDATE_FAILED_NOTICE.to_string()]);
    }

    #[tokio::test]
    async fn test_debate_runs_through_agenda() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = owner(&hub);
        host.agenda_mut().add_topic("Openings", 5).unwrap();
        host.agenda_mut().add_topic("Rebuttals", 2).unwrap();

        host.toggle_debate().unwrap();
        let state = host.timer().state();
        assert_eq!(state.active_index, Some(0));
        assert_eq!(state.remaining_seconds, 300);
        assert!(state.running);

        for _ in 0..300 {
            host.tick_agenda();
        }
        assert_eq!(host.timer().state().active_index, Some(1));
        assert_eq!(host.timer().state().remaining_seconds, 120);

        host.toggle_debate().unwrap();
        assert!(!host.timer().state().running);
        host.skip_topic().unwrap();
        assert_eq!(host.timer().state().active_index, None);
    }

    #[tokio::test]
    async fn test_template_topics_fill_empty_agenda_only() {
        let hub = Arc::new(ChannelHub::new());
        let api = Arc::new(FakeApi {
            template: Some(TopicTemplate {
                id: "tpl".into(),
                owner_id: "owner-id".into(),
                owner_username: "ana".into(),
                title: "Standard".into(),
                topics: vec![Topic::new("Openings", 5), Topic::new("Closings", 2)],
                created_at: "2026-01-01T00:00:00.000Z".into(),
            }),
            ..Default::default()
        });
        let mut host = session(
            &hub,
            identity("owner-uid", Some("owner-id"), "Ana"),
            room(Some("tpl")),
        )
        .with_api(api.clone());

        assert!(host.load_template_topics().await.unwrap());
        assert_eq!(host.agenda().topics().len(), 2);
        assert_eq!(host.agenda().topics()[1].title, "Closings");
        assert!(!host.load_template_topics().await.unwrap());

        let mut plain = owner(&hub).with_api(api);
        assert!(!plain.load_template_topics().await.unwrap());
    }

    #[tokio::test]
    async fn test_visibility_toggle_confirms_or_rolls_back() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = owner(&hub).with_api(Arc::new(FakeApi::default()));
        host.toggle_public().await.unwrap();
        assert!(host.is_public());
        assert!(host.room().is_public);

        let failing = Arc::new(FakeApi {
            fail_visibility: true,
            ..Default::default()
        });
        let mut host = owner(&hub).with_api(failing);
        assert!(host.toggle_public().await.is_err());
        assert!(!host.is_public());
        assert_eq!(host.notices(), [UPDATE_FAILED_NOTICE.to_string()]);

        let mut bob = guest(&hub, "bob-uid").with_api(Arc::new(FakeApi::default()));
        assert!(matches!(bob.toggle_public().await, Err(SessionError::NotOwner)));
    }

    #[tokio::test]
    async fn test_retry_access_rejoins_with_start_grant() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = started(owner(&hub)).await;
        assert_eq!(host.media().backend().joins, 1);

        host.execute(SessionCommand::RetryAccess).await.unwrap();
        assert!(host.media().is_joined());
        assert!(host.media().is_published());
        assert!(host.media().has_audio_track());
        assert_eq!(host.media().backend().joins, 2);
        assert_eq!(host.media().backend().leaves, 1);

        // Audience members rejoin without publishing.
        let mut bob = started(guest(&hub, "bob-uid")).await;
        bob.execute(SessionCommand::RetryAccess).await.unwrap();
        assert!(bob.media().is_joined());
        assert!(!bob.media().is_published());
    }

    #[tokio::test]
    async fn test_retry_access_before_start_only_reprompts() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = owner(&hub);
        host.execute(SessionCommand::RetryAccess).await.unwrap();
        assert!(!host.media().is_joined());
        assert_eq!(host.media().backend().joins, 0);
    }

    #[tokio::test]
    async fn test_leave_tears_down_and_ends_room() {
        let hub = Arc::new(ChannelHub::new());
        let api = Arc::new(FakeApi::default());
        let mut host = owner(&hub).with_api(api.clone());
        host.start(&grant_for(CHANNEL, "owner-uid")).await.unwrap();
        assert_eq!(hub.subscriber_count(CHANNEL), 1);

        host.leave().await;
        assert!(!host.is_connected());
        assert!(!host.media().is_joined());
        assert_eq!(host.media().backend().leaves, 1);
        assert_eq!(hub.subscriber_count(CHANNEL), 0);
        assert_eq!(*api.ended.lock().unwrap(), ["debate".to_string()]);
        assert!(host.room().is_ended());

        // Late work after teardown is discarded.
        assert!(matches!(host.send_chat("hi").await, Err(SessionError::Closed)));
        host.handle_delivery(Delivery {
            channel: CHANNEL.into(),
            publisher: "x".into(),
            message: "late".into(),
        })
        .await;
        assert!(host.chat().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resends_join_request_until_approved() {
        let hub = Arc::new(ChannelHub::new());
        let (_id, mut observer) = hub.subscribe(CHANNEL, "observer");
        let mut bob = started(guest(&hub, "bob-uid")).await;
        bob.request_join().await.unwrap();

        let is_request = |d: &Delivery| {
            matches!(
                parse_inbound(&d.message, &d.publisher),
                Inbound::Control(ChannelMessage::RequestJoin { .. })
            )
        };
        assert!(!is_request(&observer.recv().await.unwrap()));
        assert!(is_request(&observer.recv().await.unwrap()));

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            bob.run(rx).await;
            bob
        });

        let resent = tokio::time::timeout(Duration::from_secs(20), observer.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(is_request(&resent));

        tx.send(SessionCommand::Leave).await.unwrap();
        let bob = task.await.unwrap();
        assert!(!bob.is_connected());
        assert!(bob.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_agenda_while_running() {
        let hub = Arc::new(ChannelHub::new());
        let mut host = owner(&hub);
        host.agenda_mut().add_topic("Openings", 1).unwrap();
        host.toggle_debate().unwrap();

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            host.run(rx).await;
            host
        });
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        tx.send(SessionCommand::ToggleDebate).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(tx);

        let host = task.await.unwrap();
        let state = host.timer().state();
        assert_eq!(state.active_index, Some(0));
        assert_eq!(state.remaining_seconds, 50);
        assert!(!state.running);
    }
}
