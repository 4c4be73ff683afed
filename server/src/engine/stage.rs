use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::envelope::ChannelMessage;
use super::permissions::{StageRights, rights_for};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("only the room owner can do that")]
    NotOwner,
    #[error("participant {0} has not been approved to speak")]
    NotApproved(String),
}

/// A participant as shown in the stage and roster panels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub is_local: bool,
    pub avatar_url: Option<String>,
}

/// Side effects the session must carry out after a remote message was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEffect {
    /// Someone new asked to speak; the owner should be told.
    JoinRequested { uid: String, name: Option<String> },
    /// The coordinator wants this message published.
    Publish(ChannelMessage),
    /// The local participant was just approved and may start publishing.
    LocalApproved,
    /// The owner asked the local participant to mute.
    LocalMuted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    uid: String,
    on_stage: Option<bool>,
    approved: bool,
    request_position: Option<usize>,
}

/// A local stage mutation that has been applied but not yet confirmed.
///
/// Publish `messages` in order; hand the change back to
/// [`StageCoordinator::rollback`] if any publish fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageChange {
    pub messages: Vec<ChannelMessage>,
    undo: Snapshot,
}

/// Tracks approval and stage membership for every participant a session has heard of.
///
/// Each uid has two independent axes: `approved` only ever goes false→true,
/// `on_stage` toggles freely. An approved uid is never in the join-request list.
#[derive(Debug)]
pub struct StageCoordinator {
    local_uid: String,
    is_owner: bool,
    on_stage: HashMap<String, bool>,
    approved: HashSet<String>,
    join_requests: Vec<String>,
    names: HashMap<String, String>,
    owner_stage_initialized: bool,
}

impl StageCoordinator {
    pub fn new(local_uid: impl Into<String>, is_owner: bool) -> Self {
        Self {
            local_uid: local_uid.into(),
            is_owner,
            on_stage: HashMap::new(),
            approved: HashSet::new(),
            join_requests: Vec::new(),
            names: HashMap::new(),
            owner_stage_initialized: false,
        }
    }

    pub fn local_uid(&self) -> &str {
        &self.local_uid
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Ownership is only known once the room record has loaded.
    pub fn set_owner(&mut self, is_owner: bool) {
        self.is_owner = is_owner;
    }

    pub fn rights(&self) -> StageRights {
        rights_for(self.is_owner, self.approved.contains(&self.local_uid))
    }

    pub fn can_publish(&self) -> bool {
        self.rights().contains(StageRights::PUBLISH)
    }

    pub fn is_on_stage(&self, uid: &str) -> bool {
        self.on_stage.get(uid).copied().unwrap_or(false)
    }

    pub fn is_approved(&self, uid: &str) -> bool {
        self.approved.contains(uid)
    }

    /// Pending requests, oldest first.
    pub fn pending_requests(&self) -> &[String] {
        &self.join_requests
    }

    pub fn record_name(&mut self, uid: &str, name: &str) {
        self.names.insert(uid.to_string(), name.to_string());
    }

    pub fn display_name<'a>(&'a self, uid: &'a str) -> &'a str {
        self.names.get(uid).map(String::as_str).unwrap_or(uid)
    }

    /// Put the owner on stage. Only the first call on an owner's session has
    /// any effect; it returns the `stage_update` to broadcast.
    pub fn init_owner_stage(&mut self) -> Option<ChannelMessage> {
        if !self.is_owner || self.owner_stage_initialized {
            return None;
        }
        self.owner_stage_initialized = true;
        self.on_stage.entry(self.local_uid.clone()).or_insert(true);
        if !self.is_on_stage(&self.local_uid) {
            return None;
        }
        info!(uid = %self.local_uid, "owner placed on stage");
        Some(ChannelMessage::StageUpdate {
            uid: self.local_uid.clone(),
            on_stage: true,
        })
    }

    // ── Remote messages ─────────────────────────────────────────────

    pub fn apply_remote(&mut self, msg: &ChannelMessage) -> Vec<StageEffect> {
        match msg {
            ChannelMessage::Introduce { uid, name } => {
                self.record_name(uid, name);
                Vec::new()
            }
            ChannelMessage::RequestJoin { uid, name } => {
                if let Some(name) = name {
                    self.record_name(uid, name);
                }
                if self.approved.contains(uid) {
                    // The approval never reached them; say it again.
                    if self.is_owner {
                        debug!(%uid, "re-sending approval to already approved participant");
                        return vec![StageEffect::Publish(ChannelMessage::ApproveJoin {
                            uid: uid.clone(),
                        })];
                    }
                    return Vec::new();
                }
                if self.join_requests.contains(uid) {
                    return Vec::new();
                }
                self.join_requests.push(uid.clone());
                if self.is_owner {
                    vec![StageEffect::JoinRequested {
                        uid: uid.clone(),
                        name: name.clone(),
                    }]
                } else {
                    Vec::new()
                }
            }
            ChannelMessage::ApproveJoin { uid } => {
                let newly = self.mark_approved(uid);
                if newly && *uid == self.local_uid {
                    vec![StageEffect::LocalApproved]
                } else {
                    Vec::new()
                }
            }
            ChannelMessage::StageUpdate { uid, on_stage } => {
                self.on_stage.insert(uid.clone(), *on_stage);
                Vec::new()
            }
            ChannelMessage::Mute { uid } => {
                if *uid == self.local_uid {
                    vec![StageEffect::LocalMuted]
                } else {
                    Vec::new()
                }
            }
            ChannelMessage::Chat { .. } => Vec::new(),
        }
    }

    fn mark_approved(&mut self, uid: &str) -> bool {
        self.join_requests.retain(|r| r != uid);
        self.approved.insert(uid.to_string())
    }

    // ── Local actions ───────────────────────────────────────────────

    /// Approve a participant and put them on stage in one step.
    pub fn approve(&mut self, uid: &str) -> Result<StageChange, StageError> {
        self.require(StageRights::APPROVE_REQUESTS)?;
        let undo = self.snapshot(uid);
        self.mark_approved(uid);
        self.on_stage.insert(uid.to_string(), true);
        Ok(StageChange {
            messages: vec![
                ChannelMessage::ApproveJoin {
                    uid: uid.to_string(),
                },
                ChannelMessage::StageUpdate {
                    uid: uid.to_string(),
                    on_stage: true,
                },
            ],
            undo,
        })
    }

    /// Drop a join request without approving. The participant may ask again.
    pub fn reject(&mut self, uid: &str) -> Result<bool, StageError> {
        self.require(StageRights::APPROVE_REQUESTS)?;
        let before = self.join_requests.len();
        self.join_requests.retain(|r| r != uid);
        Ok(self.join_requests.len() != before)
    }

    /// Place a participant on stage or take them off.
    ///
    /// Managing someone else needs the owner. Placing an unapproved
    /// participant on stage approves them first.
    pub fn set_stage(&mut self, uid: &str, on_stage: bool) -> Result<StageChange, StageError> {
        let is_self = uid == self.local_uid;
        if is_self {
            self.require(StageRights::TOGGLE_OWN_STAGE)
                .map_err(|_| StageError::NotApproved(uid.to_string()))?;
        } else {
            self.require(StageRights::MANAGE_STAGE)?;
        }

        let undo = self.snapshot(uid);
        let mut messages = Vec::with_capacity(2);
        let needs_approval = on_stage && !self.approved.contains(uid) && !(is_self && self.is_owner);
        if needs_approval {
            self.mark_approved(uid);
            messages.push(ChannelMessage::ApproveJoin {
                uid: uid.to_string(),
            });
        }
        self.on_stage.insert(uid.to_string(), on_stage);
        messages.push(ChannelMessage::StageUpdate {
            uid: uid.to_string(),
            on_stage,
        });
        Ok(StageChange { messages, undo })
    }

    /// Ask a participant to mute. Stage membership is unaffected.
    pub fn mute(&self, uid: &str) -> Result<ChannelMessage, StageError> {
        self.require(StageRights::MUTE_OTHERS)?;
        Ok(ChannelMessage::Mute {
            uid: uid.to_string(),
        })
    }

    /// Undo a change whose messages could not be published.
    pub fn rollback(&mut self, change: StageChange) {
        let Snapshot {
            uid,
            on_stage,
            approved,
            request_position,
        } = change.undo;

        match on_stage {
            Some(v) => {
                self.on_stage.insert(uid.clone(), v);
            }
            None => {
                self.on_stage.remove(&uid);
            }
        }
        if !approved {
            self.approved.remove(&uid);
        }
        if let Some(pos) = request_position
            && !self.join_requests.contains(&uid)
        {
            let pos = pos.min(self.join_requests.len());
            self.join_requests.insert(pos, uid.clone());
        }
        debug!(%uid, "stage change rolled back");
    }

    fn snapshot(&self, uid: &str) -> Snapshot {
        Snapshot {
            uid: uid.to_string(),
            on_stage: self.on_stage.get(uid).copied(),
            approved: self.approved.contains(uid),
            request_position: self.join_requests.iter().position(|r| r == uid),
        }
    }

    fn require(&self, needed: StageRights) -> Result<(), StageError> {
        if self.rights().contains(needed) {
            Ok(())
        } else {
            Err(StageError::NotOwner)
        }
    }

    // ── Views ───────────────────────────────────────────────────────

    /// Participants currently on stage, in roster order.
    pub fn on_stage_participants<'a>(&self, roster: &'a [Participant]) -> Vec<&'a Participant> {
        roster.iter().filter(|p| self.is_on_stage(&p.id)).collect()
    }

    /// Roster filtered by a case-insensitive name query, on-stage first, then by name.
    pub fn listing<'a>(&self, roster: &'a [Participant], query: &str) -> Vec<&'a Participant> {
        let query = query.trim().to_lowercase();
        let mut list: Vec<&Participant> = roster
            .iter()
            .filter(|p| query.is_empty() || p.display_name.to_lowercase().contains(&query))
            .collect();
        list.sort_by(|a, b| {
            self.is_on_stage(&b.id)
                .cmp(&self.is_on_stage(&a.id))
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        list
    }
}
