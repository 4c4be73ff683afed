use bitflags::bitflags;

bitflags! {
    /// What a participant may do to the stage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageRights: u32 {
        /// Send local audio/video to the transport.
        const PUBLISH            = 1 << 0;
        /// Put oneself on or take oneself off the stage.
        const TOGGLE_OWN_STAGE   = 1 << 1;
        /// Place or remove other participants.
        const MANAGE_STAGE       = 1 << 2;
        /// Approve or reject join requests.
        const APPROVE_REQUESTS   = 1 << 3;
        /// Force another participant's microphone off.
        const MUTE_OTHERS        = 1 << 4;
        /// Start, pause and skip the agenda.
        const RUN_AGENDA         = 1 << 5;
    }
}

/// Rights held by an approved speaker.
pub const SPEAKER: StageRights = StageRights::PUBLISH.union(StageRights::TOGGLE_OWN_STAGE);

/// Rights held by the room owner.
pub const OWNER: StageRights = SPEAKER
    .union(StageRights::MANAGE_STAGE)
    .union(StageRights::APPROVE_REQUESTS)
    .union(StageRights::MUTE_OTHERS)
    .union(StageRights::RUN_AGENDA);

/// Compute a participant's rights.
///
/// The owner holds everything; approval grants speaker rights; everyone
/// else is audience with no rights at all.
pub fn rights_for(is_owner: bool, approved: bool) -> StageRights {
    if is_owner {
        OWNER
    } else if approved {
        SPEAKER
    } else {
        StageRights::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_has_everything() {
        let rights = rights_for(true, false);
        assert!(rights.contains(StageRights::MANAGE_STAGE | StageRights::MUTE_OTHERS));
        assert!(rights.contains(StageRights::PUBLISH));
    }

    #[test]
    fn test_speaker_can_only_manage_self() {
        let rights = rights_for(false, true);
        assert!(rights.contains(StageRights::TOGGLE_OWN_STAGE));
        assert!(!rights.contains(StageRights::MANAGE_STAGE));
        assert!(!rights.contains(StageRights::APPROVE_REQUESTS));
    }

    #[test]
    fn test_audience_has_nothing() {
        assert!(rights_for(false, false).is_empty());
    }
}
