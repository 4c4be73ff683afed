use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::validation::validate_topic;

/// Minutes preselected for a new topic.
pub const DEFAULT_TOPIC_MINUTES: u32 = 5;

/// Durations offered when picking a topic length.
pub const DURATION_OPTIONS: [u32; 5] = [1, 2, 3, 5, 10];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgendaError {
    #[error("{0}")]
    Invalid(String),
    #[error("no topic with id {0}")]
    UnknownTopic(String),
}

/// One timed agenda item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub minutes: u32,
}

impl Topic {
    pub fn new(title: impl Into<String>, minutes: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            minutes,
        }
    }

    pub fn seconds(&self) -> u32 {
        self.minutes.saturating_mul(60)
    }
}

/// The editable running order of a debate.
#[derive(Debug, Default)]
pub struct Agenda {
    topics: Vec<Topic>,
    saved: Vec<Topic>,
}

impl Agenda {
    pub fn new(topics: Vec<Topic>) -> Self {
        Self {
            saved: topics.clone(),
            topics,
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn total_minutes(&self) -> u32 {
        self.topics.iter().map(|t| t.minutes).sum()
    }

    pub fn add_topic(&mut self, title: &str, minutes: u32) -> Result<&Topic, AgendaError> {
        let title = title.trim();
        validate_topic(title, minutes).map_err(AgendaError::Invalid)?;
        self.topics.push(Topic::new(title, minutes));
        Ok(&self.topics[self.topics.len() - 1])
    }

    pub fn update_title(&mut self, id: &str, title: &str) -> Result<(), AgendaError> {
        let minutes = self.find(id)?.minutes;
        validate_topic(title, minutes).map_err(AgendaError::Invalid)?;
        self.find_mut(id)?.title = title.to_string();
        Ok(())
    }

    pub fn update_minutes(&mut self, id: &str, minutes: u32) -> Result<(), AgendaError> {
        let title = self.find(id)?.title.clone();
        validate_topic(&title, minutes).map_err(AgendaError::Invalid)?;
        self.find_mut(id)?.minutes = minutes;
        Ok(())
    }

    /// Move the topic at `from` to position `to`. Out-of-range targets are ignored.
    pub fn move_topic(&mut self, from: usize, to: usize) -> bool {
        if from == to || from >= self.topics.len() || to >= self.topics.len() {
            return false;
        }
        let topic = self.topics.remove(from);
        self.topics.insert(to, topic);
        true
    }

    pub fn delete_topic(&mut self, id: &str) -> bool {
        let before = self.topics.len();
        self.topics.retain(|t| t.id != id);
        self.topics.len() != before
    }

    pub fn save(&mut self) {
        self.saved = self.topics.clone();
    }

    /// True when the list differs from the last save.
    pub fn is_dirty(&self) -> bool {
        self.topics != self.saved
    }

    /// Adopt a template's topics, but only when nothing has been planned yet.
    pub fn adopt_template(&mut self, topics: Vec<Topic>) -> bool {
        if !self.topics.is_empty() || topics.is_empty() {
            return false;
        }
        info!(count = topics.len(), "loaded topics from template");
        self.topics = topics;
        self.saved = self.topics.clone();
        true
    }

    fn find(&self, id: &str) -> Result<&Topic, AgendaError> {
        self.topics
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| AgendaError::UnknownTopic(id.to_string()))
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Topic, AgendaError> {
        self.topics
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AgendaError::UnknownTopic(id.to_string()))
    }
}

// ── Timer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AgendaState {
    pub active_index: Option<usize>,
    pub remaining_seconds: u32,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgendaPhase {
    Idle,
    Running,
    Paused,
}

/// Countdown over a topic list, one tick per second while running.
///
/// Topics are passed into every call rather than owned, so edits to the
/// agenda take effect at the next transition. An `active_index` past the
/// end of the list counts as the debate having ended.
#[derive(Debug, Default)]
pub struct AgendaTimer {
    state: AgendaState,
}

impl AgendaTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AgendaState {
        self.state
    }

    pub fn phase(&self, topics: &[Topic]) -> AgendaPhase {
        match self.state.active_index {
            Some(i) if i < topics.len() => {
                if self.state.running {
                    AgendaPhase::Running
                } else {
                    AgendaPhase::Paused
                }
            }
            _ => AgendaPhase::Idle,
        }
    }

    /// Whether a periodic tick source should currently exist.
    pub fn needs_ticks(&self) -> bool {
        self.state.running && self.state.active_index.is_some()
    }

    /// Begin from the first topic when idle, resume when paused.
    pub fn start(&mut self, topics: &[Topic]) {
        if self.state.running || topics.is_empty() {
            return;
        }
        if self.phase(topics) == AgendaPhase::Idle {
            self.state.active_index = Some(0);
            self.state.remaining_seconds = topics[0].seconds();
        }
        self.state.running = true;
        if self.state.remaining_seconds == 0 {
            self.advance(topics);
        }
    }

    pub fn pause(&mut self) {
        self.state.running = false;
    }

    pub fn toggle(&mut self, topics: &[Topic]) {
        if self.state.running {
            self.pause();
        } else {
            self.start(topics);
        }
    }

    /// One second elapsed. Reaching zero moves straight on to the next topic.
    pub fn tick(&mut self, topics: &[Topic]) {
        if !self.state.running {
            return;
        }
        if self.phase(topics) == AgendaPhase::Idle {
            self.end();
            return;
        }
        self.state.remaining_seconds = self.state.remaining_seconds.saturating_sub(1);
        if self.state.remaining_seconds == 0 {
            self.advance(topics);
        }
    }

    /// Jump to the next topic now, or end the debate after the last one.
    pub fn skip(&mut self, topics: &[Topic]) {
        if self.state.active_index.is_none() {
            return;
        }
        self.advance(topics);
    }

    fn advance(&mut self, topics: &[Topic]) {
        let next = self.state.active_index.map_or(0, |i| i + 1);
        match topics.get(next) {
            Some(topic) => {
                self.state.active_index = Some(next);
                self.state.remaining_seconds = topic.seconds();
                info!(index = next, title = %topic.title, "agenda advanced");
            }
            None => self.end(),
        }
    }

    fn end(&mut self) {
        self.state = AgendaState::default();
        info!("agenda finished");
    }
}

/// `m:ss` rendering of a countdown.
pub fn format_clock(total_seconds: u32) -> String {
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(minutes: &[u32]) -> Vec<Topic> {
        minutes
            .iter()
            .enumerate()
            .map(|(i, m)| Topic::new(format!("Topic {i}"), *m))
            .collect()
    }

    fn run(timer: &mut AgendaTimer, topics: &[Topic], ticks: u32) {
        for _ in 0..ticks {
            timer.tick(topics);
        }
    }

    #[test]
    fn test_full_countdown() {
        let topics = topics(&[5, 2]);
        let mut timer = AgendaTimer::new();
        timer.start(&topics);
        assert_eq!(
            timer.state(),
            AgendaState {
                active_index: Some(0),
                remaining_seconds: 300,
                running: true
            }
        );

        run(&mut timer, &topics, 300);
        assert_eq!(
            timer.state(),
            AgendaState {
                active_index: Some(1),
                remaining_seconds: 120,
                running: true
            }
        );

        run(&mut timer, &topics, 120);
        assert_eq!(timer.state().active_index, None);
        assert!(!timer.state().running);
        assert_eq!(timer.phase(&topics), AgendaPhase::Idle);
        assert!(!timer.needs_ticks());
    }

    #[test]
    fn test_skip_from_last_topic_ends() {
        let topics = topics(&[5, 2]);
        let mut timer = AgendaTimer::new();
        timer.start(&topics);
        timer.skip(&topics);
        assert_eq!(timer.state().active_index, Some(1));
        assert_eq!(timer.state().remaining_seconds, 120);
        run(&mut timer, &topics, 10);
        timer.skip(&topics);
        assert_eq!(timer.state(), AgendaState::default());
    }

    #[test]
    fn test_skip_while_paused_keeps_paused() {
        let topics = topics(&[1, 1]);
        let mut timer = AgendaTimer::new();
        timer.start(&topics);
        timer.pause();
        timer.skip(&topics);
        assert_eq!(timer.phase(&topics), AgendaPhase::Paused);
        assert_eq!(timer.state().active_index, Some(1));
    }

    #[test]
    fn test_skip_while_idle_is_noop() {
        let topics = topics(&[1]);
        let mut timer = AgendaTimer::new();
        timer.skip(&topics);
        assert_eq!(timer.state(), AgendaState::default());
    }

    #[test]
    fn test_pause_and_resume_keep_remaining() {
        let topics = topics(&[3]);
        let mut timer = AgendaTimer::new();
        timer.toggle(&topics);
        run(&mut timer, &topics, 15);
        timer.toggle(&topics);
        assert_eq!(timer.phase(&topics), AgendaPhase::Paused);
        run(&mut timer, &topics, 50);
        assert_eq!(timer.state().remaining_seconds, 165);

        timer.toggle(&topics);
        assert_eq!(timer.phase(&topics), AgendaPhase::Running);
        assert_eq!(timer.state().remaining_seconds, 165);
    }

    #[test]
    fn test_start_without_topics_is_noop() {
        let mut timer = AgendaTimer::new();
        timer.start(&[]);
        assert_eq!(timer.state(), AgendaState::default());
    }

    #[test]
    fn test_shrunken_list_ends_debate() {
        let mut list = topics(&[1, 1, 1]);
        let mut timer = AgendaTimer::new();
        timer.start(&list);
        timer.skip(&list);
        timer.skip(&list);
        list.truncate(1);
        assert_eq!(timer.phase(&list), AgendaPhase::Idle);
        timer.tick(&list);
        assert_eq!(timer.state(), AgendaState::default());
    }

    #[test]
    fn test_agenda_editing() {
        let mut agenda = Agenda::default();
        assert!(agenda.add_topic("   ", 5).is_err());
        assert!(agenda.add_topic("Zero", 0).is_err());
        let first = agenda.add_topic(" Openings ", 5).unwrap().id.clone();
        let second = agenda.add_topic("Rebuttals", 3).unwrap().id.clone();
        assert_eq!(agenda.topics()[0].title, "Openings");
        assert_eq!(agenda.total_minutes(), 8);

        agenda.update_minutes(&second, 10).unwrap();
        agenda.update_title(&first, "Opening statements").unwrap();
        assert!(agenda.update_minutes("missing", 1).is_err());

        assert!(agenda.move_topic(1, 0));
        assert!(!agenda.move_topic(0, 5));
        assert_eq!(agenda.topics()[0].id, second);

        assert!(agenda.is_dirty());
        agenda.save();
        assert!(!agenda.is_dirty());

        assert!(agenda.delete_topic(&first));
        assert!(!agenda.delete_topic(&first));
        assert!(agenda.is_dirty());
    }

    #[test]
    fn test_template_only_fills_empty_agenda() {
        let mut agenda = Agenda::default();
        assert!(agenda.adopt_template(topics(&[1, 2])));
        assert!(!agenda.is_dirty());
        assert!(!agenda.adopt_template(topics(&[9])));
        assert_eq!(agenda.topics().len(), 2);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(300), "5:00");
        assert_eq!(format_clock(65), "1:05");
        assert_eq!(format_clock(0), "0:00");
    }
}
