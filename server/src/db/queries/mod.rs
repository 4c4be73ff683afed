pub mod rooms;
pub mod topic_templates;
pub mod users;
