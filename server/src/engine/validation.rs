/// Maximum chat message length (bytes).
pub const MAX_CHAT_LENGTH: usize = 2000;

/// Maximum room or template title length.
pub const MAX_TITLE_LENGTH: usize = 120;

/// Maximum room slug length.
pub const MAX_SLUG_LENGTH: usize = 40;

/// Maximum topic title length.
pub const MAX_TOPIC_TITLE_LENGTH: usize = 200;

/// Longest a single topic may run.
pub const MAX_TOPIC_MINUTES: u32 = 180;

/// Turn a room name into a URL slug: lowercase, spaces to single hyphens,
/// everything but `a-z0-9` and `-` dropped, capped at 40 characters.
pub fn slugify(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect();

    let mut slug = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug.chars().take(MAX_SLUG_LENGTH).collect()
}

/// Validate a room slug. 1-40 chars of `a-z0-9-`.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("Slug cannot be empty".into());
    }
    if slug.len() > MAX_SLUG_LENGTH {
        return Err(format!(
            "Slug too long (max {} characters)",
            MAX_SLUG_LENGTH
        ));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("Slug can only contain lowercase letters, numbers, and hyphens".into());
    }
    Ok(())
}

/// Validate a room or template title.
pub fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("Title cannot be empty".into());
    }
    if title.len() > MAX_TITLE_LENGTH {
        return Err(format!(
            "Title too long (max {} characters)",
            MAX_TITLE_LENGTH
        ));
    }
    Ok(())
}

/// Validate one agenda topic.
pub fn validate_topic(title: &str, minutes: u32) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("Topic title cannot be empty".into());
    }
    if title.len() > MAX_TOPIC_TITLE_LENGTH {
        return Err(format!(
            "Topic title too long (max {} characters)",
            MAX_TOPIC_TITLE_LENGTH
        ));
    }
    if minutes == 0 || minutes > MAX_TOPIC_MINUTES {
        return Err(format!(
            "Topic duration must be between 1 and {} minutes",
            MAX_TOPIC_MINUTES
        ));
    }
    Ok(())
}

/// Validate a chat line. Must be non-empty and under the length limit.
pub fn validate_chat_message(content: &str, max_len: usize) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message cannot be empty".into());
    }
    if content.len() > max_len {
        return Err(format!("Message too long (max {} characters)", max_len));
    }
    Ok(())
}
