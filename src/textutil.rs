//! Small text helpers shared by the dispatch engine.

use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

/// Width used when flattening HTML bodies to text summaries.
const TEXT_WIDTH: usize = 400;

/// Flatten an HTML body to plain text. Falls back to the raw input when the
/// HTML cannot be parsed.
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) => text.trim().to_string(),
        Err(_) => html.trim().to_string(),
    }
}

/// Strip path separators and control characters from an attachment filename.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Random alphanumeric token.
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Build an RFC-shaped message id for an outgoing email, scoped to the
/// conversation and the inbox's sending domain.
pub fn generate_email_message_id(conversation_uuid: Uuid, from_address: &str) -> String {
    let domain = from_address
        .rsplit('@')
        .next()
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!(
        "<{}.{}@{}>",
        random_alphanumeric(16),
        conversation_uuid.simple(),
        domain
    )
}
