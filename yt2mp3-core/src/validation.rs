use regex::Regex;
use serde::Serialize;

/// Length of a well-formed video identifier.
pub const VIDEO_ID_LEN: usize = 11;

/// Indicator state for the URL input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStatus {
    Empty,
    Valid,
    Invalid,
}

/// Recognizes video links on the two supported hosts and pulls out the video id.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    link_regex: Regex,
    id_regex: Regex,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlValidator {
    pub fn new() -> Self {
        let link_regex = Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+")
            .expect("valid regex");
        let id_regex = Regex::new(r"^.*(youtu.be/|v/|u/\w/|embed/|watch\?v=|&v=)([^#&?]*).*")
            .expect("valid regex");
        Self {
            link_regex,
            id_regex,
        }
    }

    pub fn is_valid(&self, url: &str) -> bool {
        self.link_regex.is_match(url.trim())
    }

    /// Returns the video id only when the captured segment is exactly 11 characters.
    pub fn extract_id(&self, url: &str) -> Option<String> {
        let captures = self.id_regex.captures(url.trim())?;
        let id = captures.get(2)?.as_str();
        (id.chars().count() == VIDEO_ID_LEN).then(|| id.to_string())
    }

    pub fn input_status(&self, url: &str) -> InputStatus {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            InputStatus::Empty
        } else if self.is_valid(trimmed) {
            InputStatus::Valid
        } else {
            InputStatus::Invalid
        }
    }
}
