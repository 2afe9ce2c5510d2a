use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{LocalStore, StorageResult};

pub const THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

/// Stored theme, falling back to light when absent or unrecognized.
pub fn load_theme(store: &LocalStore) -> Theme {
    match store.get::<String>(THEME_KEY) {
        Some(raw) => raw.parse().unwrap_or_else(|err: String| {
            warn!(error = %err, "ignoring stored theme");
            Theme::default()
        }),
        None => Theme::default(),
    }
}

pub fn save_theme(store: &LocalStore, theme: Theme) -> StorageResult<()> {
    store.set(THEME_KEY, theme.as_str())
}

/// Flips the stored theme and returns the new value.
pub fn toggle_theme(store: &LocalStore) -> StorageResult<Theme> {
    let next = load_theme(store).toggled();
    save_theme(store, next)?;
    Ok(next)
}
