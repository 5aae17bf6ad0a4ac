// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
use crate::extensions::colour::AdjustContrast as _;
use crate::store::{KeyValueStore, StoreError};
use crate::types::Colour;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DESIRED_CONTRAST: f32 = 0.8;
/// Store key of the only persisted setting.
pub const DESIRED_CONTRAST_KEY: &str = "desiredContrast";
/// Thinner fonts are raised to this weight.
pub const NORMAL_FONT_WEIGHT: u16 = 400;

/// Tunables of a correction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Target relative contrast in `[0, 1]`; 0 disables colour correction.
    pub desired_contrast: f32,
    /// Assumed behind every element when no ancestor declares an opaque background.
    pub default_background: Colour,
    /// Scrollbar thumb colour written to the document root.
    pub scrollbar_colour: Colour,
    /// How long to wait for background images before correcting without them.
    pub image_deadline_ms: u64,
    /// Number of dominant colours extracted from each background image.
    pub palette_size: usize,
    pub min_font_weight: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            desired_contrast: DEFAULT_DESIRED_CONTRAST,
            default_background: Colour::WHITE,
            scrollbar_colour: Colour::rgb(120.0, 120.0, 120.0),
            image_deadline_ms: 3000,
            palette_size: 5,
            min_font_weight: NORMAL_FONT_WEIGHT,
        }
    }
}

impl Settings {
    pub fn image_deadline(&self) -> Duration {
        Duration::from_millis(self.image_deadline_ms)
    }

    /// Replaces out-of-range values with defaults so the pipeline's preconditions hold.
    pub fn sanitised(mut self) -> Self {
        let defaults = Self::default();
        if !(0.0..=1.0).contains(&self.desired_contrast) {
            log::warn!(
                "Invalid desired contrast {}, using {}",
                self.desired_contrast,
                defaults.desired_contrast
            );
            self.desired_contrast = defaults.desired_contrast;
        }
        if !self.default_background.is_opaque() {
            log::warn!("Default background must be opaque, using {}", defaults.default_background);
            self.default_background = defaults.default_background;
        }
        if !self.scrollbar_colour.is_opaque() {
            self.scrollbar_colour = self.scrollbar_colour.as_opaque(&Colour::WHITE);
        }
        if self.palette_size == 0 {
            self.palette_size = defaults.palette_size;
        }
        self
    }

    /// The value written to the root's `scrollbar-color`: thumb, then a transparent track.
    pub fn scrollbar_style(&self) -> String {
        format!("{} rgba(0, 0, 0, 0)", self.scrollbar_colour)
    }
}

/// A user-written settings file.
///
/// The desired contrast is kept apart from the other settings: when the file
/// sets it, it takes precedence over the stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub desired_contrast: Option<f32>,
    #[serde(flatten)]
    pub settings: Settings,
}

impl SettingsFile {
    /// Loads a JSON settings file; absent fields take their defaults.
    pub async fn read(path: &Path) -> Result<Self, StoreError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut file: Self = serde_json::from_str(&content)?;
        file.settings = file.settings.sanitised();
        Ok(file)
    }
}

/// Reads a desired contrast, accepting only finite values in `[0, 1]`.
pub fn parse_desired_contrast(raw: &str) -> Option<f32> {
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|value| (0.0..=1.0).contains(value))
}

/// Loads the persisted desired contrast.
///
/// A missing or invalid entry falls back to the default, which is then written back.
/// Store failures are logged and also yield the default.
pub async fn load_desired_contrast<S: KeyValueStore>(store: &S) -> f32 {
    let stored = match store.get(DESIRED_CONTRAST_KEY).await {
        Ok(stored) => stored,
        Err(e) => {
            log::error!("Failed to read {DESIRED_CONTRAST_KEY}: {e}");
            return DEFAULT_DESIRED_CONTRAST;
        }
    };

    if let Some(value) = stored.as_deref().and_then(parse_desired_contrast) {
        return value;
    }

    log::warn!(
        "Stored {DESIRED_CONTRAST_KEY} {stored:?} is missing or invalid, using {DEFAULT_DESIRED_CONTRAST}"
    );
    if let Err(e) = save_desired_contrast(store, DEFAULT_DESIRED_CONTRAST).await {
        log::error!("Failed to persist default {DESIRED_CONTRAST_KEY}: {e}");
    }
    DEFAULT_DESIRED_CONTRAST
}

/// Chooses the desired contrast of a run: an explicit value wins, then one from a
/// settings file, then the stored value.
pub async fn choose_desired_contrast<S: KeyValueStore>(
    explicit: Option<f32>,
    from_file: Option<f32>,
    store: &S,
) -> f32 {
    if let Some(value) = explicit {
        return value;
    }
    match from_file {
        Some(value) if (0.0..=1.0).contains(&value) => return value,
        Some(value) => log::warn!("Ignoring desired contrast {value} from the settings file"),
        None => {}
    }
    load_desired_contrast(store).await
}

pub async fn save_desired_contrast<S: KeyValueStore>(
    store: &S,
    value: f32,
) -> Result<(), StoreError> {
    store.set(DESIRED_CONTRAST_KEY, &value.to_string()).await
}
