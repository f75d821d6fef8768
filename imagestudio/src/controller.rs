//! Session state for the studio: settings, the displayed image, history and
//! the flags that gate generation.
//!
//! A generation runs in two halves so hosts can keep the network call off
//! their input loop: [`StudioController::begin_generation`] checks the
//! preconditions and enters the loading state, and
//! [`StudioController::complete_generation`] applies the outcome. The
//! `loading` flag is the only guard against overlapping requests.

use tracing::{debug, info, warn};

use crate::client::{GenerateError, GeneratedImage, ImageGenerator, ENTITY_NOT_FOUND};
use crate::history::{CurrentImage, History, HistoryItem};
use crate::key_selection::KeyCapability;
use crate::settings::{ImageModel, ImageSettings, ImageSize, SettingsPatch};

pub const KEY_ERROR_MESSAGE: &str = "API Key error. Please re-select your Pro model API key.";
pub const GENERIC_ERROR_PREFIX: &str = "Failed to generate image: ";

/// Settings captured when a generation started.
#[derive(Debug, Clone)]
pub struct PendingGeneration {
    settings: ImageSettings,
}

impl PendingGeneration {
    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }
}

pub struct StudioController {
    settings: ImageSettings,
    current_image: Option<CurrentImage>,
    history: History,
    loading: bool,
    error: Option<String>,
    key_ready: bool,
    show_key_prompt: bool,
    keys: KeyCapability,
}

impl StudioController {
    pub fn new(keys: KeyCapability) -> Self {
        Self {
            settings: ImageSettings::default(),
            current_image: None,
            history: History::new(),
            loading: false,
            error: None,
            key_ready: false,
            show_key_prompt: false,
            keys,
        }
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    pub fn current_image(&self) -> Option<&CurrentImage> {
        self.current_image.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_key_ready(&self) -> bool {
        self.key_ready
    }

    pub fn is_key_prompt_open(&self) -> bool {
        self.show_key_prompt
    }

    pub fn change_settings(&mut self, patch: SettingsPatch) {
        self.settings = self.settings.merged(patch);
    }

    /// Switches model. Every switch resets search and size to their
    /// defaults; choosing Pro also checks whether a key has been selected.
    pub async fn change_model(&mut self, model: ImageModel) {
        if model.is_pro() {
            match &self.keys {
                KeyCapability::Available(selector) => {
                    if selector.has_selected_api_key().await {
                        self.key_ready = true;
                    } else {
                        self.show_key_prompt = true;
                        self.key_ready = false;
                    }
                }
                KeyCapability::Unavailable => {
                    warn!("key selection is not available; the Pro model may not work without an API key");
                    self.key_ready = true;
                }
            }
        }
        self.change_settings(SettingsPatch {
            model: Some(model),
            use_search: Some(false),
            image_size: Some(ImageSize::default()),
            ..Default::default()
        });
    }

    /// Runs the host's key picker and assumes it succeeded.
    pub async fn select_api_key(&mut self) {
        let KeyCapability::Available(selector) = &self.keys else {
            debug!("select_api_key ignored: key selection is not available");
            return;
        };
        selector.open_select_key().await;
        self.key_ready = true;
        self.show_key_prompt = false;
    }

    pub fn dismiss_key_prompt(&mut self) {
        self.show_key_prompt = false;
    }

    /// Checks preconditions and enters the loading state. Returns `None`
    /// when nothing should be sent.
    pub fn begin_generation(&mut self) -> Option<PendingGeneration> {
        if self.settings.is_empty_request() {
            debug!("generate skipped: empty prompt and no input image");
            return None;
        }
        if self.loading {
            debug!("generate skipped: a generation is already in flight");
            return None;
        }
        if self.settings.model.is_pro() && !self.key_ready {
            debug!("generate blocked: Pro model selected without a ready key");
            self.show_key_prompt = true;
            return None;
        }

        self.loading = true;
        self.error = None;
        self.current_image = None;
        info!(model = self.settings.model.id(), "starting image generation");
        Some(PendingGeneration {
            settings: self.settings.clone(),
        })
    }

    /// Applies the outcome of a generation started by [`Self::begin_generation`].
    pub fn complete_generation(
        &mut self,
        pending: PendingGeneration,
        result: Result<GeneratedImage, GenerateError>,
    ) {
        match result {
            Ok(generated) => {
                let image = CurrentImage {
                    src: generated.image_url,
                    prompt: pending.settings.prompt,
                };
                let id = self.history.record(&image).id.clone();
                info!(history_id = %id, "image generated");
                self.current_image = Some(image);
            }
            Err(err) => {
                let message = err.to_string();
                // Matched on the message text: the API reports a revoked or
                // unauthorised key only through this wording.
                if message.contains(ENTITY_NOT_FOUND) {
                    warn!("API rejected the selected key: {message}");
                    self.error = Some(KEY_ERROR_MESSAGE.to_string());
                    self.key_ready = false;
                    self.show_key_prompt = true;
                } else {
                    warn!("image generation failed: {message}");
                    self.error = Some(format!("{GENERIC_ERROR_PREFIX}{message}"));
                }
            }
        }
        self.loading = false;
    }

    /// Full generation cycle: guard, one client call, state update.
    pub async fn generate<G>(&mut self, generator: &G)
    where
        G: ImageGenerator + ?Sized,
    {
        let Some(pending) = self.begin_generation() else {
            return;
        };
        let result = generator.generate_image(pending.settings()).await;
        self.complete_generation(pending, result);
    }

    pub fn select_history_item(&mut self, item: &HistoryItem) {
        self.current_image = Some(CurrentImage::from(item));
    }
}
