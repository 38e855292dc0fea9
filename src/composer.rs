use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use crate::autocomplete::{FieldAction, FieldKey, NavKey, QueryDebouncer, SuggestionField};
use crate::data::PostPublisher;
use crate::dispatch::{Dispatcher, Response};
use crate::error::ValidationError;
use crate::model::PostId;
use crate::picker::FlowPicker;

pub const MAX_DESCRIPTION_LEN: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDraft {
    pub path: PathBuf,
    pub mime: String,
    pub description: String,
}

impl MediaDraft {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Everything the upload endpoint receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSubmission {
    pub title: String,
    pub is_public: bool,
    pub flows: Vec<String>,
    pub media: Vec<MediaDraft>,
}

/// Draft of a new post.
pub struct Composer {
    title: String,
    is_public: bool,
    media: Vec<MediaDraft>,
    flows: FlowPicker,
    flow_field: SuggestionField,
    submitting: bool,
}

impl Composer {
    pub fn new(flow_field: SuggestionField) -> Self {
        Self {
            title: String::new(),
            is_public: true,
            media: Vec::new(),
            flows: FlowPicker::new(),
            flow_field,
            submitting: false,
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn toggle_public(&mut self) -> bool {
        self.is_public = !self.is_public;
        self.is_public
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    /// Attaches a file after checking it really is an image or a video.
    pub fn add_media(&mut self, path: &Path) -> Result<usize, ValidationError> {
        let mime = tree_magic_mini::from_filepath(path).unwrap_or("application/octet-stream");
        if !(mime.starts_with("image/") || mime.starts_with("video/")) {
            return Err(ValidationError::MediaType {
                name: path.display().to_string(),
            });
        }
        self.media.push(MediaDraft {
            path: path.to_path_buf(),
            mime: mime.to_string(),
            description: String::new(),
        });
        Ok(self.media.len() - 1)
    }

    pub fn remove_media(&mut self, index: usize) -> Option<MediaDraft> {
        (index < self.media.len()).then(|| self.media.remove(index))
    }

    pub fn set_description(&mut self, index: usize, text: &str) -> Result<(), ValidationError> {
        if text.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::DescriptionTooLong {
                max: MAX_DESCRIPTION_LEN,
            });
        }
        if let Some(draft) = self.media.get_mut(index) {
            draft.description = text.to_string();
        }
        Ok(())
    }

    pub fn media(&self) -> &[MediaDraft] {
        &self.media
    }

    pub fn flows(&self) -> &[String] {
        self.flows.flows()
    }

    pub fn flow_field(&self) -> &SuggestionField {
        &self.flow_field
    }

    pub fn flow_field_mut(&mut self) -> &mut SuggestionField {
        &mut self.flow_field
    }

    /// Typing into the flow input; ignored once the picker is full.
    pub fn flow_input(&mut self, raw: &str, now: Instant, debouncer: &mut QueryDebouncer) {
        if self.flows.is_full() {
            return;
        }
        self.flow_field.on_input(raw, now, debouncer);
    }

    /// Routes a navigation key to the flow field and commits whatever it
    /// yields.
    pub fn flow_key(
        &mut self,
        key: NavKey,
        debouncer: &mut QueryDebouncer,
    ) -> Result<FieldAction, ValidationError> {
        let action = self.flow_field.handle_key(key);
        if let FieldAction::Selected(name) | FieldAction::Submitted(name) = &action {
            self.flows.commit(name)?;
            self.flow_field.clear(debouncer);
        }
        Ok(action)
    }

    pub fn remove_flow(&mut self, name: &str) -> bool {
        self.flows.remove(name)
    }

    pub fn validate(&self) -> Result<PostSubmission, ValidationError> {
        if self.media.is_empty() {
            return Err(ValidationError::NoMedia);
        }
        Ok(PostSubmission {
            title: self.title.trim().to_string(),
            is_public: self.is_public,
            flows: self.flows.flows().to_vec(),
            media: self.media.clone(),
        })
    }

    pub fn submit(
        &mut self,
        publisher: &Arc<dyn PostPublisher>,
        dispatcher: &Dispatcher,
    ) -> Result<(), ValidationError> {
        let submission = self.validate()?;
        if self.submitting {
            return Ok(());
        }
        self.submitting = true;
        info!(media = submission.media.len(), flows = ?submission.flows, "composer: uploading post");
        let publisher = publisher.clone();
        dispatcher.spawn(move || Response::PostCreated {
            result: publisher.create_post(&submission),
        });
        Ok(())
    }

    pub fn handle_created(&mut self, result: Result<PostId>) -> Result<PostId> {
        self.submitting = false;
        result.inspect_err(|err| {
            warn!(error = %format!("{err:#}"), "composer: upload failed");
        })
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }
}

pub fn flow_field(delay: std::time::Duration) -> SuggestionField {
    SuggestionField::new(FieldKey::ComposerFlows, delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autocomplete::DEFAULT_DEBOUNCE;
    use crate::data::MockPublisher;
    use crate::dispatch::inline_channel;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn composer() -> Composer {
        Composer::new(flow_field(DEFAULT_DEBOUNCE))
    }

    fn write_png(dir: &Path) -> PathBuf {
        let path = dir.join("pixel.png");
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        std::fs::write(&path, bytes.into_inner()).unwrap();
        path
    }

    #[test]
    fn submission_requires_media() {
        let composer = composer();
        assert_eq!(composer.validate(), Err(ValidationError::NoMedia));
        assert_eq!(
            ValidationError::NoMedia.to_string(),
            "Please upload at least 1 image/video."
        );
    }

    #[test]
    fn media_is_sniffed() {
        let dir = tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "just words").unwrap();
        let png = write_png(dir.path());

        let mut composer = composer();
        assert!(matches!(
            composer.add_media(&text),
            Err(ValidationError::MediaType { .. })
        ));
        assert_eq!(composer.add_media(&png), Ok(0));
        assert_eq!(composer.media()[0].mime, "image/png");
        assert!(composer
            .set_description(0, &"x".repeat(MAX_DESCRIPTION_LEN + 1))
            .is_err());
        composer.set_description(0, "a red pixel").unwrap();
        assert_eq!(composer.media()[0].description, "a red pixel");
    }

    #[test]
    fn flows_commit_through_picker() {
        let mut composer = composer();
        let mut debouncer = QueryDebouncer::new();
        let now = Instant::now();
        composer.flow_input("My Flow", now, &mut debouncer);
        assert_eq!(
            composer.flow_key(NavKey::Enter, &mut debouncer),
            Ok(FieldAction::Submitted("my-flow".into()))
        );
        assert_eq!(composer.flows(), ["my-flow"]);
        assert!(composer.flow_field().input().is_empty());

        composer.flow_input("my flow", now, &mut debouncer);
        assert_eq!(
            composer.flow_key(NavKey::Enter, &mut debouncer),
            Err(ValidationError::DuplicateFlow)
        );
    }

    #[test]
    fn submit_publishes_once() {
        let dir = tempdir().unwrap();
        let png = write_png(dir.path());
        let publisher = Arc::new(MockPublisher::default());
        let dyn_publisher: Arc<dyn PostPublisher> = publisher.clone();
        let (dispatcher, mailbox) = inline_channel();

        let mut composer = composer();
        composer.set_title("  Red  ");
        composer.add_media(&png).unwrap();
        composer.submit(&dyn_publisher, &dispatcher).unwrap();
        assert!(composer.is_submitting());

        match mailbox.try_recv() {
            Some(Response::PostCreated { result }) => {
                let id = composer.handle_created(result).unwrap();
                assert_eq!(id, "new00001");
            }
            _ => panic!("expected upload response"),
        }
        let submitted = publisher.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].title, "Red");
        assert!(submitted[0].is_public);
    }
}
