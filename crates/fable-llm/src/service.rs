use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use fable_types::{FableError, Result};

use crate::{GenerationSpec, Generated};

// ---------------------------------------------------------------------------
// GenerationService
// ---------------------------------------------------------------------------

/// A backend that can turn a [`GenerationSpec`] into text.
///
/// Implementations must be side-effect free with respect to workflow state:
/// all accounting and retry logic lives above this trait.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, spec: &GenerationSpec) -> Result<Generated>;
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DynService
// ---------------------------------------------------------------------------

/// Boxed service usable in fallback chains.
pub struct DynService(Box<dyn GenerationService>);

impl DynService {
    pub fn new(service: impl GenerationService + 'static) -> Self {
        Self(Box::new(service))
    }

    pub async fn generate(&self, spec: &GenerationSpec) -> Result<Generated> {
        self.0.generate(spec).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

// ---------------------------------------------------------------------------
// ScriptedService — queued responses for tests
// ---------------------------------------------------------------------------

/// One scripted outcome for a [`ScriptedService`] call.
pub enum ScriptedReply {
    Text(String),
    Error(FableError),
}

/// Test double that plays back a queue of replies, then falls back to a
/// default text (or errors) when the queue is empty. Also counts calls.
pub struct ScriptedService {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    default_text: Option<String>,
    calls: std::sync::atomic::AtomicU64,
}

impl ScriptedService {
    pub fn new(name: impl Into<String>, replies: Vec<ScriptedReply>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(replies.into_iter().collect()),
            default_text: None,
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// After the queue drains, every further call returns `text`.
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_text = Some(text.into());
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(&self, _spec: &GenerationSpec) -> Result<Generated> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(ScriptedReply::Text(text)) => Ok(Generated::text_only(text, &self.name)),
            Some(ScriptedReply::Error(err)) => Err(err),
            None => match &self.default_text {
                Some(text) => Ok(Generated::text_only(text.clone(), &self.name)),
                None => Err(FableError::Other(format!(
                    "scripted service '{}' ran out of replies",
                    self.name
                ))),
            },
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RolePreset;

    fn spec() -> GenerationSpec {
        GenerationSpec::new(RolePreset::StoryArchitect, "test")
    }

    #[tokio::test]
    async fn scripted_plays_back_in_order() {
        let svc = ScriptedService::new(
            "scripted",
            vec![
                ScriptedReply::Text("first".into()),
                ScriptedReply::Error(FableError::RateLimited {
                    provider: "scripted".into(),
                    retry_after_ms: 100,
                }),
                ScriptedReply::Text("third".into()),
            ],
        );

        assert_eq!(svc.generate(&spec()).await.unwrap().text, "first");
        assert!(matches!(
            svc.generate(&spec()).await.unwrap_err(),
            FableError::RateLimited { .. }
        ));
        assert_eq!(svc.generate(&spec()).await.unwrap().text, "third");
        assert_eq!(svc.calls(), 3);
    }

    #[tokio::test]
    async fn scripted_exhausted_without_default_errors() {
        let svc = ScriptedService::new("scripted", vec![]);
        let err = svc.generate(&spec()).await.unwrap_err();
        assert!(err.to_string().contains("ran out of replies"));
    }

    #[tokio::test]
    async fn scripted_falls_back_to_default() {
        let svc = ScriptedService::new("scripted", vec![ScriptedReply::Text("queued".into())])
            .with_default("default text");
        assert_eq!(svc.generate(&spec()).await.unwrap().text, "queued");
        assert_eq!(svc.generate(&spec()).await.unwrap().text, "default text");
        assert_eq!(svc.generate(&spec()).await.unwrap().text, "default text");
    }

    #[tokio::test]
    async fn dyn_service_passes_through() {
        let svc = DynService::new(
            ScriptedService::new("inner", vec![ScriptedReply::Text("hi".into())]),
        );
        assert_eq!(svc.name(), "inner");
        let gen = svc.generate(&spec()).await.unwrap();
        assert_eq!(gen.text, "hi");
        assert_eq!(gen.provider, "inner");
    }
}
