// pwnai-core/src/backends/mod.rs

//! Chat backends: named strategies that turn a [`UseChatRequest`] into a stream of
//! [`UseChatResponse`] events.

pub mod claude;
pub mod pwnai;
pub mod stream;

pub use claude::ClaudeBackend;
pub use pwnai::PwnaiBackend;

use crate::errors::PwnaiError;
use crate::models::chat::{UseChatRequest, UseChatResponse};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub trait ChatBackend: Send + Sync {
    /// Starts a completion and returns the event stream.
    ///
    /// The stream yields zero or more `Content`/`ToolCall` events followed by exactly
    /// one `Done` or `Error`, unless `cancel` fires first.
    fn stream_completion(
        &self,
        cancel: CancellationToken,
        request: UseChatRequest,
    ) -> mpsc::Receiver<UseChatResponse>;

    fn model(&self) -> &str;

    fn api_type(&self) -> &'static str;
}

/// The closed set of backend kinds.
pub enum Backend {
    Pwnai(PwnaiBackend),
    Claude(ClaudeBackend),
}

impl ChatBackend for Backend {
    fn stream_completion(
        &self,
        cancel: CancellationToken,
        request: UseChatRequest,
    ) -> mpsc::Receiver<UseChatResponse> {
        match self {
            Backend::Pwnai(b) => b.stream_completion(cancel, request),
            Backend::Claude(b) => b.stream_completion(cancel, request),
        }
    }

    fn model(&self) -> &str {
        match self {
            Backend::Pwnai(b) => b.model(),
            Backend::Claude(b) => b.model(),
        }
    }

    fn api_type(&self) -> &'static str {
        match self {
            Backend::Pwnai(b) => b.api_type(),
            Backend::Claude(b) => b.api_type(),
        }
    }
}

pub type BackendFactory = Arc<dyn Fn() -> Backend + Send + Sync>;

/// Backend factories by name. Registering a name twice replaces the first factory.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    default_backend: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Backend + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            debug!(backend = %name, "Replacing registered backend factory");
        }
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_backend = Some(name.into());
    }

    pub fn default_backend(&self) -> Option<&str> {
        self.default_backend.as_deref()
    }

    /// Builds a fresh backend instance for `name`.
    pub fn resolve(&self, name: &str) -> Result<Backend, PwnaiError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| PwnaiError::not_found(format!("backend '{}'", name)))
    }

    pub fn resolve_default(&self) -> Result<Backend, PwnaiError> {
        let name = self
            .default_backend
            .as_deref()
            .ok_or_else(|| PwnaiError::config("no default backend configured"))?;
        self.resolve(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::stream::tests::ScriptedClient;
    use super::*;
    use crate::api::ChatClient;

    fn client(model: &'static str) -> Arc<dyn ChatClient> {
        struct Named(&'static str, ScriptedClient);
        #[async_trait::async_trait]
        impl ChatClient for Named {
            async fn chat(
                &self,
                messages: &[crate::models::chat::ChatMessage],
                tools: &[crate::models::tools::ToolSpec],
            ) -> Result<crate::models::chat::ChatResponse, PwnaiError> {
                self.1.chat(messages, tools).await
            }
            fn model(&self) -> &str {
                self.0
            }
        }
        Arc::new(Named(model, ScriptedClient::default()))
    }

    #[test]
    fn test_resolve_unknown_backend() {
        let registry = BackendRegistry::new();
        match registry.resolve("nope") {
            Err(e) => assert_eq!(e, PwnaiError::not_found("backend 'nope'")),
            Ok(_) => panic!("expected not found"),
        }
        assert!(matches!(
            registry.resolve_default(),
            Err(PwnaiError::Config(_))
        ));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = BackendRegistry::new();
        let first = client("first-model");
        let second = client("second-model");
        registry.register("pwnai", move || Backend::Pwnai(PwnaiBackend::new(first.clone())));
        registry.register("pwnai", move || Backend::Pwnai(PwnaiBackend::new(second.clone())));
        registry.set_default("pwnai");

        let backend = registry.resolve_default().unwrap();
        assert_eq!(backend.model(), "second-model");
        assert_eq!(backend.api_type(), "pwnai");
        assert_eq!(registry.names(), vec!["pwnai".to_string()]);
    }

    #[test]
    fn test_each_resolve_builds_a_new_instance() {
        let mut registry = BackendRegistry::new();
        let c = client("claude-sonnet-4-5");
        registry.register("claude", move || {
            Backend::Claude(ClaudeBackend::new(c.clone(), None))
        });
        let a = registry.resolve("claude").unwrap();
        let b = registry.resolve("claude").unwrap();
        assert_eq!(a.api_type(), "claude");
        assert_eq!(b.model(), "claude-sonnet-4-5");
    }
}
