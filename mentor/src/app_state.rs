//! Process-wide context handed to every component that needs the shared
//! stores. Constructed once and cloned into sessions and controllers.

use std::sync::Arc;

use shared_types::Rect;

use crate::chat::{ChatSession, SessionOptions};
use crate::config::Config;
use crate::drafts::DraftStore;
use crate::overlay::OverlayStore;
use crate::persistence::{HttpPersistence, Persistence, ThreadCache};
use crate::transport::{ChatTransport, HttpChatTransport, StaticToken, TokenSource};
use crate::versions::{DocumentVersionController, VersionOptions};

#[derive(Clone)]
pub struct AppContext {
    pub transport: Arc<dyn ChatTransport>,
    pub cache: ThreadCache,
    pub drafts: DraftStore,
    pub overlay: OverlayStore,
}

impl AppContext {
    pub fn new(transport: Arc<dyn ChatTransport>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            transport,
            cache: ThreadCache::new(persistence),
            drafts: DraftStore::new(),
            overlay: OverlayStore::new(),
        }
    }

    /// HTTP transport and persistence against the configured origin.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let tokens: Arc<dyn TokenSource> = Arc::new(StaticToken::new(config.api_token.clone()));
        let transport =
            HttpChatTransport::new(config.chat_url(), tokens.clone(), config.connect_timeout)?;
        let persistence =
            HttpPersistence::new(&config.api_base_url, tokens, config.connect_timeout)?;
        Ok(Self::new(Arc::new(transport), Arc::new(persistence)))
    }

    pub fn persistence(&self) -> Arc<dyn Persistence> {
        self.cache.persistence().clone()
    }

    pub fn session(&self, thread_id: impl Into<String>, options: SessionOptions) -> ChatSession {
        ChatSession::new(
            thread_id,
            self.transport.clone(),
            self.cache.clone(),
            self.drafts.clone(),
            self.overlay.clone(),
            options,
        )
    }

    pub fn version_controller(
        &self,
        document_id: impl Into<String>,
        options: VersionOptions,
    ) -> DocumentVersionController {
        DocumentVersionController::new(
            document_id,
            self.persistence(),
            self.drafts.clone(),
            options,
        )
    }
}

impl Config {
    pub fn session_options(&self, viewport: Rect) -> SessionOptions {
        SessionOptions {
            auto_greeting: self.auto_greeting,
            auto_open: self.auto_open_policy(viewport),
            max_thread_depth: self.max_thread_depth,
        }
    }

    pub fn version_options(&self) -> VersionOptions {
        VersionOptions {
            save_debounce: self.save_debounce,
        }
    }
}
