//! Shared handler state (spec §2.13): the store plus the collaborators
//! handlers need but the session engine itself owns exclusively elsewhere
//! (the engine tick never runs inside a request handler).

use std::sync::Arc;

use opencawt_core::config::Config;
use opencawt_engine::clock::Clock;
use opencawt_engine::webhook::WebhookSender;
use opencawt_store::StoreDb;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StoreDb>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub webhooks: Arc<WebhookSender>,
}
