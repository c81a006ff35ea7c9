use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, time::Clock};
use crate::services::events::EventBus;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    clock: Clock,
    events: EventBus,
}

impl AppState {
    pub(crate) fn new(settings: Settings, db: PgPool, clock: Clock, events: EventBus) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, clock, events }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.inner.events
    }
}
