use std::sync::{Arc, Mutex};

use super::types::ActiveTab;
use crate::events::{EventBus, QueueEventPayload};
use crate::logging::UPLOAD_COMPONENT;

/// Shared active-tab state; every switch is published as `TabChanged`
#[derive(Debug, Clone)]
pub struct TabSwitcher {
    tab: Arc<Mutex<ActiveTab>>,
    events: EventBus,
}

impl TabSwitcher {
    pub fn new(events: EventBus) -> Self {
        Self {
            tab: Arc::new(Mutex::new(ActiveTab::Uploading)),
            events,
        }
    }

    pub fn current(&self) -> ActiveTab {
        *self.tab.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn switch_to(&self, tab: ActiveTab) {
        *self.tab.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = tab;
        let _ = self
            .events
            .publish(UPLOAD_COMPONENT, QueueEventPayload::TabChanged { tab });
    }
}
