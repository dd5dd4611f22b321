use crate::error::AppError;
use std::sync::Arc;
use tokio::sync::watch;

/// The logged-in trader, passed explicitly to whoever needs it. Observers
/// subscribe for changes instead of polling a global.
#[derive(Debug, Clone)]
pub struct SessionContext {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionContext {
    pub fn new(trader_id: Option<String>) -> Self {
        let trader_id = trader_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let (sender, _) = watch::channel(trader_id);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn login(&self, trader_id: &str) -> Result<(), AppError> {
        let trader_id = trader_id.trim();
        if trader_id.is_empty() {
            return Err(AppError::InvalidArgument(
                "trader id must not be empty".to_string(),
            ));
        }

        self.sender.send_if_modified(|current| {
            if current.as_deref() == Some(trader_id) {
                return false;
            }
            *current = Some(trader_id.to_string());
            true
        });
        Ok(())
    }

    pub fn logout(&self) {
        self.sender.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<String> {
        self.sender.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.sender.subscribe()
    }
}
