use crate::error::AppError;
use tokio::sync::watch;

/// Explicit redraw trigger. Each request bumps a generation counter; the view
/// layer waits on a [`RenderSignal`] and redraws from the current snapshot.
/// Redundant requests are harmless.
#[derive(Debug)]
pub struct RenderGate {
    sender: watch::Sender<u64>,
}

#[derive(Debug, Clone)]
pub struct RenderSignal {
    receiver: watch::Receiver<u64>,
}

impl Default for RenderGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderGate {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self { sender }
    }

    pub fn request(&self) {
        self.sender
            .send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn requested(&self) -> u64 {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> RenderSignal {
        RenderSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl RenderSignal {
    /// Waits for the next render request and returns its generation. Several
    /// requests issued between two waits collapse into one wake-up.
    pub async fn changed(&mut self) -> Result<u64, AppError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| AppError::ChannelClosed("render gate dropped"))?;
        Ok(*self.receiver.borrow_and_update())
    }
}
