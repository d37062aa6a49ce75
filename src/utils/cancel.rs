use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Cloneable cancellation handle shared between `main` and the orchestrator.
///
/// A run is cancelled when `cancel()` is called on any clone or when the optional
/// deadline passes.
#[derive(Clone, Debug)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
            deadline: None,
        }
    }

    /// Same signal, plus a time budget counted from now.
    pub fn with_budget(&self, budget: Duration) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            deadline: Some(Instant::now() + budget),
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow() || self.deadline_passed()
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    pub fn reason(&self) -> &'static str {
        if *self.receiver.borrow() {
            "interrupted by user"
        } else {
            "time budget exceeded"
        }
    }

    /// Resolves once the run is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let flag = async move {
            while !*receiver.borrow() {
                if receiver.changed().await.is_err() {
                    // Every sender dropped: nobody can cancel any more.
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flag => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flag.await,
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
