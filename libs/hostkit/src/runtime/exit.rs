use std::sync::Arc;

use tokio::sync::watch;

use crate::lifecycle::ServiceExit;

/// Process exit hook called by `start(true)` once the service has stopped.
/// Defaults to [`std::process::exit`]; tests override it.
pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

pub(crate) type ExitSender = watch::Sender<Option<ServiceExit>>;

pub(crate) fn exit_channel() -> (ExitSender, ExitReceiver) {
    let (tx, rx) = watch::channel(None);
    (tx, ExitReceiver(rx))
}

/// Receiving end of the owner's exit channel.
///
/// The exit is published once; every clone observes the same value.
#[derive(Clone, Debug)]
pub struct ExitReceiver(watch::Receiver<Option<ServiceExit>>);

impl ExitReceiver {
    /// Wait until the service has stopped.
    ///
    /// Returns `None` only if the owner went away without publishing an exit.
    pub async fn wait(&mut self) -> Option<ServiceExit> {
        match self.0.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        }
    }

    /// The published exit, without waiting.
    pub fn current(&self) -> Option<ServiceExit> {
        self.0.borrow().clone()
    }
}
