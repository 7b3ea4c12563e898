//! Identity observer: turns the provider's watch channel into a handler callback that sees
//! "identity present" / "identity absent" exactly once per real change.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::task::AbortHandle;
use tracing::debug;

use super::principal::{same_principal, SharedIdentity};
use super::provider::IdentityProvider;

type Slot<F> = Arc<ReentrantMutex<RefCell<Option<F>>>>;

pub struct IdentityObserver {
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityObserver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self { Self { provider } }

    /// Register `handler`. It is called synchronously, before this returns, with the current
    /// identity, then from a background task on every change of principal. Consecutive
    /// events for the same uid are collapsed. Must be called inside a tokio runtime.
    pub fn subscribe<F>(&self, handler: F) -> Unsubscribe
    where
        F: FnMut(Option<SharedIdentity>) + Send + 'static,
    {
        let mut rx = self.provider.watch_identity();
        let active = Arc::new(AtomicBool::new(true));
        let slot: Slot<F> = Arc::new(ReentrantMutex::new(RefCell::new(Some(handler))));

        let initial = rx.borrow_and_update().clone();
        debug!(target: "opsconsole::observer", present = initial.is_some(), "observer.initial");
        deliver(&slot, &active, initial.clone());

        let task = tokio::spawn({
            let slot = slot.clone();
            let active = active.clone();
            async move {
                let mut last = initial;
                while rx.changed().await.is_ok() {
                    let next = rx.borrow_and_update().clone();
                    if same_principal(last.as_ref(), next.as_ref()) {
                        continue;
                    }
                    last = next.clone();
                    debug!(target: "opsconsole::observer", present = next.is_some(), "observer.change");
                    if !deliver(&slot, &active, next) {
                        break;
                    }
                }
            }
        });

        Unsubscribe { active, abort: Mutex::new(Some(task.abort_handle())), clear: Box::new(move || clear_slot(&slot)) }
    }
}

// Returns false once the subscription is gone.
fn deliver<F>(slot: &Slot<F>, active: &AtomicBool, identity: Option<SharedIdentity>) -> bool
where
    F: FnMut(Option<SharedIdentity>),
{
    let guard = slot.lock();
    if !active.load(Ordering::SeqCst) {
        return false;
    }
    let Ok(mut cell) = guard.try_borrow_mut() else { return true };
    let delivered = match cell.as_mut() {
        Some(h) => {
            h(identity);
            true
        }
        None => false,
    };
    delivered
}

fn clear_slot<F>(slot: &Slot<F>) {
    let guard = slot.lock();
    // Already borrowed means unsubscribe runs from inside the handler; the flag stops the task.
    let borrowed = guard.try_borrow_mut();
    if let Ok(mut cell) = borrowed {
        cell.take();
    }
}

/// Subscription handle. Unsubscribes on drop; `unsubscribe` may be called any number of times,
/// including from inside the handler.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct Unsubscribe {
    active: Arc<AtomicBool>,
    abort: Mutex<Option<AbortHandle>>,
    clear: Box<dyn Fn() + Send + Sync>,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(h) = self.abort.lock().take() {
            h.abort();
        }
        (self.clear)();
    }

    pub fn is_active(&self) -> bool { self.active.load(Ordering::SeqCst) }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) { self.unsubscribe(); }
}
