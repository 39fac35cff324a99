use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{Error, ErrorType, Result};

type Responder<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
struct Registration<T> {
    generation: u64,
    pending: Option<(u64, Responder<T>)>,
}

/// Slot for a single callback that is expected to fire once.
///
/// [`arm`](OneShot::arm) registers a waiter, the callback path calls
/// [`resolve`](OneShot::resolve). A resolve with nobody waiting is dropped.
#[derive(Debug)]
pub struct OneShot<T> {
    registration: Arc<Mutex<Registration<T>>>,
}

impl<T> Clone for OneShot<T> {
    fn clone(&self) -> Self {
        OneShot {
            registration: self.registration.clone(),
        }
    }
}

impl<T: Send + 'static> OneShot<T> {
    pub fn new() -> Self {
        OneShot {
            registration: Arc::new(Mutex::new(Registration {
                generation: 0,
                pending: None,
            })),
        }
    }

    #[cfg(test)]
    fn is_waiting(&self) -> bool {
        if let Ok(registration) = self.registration.lock() {
            return registration.pending.is_some();
        }
        false
    }

    pub fn arm(&self) -> Result<Waiter<T>> {
        let (sender, receiver) = oneshot::channel::<Result<T>>();
        let mut registration = self.registration.lock().map_err(|_| {
            Error::from_string("Callback registration poisoned".to_string(), ErrorType::Busy)
        })?;
        if registration.pending.is_some() {
            return Err(Error::from_string(
                "Already in progress".to_string(),
                ErrorType::Busy,
            ));
        }
        registration.generation += 1;
        let generation = registration.generation;
        registration.pending = Some((generation, sender));

        Ok(Waiter {
            receiver,
            registration: self.registration.clone(),
            generation,
            on_cancel: None,
            settled: false,
        })
    }

    /// Hands `value` to the armed waiter. Returns `false` if nobody was waiting.
    pub fn resolve(&self, value: Result<T>) -> bool {
        let responder = match self.registration.lock() {
            Ok(mut registration) => registration.pending.take(),
            Err(_) => None,
        };
        match responder {
            // The waiter may have gone away between take and send.
            Some((_, responder)) => responder.send(value).is_ok(),
            None => false,
        }
    }

}

impl<T: Send + 'static> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller side of an armed [`OneShot`].
///
/// Dropping it before the callback fires unregisters it and runs the
/// `on_cancel` hook, so the operation behind it can be stopped.
pub struct Waiter<T> {
    receiver: oneshot::Receiver<Result<T>>,
    registration: Arc<Mutex<Registration<T>>>,
    generation: u64,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
    settled: bool,
}

impl<T> Waiter<T> {
    pub fn on_cancel(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub async fn wait(mut self) -> Result<T> {
        let outcome = (&mut self.receiver).await;
        self.settled = true;
        match outcome {
            Ok(value) => value,
            Err(_) => Err(Error::cancelled()),
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Ok(mut registration) = self.registration.lock() {
            let ours = matches!(registration.pending, Some((generation, _)) if generation == self.generation);
            if ours {
                registration.pending = None;
            }
        }
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_armed_waiter() {
        let slot = OneShot::<u8>::new();
        let waiter = slot.arm().unwrap();
        assert!(slot.is_waiting());
        assert!(slot.resolve(Ok(7)));
        assert_eq!(waiter.wait().await.unwrap(), 7);
        assert!(!slot.is_waiting());
    }

    #[test]
    fn resolve_without_waiter_is_dropped() {
        let slot = OneShot::<u8>::new();
        assert!(!slot.resolve(Ok(1)));
        // A later waiter does not see the stale value.
        let _waiter = slot.arm().unwrap();
        assert!(slot.is_waiting());
    }

    #[test]
    fn second_arm_is_busy() {
        let slot = OneShot::<u8>::new();
        let _first = slot.arm().unwrap();
        let err = slot.arm().err().unwrap();
        assert_eq!(err.kind(), ErrorType::Busy);
    }

    #[tokio::test]
    async fn dropping_waiter_runs_cancel_hook_and_unregisters() {
        let slot = OneShot::<u8>::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let waiter = slot.arm().unwrap().on_cancel(move || flag.store(true, Ordering::SeqCst));

        let result = tokio::time::timeout(Duration::from_millis(10), waiter.wait()).await;
        assert!(result.is_err());
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!slot.is_waiting());
        assert!(!slot.resolve(Ok(3)));
    }

    #[tokio::test]
    async fn settled_waiter_skips_cancel_hook() {
        let slot = OneShot::<u8>::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let waiter = slot.arm().unwrap().on_cancel(move || flag.store(true, Ordering::SeqCst));
        slot.resolve(Ok(1));
        waiter.wait().await.unwrap();
        assert!(!stopped.load(Ordering::SeqCst));
    }
}
