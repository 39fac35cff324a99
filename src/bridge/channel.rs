use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::{OwnedMutexGuard, oneshot};

use crate::{Error, ErrorType, Result};

struct Outstanding<T> {
    id: u64,
    /// `None` once the caller gave up; its completion is then swallowed.
    responder: Option<oneshot::Sender<Result<T>>>,
    _turn: OwnedMutexGuard<()>,
}

struct Slot<T> {
    next_id: u64,
    outstanding: Option<Outstanding<T>>,
}

/// Matches a stream of completions 1:1 with requests issued one at a time.
///
/// Requests queue on an async gate, so the next one is only triggered after
/// the previous completion or failure. The response slot is armed before the
/// request is triggered; a completion that finds no armed slot is stale and
/// dropped.
///
/// A request cancelled after it reached the radio keeps the gate until its
/// completion arrives (or [`fail`](ResponseChannel::fail) runs), so the late
/// completion is swallowed instead of answering the next caller.
pub struct ResponseChannel<T> {
    label: &'static str,
    turn: Arc<tokio::sync::Mutex<()>>,
    slot: Mutex<Slot<T>>,
}

/// Request side guard: releases or abandons the slot when the caller stops
/// waiting.
struct Issued<'a, T> {
    slot: &'a Mutex<Slot<T>>,
    id: u64,
    triggered: bool,
}

impl<T> Drop for Issued<'_, T> {
    fn drop(&mut self) {
        let Ok(mut slot) = self.slot.lock() else {
            return;
        };
        let ours = slot
            .outstanding
            .as_ref()
            .is_some_and(|outstanding| outstanding.id == self.id);
        if !ours {
            return;
        }
        if self.triggered {
            if let Some(outstanding) = slot.outstanding.as_mut() {
                outstanding.responder = None;
            }
            return;
        }
        let released = slot.outstanding.take();
        drop(slot);
        drop(released);
    }
}

impl<T: Send + 'static> ResponseChannel<T> {
    pub fn new(label: &'static str) -> Self {
        ResponseChannel {
            label,
            turn: Arc::new(tokio::sync::Mutex::new(())),
            slot: Mutex::new(Slot {
                next_id: 0,
                outstanding: None,
            }),
        }
    }

    /// Waits for its turn, arms the slot, runs `trigger` and waits for the
    /// completion. If `trigger` fails the slot is released and the error
    /// returned.
    pub async fn request<F, Fut>(&self, trigger: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let turn = self.turn.clone().lock_owned().await;
        let (responder, receiver) = oneshot::channel();
        let id = {
            let mut slot = self.lock()?;
            slot.next_id += 1;
            let id = slot.next_id;
            slot.outstanding = Some(Outstanding {
                id,
                responder: Some(responder),
                _turn: turn,
            });
            id
        };
        let mut issued = Issued {
            slot: &self.slot,
            id,
            triggered: false,
        };

        trigger().await?;
        issued.triggered = true;
        match receiver.await {
            Ok(value) => value,
            Err(_) => Err(Error::cancelled()),
        }
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.lock()
            .map(|slot| matches!(slot.outstanding, Some(Outstanding { responder: Some(_), .. })))
            .unwrap_or(false)
    }

    /// Delivers a completion from the callback path. Never blocks.
    pub fn deliver(&self, value: Result<T>) -> bool {
        match self.take() {
            Some(Outstanding {
                responder: Some(responder),
                ..
            }) => responder.send(value).is_ok(),
            Some(_) => {
                debug!("Dropping late {} completion of a cancelled request", self.label);
                false
            }
            None => {
                warn!("Dropping {} completion with no request outstanding", self.label);
                false
            }
        }
    }

    /// Fails the outstanding request, if any, and frees the gate.
    pub fn fail(&self, error: Error) -> bool {
        match self.take() {
            Some(Outstanding {
                responder: Some(responder),
                ..
            }) => responder.send(Err(error)).is_ok(),
            _ => false,
        }
    }

    fn take(&self) -> Option<Outstanding<T>> {
        self.slot.lock().ok().and_then(|mut slot| slot.outstanding.take())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slot<T>>> {
        self.slot.lock().map_err(|_| {
            Error::from_string(format!("{} slot poisoned", self.label), ErrorType::Busy)
        })
    }
}
