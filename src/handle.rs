// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Lazily created broker handles.
//!
//! Connections and channels follow the same lifecycle: absent until first
//! use, live while the broker keeps them open, stale once the broker has
//! dropped them. A stale handle is discarded and replaced on the next access.

use crate::errors::AmqpError;
use std::future::Future;
use tracing::{debug, warn};

/// Liveness predicate of a broker handle.
pub trait Liveness {
    fn is_live(&self) -> bool;
}

/// Observed state of a managed handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Absent,
    Live,
    Stale,
}

pub(crate) struct ManagedHandle<T> {
    kind: &'static str,
    handle: Option<T>,
}

impl<T: Liveness> ManagedHandle<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        ManagedHandle { kind, handle: None }
    }

    pub(crate) fn state(&self) -> HandleState {
        match &self.handle {
            None => HandleState::Absent,
            Some(h) if h.is_live() => HandleState::Live,
            Some(_) => HandleState::Stale,
        }
    }

    /// Returns the live handle, creating it with `open` when absent or stale.
    pub(crate) async fn ensure<F, Fut>(&mut self, open: F) -> Result<&T, AmqpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AmqpError>>,
    {
        match self.state() {
            HandleState::Live => {}
            state => {
                if state == HandleState::Stale {
                    warn!(handle = self.kind, "discarding stale handle");
                    self.handle = None;
                }

                debug!(handle = self.kind, "opening handle...");
                self.handle = Some(open().await?);
                debug!(handle = self.kind, "handle opened");
            }
        }

        self.handle.as_ref().ok_or(AmqpError::InternalError)
    }

    /// Releases the handle, returning it only if it is still live.
    pub(crate) fn take_live(&mut self) -> Option<T> {
        match self.handle.take() {
            Some(h) if h.is_live() => Some(h),
            Some(_) => {
                debug!(handle = self.kind, "dropping stale handle");
                None
            }
            None => None,
        }
    }
}
