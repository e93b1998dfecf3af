//! Deferred Action Queue
//!
//! High-level operations that must not overlap an in-flight flush are queued
//! here and executed strictly in FIFO order by the controller once both
//! streams' flush status is quiescent.

use crate::playback::surface::SurfaceHandle;
use crate::playback::types::FlushCommand;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::oneshot;

/// One pending controller operation
pub enum DeferredAction {
    Seek { time_us: i64 },
    SetSurface(Option<SurfaceHandle>),
    FlushDecoders { audio: FlushCommand, video: FlushCommand },
    ResumeDecoders { notify: bool },
    /// Reply to a waiter once everything queued before it has run
    PostMessage(oneshot::Sender<()>),
    RescanSources,
    /// Controller-internal teardown that ends a reset
    Reset,
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredAction::Seek { time_us } => write!(f, "Seek({})", time_us),
            DeferredAction::SetSurface(surface) => {
                write!(f, "SetSurface({})", if surface.is_some() { "some" } else { "none" })
            }
            DeferredAction::FlushDecoders { audio, video } => {
                write!(f, "FlushDecoders({:?}, {:?})", audio, video)
            }
            DeferredAction::ResumeDecoders { notify } => write!(f, "ResumeDecoders({})", notify),
            DeferredAction::PostMessage(_) => write!(f, "PostMessage"),
            DeferredAction::RescanSources => write!(f, "RescanSources"),
            DeferredAction::Reset => write!(f, "Reset"),
        }
    }
}

/// FIFO of deferred actions
#[derive(Debug, Default)]
pub struct DeferredQueue {
    actions: VecDeque<DeferredAction>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: DeferredAction) {
        self.actions.push_back(action);
    }

    pub fn pop(&mut self) -> Option<DeferredAction> {
        self.actions.pop_front()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeferredAction> {
        self.actions.iter()
    }

    /// Queue the flush/seek/resume triple for a seek.
    ///
    /// When the queue still ends with an earlier seek's unexecuted
    /// `Seek` + `ResumeDecoders`, that seek is retargeted instead: its time
    /// becomes `time_us` and the notify flags are merged. Returns true when
    /// an existing seek was coalesced.
    pub fn push_seek(&mut self, time_us: i64, notify: bool) -> bool {
        let len = self.actions.len();
        if len >= 2 {
            let (head, tail) = self.actions.make_contiguous().split_at_mut(len - 1);
            if let (
                Some(DeferredAction::Seek { time_us: pending }),
                Some(DeferredAction::ResumeDecoders { notify: pending_notify }),
            ) = (head.last_mut(), tail.first_mut())
            {
                *pending = time_us;
                *pending_notify |= notify;
                return true;
            }
        }

        self.push(DeferredAction::FlushDecoders {
            audio: FlushCommand::Flush,
            video: FlushCommand::Flush,
        });
        self.push(DeferredAction::Seek { time_us });
        self.push(DeferredAction::ResumeDecoders { notify });
        false
    }
}
