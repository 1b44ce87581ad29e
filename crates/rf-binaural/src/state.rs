//! Codec state machine shared by the audio and control threads
//!
//! Status goes `NotInitialised → Initialising → Initialised`, with a
//! separate processing-activity flag raised around every rendered block.
//!
//! Handoff rules:
//! - The audio thread raises the activity flag *before* checking the status
//!   and never waits; an unready codec means a silent block.
//! - The control thread claims `Initialising` *before* checking the activity
//!   flag and waits (backoff, then short sleeps) until the block in flight
//!   has finished.
//! - Both sides use `SeqCst`, so at least one of them sees the other.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::Backoff;

/// Codec (filter bank + tables) readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecStatus {
    /// Needs a rebuild before audio can be rendered
    NotInitialised = 0,
    /// A rebuild is running on the control thread
    Initialising = 1,
    /// Ready to render
    Initialised = 2,
}

impl CodecStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CodecStatus::Initialising,
            2 => CodecStatus::Initialised,
            _ => CodecStatus::NotInitialised,
        }
    }
}

/// Whether a block is currently being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    Idle,
    Ongoing,
}

/// How much of the filter bank a reinit rebuilds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum ReinitMode {
    /// Nothing to rebuild; only re-enter the ready state
    #[default]
    None = 0,
    /// Re-apply equalisation to the cached filters
    DiffuseEqOnly = 1,
    /// Re-resample the loaded impulses, then convert and equalise
    ResampleOnly = 2,
    /// Reload, re-triangulate and rebuild everything
    Full = 3,
}

impl ReinitMode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ReinitMode::DiffuseEqOnly,
            2 => ReinitMode::ResampleOnly,
            3 => ReinitMode::Full,
            _ => ReinitMode::None,
        }
    }
}

/// Spin, then yield, then sleep until `done` returns true
pub fn wait_until(mut done: impl FnMut() -> bool) {
    let backoff = Backoff::new();
    while !done() {
        if backoff.is_completed() {
            thread::sleep(Duration::from_millis(1));
        } else {
            backoff.snooze();
        }
    }
}

/// Pending rebuild request; concurrent requests merge to the largest
#[derive(Debug, Default)]
pub struct PendingReinit(AtomicU8);

impl PendingReinit {
    pub fn request(&self, mode: ReinitMode) {
        self.0.fetch_max(mode as u8, Ordering::AcqRel);
    }

    /// Consume the pending request
    pub fn take(&self) -> ReinitMode {
        ReinitMode::from_u8(self.0.swap(ReinitMode::None as u8, Ordering::AcqRel))
    }

    pub fn peek(&self) -> ReinitMode {
        ReinitMode::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Status and activity flags
#[derive(Debug)]
pub struct CodecState {
    status: AtomicU8,
    ongoing: AtomicBool,
}

impl Default for CodecState {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowers the activity flag when a block finishes
pub struct ProcessingGuard<'a> {
    ongoing: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.ongoing.store(false, Ordering::SeqCst);
    }
}

impl CodecState {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(CodecStatus::NotInitialised as u8),
            ongoing: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> CodecStatus {
        CodecStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn proc_status(&self) -> ProcStatus {
        if self.ongoing.load(Ordering::SeqCst) {
            ProcStatus::Ongoing
        } else {
            ProcStatus::Idle
        }
    }

    /// Audio thread: mark a block as running if the codec is ready.
    ///
    /// Never blocks. Returns `None` when the block must be silent.
    pub fn begin_processing(&self) -> Option<ProcessingGuard<'_>> {
        self.ongoing.store(true, Ordering::SeqCst);
        if self.status() == CodecStatus::Initialised {
            Some(ProcessingGuard {
                ongoing: &self.ongoing,
            })
        } else {
            self.ongoing.store(false, Ordering::SeqCst);
            None
        }
    }

    /// Control thread: claim the rebuild, or return false if nothing is due
    pub fn try_begin_init(&self) -> bool {
        self.status
            .compare_exchange(
                CodecStatus::NotInitialised as u8,
                CodecStatus::Initialising as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Control thread: wait until no block is being rendered
    pub fn wait_for_idle(&self) {
        wait_until(|| !self.ongoing.load(Ordering::SeqCst));
    }

    /// Control thread: rebuild finished
    pub fn finish_init(&self) {
        self.status
            .store(CodecStatus::Initialised as u8, Ordering::SeqCst);
    }

    /// Force `NotInitialised`, first waiting out any rebuild in progress
    pub fn invalidate(&self) {
        loop {
            match self.status() {
                CodecStatus::NotInitialised => return,
                CodecStatus::Initialising => {
                    wait_until(|| self.status() != CodecStatus::Initialising);
                }
                CodecStatus::Initialised => {
                    if self
                        .status
                        .compare_exchange(
                            CodecStatus::Initialised as u8,
                            CodecStatus::NotInitialised as u8,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
            }
        }
    }

    /// Wait until neither a rebuild nor a block is in flight
    pub fn wait_quiescent(&self) {
        wait_until(|| {
            self.status() != CodecStatus::Initialising && !self.ongoing.load(Ordering::SeqCst)
        });
    }
}
