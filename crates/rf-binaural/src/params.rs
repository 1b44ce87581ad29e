//! Lock-free parameters shared with the audio thread
//!
//! Every field is an independent atomic. Setters store the value first and
//! raise the matching dirty flag afterwards (release), the audio thread
//! clears the flag (acquire) before reading the value, so a recomputation
//! always sees the newest direction.

use portable_atomic::{AtomicBool, AtomicF32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::config::{InterpMode, RotationOrder};
use crate::position::Direction;
use crate::MAX_NUM_INPUTS;

/// Bitmask with one bit per source channel
pub const ALL_CHANNELS: u64 = u64::MAX;

/// Per-source and global rendering parameters
#[derive(Debug)]
pub struct SharedParams {
    /// Source azimuths (degrees)
    azimuths: [AtomicF32; MAX_NUM_INPUTS],
    /// Source elevations (degrees)
    elevations: [AtomicF32; MAX_NUM_INPUTS],
    /// Source gains (0 = muted)
    gains: [AtomicF32; MAX_NUM_INPUTS],
    /// Active source count
    num_sources: AtomicUsize,
    interp_mode: AtomicU8,
    /// Channels whose interpolated filter is stale
    interp_dirty: AtomicU64,
    /// Filters interpolated by the audio thread so far
    recomputations: AtomicU64,

    enable_rotation: AtomicBool,
    yaw: AtomicF32,
    pitch: AtomicF32,
    roll: AtomicF32,
    flip_yaw: AtomicBool,
    flip_pitch: AtomicBool,
    flip_roll: AtomicBool,
    rotation_order: AtomicU8,
    /// Rotation matrix must be rebuilt
    rotation_dirty: AtomicBool,
}

/// Snapshot of the rotation settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationSettings {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub flip_yaw: bool,
    pub flip_pitch: bool,
    pub flip_roll: bool,
    pub order: RotationOrder,
}

impl SharedParams {
    pub fn new(num_sources: usize, interp_mode: InterpMode) -> Self {
        Self {
            azimuths: std::array::from_fn(|_| AtomicF32::new(0.0)),
            elevations: std::array::from_fn(|_| AtomicF32::new(0.0)),
            gains: std::array::from_fn(|_| AtomicF32::new(1.0)),
            num_sources: AtomicUsize::new(num_sources.clamp(1, MAX_NUM_INPUTS)),
            interp_mode: AtomicU8::new(interp_mode as u8),
            interp_dirty: AtomicU64::new(ALL_CHANNELS),
            recomputations: AtomicU64::new(0),
            enable_rotation: AtomicBool::new(false),
            yaw: AtomicF32::new(0.0),
            pitch: AtomicF32::new(0.0),
            roll: AtomicF32::new(0.0),
            flip_yaw: AtomicBool::new(false),
            flip_pitch: AtomicBool::new(false),
            flip_roll: AtomicBool::new(false),
            rotation_order: AtomicU8::new(RotationOrder::YawPitchRoll as u8),
            rotation_dirty: AtomicBool::new(true),
        }
    }

    // ============ Sources ============

    pub fn direction(&self, index: usize) -> Direction {
        Direction::new(
            self.azimuths[index].load(Ordering::Relaxed),
            self.elevations[index].load(Ordering::Relaxed),
        )
    }

    /// Store an azimuth; returns true if it changed
    pub fn set_azimuth(&self, index: usize, azimuth: f32) -> bool {
        let old = self.azimuths[index].swap(azimuth, Ordering::Relaxed);
        if old != azimuth {
            self.mark_dirty(1 << index);
            self.rotation_dirty.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Store an elevation; returns true if it changed
    pub fn set_elevation(&self, index: usize, elevation: f32) -> bool {
        let old = self.elevations[index].swap(elevation, Ordering::Relaxed);
        if old != elevation {
            self.mark_dirty(1 << index);
            self.rotation_dirty.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn gain(&self, index: usize) -> f32 {
        self.gains[index].load(Ordering::Relaxed)
    }

    pub fn set_gain(&self, index: usize, gain: f32) {
        self.gains[index].store(gain, Ordering::Relaxed);
    }

    pub fn num_sources(&self) -> usize {
        self.num_sources.load(Ordering::Acquire)
    }

    pub fn set_num_sources(&self, n: usize) {
        self.num_sources
            .store(n.clamp(1, MAX_NUM_INPUTS), Ordering::Release);
    }

    // ============ Interpolation ============

    pub fn interp_mode(&self) -> InterpMode {
        InterpMode::from_u8(self.interp_mode.load(Ordering::Acquire))
    }

    pub fn set_interp_mode(&self, mode: InterpMode) {
        self.interp_mode.store(mode as u8, Ordering::Release);
        self.mark_dirty(ALL_CHANNELS);
    }

    pub fn mark_dirty(&self, mask: u64) {
        self.interp_dirty.fetch_or(mask, Ordering::Release);
    }

    /// Audio thread: consume the dirty mask
    pub fn take_dirty(&self) -> u64 {
        self.interp_dirty.swap(0, Ordering::Acquire)
    }

    pub fn count_recomputation(&self) {
        self.recomputations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations.load(Ordering::Relaxed)
    }

    // ============ Rotation ============

    pub fn rotation_enabled(&self) -> bool {
        self.enable_rotation.load(Ordering::Acquire)
    }

    pub fn set_rotation_enabled(&self, enabled: bool) {
        let was = self.enable_rotation.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            self.rotation_dirty.store(true, Ordering::Release);
            self.mark_dirty(ALL_CHANNELS);
        }
    }

    pub fn set_yaw(&self, deg: f32) {
        self.yaw.store(deg, Ordering::Relaxed);
        self.rotation_dirty.store(true, Ordering::Release);
    }

    pub fn set_pitch(&self, deg: f32) {
        self.pitch.store(deg, Ordering::Relaxed);
        self.rotation_dirty.store(true, Ordering::Release);
    }

    pub fn set_roll(&self, deg: f32) {
        self.roll.store(deg, Ordering::Relaxed);
        self.rotation_dirty.store(true, Ordering::Release);
    }

    pub fn set_flip_yaw(&self, flip: bool) {
        self.flip_yaw.store(flip, Ordering::Relaxed);
        self.rotation_dirty.store(true, Ordering::Release);
    }

    pub fn set_flip_pitch(&self, flip: bool) {
        self.flip_pitch.store(flip, Ordering::Relaxed);
        self.rotation_dirty.store(true, Ordering::Release);
    }

    pub fn set_flip_roll(&self, flip: bool) {
        self.flip_roll.store(flip, Ordering::Relaxed);
        self.rotation_dirty.store(true, Ordering::Release);
    }

    pub fn set_rotation_order(&self, order: RotationOrder) {
        self.rotation_order.store(order as u8, Ordering::Relaxed);
        self.rotation_dirty.store(true, Ordering::Release);
    }

    pub fn rotation(&self) -> RotationSettings {
        RotationSettings {
            yaw: self.yaw.load(Ordering::Relaxed),
            pitch: self.pitch.load(Ordering::Relaxed),
            roll: self.roll.load(Ordering::Relaxed),
            flip_yaw: self.flip_yaw.load(Ordering::Relaxed),
            flip_pitch: self.flip_pitch.load(Ordering::Relaxed),
            flip_roll: self.flip_roll.load(Ordering::Relaxed),
            order: RotationOrder::from_u8(self.rotation_order.load(Ordering::Relaxed)),
        }
    }

    /// Audio thread: consume the rotation-dirty flag
    pub fn take_rotation_dirty(&self) -> bool {
        self.rotation_dirty.swap(false, Ordering::Acquire)
    }

    pub fn mark_rotation_dirty(&self) {
        self.rotation_dirty.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_change_marks_channel() {
        let params = SharedParams::new(4, InterpMode::Tri);
        assert_eq!(params.take_dirty(), ALL_CHANNELS);
        assert_eq!(params.take_dirty(), 0);

        assert!(params.set_azimuth(2, 30.0));
        assert_eq!(params.take_dirty(), 1 << 2);
        assert!(params.take_rotation_dirty());

        // Unchanged value, nothing to redo
        assert!(!params.set_azimuth(2, 30.0));
        assert_eq!(params.take_dirty(), 0);
    }

    #[test]
    fn test_interp_mode_marks_all() {
        let params = SharedParams::new(1, InterpMode::Tri);
        params.take_dirty();
        params.set_interp_mode(InterpMode::TriPs);
        assert_eq!(params.interp_mode(), InterpMode::TriPs);
        assert_eq!(params.take_dirty(), ALL_CHANNELS);
    }

    #[test]
    fn test_disabling_rotation_marks_all() {
        let params = SharedParams::new(1, InterpMode::Tri);
        params.set_rotation_enabled(true);
        params.take_dirty();
        params.set_rotation_enabled(false);
        assert_eq!(params.take_dirty(), ALL_CHANNELS);
    }

    #[test]
    fn test_num_sources_clamped() {
        let params = SharedParams::new(0, InterpMode::Tri);
        assert_eq!(params.num_sources(), 1);
        params.set_num_sources(100);
        assert_eq!(params.num_sources(), MAX_NUM_INPUTS);
    }
}
