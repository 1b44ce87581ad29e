//! Binauraliser controller
//!
//! Owns the codec state, the shared parameters, the renderer and the bank
//! builder. Three kinds of callers use it concurrently:
//! - the audio thread, through [`Binauraliser::process`] only
//! - control threads, through the setters and getters
//! - the reinit routine ([`Binauraliser::perform_reinit`]), run by the
//!   background worker or by the host's own timer
//!
//! Setters that invalidate the filter bank request a rebuild and force the
//! codec to `NotInitialised`; nothing is rebuilt synchronously.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use portable_atomic::{AtomicF32, Ordering};
use rf_dsp::Processor;

use crate::bank::{BankBuilder, BuildSettings, GridInfo};
use crate::config::{BinauralConfig, DiffuseEqMode, InterpMode, RotationOrder};
use crate::error::{BinauralError, BinauralResult};
use crate::hrir::{HrirLoader, JsonHrirLoader};
use crate::params::{RotationSettings, SharedParams, ALL_CHANNELS};
use crate::position::{clamp_elevation, wrap_azimuth, Direction};
use crate::renderer::Renderer;
use crate::state::{CodecState, CodecStatus, PendingReinit, ProcStatus, ReinitMode};
use crate::worker::ReinitWorker;
use crate::{FRAME_SIZE, MAX_NUM_INPUTS, NUM_EARS, PROCESSING_DELAY};

/// State shared between the controller and the worker thread
pub(crate) struct Inner {
    state: CodecState,
    pending: PendingReinit,
    params: SharedParams,
    /// Audio thread only ever `try_lock`s this
    renderer: Mutex<Renderer>,
    builder: Mutex<BankBuilder>,
    config: RwLock<BinauralConfig>,
    grid: RwLock<Option<Arc<GridInfo>>>,
    progress: AtomicF32,
    progress_text: RwLock<String>,
    loader: Box<dyn HrirLoader>,
}

impl Inner {
    fn set_progress(&self, fraction: f32, text: &str) {
        self.progress.store(fraction, Ordering::Relaxed);
        let mut current = self.progress_text.write();
        current.clear();
        current.push_str(text);
    }

    pub(crate) fn perform_reinit(&self) -> BinauralResult<bool> {
        if !self.state.try_begin_init() {
            return Ok(false);
        }
        // No reallocation until the block in flight has finished
        self.state.wait_for_idle();

        let requested = self.pending.take();
        let settings = BuildSettings::from(&*self.config.read());

        let result = {
            let mut builder = self.builder.lock();
            let mode = builder.effective_mode(requested, &settings);
            builder
                .build(requested, &settings, self.loader.as_ref(), &|p, text| {
                    self.set_progress(p, text)
                })
                .map(|generation| (mode, generation))
        };

        match result {
            Ok((mode, generation)) => {
                if mode == ReinitMode::Full {
                    if let Some(emitters) = &generation.grid.emitters {
                        self.apply_emitters(emitters);
                    }
                }

                {
                    let mut renderer = self.renderer.lock();
                    if mode >= ReinitMode::ResampleOnly {
                        renderer.reset();
                    }
                    renderer.set_generation(generation.clone());
                }
                *self.grid.write() = Some(generation.grid.clone());
                self.params.mark_dirty(ALL_CHANNELS);
                self.params.mark_rotation_dirty();
                self.state.finish_init();
                Ok(true)
            }
            Err(err) => {
                // Keep whatever bank is installed; a later setter retries
                self.set_progress(1.0, "Initialisation failed");
                self.state.finish_init();
                Err(err)
            }
        }
    }

    /// One source per emitter, pointing at the emitter
    fn apply_emitters(&self, emitters: &[Direction]) {
        let n = emitters.len().clamp(1, MAX_NUM_INPUTS);
        self.params.set_num_sources(n);
        self.config.write().num_sources = n;
        for (i, dir) in emitters.iter().take(n).enumerate() {
            self.params.set_azimuth(i, dir.azimuth);
            self.params.set_elevation(i, dir.elevation);
        }
        log::info!("Source count set to {n} from the emitter layout");
    }

    fn begin_reinit(&self, mode: ReinitMode) {
        self.pending.request(mode);
        self.params.mark_dirty(ALL_CHANNELS);
        self.state.invalidate();
    }
}

/// Real-time binaural renderer for up to [`MAX_NUM_INPUTS`] sources
pub struct Binauraliser {
    inner: Arc<Inner>,
    worker: Mutex<Option<ReinitWorker>>,
}

impl Binauraliser {
    /// Controller reading HRIR files as JSON
    pub fn new(config: BinauralConfig) -> BinauralResult<Self> {
        Self::with_loader(config, Box::new(JsonHrirLoader))
    }

    /// Controller with a custom HRIR file reader
    pub fn with_loader(config: BinauralConfig, loader: Box<dyn HrirLoader>) -> BinauralResult<Self> {
        config.validate()?;
        let params = SharedParams::new(config.num_sources, config.interp_mode);

        let inner = Inner {
            state: CodecState::new(),
            pending: PendingReinit::default(),
            params,
            renderer: Mutex::new(Renderer::new()),
            builder: Mutex::new(BankBuilder::new()),
            config: RwLock::new(config),
            grid: RwLock::new(None),
            progress: AtomicF32::new(0.0),
            progress_text: RwLock::new(String::from("Not initialised")),
            loader,
        };
        inner.pending.request(ReinitMode::Full);

        Ok(Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        })
    }

    /// Start polling [`Self::perform_reinit`] in the background
    pub fn start_worker(&self) -> BinauralResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            let interval = Duration::from_millis(self.inner.config.read().reinit_poll_interval_ms);
            *worker = Some(ReinitWorker::start(self.inner.clone(), interval)?);
        }
        Ok(())
    }

    pub fn stop_worker(&self) {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| w.is_running())
    }

    /// Set the host sample rate, scheduling only what the change requires
    pub fn init(&self, sample_rate: f32) -> BinauralResult<()> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(BinauralError::Config(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        self.inner.config.write().sample_rate = sample_rate;

        let mode = {
            let builder = self.inner.builder.lock();
            match (builder.loaded(), builder.runtime_rate()) {
                (None, _) => Some(ReinitMode::Full),
                (Some(_), Some(rate)) if rate == sample_rate => None,
                (Some(_), _) => Some(ReinitMode::ResampleOnly),
            }
        };
        log::debug!("init({sample_rate} Hz): {mode:?}");
        if let Some(mode) = mode {
            self.inner.begin_reinit(mode);
        }
        Ok(())
    }

    /// Rebuild if the codec is not initialised.
    ///
    /// Returns true if a rebuild ran. Never call this from the audio thread.
    pub fn perform_reinit(&self) -> BinauralResult<bool> {
        self.inner.perform_reinit()
    }

    /// Force a full rebuild on the next reinit
    pub fn refresh_settings(&self) {
        self.inner.begin_reinit(ReinitMode::Full);
    }

    /// Request a rebuild of (at least) `mode` and invalidate the codec
    pub fn begin_reinit(&self, mode: ReinitMode) {
        self.inner.begin_reinit(mode);
    }

    /// Render one block of `num_samples` samples.
    ///
    /// Writes silence unless the block is exactly [`FRAME_SIZE`] long, a
    /// filter bank is installed and the codec is initialised. Never blocks.
    pub fn process(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], num_samples: usize) {
        let rendered = num_samples == FRAME_SIZE
            && outputs.iter().all(|out| out.len() >= FRAME_SIZE)
            && self.render(inputs, outputs);

        if !rendered {
            for out in outputs.iter_mut() {
                let n = num_samples.min(out.len());
                out[..n].fill(0.0);
            }
        }
    }

    fn render(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> bool {
        let Some(_guard) = self.inner.state.begin_processing() else {
            return false;
        };
        let Some(mut renderer) = self.inner.renderer.try_lock() else {
            return false;
        };
        renderer.render(&self.inner.params, inputs, outputs)
    }

    // ============ Sources ============

    fn check_index(index: usize) -> BinauralResult<()> {
        if index < MAX_NUM_INPUTS {
            Ok(())
        } else {
            Err(BinauralError::SourceIndex {
                index,
                max: MAX_NUM_INPUTS - 1,
            })
        }
    }

    /// Azimuth in degrees, wrapped into [-180, 180]
    pub fn set_source_azimuth(&self, index: usize, degrees: f32) -> BinauralResult<()> {
        Self::check_index(index)?;
        self.inner.params.set_azimuth(index, wrap_azimuth(degrees));
        Ok(())
    }

    /// Elevation in degrees, clamped to [-90, 90]
    pub fn set_source_elevation(&self, index: usize, degrees: f32) -> BinauralResult<()> {
        Self::check_index(index)?;
        self.inner.params.set_elevation(index, clamp_elevation(degrees));
        Ok(())
    }

    pub fn source_azimuth(&self, index: usize) -> BinauralResult<f32> {
        Self::check_index(index)?;
        Ok(self.inner.params.direction(index).azimuth)
    }

    pub fn source_elevation(&self, index: usize) -> BinauralResult<f32> {
        Self::check_index(index)?;
        Ok(self.inner.params.direction(index).elevation)
    }

    /// Change the active source count (clamped to 1..=64)
    pub fn set_num_sources(&self, n: usize) {
        let n = n.clamp(1, MAX_NUM_INPUTS);
        if n != self.inner.params.num_sources() {
            self.inner.params.set_num_sources(n);
            self.inner.config.write().num_sources = n;
            self.inner.params.mark_rotation_dirty();
            self.inner.begin_reinit(ReinitMode::None);
        }
    }

    pub fn num_sources(&self) -> usize {
        self.inner.params.num_sources()
    }

    pub fn set_source_gain(&self, index: usize, gain: f32) -> BinauralResult<()> {
        Self::check_index(index)?;
        self.inner.params.set_gain(index, gain);
        Ok(())
    }

    pub fn source_gain(&self, index: usize) -> BinauralResult<f32> {
        Self::check_index(index)?;
        Ok(self.inner.params.gain(index))
    }

    pub fn mute_source(&self, index: usize, muted: bool) -> BinauralResult<()> {
        self.set_source_gain(index, if muted { 0.0 } else { 1.0 })
    }

    /// Unity gain for `index`, silence for every other active source
    pub fn set_source_solo(&self, index: usize) -> BinauralResult<()> {
        Self::check_index(index)?;
        for i in 0..self.inner.params.num_sources() {
            self.inner.params.set_gain(i, if i == index { 1.0 } else { 0.0 });
        }
        Ok(())
    }

    /// Unity gain for every active source
    pub fn set_unsolo(&self) {
        for i in 0..self.inner.params.num_sources() {
            self.inner.params.set_gain(i, 1.0);
        }
    }

    // ============ Interpolation ============

    pub fn set_interp_mode(&self, mode: InterpMode) {
        self.inner.config.write().interp_mode = mode;
        self.inner.params.set_interp_mode(mode);
    }

    pub fn interp_mode(&self) -> InterpMode {
        self.inner.params.interp_mode()
    }

    /// Interpolations computed by the audio thread so far
    pub fn interp_recomputations(&self) -> u64 {
        self.inner.params.recomputations()
    }

    // ============ Rotation ============

    pub fn set_rotation_enabled(&self, enabled: bool) {
        self.inner.params.set_rotation_enabled(enabled);
    }

    pub fn rotation_enabled(&self) -> bool {
        self.inner.params.rotation_enabled()
    }

    pub fn set_yaw(&self, degrees: f32) {
        self.inner.params.set_yaw(degrees);
    }

    pub fn set_pitch(&self, degrees: f32) {
        self.inner.params.set_pitch(degrees);
    }

    pub fn set_roll(&self, degrees: f32) {
        self.inner.params.set_roll(degrees);
    }

    pub fn set_flip_yaw(&self, flip: bool) {
        self.inner.params.set_flip_yaw(flip);
    }

    pub fn set_flip_pitch(&self, flip: bool) {
        self.inner.params.set_flip_pitch(flip);
    }

    pub fn set_flip_roll(&self, flip: bool) {
        self.inner.params.set_flip_roll(flip);
    }

    pub fn set_rotation_order(&self, order: RotationOrder) {
        self.inner.params.set_rotation_order(order);
    }

    /// Current yaw, pitch, roll, flips and order
    pub fn rotation(&self) -> RotationSettings {
        self.inner.params.rotation()
    }

    // ============ HRIR source and equalisation ============

    /// Switch between the built-in grid and the configured file
    pub fn set_use_default_hrirs(&self, use_default: bool) {
        let changed = {
            let mut config = self.inner.config.write();
            let changed = config.use_default_hrirs != use_default;
            config.use_default_hrirs = use_default;
            changed
        };
        if changed {
            self.inner.begin_reinit(ReinitMode::Full);
        }
    }

    pub fn use_default_hrirs(&self) -> bool {
        self.inner.config.read().use_default_hrirs
    }

    /// Load HRIRs from `path` on the next reinit
    pub fn set_hrir_path(&self, path: impl Into<PathBuf>) {
        {
            let mut config = self.inner.config.write();
            config.hrir_path = Some(path.into());
            config.use_default_hrirs = false;
        }
        self.inner.begin_reinit(ReinitMode::Full);
    }

    pub fn hrir_path(&self) -> Option<PathBuf> {
        self.inner.config.read().hrir_path.clone()
    }

    pub fn set_diffuse_eq(&self, enabled: bool) {
        let changed = {
            let mut config = self.inner.config.write();
            let changed = config.diffuse_eq != enabled;
            config.diffuse_eq = enabled;
            changed
        };
        if changed {
            self.inner.begin_reinit(ReinitMode::DiffuseEqOnly);
        }
    }

    pub fn diffuse_eq(&self) -> bool {
        self.inner.config.read().diffuse_eq
    }

    pub fn set_diffuse_eq_mode(&self, mode: DiffuseEqMode) {
        let changed = {
            let mut config = self.inner.config.write();
            let changed = config.diffuse_eq_mode != mode;
            config.diffuse_eq_mode = mode;
            changed
        };
        if changed {
            self.inner.begin_reinit(ReinitMode::DiffuseEqOnly);
        }
    }

    pub fn diffuse_eq_mode(&self) -> DiffuseEqMode {
        self.inner.config.read().diffuse_eq_mode
    }

    // ============ Status ============

    pub fn codec_status(&self) -> CodecStatus {
        self.inner.state.status()
    }

    pub fn proc_status(&self) -> ProcStatus {
        self.inner.state.proc_status()
    }

    /// Rebuild pending for the next reinit
    pub fn pending_reinit(&self) -> ReinitMode {
        self.inner.pending.peek()
    }

    /// Progress of the current (or last) rebuild, 0..1
    pub fn progress(&self) -> f32 {
        self.inner.progress.load(Ordering::Relaxed)
    }

    pub fn progress_text(&self) -> String {
        self.inner.progress_text.read().clone()
    }

    /// Metadata of the installed grid
    pub fn grid_info(&self) -> Option<Arc<GridInfo>> {
        self.inner.grid.read().clone()
    }

    pub fn num_hrir_directions(&self) -> usize {
        self.grid_info().map_or(0, |g| g.num_directions())
    }

    pub fn num_triangles(&self) -> usize {
        self.grid_info().map_or(0, |g| g.num_triangles)
    }

    pub fn hrir_direction(&self, index: usize) -> Option<Direction> {
        self.grid_info().and_then(|g| g.directions.get(index).copied())
    }

    /// Impulse length as loaded
    pub fn hrir_len(&self) -> usize {
        self.grid_info().map_or(0, |g| g.loaded_len)
    }

    /// Sample rate as loaded
    pub fn hrir_sample_rate(&self) -> f32 {
        self.grid_info().map_or(0.0, |g| g.loaded_fs)
    }

    pub fn runtime_hrir_len(&self) -> usize {
        self.grid_info().map_or(0, |g| g.runtime_len)
    }

    pub fn runtime_hrir_sample_rate(&self) -> f32 {
        self.grid_info().map_or(0.0, |g| g.runtime_fs)
    }

    /// Whether the installed grid is the built-in one
    pub fn uses_default_grid(&self) -> bool {
        self.grid_info().is_some_and(|g| g.is_default)
    }

    pub fn is_3d(&self) -> bool {
        self.grid_info().is_some_and(|g| g.is_3d)
    }

    pub fn sample_rate(&self) -> f32 {
        self.inner.config.read().sample_rate
    }

    pub fn config(&self) -> BinauralConfig {
        self.inner.config.read().clone()
    }

    // ============ Capabilities ============

    pub fn frame_size(&self) -> usize {
        FRAME_SIZE
    }

    pub fn max_num_sources(&self) -> usize {
        MAX_NUM_INPUTS
    }

    pub fn num_ears(&self) -> usize {
        NUM_EARS
    }

    /// Output delay in samples
    pub fn processing_delay(&self) -> usize {
        PROCESSING_DELAY
    }
}

impl Drop for Binauraliser {
    fn drop(&mut self) {
        self.stop_worker();
        self.inner.state.wait_quiescent();
    }
}

/// Load a configuration file and build a controller from it
pub fn from_config_file(path: impl AsRef<Path>) -> BinauralResult<Binauraliser> {
    Binauraliser::new(BinauralConfig::from_json_file(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(config: BinauralConfig) -> Binauraliser {
        let b = Binauraliser::new(config).unwrap();
        assert!(b.perform_reinit().unwrap());
        b
    }

    #[test]
    fn test_recomputation_count_does_not_need_renderer() {
        let b = ready(BinauralConfig {
            num_sources: 2,
            ..Default::default()
        });
        let inputs = [vec![0.1f32; FRAME_SIZE], vec![0.1f32; FRAME_SIZE]];
        let slices: Vec<&[f32]> = inputs.iter().map(|x| x.as_slice()).collect();
        let mut left = vec![0.0f32; FRAME_SIZE];
        let mut right = vec![0.0f32; FRAME_SIZE];
        let mut outs = [left.as_mut_slice(), right.as_mut_slice()];
        b.process(&slices, &mut outs, FRAME_SIZE);
        assert_eq!(b.interp_recomputations(), 2);

        let _renderer = b.inner.renderer.lock();
        assert_eq!(b.interp_recomputations(), 2);
    }

    #[test]
    fn test_emitters_update_config_source_count() {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        b.inner.apply_emitters(&[Direction::new(30.0, 0.0), Direction::new(-30.0, 0.0)]);
        assert_eq!(b.num_sources(), 2);
        assert_eq!(b.config().num_sources, 2);
    }

    #[test]
    fn test_new_is_not_initialised() {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        assert_eq!(b.codec_status(), CodecStatus::NotInitialised);
        assert_eq!(b.pending_reinit(), ReinitMode::Full);
        assert_eq!(b.num_hrir_directions(), 0);
    }

    #[test]
    fn test_reinit_debounces() {
        let b = ready(BinauralConfig::default());
        assert_eq!(b.codec_status(), CodecStatus::Initialised);
        assert!(!b.perform_reinit().unwrap());
        assert!((b.progress() - 1.0).abs() < 1e-6);
        assert_eq!(b.progress_text(), "Done");
        assert!(b.uses_default_grid());
        assert!(b.is_3d());
    }

    #[test]
    fn test_azimuth_wraps_and_elevation_clamps() {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        b.set_source_azimuth(0, 185.0).unwrap();
        assert!((b.source_azimuth(0).unwrap() + 175.0).abs() < 1e-4);
        b.set_source_azimuth(1, -185.0).unwrap();
        assert!((b.source_azimuth(1).unwrap() - 175.0).abs() < 1e-4);
        b.set_source_elevation(2, 120.0).unwrap();
        assert_eq!(b.source_elevation(2).unwrap(), 90.0);
        b.set_source_elevation(2, -95.0).unwrap();
        assert_eq!(b.source_elevation(2).unwrap(), -90.0);
    }

    #[test]
    fn test_source_index_checked() {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        assert!(matches!(
            b.set_source_azimuth(64, 0.0),
            Err(BinauralError::SourceIndex { index: 64, max: 63 })
        ));
        assert!(b.mute_source(100, true).is_err());
        assert!(b.set_source_solo(64).is_err());
    }

    #[test]
    fn test_mute_and_solo() {
        let b = Binauraliser::new(BinauralConfig {
            num_sources: 4,
            ..Default::default()
        })
        .unwrap();
        b.mute_source(1, true).unwrap();
        assert_eq!(b.source_gain(1).unwrap(), 0.0);
        assert_eq!(b.source_gain(0).unwrap(), 1.0);

        b.set_source_solo(2).unwrap();
        let gains: Vec<f32> = (0..4).map(|i| b.source_gain(i).unwrap()).collect();
        assert_eq!(gains, vec![0.0, 0.0, 1.0, 0.0]);

        b.set_unsolo();
        assert!((0..4).all(|i| b.source_gain(i).unwrap() == 1.0));
    }

    #[test]
    fn test_setters_request_granularity() {
        let b = ready(BinauralConfig::default());

        b.set_diffuse_eq(false);
        assert_eq!(b.codec_status(), CodecStatus::NotInitialised);
        assert_eq!(b.pending_reinit(), ReinitMode::DiffuseEqOnly);
        assert!(b.perform_reinit().unwrap());

        b.set_num_sources(8);
        assert_eq!(b.pending_reinit(), ReinitMode::None);
        assert_eq!(b.codec_status(), CodecStatus::NotInitialised);
        assert!(b.perform_reinit().unwrap());

        b.set_diffuse_eq_mode(DiffuseEqMode::ReferenceHead);
        b.refresh_settings();
        assert_eq!(b.pending_reinit(), ReinitMode::Full);
    }

    #[test]
    fn test_init_schedules_resample_only_on_rate_change() {
        let b = ready(BinauralConfig::default());
        b.init(48000.0).unwrap();
        assert_eq!(b.codec_status(), CodecStatus::Initialised);

        b.init(44100.0).unwrap();
        assert_eq!(b.pending_reinit(), ReinitMode::ResampleOnly);
        assert!(b.perform_reinit().unwrap());
        assert_eq!(b.runtime_hrir_sample_rate(), 44100.0);
        assert_eq!(b.hrir_sample_rate(), 48000.0);
        assert!(b.runtime_hrir_len() < b.hrir_len());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        b.set_hrir_path("/nonexistent/hrirs.json");
        assert!(!b.use_default_hrirs());
        assert!(b.perform_reinit().unwrap());
        assert!(b.uses_default_grid());
    }

    #[test]
    fn test_capabilities() {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        assert_eq!(b.frame_size(), FRAME_SIZE);
        assert_eq!(b.max_num_sources(), 64);
        assert_eq!(b.num_ears(), 2);
        assert_eq!(b.processing_delay(), PROCESSING_DELAY);
    }

    #[test]
    fn test_worker_initialises_in_background() {
        let b = Binauraliser::new(BinauralConfig::default()).unwrap();
        b.start_worker().unwrap();
        assert!(b.is_worker_running());

        crate::state::wait_until(|| b.codec_status() == CodecStatus::Initialised);
        b.stop_worker();
        assert!(!b.is_worker_running());
    }
}
