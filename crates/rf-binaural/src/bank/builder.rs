//! Staged filter bank construction
//!
//! Stages, skipped according to the requested [`ReinitMode`]:
//! 1. Load HRIRs (file or built-in grid) and estimate ITDs
//! 2. Triangulate the grid into a gain table
//! 3. Resample the impulses to the host rate
//! 4. Convert impulses to band filters
//! 5. Equalise
//!
//! Intermediate results are cached so a partial rebuild only repeats the
//! later stages. A missing cache escalates the mode.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array2, Array4};
use num_complex::Complex32;

use super::diffuse_eq::{apply_diffuse_field_eq, integration_weights};
use super::reference_head::apply_reference_head_eq;
use super::{check_shape, impulses_to_filters, FilterBank, Generation, GridInfo};
use crate::config::{BinauralConfig, DiffuseEqMode};
use crate::error::{BinauralError, BinauralResult, GeometryError};
use crate::geometry::GainTable;
use crate::hrir::{default_hrirs, estimate_itds, HrirData, HrirLoader};
use crate::state::ReinitMode;

/// Inputs of one rebuild, snapshotted from the controller
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    /// Host sample rate the filters are built for
    pub sample_rate: f32,
    /// Ignore `hrir_path` and use the built-in grid
    pub use_default: bool,
    pub hrir_path: Option<PathBuf>,
    pub diffuse_eq: bool,
    pub diffuse_eq_mode: DiffuseEqMode,
    /// (azimuth, elevation) degrees
    pub table_resolution: (f32, f32),
    pub itd_prefix: usize,
    pub max_weighted_dirs: usize,
}

impl From<&BinauralConfig> for BuildSettings {
    fn from(config: &BinauralConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            use_default: config.use_default_hrirs || config.hrir_path.is_none(),
            hrir_path: config.hrir_path.clone(),
            diffuse_eq: config.diffuse_eq,
            diffuse_eq_mode: config.diffuse_eq_mode,
            table_resolution: config.table_resolution,
            itd_prefix: config.itd_prefix_len,
            max_weighted_dirs: config.max_weighted_dirs,
        }
    }
}

/// Impulses at the rate the renderer runs at
#[derive(Debug, Clone)]
struct RuntimeImpulses {
    impulses: Array4<f32>,
    /// Actual rate of `impulses`
    sample_rate: f32,
    /// Rate that was asked for (differs if resampling failed)
    target_rate: f32,
}

/// Builds [`Generation`]s, caching every stage
#[derive(Debug, Default)]
pub struct BankBuilder {
    loaded: Option<Arc<HrirData>>,
    is_default: bool,
    itds: Option<Array2<f32>>,
    table: Option<Arc<GainTable>>,
    runtime: Option<RuntimeImpulses>,
    /// Filters before equalisation
    raw_filters: Option<Array4<Complex32>>,
    last: Option<Arc<Generation>>,
    next_id: u64,
}

fn init_failure(err: GeometryError) -> BinauralError {
    log::error!("Default HRIR grid produced no gain table: {err}");
    BinauralError::Init(format!("default grid triangulation failed: {err}"))
}

impl BankBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently loaded HRIR data
    pub fn loaded(&self) -> Option<&Arc<HrirData>> {
        self.loaded.as_ref()
    }

    /// Rate of the cached runtime impulses
    pub fn runtime_rate(&self) -> Option<f32> {
        self.runtime.as_ref().map(|r| r.target_rate)
    }

    /// Mode actually run for `requested`, given what is cached
    pub fn effective_mode(&self, requested: ReinitMode, settings: &BuildSettings) -> ReinitMode {
        if self.loaded.is_none() || self.itds.is_none() || self.table.is_none() {
            return ReinitMode::Full;
        }
        let stale_rate = self
            .runtime
            .as_ref()
            .is_none_or(|r| r.target_rate != settings.sample_rate);
        if stale_rate || self.raw_filters.is_none() {
            return requested.max(ReinitMode::ResampleOnly);
        }
        if requested == ReinitMode::None && self.last.is_none() {
            return ReinitMode::DiffuseEqOnly;
        }
        requested
    }

    /// Rebuild at (at least) the requested granularity.
    ///
    /// `progress` receives a fraction in 0..1 and a stage description.
    pub fn build(
        &mut self,
        requested: ReinitMode,
        settings: &BuildSettings,
        loader: &dyn HrirLoader,
        progress: &dyn Fn(f32, &str),
    ) -> BinauralResult<Arc<Generation>> {
        let mode = self.effective_mode(requested, settings);
        log::debug!("Filter bank rebuild: requested {requested:?}, running {mode:?}");

        if mode == ReinitMode::None {
            if let Some(last) = &self.last {
                progress(1.0, "Done");
                return Ok(last.clone());
            }
        }

        if mode == ReinitMode::Full {
            progress(0.0, "Loading HRIRs");
            let (data, is_default) = load(settings, loader);
            self.install(data, is_default, settings, progress);

            progress(0.3, "Generating gain table");
            self.triangulate(settings, progress)?;
        }

        if mode >= ReinitMode::ResampleOnly {
            progress(0.5, "Resampling HRIRs");
            self.resample(settings)?;

            progress(0.7, "Converting to filterbank");
            let runtime = self
                .runtime
                .as_ref()
                .ok_or_else(|| BinauralError::Init("no runtime impulses".into()))?;
            self.raw_filters = Some(impulses_to_filters(runtime.impulses.view()));
        }

        progress(0.85, "Applying equalisation");
        let generation = self.assemble(settings)?;
        let generation = Arc::new(generation);
        self.last = Some(generation.clone());

        log::info!(
            "Filter bank ready: {} directions, {} {}, {} set(s), {} taps at {} Hz{}",
            generation.grid.num_directions(),
            generation.grid.num_triangles,
            if generation.grid.is_3d { "triangles" } else { "ring segments" },
            generation.grid.num_sets,
            generation.grid.runtime_len,
            generation.grid.runtime_fs,
            if generation.grid.is_default { " (default grid)" } else { "" },
        );
        progress(1.0, "Done");
        Ok(generation)
    }

    /// Store freshly loaded data and its ITDs, invalidating later stages
    fn install(
        &mut self,
        data: Arc<HrirData>,
        is_default: bool,
        settings: &BuildSettings,
        progress: &dyn Fn(f32, &str),
    ) {
        progress(0.2, "Estimating ITDs");
        self.itds = Some(estimate_itds(
            data.impulses.view(),
            data.sample_rate,
            settings.itd_prefix,
        ));
        self.loaded = Some(data);
        self.is_default = is_default;
        self.table = None;
        self.runtime = None;
        self.raw_filters = None;
    }

    fn triangulate(
        &mut self,
        settings: &BuildSettings,
        progress: &dyn Fn(f32, &str),
    ) -> BinauralResult<()> {
        let data = self
            .loaded
            .clone()
            .ok_or_else(|| BinauralError::Init("no HRIR data loaded".into()))?;
        let (azi_res, elev_res) = settings.table_resolution;

        let table = match GainTable::build(&data.directions, azi_res, elev_res) {
            Ok(table) => table,
            Err(err) if !self.is_default => {
                log::warn!(
                    "Gain table generation failed ({err}), falling back to the default HRIR grid"
                );
                let fallback = Arc::new(default_hrirs().clone());
                self.install(fallback.clone(), true, settings, progress);
                GainTable::build(&fallback.directions, azi_res, elev_res).map_err(init_failure)?
            }
            Err(err) => return Err(init_failure(err)),
        };
        self.table = Some(Arc::new(table));
        Ok(())
    }

    fn resample(&mut self, settings: &BuildSettings) -> BinauralResult<()> {
        let data = self
            .loaded
            .clone()
            .ok_or_else(|| BinauralError::Init("no HRIR data loaded".into()))?;
        let target = settings.sample_rate;

        let runtime = match resample_impulses(&data.impulses, data.sample_rate, target) {
            Ok(impulses) => RuntimeImpulses {
                impulses,
                sample_rate: target,
                target_rate: target,
            },
            Err(err) => {
                log::warn!(
                    "Resampling HRIRs from {} Hz to {target} Hz failed ({err}), keeping the loaded rate",
                    data.sample_rate
                );
                RuntimeImpulses {
                    impulses: data.impulses.clone(),
                    sample_rate: data.sample_rate,
                    target_rate: target,
                }
            }
        };
        self.runtime = Some(runtime);
        self.raw_filters = None;
        Ok(())
    }

    /// Equalise the cached raw filters and bundle a generation
    fn assemble(&mut self, settings: &BuildSettings) -> BinauralResult<Generation> {
        let missing = || BinauralError::Init("filter bank caches are incomplete".into());
        let data = self.loaded.as_ref().ok_or_else(missing)?;
        let table = self.table.as_ref().ok_or_else(missing)?;
        let runtime = self.runtime.as_ref().ok_or_else(missing)?;
        let itds = self.itds.as_ref().ok_or_else(missing)?;
        let mut fb = self.raw_filters.clone().ok_or_else(missing)?;

        if settings.diffuse_eq {
            match settings.diffuse_eq_mode {
                DiffuseEqMode::DiffuseField => {
                    let weights =
                        integration_weights(table, &data.directions, settings.max_weighted_dirs);
                    apply_diffuse_field_eq(&mut fb, &weights);
                }
                DiffuseEqMode::ReferenceHead => apply_reference_head_eq(&mut fb),
            }
        }

        if !check_shape(&fb, data.num_directions()) {
            return Err(BinauralError::Init(format!(
                "filter bank has shape {:?} for {} directions",
                fb.dim(),
                data.num_directions()
            )));
        }

        let grid = GridInfo {
            directions: data.directions.clone(),
            loaded_len: data.len(),
            loaded_fs: data.sample_rate,
            runtime_len: runtime.impulses.dim().3,
            runtime_fs: runtime.sample_rate,
            is_default: self.is_default,
            is_3d: table.is_3d(),
            num_triangles: table.num_triangles(),
            num_sets: data.num_sets(),
            emitters: data.emitters.as_ref().map(|e| e.directions()),
        };

        self.next_id += 1;
        Ok(Generation {
            id: self.next_id,
            table: table.clone(),
            bank: FilterBank::new(fb, itds.clone()),
            grid: Arc::new(grid),
            centre_freqs: rf_dsp::centre_frequencies(settings.sample_rate),
        })
    }
}

/// Load the configured file, falling back to the built-in grid
fn load(settings: &BuildSettings, loader: &dyn HrirLoader) -> (Arc<HrirData>, bool) {
    if !settings.use_default {
        if let Some(path) = &settings.hrir_path {
            match loader.open(path) {
                Ok(data) => return (Arc::new(data), false),
                Err(err) => log::warn!(
                    "Failed to load HRIRs from {} ({err}), using the default grid",
                    path.display()
                ),
            }
        }
    }
    (Arc::new(default_hrirs().clone()), true)
}

/// Resample [sets, dirs, ears, len] impulses to `out_fs`
fn resample_impulses(
    impulses: &Array4<f32>,
    in_fs: f32,
    out_fs: f32,
) -> BinauralResult<Array4<f32>> {
    let (sets, dirs, ears, len) = impulses.dim();
    let contiguous = impulses.as_standard_layout();
    let flat = contiguous
        .view()
        .into_shape_with_order((sets * dirs * ears, len))
        .map_err(|e| BinauralError::Init(e.to_string()))?;

    let (out, new_len) = rf_dsp::resample(flat, in_fs as f64, out_fs as f64)?;
    out.into_shape_with_order((sets, dirs, ears, new_len))
        .map_err(|e| BinauralError::Init(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::LoadError;
    use crate::position::Direction;

    /// Serves a fixed data set and counts opens
    struct FixedLoader {
        data: Option<HrirData>,
        opens: AtomicUsize,
    }

    impl FixedLoader {
        fn new(data: Option<HrirData>) -> Self {
            Self {
                data,
                opens: AtomicUsize::new(0),
            }
        }
    }

    impl HrirLoader for FixedLoader {
        fn open(&self, _path: &Path) -> Result<HrirData, LoadError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.data.clone().ok_or(LoadError::EmptyGrid)
        }
    }

    fn file_settings() -> BuildSettings {
        BuildSettings {
            use_default: false,
            hrir_path: Some("grid.json".into()),
            ..BuildSettings::from(&BinauralConfig::default())
        }
    }

    fn ring_data(fs: f32) -> HrirData {
        let dirs: Vec<Direction> = (0..12).map(|i| Direction::new(i as f32 * 30.0, 0.0)).collect();
        let mut impulses = Array4::zeros((1, dirs.len(), 2, 32));
        for d in 0..dirs.len() {
            impulses[[0, d, 0, 2]] = 1.0;
            impulses[[0, d, 1, 4]] = 0.5;
        }
        HrirData::new(dirs, fs, impulses, None).unwrap()
    }

    fn no_progress(_: f32, _: &str) {}

    #[test]
    fn test_first_build_is_full_on_default_grid() {
        let mut builder = BankBuilder::new();
        let settings = BuildSettings::from(&BinauralConfig::default());
        assert_eq!(
            builder.effective_mode(ReinitMode::None, &settings),
            ReinitMode::Full
        );

        let generation = builder
            .build(ReinitMode::None, &settings, &FixedLoader::new(None), &no_progress)
            .unwrap();
        assert!(generation.grid.is_default);
        assert!(generation.grid.is_3d);
        assert_eq!(generation.grid.num_sets, 1);
        assert_eq!(generation.bank.num_directions(), generation.grid.num_directions());
    }

    #[test]
    fn test_load_failure_falls_back_to_default() {
        let mut builder = BankBuilder::new();
        let loader = FixedLoader::new(None);
        let generation = builder
            .build(ReinitMode::Full, &file_settings(), &loader, &no_progress)
            .unwrap();
        assert_eq!(loader.opens.load(Ordering::SeqCst), 1);
        assert!(generation.grid.is_default);
    }

    #[test]
    fn test_custom_ring_is_2d() {
        let mut builder = BankBuilder::new();
        let loader = FixedLoader::new(Some(ring_data(48000.0)));
        let generation = builder
            .build(ReinitMode::Full, &file_settings(), &loader, &no_progress)
            .unwrap();
        assert!(!generation.grid.is_default);
        assert!(!generation.grid.is_3d);
        assert_eq!(generation.grid.num_directions(), 12);
    }

    #[test]
    fn test_degenerate_grid_falls_back_to_default() {
        // Three directions cannot be triangulated
        let dirs = vec![
            Direction::new(0.0, 0.0),
            Direction::new(90.0, 30.0),
            Direction::new(-90.0, -30.0),
        ];
        let data = HrirData::new(dirs, 48000.0, Array4::zeros((1, 3, 2, 16)), None).unwrap();
        let mut builder = BankBuilder::new();
        let generation = builder
            .build(
                ReinitMode::Full,
                &file_settings(),
                &FixedLoader::new(Some(data)),
                &no_progress,
            )
            .unwrap();
        assert!(generation.grid.is_default);
    }

    #[test]
    fn test_resample_only_skips_loading() {
        let mut builder = BankBuilder::new();
        let loader = FixedLoader::new(Some(ring_data(48000.0)));
        let mut settings = file_settings();
        builder
            .build(ReinitMode::Full, &settings, &loader, &no_progress)
            .unwrap();

        settings.sample_rate = 96000.0;
        assert_eq!(
            builder.effective_mode(ReinitMode::None, &settings),
            ReinitMode::ResampleOnly
        );
        let generation = builder
            .build(ReinitMode::ResampleOnly, &settings, &loader, &no_progress)
            .unwrap();
        assert_eq!(loader.opens.load(Ordering::SeqCst), 1);
        assert_eq!(generation.grid.loaded_len, 32);
        assert_eq!(generation.grid.runtime_len, 64);
        assert_eq!(generation.grid.runtime_fs, 96000.0);
        assert_eq!(generation.grid.loaded_fs, 48000.0);
    }

    #[test]
    fn test_eq_only_reuses_raw_filters() {
        let mut builder = BankBuilder::new();
        let loader = FixedLoader::new(Some(ring_data(48000.0)));
        let mut settings = file_settings();
        settings.diffuse_eq = false;
        let plain = builder
            .build(ReinitMode::Full, &settings, &loader, &no_progress)
            .unwrap();

        settings.diffuse_eq = true;
        let equalised = builder
            .build(ReinitMode::DiffuseEqOnly, &settings, &loader, &no_progress)
            .unwrap();
        assert_eq!(loader.opens.load(Ordering::SeqCst), 1);
        assert!(equalised.id > plain.id);
        assert!(Arc::ptr_eq(&plain.table, &equalised.table));
        assert_ne!(plain.bank.hrtf_fb, equalised.bank.hrtf_fb);
    }

    #[test]
    fn test_none_returns_last_generation() {
        let mut builder = BankBuilder::new();
        let settings = BuildSettings::from(&BinauralConfig::default());
        let loader = FixedLoader::new(None);
        let first = builder
            .build(ReinitMode::Full, &settings, &loader, &no_progress)
            .unwrap();
        let again = builder
            .build(ReinitMode::None, &settings, &loader, &no_progress)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_progress_reaches_done() {
        let mut builder = BankBuilder::new();
        let settings = BuildSettings::from(&BinauralConfig::default());
        let seen = RefCell::new(Vec::new());
        builder
            .build(ReinitMode::Full, &settings, &FixedLoader::new(None), &|p, text: &str| {
                seen.borrow_mut().push((p, text.to_string()))
            })
            .unwrap();
        let seen = seen.into_inner();
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last().map(|s| s.0), Some(1.0));
    }
}
