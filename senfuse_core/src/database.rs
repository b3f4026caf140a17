//! Scene database: owns every per-scene and per-sensor grid of a run.
//!
//! For each scene the database holds the ground truth, a fused (filtered)
//! TSDF and, per configured sensor, a [`SensorState`]. In test mode it also
//! holds the sensor weighting: one grid for a sensor pair (two channels with
//! `outlier_channel`), or one grid per sensor for three or more sensors.
//!
//! Every grid is allocated separately, so no two grids ever share storage.

use crate::batch::FusionUpdateBatch;
use crate::config::FusionConfig;
use crate::error::{FusionError, Result};
use crate::grid::VoxelGrid;
use crate::integrator::{FusionTarget, IntegrationOutcome, Integrator};
use crate::mask::VoxelMask;
use crate::metrics::{evaluate_grid, EvalMetrics, EvalMode, EvaluationReport, SceneEvaluation};
use crate::persistence::{read_dataset, write_dataset};
use crate::proxy::{blend_pair, proxy_sensor_weighting, SensorObservation, UNTOUCHED_WEIGHTING};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FILE_EXTENSION: &str = "vgz";

/// Ground truth for one scene, read-only to the engine.
#[derive(Debug, Clone)]
pub struct GroundTruthScene {
    pub id: String,
    pub grid: VoxelGrid,
    pub proxy_alpha: Option<VoxelGrid>,
}

impl GroundTruthScene {
    pub fn new(id: impl Into<String>, grid: VoxelGrid) -> Self {
        Self {
            id: id.into(),
            grid,
            proxy_alpha: None,
        }
    }

    /// Attaches a proxy sensor weighting used for supervision.
    pub fn with_proxy_alpha(mut self, proxy_alpha: VoxelGrid) -> Self {
        self.proxy_alpha = Some(proxy_alpha);
        self
    }
}

/// Fusion state of one sensor in one scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    pub tsdf: VoxelGrid,
    pub fusion_weights: VoxelGrid,
    pub features: VoxelGrid,
    pub feature_weights: VoxelGrid,

    /// Outlier-filtered TSDF, tracked in test mode with `outlier_filter`
    pub tsdf_refined: Option<VoxelGrid>,
}

impl SensorState {
    fn new(gt: &VoxelGrid, config: &FusionConfig) -> Self {
        Self {
            tsdf: gt.like(1, config.init_value),
            fusion_weights: gt.like(1, 0.0),
            features: gt.like(config.n_features, 0.0),
            feature_weights: gt.like(1, 0.0),
            tsdf_refined: config.tracks_refined().then(|| gt.like(1, config.init_value)),
        }
    }

    // The refined grid is not part of the reset set.
    fn reset(&mut self, init_value: f32) {
        self.tsdf.fill(init_value);
        self.fusion_weights.fill(0.0);
        self.features.fill(0.0);
        self.feature_weights.fill(0.0);
    }

    /// Mutable access to the four grids an integration call touches.
    pub fn target(&mut self) -> FusionTarget<'_> {
        FusionTarget {
            tsdf: &mut self.tsdf,
            weights: &mut self.fusion_weights,
            features: &mut self.features,
            feature_weights: &mut self.feature_weights,
        }
    }
}

/// Per-voxel blend coefficients between sensors, initialized to `-1`.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorWeighting {
    /// Two sensors: `alpha` weights the first sensor, `1 - alpha` the second
    Pair(VoxelGrid),

    /// Three or more sensors: one grid per sensor
    PerSensor(BTreeMap<String, VoxelGrid>),
}

#[derive(Debug, Clone)]
struct SceneEntry {
    gt: GroundTruthScene,
    sensors: BTreeMap<String, SensorState>,
    filtered: VoxelGrid,
    sensor_weighting: Option<SensorWeighting>,
}

/// Read view of one scene.
#[derive(Debug, Clone, Copy)]
pub struct SceneView<'a> {
    pub gt: &'a VoxelGrid,
    pub proxy_alpha: Option<&'a VoxelGrid>,
    pub filtered: &'a VoxelGrid,
    pub sensor_weighting: Option<&'a SensorWeighting>,
    sensors: &'a BTreeMap<String, SensorState>,
}

impl<'a> SceneView<'a> {
    /// State of `sensor`, if configured.
    pub fn sensor(&self, sensor: &str) -> Option<&'a SensorState> {
        self.sensors.get(sensor)
    }

    /// Sensors in name order.
    pub fn sensors(&self) -> impl Iterator<Item = (&'a str, &'a SensorState)> {
        self.sensors.iter().map(|(name, state)| (name.as_str(), state))
    }
}

/// Owns the grids of every scene in a run.
#[derive(Debug, Clone)]
pub struct SceneDatabase {
    config: FusionConfig,
    scenes: BTreeMap<String, SceneEntry>,
}

impl SceneDatabase {
    /// Allocates fusion state for every scene.
    pub fn new(config: FusionConfig, scenes: Vec<GroundTruthScene>) -> Result<Self> {
        config.validate()?;

        let mut entries = BTreeMap::new();
        for scene in scenes {
            if config.alpha_supervision && scene.proxy_alpha.is_none() {
                return Err(FusionError::config(format!(
                    "alpha supervision needs a proxy weighting for scene {}",
                    scene.id
                )));
            }
            if entries.contains_key(&scene.id) {
                return Err(FusionError::config(format!("duplicate scene: {}", scene.id)));
            }

            let gt = &scene.grid;
            let sensors = config
                .sensors
                .iter()
                .map(|name| (name.clone(), SensorState::new(gt, &config)))
                .collect();
            let filtered = gt.like(1, config.init_value);
            let sensor_weighting = Self::allocate_weighting(gt, &config);

            debug!(scene = %scene.id, shape = ?gt.shape(), "Allocated scene grids");
            entries.insert(
                scene.id.clone(),
                SceneEntry {
                    gt: scene,
                    sensors,
                    filtered,
                    sensor_weighting,
                },
            );
        }

        info!(
            scenes = entries.len(),
            sensors = config.sensors.len(),
            test_mode = config.test_mode,
            "Scene database ready"
        );
        Ok(Self {
            config,
            scenes: entries,
        })
    }

    fn allocate_weighting(gt: &VoxelGrid, config: &FusionConfig) -> Option<SensorWeighting> {
        if !config.test_mode {
            return None;
        }
        match config.sensors.len() {
            2 => {
                let channels = if config.outlier_channel { 2 } else { 1 };
                Some(SensorWeighting::Pair(gt.like(channels, UNTOUCHED_WEIGHTING)))
            }
            n if n > 2 => Some(SensorWeighting::PerSensor(
                config
                    .sensors
                    .iter()
                    .map(|name| (name.clone(), gt.like(1, UNTOUCHED_WEIGHTING)))
                    .collect(),
            )),
            _ => None,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Scene ids in sorted order.
    pub fn scene_ids(&self) -> impl Iterator<Item = &str> {
        self.scenes.keys().map(String::as_str)
    }

    /// Reinitializes the sensor grids of one scene, or of all scenes.
    ///
    /// Ground truth, fused and weighting grids are left as they are.
    pub fn reset(&mut self, scene: Option<&str>) -> Result<()> {
        let init_value = self.config.init_value;
        match scene {
            Some(id) => {
                let entry = self
                    .scenes
                    .get_mut(id)
                    .ok_or_else(|| FusionError::unknown_scene(id))?;
                entry.sensors.values_mut().for_each(|s| s.reset(init_value));
                debug!(scene = id, "Reset sensor grids");
            }
            None => {
                for entry in self.scenes.values_mut() {
                    entry.sensors.values_mut().for_each(|s| s.reset(init_value));
                }
                debug!("Reset sensor grids of all scenes");
            }
        }
        Ok(())
    }

    pub fn get(&self, scene: &str) -> Result<SceneView<'_>> {
        let entry = self.entry(scene)?;
        Ok(SceneView {
            gt: &entry.gt.grid,
            proxy_alpha: entry.gt.proxy_alpha.as_ref(),
            filtered: &entry.filtered,
            sensor_weighting: entry.sensor_weighting.as_ref(),
            sensors: &entry.sensors,
        })
    }

    /// Integrates one batch of `sensor` into `scene`.
    pub fn integrate(
        &mut self,
        scene: &str,
        sensor: &str,
        batch: &FusionUpdateBatch,
        integrator: &Integrator,
    ) -> Result<IntegrationOutcome> {
        let state = self.sensor_state_mut(scene, sensor)?;
        integrator.integrate(batch, state.target())
    }

    pub fn sensor_state(&self, scene: &str, sensor: &str) -> Result<&SensorState> {
        self.entry(scene)?
            .sensors
            .get(sensor)
            .ok_or_else(|| FusionError::unknown_sensor(sensor))
    }

    pub fn sensor_state_mut(&mut self, scene: &str, sensor: &str) -> Result<&mut SensorState> {
        self.entry_mut(scene)?
            .sensors
            .get_mut(sensor)
            .ok_or_else(|| FusionError::unknown_sensor(sensor))
    }

    pub fn filtered_mut(&mut self, scene: &str) -> Result<&mut VoxelGrid> {
        Ok(&mut self.entry_mut(scene)?.filtered)
    }

    /// Sensor weighting of `scene`, `None` outside test mode.
    pub fn sensor_weighting_mut(&mut self, scene: &str) -> Result<Option<&mut SensorWeighting>> {
        Ok(self.entry_mut(scene)?.sensor_weighting.as_mut())
    }

    /// Stores the oracle pair weighting computed from ground truth.
    ///
    /// Only the first channel is written when the weighting carries an
    /// outlier channel.
    pub fn compute_proxy_weighting(&mut self, scene: &str) -> Result<()> {
        let [first, second] = self.sensor_pair()?;
        let entry = self.entry_mut(scene)?;
        let alpha = proxy_sensor_weighting(
            observation(sensor_in(&entry.sensors, &first)?),
            observation(sensor_in(&entry.sensors, &second)?),
            &entry.gt.grid,
        )?;

        match entry.sensor_weighting.as_mut() {
            Some(SensorWeighting::Pair(weighting)) => {
                for (key, value) in alpha.scalar_values().into_iter().enumerate() {
                    weighting.set_value(key, value);
                }
                Ok(())
            }
            _ => Err(FusionError::config("proxy weighting needs a two-sensor test configuration")),
        }
    }

    /// Writes the fused grid blended from the stored pair weighting.
    ///
    /// Voxels without a coefficient fall back to the fusion-weight average of
    /// both sensors, then to the configured initial value.
    pub fn fuse_with_weighting(&mut self, scene: &str) -> Result<()> {
        let [first, second] = self.sensor_pair()?;
        let init_value = self.config.init_value;
        let entry = self.entry_mut(scene)?;
        let weighting = match entry.sensor_weighting.as_ref() {
            Some(SensorWeighting::Pair(weighting)) => weighting,
            _ => return Err(FusionError::config("fusion needs a two-sensor test configuration")),
        };
        let fused = blend_pair(
            weighting,
            fused_input(sensor_in(&entry.sensors, &first)?),
            fused_input(sensor_in(&entry.sensors, &second)?),
            init_value,
        )?;
        entry.filtered = fused;
        debug!(scene, "Fused sensor pair");
        Ok(())
    }

    /// Writes every persisted grid of `scene` under `dir`.
    ///
    /// Returns the written file paths.
    pub fn save(&self, dir: impl AsRef<Path>, scene: &str) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let entry = self.entry(scene)?;
        let mut written = Vec::new();
        let mut put = |file: String, name: &str, grid: &VoxelGrid| -> Result<()> {
            let path = dir.join(file);
            write_dataset(&path, name, grid)?;
            written.push(path);
            Ok(())
        };

        for sensor in &self.config.sensors {
            let state = entry
                .sensors
                .get(sensor)
                .ok_or_else(|| FusionError::unknown_sensor(sensor))?;
            put(sensor_file(scene, sensor, "tsdf"), "TSDF", &state.tsdf)?;
            put(sensor_file(scene, sensor, "weights"), "weights", &state.feature_weights)?;
            if self.config.persist_features {
                put(sensor_file(scene, sensor, "features"), "features", &state.features)?;
            }
            if let Some(refined) = &state.tsdf_refined {
                put(sensor_file(scene, sensor, "tsdf_refined"), "TSDF", refined)?;
            }
        }

        put(scene_file(scene, "tsdf_filtered"), "TSDF_filtered", &entry.filtered)?;

        match &entry.sensor_weighting {
            Some(SensorWeighting::Pair(weighting)) => {
                put(scene_file(scene, "sensor_weighting"), "sensor_weighting", weighting)?;
            }
            Some(SensorWeighting::PerSensor(grids)) => {
                for (sensor, weighting) in grids {
                    put(
                        sensor_file(scene, sensor, "sensor_weighting"),
                        "sensor_weighting",
                        weighting,
                    )?;
                }
            }
            None => {}
        }

        info!(scene, files = written.len(), dir = %dir.display(), "Saved scene");
        Ok(written)
    }

    /// Restores the grids written by [`SceneDatabase::save`].
    ///
    /// The stored feature weights are loaded into both weight grids of each
    /// sensor.
    pub fn load(&mut self, dir: impl AsRef<Path>, scene: &str) -> Result<()> {
        let dir = dir.as_ref();
        let sensors = self.config.sensors.clone();
        let persist_features = self.config.persist_features;
        let entry = self.entry_mut(scene)?;

        for sensor in &sensors {
            let state = entry
                .sensors
                .get_mut(sensor)
                .ok_or_else(|| FusionError::unknown_sensor(sensor))?;
            load_into(&dir.join(sensor_file(scene, sensor, "tsdf")), "TSDF", &mut state.tsdf)?;
            load_into(
                &dir.join(sensor_file(scene, sensor, "weights")),
                "weights",
                &mut state.feature_weights,
            )?;
            state.fusion_weights = state.feature_weights.clone();
            if persist_features {
                load_into(
                    &dir.join(sensor_file(scene, sensor, "features")),
                    "features",
                    &mut state.features,
                )?;
            }
            if let Some(refined) = state.tsdf_refined.as_mut() {
                load_into(&dir.join(sensor_file(scene, sensor, "tsdf_refined")), "TSDF", refined)?;
            }
        }

        load_into(
            &dir.join(scene_file(scene, "tsdf_filtered")),
            "TSDF_filtered",
            &mut entry.filtered,
        )?;

        match entry.sensor_weighting.as_mut() {
            Some(SensorWeighting::Pair(weighting)) => {
                load_into(&dir.join(scene_file(scene, "sensor_weighting")), "sensor_weighting", weighting)?;
            }
            Some(SensorWeighting::PerSensor(grids)) => {
                for (sensor, weighting) in grids.iter_mut() {
                    load_into(
                        &dir.join(sensor_file(scene, sensor, "sensor_weighting")),
                        "sensor_weighting",
                        weighting,
                    )?;
                }
            }
            None => {}
        }

        info!(scene, dir = %dir.display(), "Loaded scene");
        Ok(())
    }

    /// Evaluates every sensor and the fused grid of every scene.
    ///
    /// A sensor is masked by its feature weights; the fused grid by the union
    /// of all fusion weights. Results are averaged over scenes.
    pub fn evaluate(&self, mode: EvalMode) -> Result<EvaluationReport> {
        let mut sensor_totals: BTreeMap<String, EvalMetrics> = self
            .config
            .sensors
            .iter()
            .map(|name| (name.clone(), EvalMetrics::default()))
            .collect();
        let mut fused_total = EvalMetrics::default();
        let mut per_scene = BTreeMap::new();

        for (id, entry) in &self.scenes {
            let gt = &entry.gt.grid;
            let mut scene_eval = SceneEvaluation::default();
            let mut fused_mask = VoxelMask::empty(gt.shape());

            for (name, state) in &entry.sensors {
                let mask = self.maybe_erode(VoxelMask::from_predicate(&state.feature_weights, |w| w > 0.0));
                let metrics = evaluate_grid(&state.tsdf, gt, &mask)?;
                fused_mask.or_assign(&VoxelMask::from_predicate(&state.fusion_weights, |w| w > 0.0))?;

                info!(
                    scene = %id,
                    sensor = %name,
                    voxels = mask.count(),
                    iou = metrics.iou,
                    acc = metrics.acc,
                    mad = metrics.mad,
                    mse = metrics.mse,
                    "Evaluated sensor"
                );
                if let Some(total) = sensor_totals.get_mut(name) {
                    *total += metrics;
                }
                scene_eval.sensors.insert(name.clone(), metrics);
            }

            let fused_mask = self.maybe_erode(fused_mask);
            let fused = evaluate_grid(&entry.filtered, gt, &fused_mask)?;
            info!(
                scene = %id,
                voxels = fused_mask.count(),
                iou = fused.iou,
                acc = fused.acc,
                mad = fused.mad,
                mse = fused.mse,
                "Evaluated fused grid"
            );
            fused_total += fused;
            scene_eval.fused = fused;
            per_scene.insert(id.clone(), scene_eval);
        }

        let n = self.scenes.len().max(1) as f64;
        Ok(EvaluationReport {
            sensors: sensor_totals
                .into_iter()
                .map(|(name, total)| (name, total.scaled(n)))
                .collect(),
            fused: fused_total.scaled(n),
            per_scene: (mode == EvalMode::Test).then_some(per_scene),
        })
    }

    fn maybe_erode(&self, mask: VoxelMask) -> VoxelMask {
        if self.config.erosion {
            mask.erode()
        } else {
            mask
        }
    }

    fn sensor_pair(&self) -> Result<[String; 2]> {
        match self.config.sensors.as_slice() {
            [first, second] => Ok([first.clone(), second.clone()]),
            other => Err(FusionError::config(format!(
                "expected exactly two sensors, got {}",
                other.len()
            ))),
        }
    }

    fn entry(&self, scene: &str) -> Result<&SceneEntry> {
        self.scenes
            .get(scene)
            .ok_or_else(|| FusionError::unknown_scene(scene))
    }

    fn entry_mut(&mut self, scene: &str) -> Result<&mut SceneEntry> {
        self.scenes
            .get_mut(scene)
            .ok_or_else(|| FusionError::unknown_scene(scene))
    }
}

fn sensor_in<'a>(sensors: &'a BTreeMap<String, SensorState>, name: &str) -> Result<&'a SensorState> {
    sensors.get(name).ok_or_else(|| FusionError::unknown_sensor(name))
}

fn observation(state: &SensorState) -> SensorObservation<'_> {
    SensorObservation {
        tsdf: &state.tsdf,
        weights: &state.feature_weights,
    }
}

fn fused_input(state: &SensorState) -> SensorObservation<'_> {
    SensorObservation {
        tsdf: &state.tsdf,
        weights: &state.fusion_weights,
    }
}

fn sensor_file(scene: &str, sensor: &str, quantity: &str) -> String {
    format!("{}_{}.{}.{}", scene, sensor, quantity, FILE_EXTENSION)
}

fn scene_file(scene: &str, quantity: &str) -> String {
    format!("{}.{}.{}", scene, quantity, FILE_EXTENSION)
}

fn load_into(path: &Path, name: &str, grid: &mut VoxelGrid) -> Result<()> {
    let stored = read_dataset(path)?;
    if stored.name != name {
        return Err(FusionError::format(format!(
            "{}: expected dataset {}, found {}",
            path.display(),
            name,
            stored.name
        )));
    }
    if stored.shape != grid.shape() || stored.channels != grid.channels() {
        return Err(FusionError::ShapeMismatch {
            expected: vec![grid.shape()[0], grid.shape()[1], grid.shape()[2], grid.channels()],
            got: vec![stored.shape[0], stored.shape[1], stored.shape[2], stored.channels],
        });
    }
    *grid = stored.into_grid()?;
    Ok(())
}
