//! Scenario runner - executes fusion scenarios against the oracle scenes.

use crate::error::{SimError, SimResult};
use crate::exporter::{FrameRecord, SimExport};
use crate::oracle::{GridSpec, Oracle};
use crate::scenarios::ScenarioId;
use crate::sensor::{DepthSensor, SensorModel};

use senfuse_core::{
    EvalMode, EvaluationReport, FusionConfig, GroundTruthScene, Integrator, SceneDatabase,
    VoxelGrid,
};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames per scene
    pub frames: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Evaluation after the last frame
    pub report: Option<EvaluationReport>,

    /// Files written by the scene database
    pub saved_files: Vec<PathBuf>,
}

/// Totals over every integration call of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioMetrics {
    pub integrations: u64,
    pub samples: u64,
    pub surface_updates: u64,
    pub empty_updates: u64,
    pub feature_updates: u64,
    pub dropped: u64,
    pub active_voxels: u64,
}

impl ScenarioMetrics {
    fn record(&mut self, frame: &FrameRecord) {
        self.integrations += 1;
        self.samples += frame.samples as u64;
        self.surface_updates += frame.surface_updates as u64;
        self.empty_updates += frame.empty_updates as u64;
        self.feature_updates += frame.feature_updates as u64;
        self.dropped += frame.dropped as u64;
        self.active_voxels += frame.active_voxels as u64;
    }
}

/// Runs fusion scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frames integrated per scene and sensor
    frames: usize,

    /// Rays per image axis for every sensor
    rays_per_axis: usize,

    /// Margin withheld from the border-filtered active set
    border_margin: usize,

    grid: GridSpec,

    /// Base configuration; scenarios override sensors and modes
    config: FusionConfig,

    /// Directory the scene database saves into
    save_dir: Option<PathBuf>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            frames: 12,
            rays_per_axis: 24,
            border_margin: 2,
            grid: GridSpec::default(),
            config: FusionConfig::default(),
            save_dir: None,
        }
    }

    /// Sets the number of frames per scene.
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    /// Sets the ray fan resolution.
    pub fn with_rays_per_axis(mut self, rays: usize) -> Self {
        self.rays_per_axis = rays;
        self
    }

    /// Sets the simulated lattice.
    pub fn with_grid(mut self, grid: GridSpec) -> Self {
        self.grid = grid;
        self
    }

    /// Sets the base fusion configuration.
    pub fn with_config(mut self, config: FusionConfig) -> Self {
        self.config = config;
        self
    }

    /// Saves every scene into `dir` after the run.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario, None)
    }

    /// Runs a scenario, recording every integration call into `export`.
    pub fn run_with_export(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut metrics = ScenarioMetrics::default();
        let outcome = self.execute(scenario, &mut metrics, export.as_deref_mut());

        let result = match outcome {
            Ok((report, saved_files)) => {
                let failure_reason = self.check(scenario, &metrics, &report);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: failure_reason.is_none(),
                    frames: self.frames,
                    failure_reason,
                    metrics,
                    report: Some(report),
                    saved_files,
                }
            }
            Err(e) => {
                warn!("Scenario {} aborted: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    frames: self.frames,
                    failure_reason: Some(e.to_string()),
                    metrics,
                    report: None,
                    saved_files: Vec::new(),
                }
            }
        };

        if let Some(export) = export {
            export.saved_files = result.saved_files.clone();
            export.finalize(result.passed, result.failure_reason.clone(), result.report.clone());
        }
        result
    }

    /// Fusion configuration a scenario runs with.
    pub fn scenario_config(&self, scenario: ScenarioId) -> FusionConfig {
        let mut config = self
            .config
            .clone()
            .with_sensors(scenario.sensors().iter().copied())
            .with_test_mode(scenario == ScenarioId::DualSensor);
        config.train_on_border_voxels = scenario == ScenarioId::BorderTraining;
        config
    }

    fn sensor_model(&self, scenario: ScenarioId, name: &str) -> SensorModel {
        let model = SensorModel::for_name(name).with_rays_per_axis(self.rays_per_axis);
        match scenario {
            ScenarioId::Carving => model.with_outlier_rate(0.1),
            _ => model,
        }
    }

    fn execute(
        &self,
        scenario: ScenarioId,
        metrics: &mut ScenarioMetrics,
        mut export: Option<&mut SimExport>,
    ) -> SimResult<(EvaluationReport, Vec<PathBuf>)> {
        if self.frames == 0 {
            return Err(SimError::InvalidScenario("at least one frame is required".to_string()));
        }
        let config = self.scenario_config(scenario);
        config.validate()?;

        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut oracles = vec![
            Oracle::sphere_scene(self.grid, physics_seed),
            Oracle::box_scene(self.grid, physics_seed.wrapping_add(1)),
        ];
        let lattices: Vec<VoxelGrid> = oracles
            .iter()
            .map(|oracle| oracle.ground_truth_grid(config.trunc_value))
            .collect::<SimResult<_>>()?;
        let scenes = oracles
            .iter()
            .zip(&lattices)
            .map(|(oracle, gt)| GroundTruthScene::new(oracle.name(), gt.clone()))
            .collect();

        let mut db = SceneDatabase::new(config.clone(), scenes)?;
        let integrator = Integrator::new(&config)?;
        let mut sensors = config
            .sensors
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let seed = self.seed.wrapping_add(0x5eed).wrapping_mul(i as u64 + 1);
                DepthSensor::new(self.sensor_model(scenario, name), seed)
            })
            .collect::<SimResult<Vec<_>>>()?;

        for (oracle, lattice) in oracles.iter_mut().zip(&lattices) {
            let scene = oracle.name().to_string();
            for frame in 0..self.frames {
                let pose = oracle.camera_pose(frame, self.frames);
                for sensor in sensors.iter_mut() {
                    let batch = sensor.observe(oracle, &pose, lattice, &config, self.border_margin)?;
                    let outcome = db.integrate(&scene, sensor.name(), &batch, &integrator)?;

                    let record = FrameRecord::new(frame, &scene, sensor.name(), batch.num_samples(), &outcome);
                    debug!(
                        "  {} frame={} sensor={} | samples={} surface={} empty={} active={}",
                        scene,
                        frame,
                        sensor.name(),
                        record.samples,
                        record.surface_updates,
                        record.empty_updates,
                        record.active_voxels
                    );
                    metrics.record(&record);
                    if let Some(export) = export.as_deref_mut() {
                        export.add_frame(record);
                    }
                }
            }
            self.fuse(&mut db, &scene, &config)?;
        }

        let report = db.evaluate(EvalMode::Test)?;

        let mut saved_files = Vec::new();
        if let Some(dir) = &self.save_dir {
            std::fs::create_dir_all(dir)?;
            for scene in oracles.iter().map(Oracle::name) {
                saved_files.extend(db.save(dir, scene)?);
            }
        }

        Ok((report, saved_files))
    }

    /// Fills the fused grid: proxy-weighted blend for a sensor pair, the
    /// first sensor's grid otherwise.
    fn fuse(&self, db: &mut SceneDatabase, scene: &str, config: &FusionConfig) -> SimResult<()> {
        if config.test_mode && config.sensors.len() == 2 {
            db.compute_proxy_weighting(scene)?;
            db.fuse_with_weighting(scene)?;
            return Ok(());
        }
        let first = config
            .sensors
            .first()
            .ok_or_else(|| SimError::InvalidScenario("no sensors configured".to_string()))?;
        let tsdf = db.sensor_state(scene, first)?.tsdf.clone();
        *db.filtered_mut(scene)? = tsdf;
        Ok(())
    }

    fn check(
        &self,
        scenario: ScenarioId,
        metrics: &ScenarioMetrics,
        report: &EvaluationReport,
    ) -> Option<String> {
        let trunc = self.config.trunc_value as f64;
        if metrics.surface_updates == 0 {
            return Some("no surface voxel was observed".to_string());
        }
        match scenario {
            ScenarioId::SingleSensor | ScenarioId::Carving => {
                let mad = report.sensors.get("tof").map(|m| m.mad).unwrap_or(f64::INFINITY);
                (mad >= trunc).then(|| format!("tof MAD {:.4} not below truncation {:.2}", mad, trunc))
            }
            ScenarioId::DualSensor => {
                let mad = report.fused.mad;
                (mad >= trunc).then(|| format!("fused MAD {:.4} not below truncation {:.2}", mad, trunc))
            }
            ScenarioId::BorderTraining => (metrics.active_voxels <= metrics.surface_updates).then(|| {
                format!(
                    "active set ({}) does not extend past the surface set ({})",
                    metrics.active_voxels, metrics.surface_updates
                )
            }),
        }
    }
}
