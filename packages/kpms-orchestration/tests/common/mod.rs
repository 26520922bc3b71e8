//! Shared fixture: temp data root, in-memory store, fake collaborators

#![allow(dead_code)]

use anyhow::{bail, Context};
use kpms_orchestration::{
    Collaborators, KeypointToolkit, LoadedKeypoints, ModelInput, PcaModel, PopulationDriver,
    ProjectConfig, StageConfig, StageContext, StaticRootDirectories, VideoMetadata,
    VideoMetadataReader,
};
use kpms_storage::{
    Bodyparts, EntityStore, FormatMethod, KeypointSet, NdArray, PcaTask, RecordingArrays,
    SqliteEntityStore, TaskKey, TaskMode, VideoFile,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TRACKED_BODYPARTS: [&str; 4] = ["nose", "spine4", "tailbase", "tail_tip"];

/// Stand-in for the keypoint library; the "model" is a JSON file
pub struct FakeToolkit {
    pub explained_variance_ratio: Vec<f64>,
    pub setup_calls: AtomicUsize,
    pub fit_calls: AtomicUsize,
    pub fail_next_fit: AtomicBool,
    /// Calls currently writing or reading a project directory
    in_project: AtomicUsize,
    max_in_project: AtomicUsize,
}

impl FakeToolkit {
    pub fn new(explained_variance_ratio: Vec<f64>) -> Self {
        Self {
            explained_variance_ratio,
            setup_calls: AtomicUsize::new(0),
            fit_calls: AtomicUsize::new(0),
            fail_next_fit: AtomicBool::new(false),
            in_project: AtomicUsize::new(0),
            max_in_project: AtomicUsize::new(0),
        }
    }

    /// Most project-directory calls ever seen in flight at once
    pub fn max_in_project(&self) -> usize {
        self.max_in_project.load(Ordering::SeqCst)
    }

    fn in_project<T>(&self, f: impl FnOnce() -> T) -> T {
        let now = self.in_project.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_project.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        let result = f();
        self.in_project.fetch_sub(1, Ordering::SeqCst);
        result
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn fit_calls(&self) -> usize {
        self.fit_calls.load(Ordering::SeqCst)
    }
}

impl KeypointToolkit for FakeToolkit {
    fn setup_project(&self, project_dir: &Path, source_config: &Path) -> anyhow::Result<()> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        if !source_config.exists() {
            bail!("{} does not exist", source_config.display());
        }
        self.in_project(|| -> anyhow::Result<()> {
            std::fs::create_dir_all(project_dir)?;
            let config = ProjectConfig {
                bodyparts: TRACKED_BODYPARTS.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            };
            std::fs::write(project_dir.join("config.yml"), config.to_yaml_string()?)?;
            Ok(())
        })
    }

    fn load_config(&self, project_dir: &Path) -> anyhow::Result<ProjectConfig> {
        let content = std::fs::read_to_string(project_dir.join("config.yml"))
            .context("project not set up")?;
        Ok(ProjectConfig::from_yaml_str(&content)?)
    }

    fn load_keypoints(
        &self,
        patterns: &[String],
        format: FormatMethod,
    ) -> anyhow::Result<LoadedKeypoints> {
        if format != FormatMethod::DeepLabCut {
            bail!("cannot parse {}", format);
        }
        let mut loaded = LoadedKeypoints {
            bodyparts: vec!["nose".into(), "spine4".into(), "tailbase".into()],
            ..Default::default()
        };
        for pattern in patterns {
            let name = Path::new(pattern.trim_end_matches('*'))
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            loaded.coordinates.insert(
                name.clone(),
                NdArray::new(vec![2, 3, 2], vec![1.0; 12])?,
            );
            loaded
                .confidences
                .insert(name, NdArray::new(vec![2, 3], vec![0.9; 6])?);
        }
        Ok(loaded)
    }

    fn format_data(
        &self,
        config: &ProjectConfig,
        coordinates: &RecordingArrays,
        _confidences: &RecordingArrays,
    ) -> anyhow::Result<ModelInput> {
        if config.video_dir.is_none() {
            bail!("video_dir missing from config");
        }
        Ok(ModelInput {
            recordings: coordinates.keys().cloned().collect(),
            ..Default::default()
        })
    }

    fn fit_model(&self, data: &ModelInput, _config: &ProjectConfig) -> anyhow::Result<PcaModel> {
        self.fit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_fit.swap(false, Ordering::SeqCst) {
            bail!("PCA did not converge");
        }
        if data.recordings.is_empty() {
            bail!("no recordings");
        }
        Ok(PcaModel {
            explained_variance_ratio: self.explained_variance_ratio.clone(),
        })
    }

    fn save_model(&self, model: &PcaModel, project_dir: &Path) -> anyhow::Result<()> {
        self.in_project(|| -> anyhow::Result<()> {
            std::fs::write(project_dir.join("pca.json"), serde_json::to_vec(model)?)?;
            Ok(())
        })
    }

    fn load_model(&self, project_dir: &Path) -> anyhow::Result<PcaModel> {
        self.in_project(|| -> anyhow::Result<PcaModel> {
            let bytes = std::fs::read(project_dir.join("pca.json")).context("no saved model")?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }
}

/// 480x640, 100 frames; `mouse2` videos run at 30.5 fps, the rest at 29.97
pub struct FakeVideoReader;

impl VideoMetadataReader for FakeVideoReader {
    fn read(&self, path: &Path) -> anyhow::Result<VideoMetadata> {
        if !path.exists() {
            bail!("cannot open {}", path.display());
        }
        let frame_rate = if path.to_string_lossy().contains("mouse2") {
            30.5
        } else {
            29.97
        };
        Ok(VideoMetadata {
            height: 480,
            width: 640,
            frame_count: 100,
            frame_rate,
        })
    }
}

pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
    pub store: Arc<SqliteEntityStore>,
    pub toolkit: Arc<FakeToolkit>,
}

impl Fixture {
    /// Root with `dlc/config.yaml` and two videos under `dlc/videos`
    pub async fn new(explained_variance_ratio: Vec<f64>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("dlc/videos")).unwrap();
        std::fs::write(root.join("dlc/config.yaml"), "bodyparts: []\n").unwrap();
        std::fs::write(root.join("dlc/videos/mouse1.mp4"), b"").unwrap();
        std::fs::write(root.join("dlc/videos/mouse2.mp4"), b"").unwrap();

        let store = SqliteEntityStore::in_memory().unwrap();
        store.seed_lookups().await.unwrap();

        Self {
            _dir: dir,
            root,
            store: Arc::new(store),
            toolkit: Arc::new(FakeToolkit::new(explained_variance_ratio)),
        }
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn project_dir(&self, output_dir: &str) -> PathBuf {
        self.processed_dir().join(output_dir)
    }

    pub async fn add_keypoint_set(&self, kpset_id: i64, format: FormatMethod, with_videos: bool) {
        let kpset = KeypointSet::new(kpset_id, format, "dlc", "dlc/videos");
        let videos = if with_videos {
            vec![
                VideoFile::new(kpset_id, 1, "dlc/videos/mouse1.mp4"),
                VideoFile::new(kpset_id, 2, "dlc/videos/mouse2.mp4"),
            ]
        } else {
            vec![]
        };
        self.store.insert_keypoint_set(&kpset, &videos).await.unwrap();
    }

    pub async fn add_task(&self, key: TaskKey, output_dir: &str, mode: TaskMode) {
        let bodyparts = Bodyparts {
            key,
            anterior_bodyparts: vec!["nose".into()],
            posterior_bodyparts: vec!["tailbase".into()],
            use_bodyparts: vec!["nose".into(), "spine4".into(), "tailbase".into()],
            description: String::new(),
        };
        self.add_task_with_bodyparts(&bodyparts, output_dir, mode)
            .await;
    }

    pub async fn add_task_with_bodyparts(
        &self,
        bodyparts: &Bodyparts,
        output_dir: &str,
        mode: TaskMode,
    ) {
        let key = bodyparts.key;
        self.store.insert_bodyparts(bodyparts).await.unwrap();
        self.store
            .insert_pca_task(&PcaTask::new(key, output_dir, mode))
            .await
            .unwrap();
    }

    pub fn context(&self, config: StageConfig) -> StageContext {
        let roots = StaticRootDirectories::new(vec![self.root.clone()], Some(self.processed_dir()));
        let collaborators = Collaborators::new(
            Arc::new(roots),
            Arc::new(FakeVideoReader),
            self.toolkit.clone(),
        );
        StageContext::new(self.store.clone(), collaborators, config)
    }

    pub fn driver(&self) -> PopulationDriver {
        self.driver_with(StageConfig::default())
    }

    pub fn driver_with(&self, config: StageConfig) -> PopulationDriver {
        PopulationDriver::with_default_stages(self.context(config)).unwrap()
    }
}
