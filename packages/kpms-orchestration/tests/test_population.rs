//! Population driver integration tests
//!
//! - Idempotence: a second pass with no new manual rows changes nothing
//! - Resumability: completed stages are not recomputed
//! - Isolation: a failing key does not block the others
//! - Join eligibility: keypoint sets without videos are never prepared
//! - Configuration errors leave the output directory untouched

mod common;

use common::Fixture;
use kpms_orchestration::{
    load_dj_config, save_dj_config, ErrorCategory, PipelineError, PopulationDriver,
    ProjectConfig, StageConfig, StageId,
};
use kpms_storage::{Bodyparts, DerivedTable, EntityStore, FormatMethod, TaskKey, TaskMode};

const RATIOS: [f64; 4] = [0.5, 0.25, 0.17, 0.05];

#[tokio::test]
async fn test_trigger_mode_populates_every_stage() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Trigger).await;

    let report = fx.driver().populate_all().await.unwrap();

    assert!(report.run_id.starts_with("run-"));
    assert_eq!(report.inserted_total(), 3);
    assert_eq!(report.failed_total(), 0);
    let order: Vec<_> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        order,
        vec![StageId::Prep, StageId::Fitting, StageId::LatentDimension]
    );

    // Prep: config document + formatted keypoints
    let config = load_dj_config(&fx.project_dir("kpms_out")).unwrap();
    assert_eq!(
        config.video_dir.as_deref(),
        Some(fx.root.join("dlc/videos").to_string_lossy().as_ref())
    );
    assert_eq!(config.use_bodyparts, vec!["nose", "spine4", "tailbase"]);
    assert_eq!(config.bodyparts.len(), 4);

    let dataset = fx.store.get_formatted_dataset(key).await.unwrap();
    assert_eq!(
        dataset.coordinates.keys().collect::<Vec<_>>(),
        vec!["mouse1", "mouse2"]
    );
    assert_eq!(dataset.frame_rates, vec![29, 30]);
    assert_eq!(dataset.average_frame_rate, 29);
    assert_eq!(dataset.video_stats[1].video_id, 2);
    assert_eq!(dataset.video_stats[1].frame_count, 100);

    // Fitting: model artifact next to the config
    assert!(fx.project_dir("kpms_out").join("pca.json").exists());
    fx.store.get_pca_fitting(key).await.unwrap();

    // LatentDimension: cs = [0.5, 0.75, 0.92, 0.97]
    let latent = fx.store.get_latent_dimension(key).await.unwrap();
    assert_eq!(latent.latent_dimension, 3);
    assert_eq!(latent.variance_percentage, 90.0);
    assert_eq!(latent.variance_threshold, 0.9);
    assert_eq!(
        latent.latent_dim_desc,
        ">=90.0% of variance explained by 3 components."
    );
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Trigger).await;

    let driver = fx.driver();
    driver.populate_all().await.unwrap();
    let fitting = fx.store.get_pca_fitting(key).await.unwrap();
    let counts = fx.store.table_counts().await.unwrap();

    let report = driver.populate_all().await.unwrap();

    assert_eq!(report.inserted_total(), 0);
    assert!(report.stages.iter().all(|s| s.pending == 0));
    assert_eq!(fx.store.get_pca_fitting(key).await.unwrap(), fitting);
    assert_eq!(fx.store.table_counts().await.unwrap(), counts);
    assert_eq!(fx.toolkit.setup_calls(), 1);
    assert_eq!(fx.toolkit.fit_calls(), 1);
}

#[tokio::test]
async fn test_resumes_with_remaining_stages() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Trigger).await;

    let driver = fx.driver();
    let prep = driver.populate(StageId::Prep).await.unwrap();
    assert_eq!(prep.inserted, vec![key]);
    assert_eq!(driver.pending(StageId::Fitting).await.unwrap().len(), 1);
    assert!(driver
        .pending(StageId::LatentDimension)
        .await
        .unwrap()
        .is_empty());

    let report = driver.populate_all().await.unwrap();

    assert!(report.stage(StageId::Prep).unwrap().inserted.is_empty());
    assert_eq!(report.stage(StageId::Fitting).unwrap().inserted, vec![key]);
    assert_eq!(
        report.stage(StageId::LatentDimension).unwrap().inserted,
        vec![key]
    );
    assert_eq!(fx.toolkit.setup_calls(), 1);
}

#[tokio::test]
async fn test_unsupported_format_fails_without_touching_output() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let good = TaskKey::new(1, 1);
    let bad = TaskKey::new(2, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_keypoint_set(2, FormatMethod::Sleap, true).await;
    fx.add_task(good, "good_out", TaskMode::Trigger).await;
    fx.add_task(bad, "bad_out", TaskMode::Trigger).await;

    let report = fx.driver().populate_all().await.unwrap();

    let prep = report.stage(StageId::Prep).unwrap();
    assert_eq!(prep.pending, 2);
    assert_eq!(prep.inserted, vec![good]);
    assert_eq!(prep.failed.len(), 1);
    assert_eq!(prep.failed[0].key, bad);
    assert_eq!(prep.failed[0].category, ErrorCategory::Configuration);
    assert!(prep.failed[0].error.contains("sleap"));

    // The good key went all the way through
    assert_eq!(
        report.stage(StageId::LatentDimension).unwrap().inserted,
        vec![good]
    );
    assert!(!fx.project_dir("bad_out").exists());
    assert_eq!(fx.toolkit.setup_calls(), 1);

    // Still pending on the next pass
    assert_eq!(
        fx.driver()
            .pending(StageId::Prep)
            .await
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>(),
        vec![bad]
    );
}

#[tokio::test]
async fn test_keypoint_set_without_videos_is_never_eligible() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, false).await;
    fx.add_task(TaskKey::new(1, 1), "kpms_out", TaskMode::Trigger)
        .await;

    let driver = fx.driver();
    assert!(driver.pending(StageId::Prep).await.unwrap().is_empty());

    let report = driver.populate_all().await.unwrap();
    assert_eq!(report.inserted_total(), 0);
    assert_eq!(report.failed_total(), 0);
    assert_eq!(fx.toolkit.setup_calls(), 0);
}

#[tokio::test]
async fn test_load_mode_reads_existing_config() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Load).await;

    // No config document yet
    let report = fx.driver().populate(StageId::Prep).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].category, ErrorCategory::External);
    assert!(report.failed[0].error.contains("kpms_dj_config.yml"));

    let existing = ProjectConfig {
        bodyparts: common::TRACKED_BODYPARTS
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..Default::default()
    };
    save_dj_config(&fx.project_dir("kpms_out"), &existing).unwrap();

    let report = fx.driver().populate_all().await.unwrap();
    assert_eq!(report.inserted_total(), 3);
    assert_eq!(fx.toolkit.setup_calls(), 0);

    let config = load_dj_config(&fx.project_dir("kpms_out")).unwrap();
    assert_eq!(config.anterior_bodyparts, vec!["nose"]);
    assert!(config.video_dir.is_some());
}

#[tokio::test]
async fn test_failed_fit_stays_pending() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Trigger).await;
    fx.toolkit
        .fail_next_fit
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let driver = fx.driver();
    let report = driver.populate_all().await.unwrap();

    let fitting = report.stage(StageId::Fitting).unwrap();
    assert_eq!(fitting.failed.len(), 1);
    assert_eq!(fitting.failed[0].category, ErrorCategory::External);
    assert!(fitting.failed[0].error.contains("did not converge"));
    assert_eq!(report.stage(StageId::LatentDimension).unwrap().pending, 0);
    assert!(fx
        .store
        .derived_keys(DerivedTable::PcaFitting)
        .await
        .unwrap()
        .is_empty());

    let report = driver.populate_all().await.unwrap();
    assert!(report.stage(StageId::Prep).unwrap().inserted.is_empty());
    assert_eq!(report.inserted_total(), 2);
    assert_eq!(fx.toolkit.fit_calls(), 2);
}

#[tokio::test]
async fn test_deleting_prep_row_recomputes_downstream() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Trigger).await;

    let driver = fx.driver();
    driver.populate_all().await.unwrap();

    assert!(fx
        .store
        .delete_derived(DerivedTable::FormattedDataset, key)
        .await
        .unwrap());
    for table in DerivedTable::ALL {
        assert!(fx.store.derived_keys(table).await.unwrap().is_empty());
    }

    let report = driver.populate_all().await.unwrap();
    assert_eq!(report.inserted_total(), 3);
    assert_eq!(fx.toolkit.fit_calls(), 2);
}

#[tokio::test]
async fn test_threshold_not_reached_reports_all_components() {
    let fx = Fixture::new(vec![0.3, 0.2]).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Trigger).await;

    fx.driver().populate_all().await.unwrap();

    let latent = fx.store.get_latent_dimension(key).await.unwrap();
    assert_eq!(latent.latent_dimension, 2);
    assert_eq!(latent.variance_percentage, 50.0);
    assert_eq!(
        latent.latent_dim_desc,
        "All components together only explain 50.0% of variance."
    );
}

#[tokio::test]
async fn test_configured_threshold_is_recorded() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task(key, "kpms_out", TaskMode::Trigger).await;

    let config = StageConfig {
        variance_threshold: 0.7,
        ..Default::default()
    };
    fx.driver_with(config).populate_all().await.unwrap();

    let latent = fx.store.get_latent_dimension(key).await.unwrap();
    assert_eq!(latent.variance_threshold, 0.7);
    assert_eq!(latent.latent_dimension, 2);
    assert_eq!(latent.variance_percentage, 70.0);
}

#[tokio::test]
async fn test_parallel_workers_compute_every_key() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    let keys: Vec<_> = (1..=4).map(|id| TaskKey::new(1, id)).collect();
    for key in &keys {
        fx.add_task(*key, &format!("out_{}", key.bodyparts_id), TaskMode::Trigger)
            .await;
    }

    let config = StageConfig {
        parallel_workers: 3,
        ..Default::default()
    };
    let report = fx.driver_with(config).populate_all().await.unwrap();

    assert_eq!(report.failed_total(), 0);
    for stage in &report.stages {
        // Reported in key order regardless of completion order
        assert_eq!(stage.inserted, keys);
    }
    assert_eq!(fx.toolkit.setup_calls(), 4);
}

#[tokio::test]
async fn test_missing_handler_is_an_error() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let driver = PopulationDriver::new(fx.context(StageConfig::default())).unwrap();

    let err = driver.populate(StageId::Prep).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::HandlerNotRegistered(StageId::Prep)
    ));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

fn bodyparts(key: TaskKey, anterior: &[&str], use_bodyparts: &[&str]) -> Bodyparts {
    Bodyparts {
        key,
        anterior_bodyparts: anterior.iter().map(|s| s.to_string()).collect(),
        posterior_bodyparts: vec!["tailbase".into()],
        use_bodyparts: use_bodyparts.iter().map(|s| s.to_string()).collect(),
        description: String::new(),
    }
}

#[tokio::test]
async fn test_unused_anterior_bodypart_fails_before_setup() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task_with_bodyparts(
        &bodyparts(key, &["ear"], &["nose", "tailbase"]),
        "bad_out",
        TaskMode::Trigger,
    )
    .await;

    let report = fx.driver().populate(StageId::Prep).await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].category, ErrorCategory::Configuration);
    assert!(report.failed[0].error.contains("anterior_bodyparts entry 'ear'"));
    assert_eq!(fx.toolkit.setup_calls(), 0);
    assert!(!fx.project_dir("bad_out").exists());
}

#[tokio::test]
async fn test_untracked_bodypart_is_reported_after_setup() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    let key = TaskKey::new(1, 1);
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    fx.add_task_with_bodyparts(
        &bodyparts(key, &["nose"], &["nose", "ear", "tailbase"]),
        "kpms_out",
        TaskMode::Trigger,
    )
    .await;

    let report = fx.driver().populate(StageId::Prep).await.unwrap();

    // Only the generated project config knows the tracked body parts
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].category, ErrorCategory::External);
    assert!(report.failed[0].error.contains("'ear' is not a tracked bodypart"));
    assert_eq!(fx.toolkit.setup_calls(), 1);
    assert!(!fx
        .project_dir("kpms_out")
        .join(kpms_orchestration::DJ_CONFIG_FILE)
        .exists());
}

#[tokio::test]
async fn test_parallel_keys_sharing_output_dir_are_serialized() {
    let fx = Fixture::new(RATIOS.to_vec()).await;
    fx.add_keypoint_set(1, FormatMethod::DeepLabCut, true).await;
    let keys = vec![TaskKey::new(1, 1), TaskKey::new(1, 2)];
    for key in &keys {
        fx.add_task(*key, "shared_out", TaskMode::Trigger).await;
    }

    let config = StageConfig {
        parallel_workers: 2,
        ..Default::default()
    };
    let report = fx.driver_with(config).populate_all().await.unwrap();

    assert_eq!(report.failed_total(), 0);
    for stage in &report.stages {
        assert_eq!(stage.inserted, keys);
    }
    assert_eq!(fx.toolkit.setup_calls(), 2);
    assert_eq!(fx.toolkit.max_in_project(), 1);

    let config = load_dj_config(&fx.project_dir("shared_out")).unwrap();
    assert_eq!(config.use_bodyparts, vec!["nose", "spine4", "tailbase"]);
    for key in keys {
        assert_eq!(
            fx.store.get_latent_dimension(key).await.unwrap().latent_dimension,
            3
        );
    }
}
