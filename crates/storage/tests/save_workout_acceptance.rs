use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draft_core::{
    draft_key, AutosavePolicy, DraftStore, Navigation, SaveError, SaveStep, SessionContext,
    SetInput, WorkoutBackend, WorkoutDraftController,
};
use shared::{
    domain::{ExerciseId, SetId, UserId, WorkoutExerciseId, WorkoutId},
    error::BackendError,
    records::{ExerciseLibraryEntry, NewSet, WorkoutRecord, WorkoutSummary},
};
use storage::Storage;

const BENCH: ExerciseId = ExerciseId(1);
const SQUAT: ExerciseId = ExerciseId(2);

/// Passes everything through to sqlite except the Nth exercise link.
struct FailingLink {
    inner: Storage,
    fail_on: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl WorkoutBackend for FailingLink {
    async fn create_workout(
        &self,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<WorkoutRecord, BackendError> {
        self.inner.create_workout(user_id, started_at).await
    }

    async fn insert_workout_exercise(
        &self,
        workout_id: WorkoutId,
        exercise_id: ExerciseId,
        position: i64,
    ) -> Result<WorkoutExerciseId, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(BackendError::Transport("connection reset".into()));
        }
        self.inner
            .insert_workout_exercise(workout_id, exercise_id, position)
            .await
    }

    async fn insert_sets(
        &self,
        workout_exercise_id: WorkoutExerciseId,
        sets: &[NewSet],
    ) -> Result<Vec<SetId>, BackendError> {
        self.inner.insert_sets(workout_exercise_id, sets).await
    }

    async fn complete_workout(
        &self,
        workout_id: WorkoutId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        self.inner.complete_workout(workout_id, completed_at).await
    }

    async fn delete_workout(&self, workout_id: WorkoutId) -> Result<(), BackendError> {
        self.inner.delete_workout(workout_id).await
    }

    async fn list_exercise_library(&self) -> Result<Vec<ExerciseLibraryEntry>, BackendError> {
        self.inner.list_exercise_library().await
    }

    async fn load_workout_summary(
        &self,
        workout_id: WorkoutId,
    ) -> Result<WorkoutSummary, BackendError> {
        self.inner.load_workout_summary(workout_id).await
    }
}

async fn started(storage: &Storage) -> WorkoutRecord {
    let user = storage.create_user("lifter").await.expect("user");
    let session = SessionContext::signed_in(user);
    draft_core::start_workout(&session, storage)
        .await
        .expect("start workout")
}

async fn log_exercise<B: WorkoutBackend, S: DraftStore>(
    controller: &mut WorkoutDraftController<B, S>,
    exercise_id: ExerciseId,
    name: &str,
    sets: &[(&str, &str, &str)],
) {
    controller
        .select_exercise(exercise_id, name)
        .await
        .expect("select");
    for (reps, weight, partial) in sets {
        controller
            .add_set(SetInput::new(*reps, *weight, *partial))
            .await
            .expect("add set");
    }
    controller
        .add_exercise_to_workout()
        .await
        .expect("add exercise");
}

async fn count(storage: &Storage, sql: &str) -> i64 {
    sqlx::query_scalar(sql)
        .fetch_one(storage.pool())
        .await
        .expect("count")
}

#[tokio::test]
async fn saved_workout_is_readable_as_summary() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let workout = started(&storage).await;

    let mut controller = WorkoutDraftController::open(
        workout.workout_id,
        storage.clone(),
        storage.clone(),
        AutosavePolicy::EveryMutation,
    )
    .await;
    log_exercise(&mut controller, SQUAT, "Squat", &[("8", "100", ""), ("8", "100", "2")]).await;
    log_exercise(&mut controller, BENCH, "Bench Press", &[("10", "135", "0")]).await;

    let nav = controller.save_workout().await.expect("save");
    assert_eq!(nav, Navigation::WorkoutSummary(workout.workout_id));
    assert_eq!(nav.path(), format!("/workouts/{}", workout.workout_id.0));

    let summary = storage
        .load_workout_summary(workout.workout_id)
        .await
        .expect("summary");
    assert!(summary.workout.completed_at.is_some());
    let names: Vec<&str> = summary
        .exercises
        .iter()
        .map(|e| e.exercise_name.as_str())
        .collect();
    assert_eq!(names, vec!["Squat", "Bench Press"]);
    let squat_sets: Vec<(i64, i64, i64)> = summary.exercises[0]
        .sets
        .iter()
        .map(|s| (s.set_number, s.reps, s.partial_reps))
        .collect();
    assert_eq!(squat_sets, vec![(1, 8, 0), (2, 8, 2)]);
    assert_eq!(summary.total_sets(), 3);

    assert_eq!(
        storage
            .load(&draft_key(workout.workout_id))
            .await
            .expect("load"),
        None
    );
}

#[tokio::test]
async fn failed_second_link_keeps_first_exercise_and_the_draft() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let workout = started(&storage).await;
    let backend = FailingLink {
        inner: storage.clone(),
        fail_on: 2,
        calls: AtomicUsize::new(0),
    };

    let mut controller = WorkoutDraftController::open(
        workout.workout_id,
        backend,
        storage.clone(),
        AutosavePolicy::EveryMutation,
    )
    .await;
    log_exercise(&mut controller, SQUAT, "Squat", &[("5", "140", "")]).await;
    log_exercise(&mut controller, BENCH, "Bench Press", &[("5", "90", "")]).await;

    let err = controller.save_workout().await.expect_err("second link fails");
    match &err {
        SaveError::Partial {
            step,
            exercise_name,
            persisted,
            total,
            source,
        } => {
            assert_eq!(*step, SaveStep::LinkExercise);
            assert_eq!(exercise_name, "Bench Press");
            assert_eq!((*persisted, *total), (1, 2));
            assert!(matches!(source, BackendError::Transport(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.persisted_exercises(), 1);

    assert_eq!(count(&storage, "SELECT COUNT(*) FROM workout_exercises").await, 1);
    assert_eq!(
        count(
            &storage,
            "SELECT COUNT(*) FROM workout_exercises WHERE exercise_id = 2 AND position = 1"
        )
        .await,
        1
    );
    assert_eq!(count(&storage, "SELECT COUNT(*) FROM sets").await, 1);
    assert_eq!(
        count(&storage, "SELECT COUNT(*) FROM workouts WHERE completed_at IS NOT NULL").await,
        0
    );

    assert!(!controller.is_finished());
    assert_eq!(controller.completed_exercises().len(), 2);
    let raw = storage
        .load(&draft_key(workout.workout_id))
        .await
        .expect("load")
        .expect("draft kept");
    assert!(raw.contains("Bench Press"));
}

#[tokio::test]
async fn retrying_interrupted_save_writes_each_exercise_once() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let workout = started(&storage).await;
    let backend = FailingLink {
        inner: storage.clone(),
        fail_on: 2,
        calls: AtomicUsize::new(0),
    };

    let mut controller = WorkoutDraftController::open(
        workout.workout_id,
        backend,
        storage.clone(),
        AutosavePolicy::EveryMutation,
    )
    .await;
    log_exercise(&mut controller, SQUAT, "Squat", &[("5", "140", ""), ("5", "140", "")]).await;
    log_exercise(&mut controller, BENCH, "Bench Press", &[("5", "90", "")]).await;
    controller.save_workout().await.expect_err("second link fails");
    drop(controller);

    let mut resumed = WorkoutDraftController::open(
        workout.workout_id,
        storage.clone(),
        storage.clone(),
        AutosavePolicy::EveryMutation,
    )
    .await;
    assert_eq!(resumed.draft().persisted_exercises, 1);
    resumed.save_workout().await.expect("retry");

    assert_eq!(
        count(&storage, "SELECT COUNT(*) FROM workout_exercises WHERE exercise_id = 2").await,
        1
    );
    assert_eq!(count(&storage, "SELECT COUNT(*) FROM sets").await, 3);

    let summary = storage
        .load_workout_summary(workout.workout_id)
        .await
        .expect("summary");
    let names: Vec<&str> = summary
        .exercises
        .iter()
        .map(|e| e.exercise_name.as_str())
        .collect();
    assert_eq!(names, vec!["Squat", "Bench Press"]);
    assert!(summary.workout.completed_at.is_some());
}

#[tokio::test]
async fn draft_survives_reopening_the_database() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("liftlog.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let workout_id = {
        let storage = Storage::new(&database_url).await.expect("db");
        let workout = started(&storage).await;
        let mut controller = WorkoutDraftController::open(
            workout.workout_id,
            storage.clone(),
            storage.clone(),
            AutosavePolicy::EveryMutation,
        )
        .await;
        log_exercise(&mut controller, SQUAT, "Squat", &[("3", "180", "1")]).await;
        controller.select_exercise(BENCH, "Bench Press").await.expect("select");
        controller
            .add_set(SetInput::new("6", "80", ""))
            .await
            .expect("pending set");
        controller.close().await.expect("close");
        storage.pool().close().await;
        workout.workout_id
    };

    let storage = Storage::new(&database_url).await.expect("reopen");
    let controller = WorkoutDraftController::open(
        workout_id,
        storage.clone(),
        storage.clone(),
        AutosavePolicy::EveryMutation,
    )
    .await;
    assert_eq!(controller.completed_exercises().len(), 1);
    assert_eq!(controller.completed_exercises()[0].exercise_name, "Squat");
    assert_eq!(controller.completed_exercises()[0].sets[0].partial_reps, 1);
    assert_eq!(controller.pending_sets().len(), 1);
    assert_eq!(controller.draft().exercise_name, "Bench Press");
    assert!(!controller.is_dirty());
}

#[tokio::test]
async fn cancelled_workout_is_deleted_with_its_draft() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let workout = started(&storage).await;
    let mut controller = WorkoutDraftController::open(
        workout.workout_id,
        storage.clone(),
        storage.clone(),
        AutosavePolicy::EveryMutation,
    )
    .await;
    log_exercise(&mut controller, BENCH, "Bench Press", &[("5", "100", "")]).await;

    assert_eq!(controller.cancel_workout().await, Navigation::Home);
    assert_eq!(count(&storage, "SELECT COUNT(*) FROM workouts").await, 0);
    assert!(storage.list_draft_keys().await.expect("keys").is_empty());
}
