use super::*;

async fn memory_storage() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

fn set(set_number: i64, reps: i64, weight: f64, partial_reps: i64) -> NewSet {
    NewSet {
        set_number,
        reps,
        weight,
        partial_reps,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = memory_storage().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("liftlog.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn seeds_exercise_library_sorted_by_name() {
    let storage = memory_storage().await;
    let library = storage.list_exercise_library().await.expect("library");
    let names: Vec<&str> = library.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Barbell Row",
            "Bench Press",
            "Deadlift",
            "Overhead Press",
            "Pull Up",
            "Squat"
        ]
    );
}

#[tokio::test]
async fn add_exercise_is_idempotent_by_name() {
    let storage = memory_storage().await;
    let first = storage.add_exercise("Hip Thrust", None).await.expect("add");
    let second = storage
        .add_exercise("Hip Thrust", Some("glutes"))
        .await
        .expect("add again");
    assert_eq!(first, second);

    let library = storage.list_exercise_library().await.expect("library");
    let entry = library
        .iter()
        .find(|e| e.exercise_id == first)
        .expect("exists");
    assert_eq!(entry.muscle_group.as_deref(), Some("glutes"));
}

#[tokio::test]
async fn create_user_reuses_existing_username() {
    let storage = memory_storage().await;
    let first = storage.create_user("alice").await.expect("user");
    let second = storage.create_user("alice").await.expect("user again");
    assert_eq!(first, second);
    assert_eq!(
        storage.username_for_user(first).await.expect("name").as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn workout_for_unknown_user_is_a_conflict() {
    let storage = memory_storage().await;
    let err = storage
        .create_workout(UserId(404), Utc::now())
        .await
        .expect_err("fk violation");
    assert!(matches!(err, BackendError::Conflict(_)));
}

#[tokio::test]
async fn stores_links_and_sets_and_builds_summary() {
    let storage = memory_storage().await;
    let user = storage.create_user("bob").await.expect("user");
    let workout = storage
        .create_workout(user, Utc::now())
        .await
        .expect("workout");
    assert!(workout.completed_at.is_none());

    let squat = ExerciseId(2);
    let bench = ExerciseId(1);
    let squat_link = storage
        .insert_workout_exercise(workout.workout_id, squat, 1)
        .await
        .expect("link squat");
    let bench_link = storage
        .insert_workout_exercise(workout.workout_id, bench, 2)
        .await
        .expect("link bench");
    let ids = storage
        .insert_sets(squat_link, &[set(1, 8, 100.0, 0), set(2, 8, 100.0, 2)])
        .await
        .expect("squat sets");
    assert_eq!(ids.len(), 2);
    storage
        .insert_sets(bench_link, &[set(1, 10, 135.0, 0)])
        .await
        .expect("bench sets");
    storage
        .complete_workout(workout.workout_id, Utc::now())
        .await
        .expect("complete");

    let summary = storage
        .load_workout_summary(workout.workout_id)
        .await
        .expect("summary");
    assert!(summary.workout.completed_at.is_some());
    assert_eq!(summary.exercises.len(), 2);
    assert_eq!(summary.exercises[0].exercise_name, "Squat");
    assert_eq!(summary.exercises[0].sets.len(), 2);
    assert_eq!(summary.exercises[0].sets[1].partial_reps, 2);
    assert_eq!(summary.exercises[1].exercise_name, "Bench Press");
    assert_eq!(summary.total_sets(), 3);
}

#[tokio::test]
async fn bulk_set_insert_is_all_or_nothing() {
    let storage = memory_storage().await;
    let user = storage.create_user("carol").await.expect("user");
    let workout = storage
        .create_workout(user, Utc::now())
        .await
        .expect("workout");
    let link = storage
        .insert_workout_exercise(workout.workout_id, ExerciseId(1), 1)
        .await
        .expect("link");

    let err = storage
        .insert_sets(link, &[set(1, 5, 100.0, 0), set(2, 0, 100.0, 0)])
        .await
        .expect_err("check violation");
    assert!(matches!(err, BackendError::Rejected { status: 400, .. }));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sets")
        .fetch_one(storage.pool())
        .await
        .expect("count");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn deleting_workout_cascades_to_links_and_sets() {
    let storage = memory_storage().await;
    let user = storage.create_user("dave").await.expect("user");
    let workout = storage
        .create_workout(user, Utc::now())
        .await
        .expect("workout");
    let link = storage
        .insert_workout_exercise(workout.workout_id, ExerciseId(3), 1)
        .await
        .expect("link");
    storage
        .insert_sets(link, &[set(1, 3, 180.0, 0)])
        .await
        .expect("sets");

    storage
        .delete_workout(workout.workout_id)
        .await
        .expect("delete");

    let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workout_exercises")
        .fetch_one(storage.pool())
        .await
        .expect("count");
    let sets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sets")
        .fetch_one(storage.pool())
        .await
        .expect("count");
    assert_eq!((links, sets), (0, 0));

    assert!(matches!(
        storage.delete_workout(workout.workout_id).await,
        Err(BackendError::NotFound { .. })
    ));
    assert!(matches!(
        storage.complete_workout(workout.workout_id, Utc::now()).await,
        Err(BackendError::NotFound { .. })
    ));
}

#[tokio::test]
async fn lists_workouts_newest_first() {
    let storage = memory_storage().await;
    let user = storage.create_user("erin").await.expect("user");
    let older = storage
        .create_workout(user, Utc::now() - chrono::Duration::days(1))
        .await
        .expect("older");
    let newer = storage
        .create_workout(user, Utc::now())
        .await
        .expect("newer");

    let workouts = storage.list_workouts_for_user(user).await.expect("list");
    let ids: Vec<WorkoutId> = workouts.iter().map(|w| w.workout_id).collect();
    assert_eq!(ids, vec![newer.workout_id, older.workout_id]);
}

#[tokio::test]
async fn draft_store_overwrites_and_removes_snapshots() {
    let storage = memory_storage().await;
    assert_eq!(storage.load("workout_1").await.expect("load"), None);

    storage.save("workout_1", "{\"reps\":\"5\"}").await.expect("save");
    storage.save("workout_1", "{\"reps\":\"6\"}").await.expect("overwrite");
    assert_eq!(
        storage.load("workout_1").await.expect("load").as_deref(),
        Some("{\"reps\":\"6\"}")
    );
    assert_eq!(
        storage.list_draft_keys().await.expect("keys"),
        vec!["workout_1".to_string()]
    );

    storage.remove("workout_1").await.expect("remove");
    assert_eq!(storage.load("workout_1").await.expect("load"), None);
}

#[tokio::test]
async fn drafts_survive_reopening_file_database() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("drafts.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    storage.save("workout_9", "{}").await.expect("save");
    storage.pool().close().await;
    drop(storage);

    let reopened = Storage::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.load("workout_9").await.expect("load").as_deref(),
        Some("{}")
    );
}
