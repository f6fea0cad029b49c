use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use draft_core::{DraftStore, WorkoutBackend};
use sqlx::{
    error::ErrorKind,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

use shared::{
    domain::{ExerciseId, SetId, UserId, WorkoutExerciseId, WorkoutId},
    error::BackendError,
    records::{
        ExerciseLibraryEntry, ExerciseSummary, NewSet, SetRecord, WorkoutRecord, WorkoutSummary,
    },
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` opens its own database.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;
        info!(database_url, "storage ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn add_exercise(&self, name: &str, muscle_group: Option<&str>) -> Result<ExerciseId> {
        let rec = sqlx::query(
            "INSERT INTO exercise_library (name, muscle_group) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET muscle_group = COALESCE(excluded.muscle_group, exercise_library.muscle_group)
             RETURNING id",
        )
        .bind(name)
        .bind(muscle_group)
        .fetch_one(&self.pool)
        .await?;
        Ok(ExerciseId(rec.get::<i64, _>(0)))
    }

    /// Most recent first.
    pub async fn list_workouts_for_user(&self, user_id: UserId) -> Result<Vec<WorkoutRecord>> {
        let rows = sqlx::query(
            "SELECT id, user_id, started_at, completed_at
             FROM workouts
             WHERE user_id = ?
             ORDER BY started_at DESC, id DESC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(workout_from_row).collect())
    }

    pub async fn list_draft_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT draft_key FROM workout_drafts ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

fn workout_from_row(r: &SqliteRow) -> WorkoutRecord {
    WorkoutRecord {
        workout_id: WorkoutId(r.get::<i64, _>(0)),
        user_id: UserId(r.get::<i64, _>(1)),
        started_at: r.get::<DateTime<Utc>, _>(2),
        completed_at: r.get::<Option<DateTime<Utc>>, _>(3),
    }
}

fn library_entry_from_row(r: &SqliteRow) -> ExerciseLibraryEntry {
    ExerciseLibraryEntry {
        exercise_id: ExerciseId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        muscle_group: r.get::<Option<String>, _>(2),
    }
}

fn backend_error(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation | ErrorKind::ForeignKeyViolation => {
                BackendError::Conflict(db.message().to_string())
            }
            ErrorKind::CheckViolation | ErrorKind::NotNullViolation => BackendError::Rejected {
                status: 400,
                message: db.message().to_string(),
            },
            _ => BackendError::Internal(db.message().to_string()),
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            BackendError::Transport(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            BackendError::Decode(err.to_string())
        }
        _ => BackendError::Internal(err.to_string()),
    }
}

#[async_trait]
impl WorkoutBackend for Storage {
    async fn create_workout(
        &self,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<WorkoutRecord, BackendError> {
        let row = sqlx::query(
            "INSERT INTO workouts (user_id, started_at) VALUES (?, ?)
             RETURNING id, user_id, started_at, completed_at",
        )
        .bind(user_id.0)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(workout_from_row(&row))
    }

    async fn insert_workout_exercise(
        &self,
        workout_id: WorkoutId,
        exercise_id: ExerciseId,
        position: i64,
    ) -> Result<WorkoutExerciseId, BackendError> {
        let rec = sqlx::query(
            "INSERT INTO workout_exercises (workout_id, exercise_id, position) VALUES (?, ?, ?)
             RETURNING id",
        )
        .bind(workout_id.0)
        .bind(exercise_id.0)
        .bind(position)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(WorkoutExerciseId(rec.get::<i64, _>(0)))
    }

    async fn insert_sets(
        &self,
        workout_exercise_id: WorkoutExerciseId,
        sets: &[NewSet],
    ) -> Result<Vec<SetId>, BackendError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;
        let mut ids = Vec::with_capacity(sets.len());
        for set in sets {
            let rec = sqlx::query(
                "INSERT INTO sets (workout_exercise_id, set_number, reps, weight, partial_reps)
                 VALUES (?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(workout_exercise_id.0)
            .bind(set.set_number)
            .bind(set.reps)
            .bind(set.weight)
            .bind(set.partial_reps)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend_error)?;
            ids.push(SetId(rec.get::<i64, _>(0)));
        }
        tx.commit().await.map_err(backend_error)?;
        debug!(workout_exercise_id = %workout_exercise_id, count = ids.len(), "inserted sets");
        Ok(ids)
    }

    async fn complete_workout(
        &self,
        workout_id: WorkoutId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let result = sqlx::query("UPDATE workouts SET completed_at = ? WHERE id = ?")
            .bind(completed_at)
            .bind(workout_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound {
                entity: "workout",
                id: workout_id.0,
            });
        }
        Ok(())
    }

    async fn delete_workout(&self, workout_id: WorkoutId) -> Result<(), BackendError> {
        let result = sqlx::query("DELETE FROM workouts WHERE id = ?")
            .bind(workout_id.0)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound {
                entity: "workout",
                id: workout_id.0,
            });
        }
        Ok(())
    }

    async fn list_exercise_library(&self) -> Result<Vec<ExerciseLibraryEntry>, BackendError> {
        let rows = sqlx::query(
            "SELECT id, name, muscle_group FROM exercise_library ORDER BY lower(name) ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(rows.iter().map(library_entry_from_row).collect())
    }

    async fn load_workout_summary(
        &self,
        workout_id: WorkoutId,
    ) -> Result<WorkoutSummary, BackendError> {
        let workout = sqlx::query(
            "SELECT id, user_id, started_at, completed_at FROM workouts WHERE id = ?",
        )
        .bind(workout_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?
        .map(|r| workout_from_row(&r))
        .ok_or(BackendError::NotFound {
            entity: "workout",
            id: workout_id.0,
        })?;

        let link_rows = sqlx::query(
            "SELECT we.id, we.exercise_id, el.name
             FROM workout_exercises we
             INNER JOIN exercise_library el ON el.id = we.exercise_id
             WHERE we.workout_id = ?
             ORDER BY we.position ASC, we.id ASC",
        )
        .bind(workout_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        let set_rows = sqlx::query(
            "SELECT s.id, s.workout_exercise_id, s.set_number, s.reps, s.weight, s.partial_reps
             FROM sets s
             INNER JOIN workout_exercises we ON we.id = s.workout_exercise_id
             WHERE we.workout_id = ?
             ORDER BY s.workout_exercise_id ASC, s.set_number ASC",
        )
        .bind(workout_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        let sets: Vec<SetRecord> = set_rows
            .into_iter()
            .map(|r| SetRecord {
                set_id: SetId(r.get::<i64, _>(0)),
                workout_exercise_id: WorkoutExerciseId(r.get::<i64, _>(1)),
                set_number: r.get::<i64, _>(2),
                reps: r.get::<i64, _>(3),
                weight: r.get::<f64, _>(4),
                partial_reps: r.get::<i64, _>(5),
            })
            .collect();

        let exercises = link_rows
            .into_iter()
            .map(|r| {
                let workout_exercise_id = WorkoutExerciseId(r.get::<i64, _>(0));
                ExerciseSummary {
                    workout_exercise_id,
                    exercise_id: ExerciseId(r.get::<i64, _>(1)),
                    exercise_name: r.get::<String, _>(2),
                    sets: sets
                        .iter()
                        .filter(|s| s.workout_exercise_id == workout_exercise_id)
                        .cloned()
                        .collect(),
                }
            })
            .collect();

        Ok(WorkoutSummary { workout, exercises })
    }
}

#[async_trait]
impl DraftStore for Storage {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT snapshot FROM workout_drafts WHERE draft_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to load draft '{key}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO workout_drafts (draft_key, snapshot, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(draft_key) DO UPDATE SET snapshot = excluded.snapshot, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save draft '{key}'"))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM workout_drafts WHERE draft_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to remove draft '{key}'"))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
