use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ExerciseId, SetId, UserId, WorkoutExerciseId, WorkoutId},
    error::BackendError,
    records::{ExerciseLibraryEntry, NewSet, WorkoutRecord, WorkoutSummary},
};

pub mod autosave;
pub mod controller;
pub mod fields;
pub mod memory_store;
pub mod rest;
pub mod session;
pub mod snapshot;

pub use autosave::{spawn_autosave, AutosaveHandle, SharedController};
pub use controller::{
    start_workout, AutosavePolicy, DraftError, SaveError, SaveStep, WorkoutDraftController,
};
pub use fields::{Field, FieldError, FieldErrors, SetInput};
pub use memory_store::MemoryDraftStore;
pub use rest::RestBackend;
pub use session::{SessionContext, SessionState};
pub use snapshot::{draft_key, CompletedExercise, DraftSet, WorkoutDraft};

/// Table-scoped writes and reads the draft controller needs from the hosted
/// backend. No call spans more than one table write, so multi-step saves are
/// not transactional.
#[async_trait]
pub trait WorkoutBackend: Send + Sync {
    async fn create_workout(
        &self,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<WorkoutRecord, BackendError>;
    async fn insert_workout_exercise(
        &self,
        workout_id: WorkoutId,
        exercise_id: ExerciseId,
        position: i64,
    ) -> Result<WorkoutExerciseId, BackendError>;
    async fn insert_sets(
        &self,
        workout_exercise_id: WorkoutExerciseId,
        sets: &[NewSet],
    ) -> Result<Vec<SetId>, BackendError>;
    async fn complete_workout(
        &self,
        workout_id: WorkoutId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), BackendError>;
    /// Removes the workout together with its exercise links and sets.
    async fn delete_workout(&self, workout_id: WorkoutId) -> Result<(), BackendError>;
    async fn list_exercise_library(&self) -> Result<Vec<ExerciseLibraryEntry>, BackendError>;
    async fn load_workout_summary(
        &self,
        workout_id: WorkoutId,
    ) -> Result<WorkoutSummary, BackendError>;
}

#[async_trait]
impl<T> WorkoutBackend for Arc<T>
where
    T: WorkoutBackend + ?Sized,
{
    async fn create_workout(
        &self,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<WorkoutRecord, BackendError> {
        (**self).create_workout(user_id, started_at).await
    }

    async fn insert_workout_exercise(
        &self,
        workout_id: WorkoutId,
        exercise_id: ExerciseId,
        position: i64,
    ) -> Result<WorkoutExerciseId, BackendError> {
        (**self)
            .insert_workout_exercise(workout_id, exercise_id, position)
            .await
    }

    async fn insert_sets(
        &self,
        workout_exercise_id: WorkoutExerciseId,
        sets: &[NewSet],
    ) -> Result<Vec<SetId>, BackendError> {
        (**self).insert_sets(workout_exercise_id, sets).await
    }

    async fn complete_workout(
        &self,
        workout_id: WorkoutId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        (**self).complete_workout(workout_id, completed_at).await
    }

    async fn delete_workout(&self, workout_id: WorkoutId) -> Result<(), BackendError> {
        (**self).delete_workout(workout_id).await
    }

    async fn list_exercise_library(&self) -> Result<Vec<ExerciseLibraryEntry>, BackendError> {
        (**self).list_exercise_library().await
    }

    async fn load_workout_summary(
        &self,
        workout_id: WorkoutId,
    ) -> Result<WorkoutSummary, BackendError> {
        (**self).load_workout_summary(workout_id).await
    }
}

/// Key-value string storage used as the autosave/resume channel.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T> DraftStore for Arc<T>
where
    T: DraftStore + ?Sized,
{
    async fn load(&self, key: &str) -> Result<Option<String>> {
        (**self).load(key).await
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        (**self).save(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }
}

/// Where the caller should send the user after a terminal draft operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    WorkoutSummary(WorkoutId),
    Home,
}

impl Navigation {
    pub fn path(&self) -> String {
        match self {
            Self::WorkoutSummary(workout_id) => format!("/workouts/{}", workout_id.0),
            Self::Home => "/".to_string(),
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod controller_tests;

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod rest_tests;
