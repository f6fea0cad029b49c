//! Serialized form of a workout draft.
//!
//! The whole draft is written as one JSON blob per workout and overwritten on
//! every change. Keys are camelCase; fields missing from older blobs fall back
//! to their defaults.

use serde::{Deserialize, Serialize};
use shared::domain::{ExerciseId, WorkoutExerciseId, WorkoutId};

pub fn draft_key(workout_id: WorkoutId) -> String {
    format!("workout_{}", workout_id.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftSet {
    pub exercise_id: ExerciseId,
    pub reps: i64,
    pub weight: f64,
    #[serde(default)]
    pub partial_reps: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedExercise {
    pub exercise_id: ExerciseId,
    pub exercise_name: String,
    pub sets: Vec<DraftSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkoutDraft {
    pub completed_exercises: Vec<CompletedExercise>,
    pub exercise_id: Option<ExerciseId>,
    pub exercise_name: String,
    pub exercises_in_workout: Vec<ExerciseId>,
    pub reps: String,
    pub weight: String,
    pub partial_reps: String,
    pub sets: Vec<DraftSet>,
    pub editing_set_index: Option<usize>,
    pub editing_exercise_index: Option<usize>,
    /// Leading completed exercises whose link and sets are already on the
    /// backend. A retried save starts after them.
    pub persisted_exercises: usize,
    /// Link created for the next exercise whose sets have not been written.
    pub pending_link: Option<WorkoutExerciseId>,
}

impl WorkoutDraft {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn clear_fields(&mut self) {
        self.reps.clear();
        self.weight.clear();
        self.partial_reps.clear();
    }

    pub(crate) fn clear_in_progress(&mut self) {
        self.exercise_id = None;
        self.exercise_name.clear();
        self.sets.clear();
        self.editing_set_index = None;
        self.clear_fields();
    }

    pub(crate) fn sync_exercises_in_workout(&mut self) {
        self.exercises_in_workout = self
            .completed_exercises
            .iter()
            .map(|entry| entry.exercise_id)
            .collect();
    }
}
