//! Row shapes exchanged with the persistence collaborator.
//!
//! One struct per query result; the field names match the hosted schema's
//! column names so the same types decode REST responses and SQLite rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ExerciseId, SetId, UserId, WorkoutExerciseId, WorkoutId, WorkoutStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    #[serde(rename = "id")]
    pub workout_id: WorkoutId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkoutRecord {
    pub fn status(&self) -> WorkoutStatus {
        if self.completed_at.is_some() {
            WorkoutStatus::Completed
        } else {
            WorkoutStatus::InProgress
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutExerciseRecord {
    #[serde(rename = "id")]
    pub workout_exercise_id: WorkoutExerciseId,
    pub workout_id: WorkoutId,
    pub exercise_id: ExerciseId,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRecord {
    #[serde(rename = "id")]
    pub set_id: SetId,
    pub workout_exercise_id: WorkoutExerciseId,
    pub set_number: i64,
    pub reps: i64,
    pub weight: f64,
    pub partial_reps: i64,
}

/// A set row about to be bulk inserted under a workout-exercise link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSet {
    pub set_number: i64,
    pub reps: i64,
    pub weight: f64,
    pub partial_reps: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseLibraryEntry {
    #[serde(rename = "id")]
    pub exercise_id: ExerciseId,
    pub name: String,
    #[serde(default)]
    pub muscle_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseSummary {
    pub workout_exercise_id: WorkoutExerciseId,
    pub exercise_id: ExerciseId,
    pub exercise_name: String,
    pub sets: Vec<SetRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutSummary {
    pub workout: WorkoutRecord,
    pub exercises: Vec<ExerciseSummary>,
}

impl WorkoutSummary {
    pub fn total_sets(&self) -> usize {
        self.exercises.iter().map(|e| e.sets.len()).sum()
    }

    pub fn total_volume(&self) -> f64 {
        self.exercises
            .iter()
            .flat_map(|e| e.sets.iter())
            .map(|s| s.reps as f64 * s.weight)
            .sum()
    }
}
