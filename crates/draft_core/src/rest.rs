//! Backend client for a hosted PostgREST endpoint (`/rest/v1/<table>`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::HeaderValue, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ExerciseId, SetId, UserId, WorkoutExerciseId, WorkoutId},
    error::BackendError,
    records::{
        ExerciseLibraryEntry, ExerciseSummary, NewSet, SetRecord, WorkoutExerciseRecord,
        WorkoutRecord, WorkoutSummary,
    },
};
use tracing::debug;
use url::Url;

use crate::WorkoutBackend;

const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Debug, Serialize)]
struct NewWorkoutRow {
    user_id: UserId,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct NewWorkoutExerciseRow {
    workout_id: WorkoutId,
    exercise_id: ExerciseId,
    position: i64,
}

#[derive(Debug, Serialize)]
struct NewSetRow<'a> {
    workout_exercise_id: WorkoutExerciseId,
    #[serde(flatten)]
    set: &'a NewSet,
}

#[derive(Debug, Serialize)]
struct CompleteWorkoutPatch {
    completed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RestBackend {
    http: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, BackendError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| BackendError::Transport(format!("invalid backend url '{base_url}': {e}")))?;
        Ok(Self {
            http: Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
        })
    }

    /// Sends `token` as the bearer credential instead of the anonymous key.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.http
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    fn returning(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, table)
            .header("Prefer", HeaderValue::from_static(RETURN_REPRESENTATION))
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<Vec<T>, BackendError> {
        let response = builder.send().await.map_err(transport)?;
        let response = check_status(response).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn load_workout(&self, workout_id: WorkoutId) -> Result<WorkoutRecord, BackendError> {
        let rows: Vec<WorkoutRecord> = self
            .fetch_rows(
                self.request(Method::GET, "workouts")
                    .query(&[("id", format!("eq.{}", workout_id.0))]),
            )
            .await?;
        rows.into_iter().next().ok_or(BackendError::NotFound {
            entity: "workout",
            id: workout_id.0,
        })
    }
}

#[async_trait]
impl WorkoutBackend for RestBackend {
    async fn create_workout(
        &self,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<WorkoutRecord, BackendError> {
        let rows: Vec<WorkoutRecord> = self
            .fetch_rows(
                self.returning(Method::POST, "workouts")
                    .json(&NewWorkoutRow {
                        user_id,
                        started_at,
                    }),
            )
            .await?;
        first_row(rows)
    }

    async fn insert_workout_exercise(
        &self,
        workout_id: WorkoutId,
        exercise_id: ExerciseId,
        position: i64,
    ) -> Result<WorkoutExerciseId, BackendError> {
        let rows: Vec<WorkoutExerciseRecord> = self
            .fetch_rows(
                self.returning(Method::POST, "workout_exercises")
                    .json(&NewWorkoutExerciseRow {
                        workout_id,
                        exercise_id,
                        position,
                    }),
            )
            .await?;
        first_row(rows).map(|row| row.workout_exercise_id)
    }

    async fn insert_sets(
        &self,
        workout_exercise_id: WorkoutExerciseId,
        sets: &[NewSet],
    ) -> Result<Vec<SetId>, BackendError> {
        if sets.is_empty() {
            return Ok(Vec::new());
        }
        let body: Vec<NewSetRow<'_>> = sets
            .iter()
            .map(|set| NewSetRow {
                workout_exercise_id,
                set,
            })
            .collect();
        let rows: Vec<SetRecord> = self
            .fetch_rows(self.returning(Method::POST, "sets").json(&body))
            .await?;
        debug!(workout_exercise_id = %workout_exercise_id, count = rows.len(), "inserted sets");
        Ok(rows.into_iter().map(|row| row.set_id).collect())
    }

    async fn complete_workout(
        &self,
        workout_id: WorkoutId,
        completed_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let rows: Vec<WorkoutRecord> = self
            .fetch_rows(
                self.returning(Method::PATCH, "workouts")
                    .query(&[("id", format!("eq.{}", workout_id.0))])
                    .json(&CompleteWorkoutPatch { completed_at }),
            )
            .await?;
        if rows.is_empty() {
            return Err(BackendError::NotFound {
                entity: "workout",
                id: workout_id.0,
            });
        }
        Ok(())
    }

    async fn delete_workout(&self, workout_id: WorkoutId) -> Result<(), BackendError> {
        let rows: Vec<WorkoutRecord> = self
            .fetch_rows(
                self.returning(Method::DELETE, "workouts")
                    .query(&[("id", format!("eq.{}", workout_id.0))]),
            )
            .await?;
        if rows.is_empty() {
            return Err(BackendError::NotFound {
                entity: "workout",
                id: workout_id.0,
            });
        }
        Ok(())
    }

    async fn list_exercise_library(&self) -> Result<Vec<ExerciseLibraryEntry>, BackendError> {
        self.fetch_rows(
            self.request(Method::GET, "exercise_library")
                .query(&[("select", "id,name,muscle_group"), ("order", "name.asc")]),
        )
        .await
    }

    async fn load_workout_summary(
        &self,
        workout_id: WorkoutId,
    ) -> Result<WorkoutSummary, BackendError> {
        let workout = self.load_workout(workout_id).await?;
        let links: Vec<WorkoutExerciseRecord> = self
            .fetch_rows(self.request(Method::GET, "workout_exercises").query(&[
                ("workout_id", format!("eq.{}", workout_id.0)),
                ("order", "position.asc".to_string()),
            ]))
            .await?;
        if links.is_empty() {
            return Ok(WorkoutSummary {
                workout,
                exercises: Vec::new(),
            });
        }

        let link_ids = in_filter(links.iter().map(|l| l.workout_exercise_id.0));
        let exercise_ids = in_filter(links.iter().map(|l| l.exercise_id.0));
        let sets: Vec<SetRecord> = self
            .fetch_rows(self.request(Method::GET, "sets").query(&[
                ("workout_exercise_id", link_ids),
                ("order", "set_number.asc".to_string()),
            ]))
            .await?;
        let library: Vec<ExerciseLibraryEntry> = self
            .fetch_rows(
                self.request(Method::GET, "exercise_library")
                    .query(&[("id", exercise_ids)]),
            )
            .await?;

        let names: HashMap<ExerciseId, String> = library
            .into_iter()
            .map(|entry| (entry.exercise_id, entry.name))
            .collect();
        let mut sets_by_link: HashMap<WorkoutExerciseId, Vec<SetRecord>> = HashMap::new();
        for set in sets {
            sets_by_link
                .entry(set.workout_exercise_id)
                .or_default()
                .push(set);
        }

        let exercises = links
            .into_iter()
            .map(|link| ExerciseSummary {
                workout_exercise_id: link.workout_exercise_id,
                exercise_id: link.exercise_id,
                exercise_name: names
                    .get(&link.exercise_id)
                    .cloned()
                    .unwrap_or_else(|| format!("exercise {}", link.exercise_id.0)),
                sets: sets_by_link
                    .remove(&link.workout_exercise_id)
                    .unwrap_or_default(),
            })
            .collect();

        Ok(WorkoutSummary { workout, exercises })
    }
}

fn in_filter(ids: impl Iterator<Item = i64>) -> String {
    let joined = ids.map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    format!("in.({joined})")
}

fn first_row<T>(rows: Vec<T>) -> Result<T, BackendError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| BackendError::Decode("insert returned no rows".into()))
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(status_error(status, message))
}

fn status_error(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        StatusCode::CONFLICT => BackendError::Conflict(message),
        _ => BackendError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}
