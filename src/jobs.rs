// src/jobs.rs
//! Manual task runs are accepted immediately and finish in the background; the
//! tracker keeps their status around for polling.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ComposeError;

const MAX_JOBS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded { sent: usize },
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub task_id: String,
    #[serde(flatten)]
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, JobStatus>,
    order: VecDeque<Uuid>,
}

#[derive(Default)]
pub struct JobTracker {
    inner: Mutex<Inner>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn create(&self, task_id: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut g = self.lock();
        g.jobs.insert(
            id,
            JobStatus {
                id,
                task_id: task_id.to_string(),
                state: JobState::Pending,
                created_at: Utc::now(),
                finished_at: None,
            },
        );
        g.order.push_back(id);
        while g.order.len() > MAX_JOBS {
            if let Some(old) = g.order.pop_front() {
                g.jobs.remove(&old);
            }
        }
        id
    }

    pub fn start(&self, id: Uuid) {
        if let Some(j) = self.lock().jobs.get_mut(&id) {
            j.state = JobState::Running;
        }
    }

    pub fn finish(&self, id: Uuid, result: &Result<usize, ComposeError>) {
        if let Some(j) = self.lock().jobs.get_mut(&id) {
            j.state = match result {
                Ok(sent) => JobState::Succeeded { sent: *sent },
                Err(e) => JobState::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                },
            };
            j.finished_at = Some(Utc::now());
        }
    }

    pub fn get(&self, id: Uuid) -> Option<JobStatus> {
        self.lock().jobs.get(&id).cloned()
    }
}
