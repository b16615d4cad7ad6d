// src/catalog.rs
//! Operator-managed configuration: channels, templates, scheduled tasks and the
//! auto-push settings.
//!
//! Everything is validated on the way in: channels must carry their required
//! fields, templates must compile, tasks must have a parseable cron expression and
//! point at existing records. When a snapshot path is set, every mutation is
//! written to it as JSON and reloaded on start.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, ComposeError, ConfigError, NotFound};
use crate::model::{AutoPushConfig, CategoryFilter, ScheduledTask, TemplateRecord};
use crate::notify::{Channel, ChannelKind};
use crate::schedule::cron::CronSchedule;
use crate::template::{self, Escaping};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    channels: BTreeMap<String, Channel>,
    #[serde(default)]
    templates: BTreeMap<String, TemplateRecord>,
    #[serde(default)]
    tasks: BTreeMap<String, ScheduledTask>,
    #[serde(default)]
    auto_push: AutoPushConfig,
}

/// Channel create/update payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDraft {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    pub cron_expr: String,
    pub channel_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub categories: CategoryFilter,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    inner: RwLock<CatalogData>,
    snapshot: Option<Snapshot>,
    /// Bumped under the write lock on every mutation; orders snapshot writes.
    generation: AtomicU64,
}

/// Snapshot file plus the generation last written to it.
#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    written: Mutex<u64>,
}

impl Catalog {
    /// A catalog that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` if it exists; later mutations are written back to it.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let data: CatalogData = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("catalog snapshot {}: {e}", path.display()))?;
            tracing::info!(
                target: "catalog",
                path = %path.display(),
                channels = data.channels.len(),
                templates = data.templates.len(),
                tasks = data.tasks.len(),
                "catalog loaded"
            );
            data
        } else {
            CatalogData::default()
        };
        Ok(Self {
            inner: RwLock::new(data),
            snapshot: Some(Snapshot {
                path,
                written: Mutex::new(0),
            }),
            generation: AtomicU64::new(0),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogData> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CatalogData> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Release the write guard and persist what it held.
    ///
    /// The state is serialized under the guard; the file write happens after it is
    /// dropped, so readers never wait on disk. A write that lost the race to a newer
    /// generation is skipped. Best effort: failures are logged, the in-memory state
    /// stays authoritative.
    fn commit(&self, data: RwLockWriteGuard<'_, CatalogData>) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = serde_json::to_vec_pretty(&*data);
        drop(data);

        let bytes = match bytes {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(target: "catalog", error = %e, "serialize snapshot failed");
                return;
            }
        };
        let mut written = snapshot.written.lock().unwrap_or_else(|p| p.into_inner());
        if *written >= generation {
            return;
        }
        let path = &snapshot.path;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(dir) {
                tracing::warn!(target: "catalog", error = %e, "create snapshot dir failed");
                return;
            }
        }
        match fs::write(path, bytes) {
            Ok(()) => *written = generation,
            Err(e) => {
                tracing::warn!(target: "catalog", path = %path.display(), error = %e, "write snapshot failed")
            }
        }
    }

    // ---- channels ----

    pub fn channels(&self) -> Vec<Channel> {
        self.read().channels.values().cloned().collect()
    }

    pub fn channel(&self, id: &str) -> Result<Channel, NotFound> {
        self.read()
            .channels
            .get(id)
            .cloned()
            .ok_or_else(|| NotFound::new("channel", id))
    }

    pub fn create_channel(&self, draft: ChannelDraft) -> Result<Channel, CatalogError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.put_channel(id, draft)
    }

    pub fn update_channel(&self, id: &str, draft: ChannelDraft) -> Result<Channel, CatalogError> {
        self.channel(id)?;
        self.put_channel(id.to_string(), draft)
    }

    fn put_channel(&self, id: String, draft: ChannelDraft) -> Result<Channel, CatalogError> {
        require_name(&draft.name)?;
        let mut ch = Channel::new(id, draft.name.trim(), draft.kind)?;
        ch.enabled = draft.enabled.unwrap_or(true);

        let mut data = self.write();
        data.channels.insert(ch.id.clone(), ch.clone());
        self.commit(data);
        tracing::info!(target: "catalog", channel = %ch.id, kind = ch.kind.name(), "channel saved");
        Ok(ch)
    }

    pub fn delete_channel(&self, id: &str) -> Result<(), CatalogError> {
        let mut data = self.write();
        if !data.channels.contains_key(id) {
            return Err(NotFound::new("channel", id).into());
        }
        if let Some(task) = data.tasks.values().find(|t| t.channel_id == id) {
            return Err(CatalogError::InUse {
                kind: "channel",
                id: id.to_string(),
                by: format!("task `{}`", task.name),
            });
        }
        if data.auto_push.channel_id.as_deref() == Some(id) {
            return Err(CatalogError::InUse {
                kind: "channel",
                id: id.to_string(),
                by: "auto-push".into(),
            });
        }
        data.channels.remove(id);
        self.commit(data);
        Ok(())
    }

    // ---- templates ----

    pub fn templates(&self) -> Vec<TemplateRecord> {
        self.read().templates.values().cloned().collect()
    }

    pub fn template(&self, id: &str) -> Result<TemplateRecord, NotFound> {
        self.read()
            .templates
            .get(id)
            .cloned()
            .ok_or_else(|| NotFound::new("template", id))
    }

    /// The operator template flagged as default, if any.
    pub fn default_template(&self) -> Option<TemplateRecord> {
        self.read().templates.values().find(|t| t.is_default).cloned()
    }

    pub fn create_template(&self, draft: TemplateDraft) -> Result<TemplateRecord, CatalogError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.put_template(id, draft)
    }

    pub fn update_template(
        &self,
        id: &str,
        draft: TemplateDraft,
    ) -> Result<TemplateRecord, CatalogError> {
        self.template(id)?;
        self.put_template(id.to_string(), draft)
    }

    fn put_template(&self, id: String, draft: TemplateDraft) -> Result<TemplateRecord, CatalogError> {
        require_name(&draft.name)?;
        check_template(draft.subject.as_deref(), &draft.body)?;

        let rec = TemplateRecord {
            id,
            name: draft.name.trim().to_string(),
            subject: draft.subject.filter(|s| !s.trim().is_empty()),
            body: draft.body,
            is_default: draft.is_default,
            updated_at: Utc::now(),
        };

        let mut data = self.write();
        if rec.is_default {
            for t in data.templates.values_mut() {
                t.is_default = false;
            }
        }
        data.templates.insert(rec.id.clone(), rec.clone());
        self.commit(data);
        tracing::info!(target: "catalog", template = %rec.id, "template saved");
        Ok(rec)
    }

    pub fn delete_template(&self, id: &str) -> Result<(), CatalogError> {
        let mut data = self.write();
        if !data.templates.contains_key(id) {
            return Err(NotFound::new("template", id).into());
        }
        if let Some(task) = data
            .tasks
            .values()
            .find(|t| t.template_id.as_deref() == Some(id))
        {
            return Err(CatalogError::InUse {
                kind: "template",
                id: id.to_string(),
                by: format!("task `{}`", task.name),
            });
        }
        if data.auto_push.template_id.as_deref() == Some(id) {
            return Err(CatalogError::InUse {
                kind: "template",
                id: id.to_string(),
                by: "auto-push".into(),
            });
        }
        data.templates.remove(id);
        self.commit(data);
        Ok(())
    }

    // ---- scheduled tasks ----

    pub fn tasks(&self) -> Vec<ScheduledTask> {
        self.read().tasks.values().cloned().collect()
    }

    pub fn task(&self, id: &str) -> Result<ScheduledTask, NotFound> {
        self.read()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| NotFound::new("task", id))
    }

    pub fn create_task(&self, draft: TaskDraft) -> Result<ScheduledTask, CatalogError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.put_task(id, false, draft)
    }

    /// Replace a task's definition. `last_run_at` is kept.
    pub fn update_task(&self, id: &str, draft: TaskDraft) -> Result<ScheduledTask, CatalogError> {
        self.put_task(id.to_string(), true, draft)
    }

    fn put_task(
        &self,
        id: String,
        existing: bool,
        draft: TaskDraft,
    ) -> Result<ScheduledTask, CatalogError> {
        require_name(&draft.name)?;
        let cron = CronSchedule::parse(&draft.cron_expr)?;
        let template_id = draft.template_id.filter(|s| !s.trim().is_empty());

        let mut data = self.write();
        // read under the same guard so a concurrent record_run is not rolled back
        let last_run_at = match (existing, data.tasks.get(&id)) {
            (false, _) => None,
            (true, Some(prev)) => prev.last_run_at,
            (true, None) => return Err(NotFound::new("task", &id).into()),
        };
        if !data.channels.contains_key(&draft.channel_id) {
            return Err(NotFound::new("channel", &draft.channel_id).into());
        }
        if let Some(tid) = &template_id {
            if !data.templates.contains_key(tid) {
                return Err(NotFound::new("template", tid).into());
            }
        }

        let task = ScheduledTask {
            id,
            name: draft.name.trim().to_string(),
            cron_expr: cron.expression().to_string(),
            channel_id: draft.channel_id,
            template_id,
            categories: CategoryFilter::of(draft.categories.tags()),
            enabled: draft.enabled.unwrap_or(true),
            last_run_at,
        };
        data.tasks.insert(task.id.clone(), task.clone());
        self.commit(data);
        tracing::info!(target: "catalog", task = %task.id, cron = %task.cron_expr, "task saved");
        Ok(task)
    }

    pub fn delete_task(&self, id: &str) -> Result<(), CatalogError> {
        let mut data = self.write();
        if data.tasks.remove(id).is_none() {
            return Err(NotFound::new("task", id).into());
        }
        self.commit(data);
        Ok(())
    }

    /// Advance a task's `last_run_at`. Unknown ids (deleted mid-run) are ignored.
    pub fn record_run(&self, id: &str, at: DateTime<Utc>) {
        let mut data = self.write();
        let Some(t) = data.tasks.get_mut(id) else {
            return;
        };
        t.last_run_at = Some(at);
        self.commit(data);
    }

    // ---- auto-push ----

    pub fn auto_push(&self) -> AutoPushConfig {
        self.read().auto_push.clone()
    }

    pub fn set_auto_push(&self, cfg: AutoPushConfig) -> Result<AutoPushConfig, CatalogError> {
        let cfg = cfg.normalized();
        let mut data = self.write();
        if let Some(cid) = &cfg.channel_id {
            if !data.channels.contains_key(cid) {
                return Err(NotFound::new("channel", cid).into());
            }
        }
        if let Some(tid) = &cfg.template_id {
            if !data.templates.contains_key(tid) {
                return Err(NotFound::new("template", tid).into());
            }
        }
        data.auto_push = cfg.clone();
        self.commit(data);
        tracing::info!(
            target: "catalog",
            enabled = cfg.enabled,
            threshold = cfg.threshold,
            "auto-push config saved"
        );
        Ok(cfg)
    }

    // ---- trigger resolution ----

    /// Look up what a trigger needs to compose: an enabled channel and, optionally,
    /// an operator template.
    ///
    /// Without an explicit template, email channels use the operator's default template
    /// when one is flagged; everything else falls back to the channel's built-in one.
    pub fn resolve(
        &self,
        channel_id: &str,
        template_id: Option<&str>,
    ) -> Result<(Channel, Option<TemplateRecord>), ComposeError> {
        let channel = self.channel(channel_id)?;
        if !channel.enabled {
            return Err(ConfigError::ChannelDisabled(channel.id).into());
        }
        let template = match template_id {
            Some(tid) => Some(self.template(tid)?),
            None if matches!(channel.kind, ChannelKind::Email(_)) => self.default_template(),
            None => None,
        };
        Ok((channel, template))
    }
}

fn require_name(name: &str) -> Result<(), CatalogError> {
    if name.trim().is_empty() {
        return Err(CatalogError::Invalid("name must not be empty".into()));
    }
    Ok(())
}

/// Syntax check for a body and optional subject.
pub fn check_template(subject: Option<&str>, body: &str) -> Result<(), CatalogError> {
    if body.trim().is_empty() {
        return Err(CatalogError::Invalid("template body must not be empty".into()));
    }
    template::compile_with(body, Escaping::Html)?;
    if let Some(s) = subject {
        template::compile_with(s, Escaping::Plain)?;
    }
    Ok(())
}
