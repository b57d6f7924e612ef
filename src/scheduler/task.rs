use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::core::types::UserId;

/// Drops the user's unfinished ("current") photos.
pub const CLEAR_CURRENT_PHOTOS: &str = "clear_current_photos";
/// Drops the photos of a finalized appeal.
pub const CLEAR_PHOTO_STORAGE: &str = "clear_photo_storage";
/// Cancels an appeal that is still being sent.
pub const CANCEL_APPEAL: &str = "cancel_appeal";

/// A unit of deferred work for one user.
///
/// `execute_time` of `None` means "due as soon as the scheduler sees it".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub user_id: UserId,
    pub executor: String,
    #[serde(default)]
    pub kvargs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_time: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn new(user_id: UserId, executor: impl Into<String>) -> Self {
        Self {
            user_id,
            executor: executor.into(),
            kvargs: Map::new(),
            execute_time: None,
        }
    }

    /// Adds a keyword argument passed to the executor.
    #[must_use]
    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.kvargs.insert(key.to_string(), value.into());
        self
    }

    /// Schedules the task at an absolute time.
    #[must_use]
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.execute_time = Some(time);
        self
    }

    /// Schedules the task `delay` from now.
    #[must_use]
    pub fn after(self, delay: chrono::Duration) -> Self {
        self.at(Utc::now() + delay)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.execute_time.map_or(true, |time| now >= time)
    }
}

/// Persisted form: user id (as string) -> ordered task list.
pub type TaskMap = BTreeMap<String, Vec<ScheduledTask>>;

/// Policy flags of an executor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskTypeDescriptor {
    /// A new task of this type replaces the user's previous one.
    pub one_per_user: bool,
}

/// Table of executor name -> policy.
#[derive(Debug, Clone, Default)]
pub struct TaskTypes {
    types: HashMap<String, TaskTypeDescriptor>,
}

impl TaskTypes {
    /// Policies of the executors shipped with the bot.
    pub fn builtin() -> Self {
        Self::default()
            .with(CLEAR_CURRENT_PHOTOS, TaskTypeDescriptor { one_per_user: true })
            .with(CLEAR_PHOTO_STORAGE, TaskTypeDescriptor { one_per_user: false })
            .with(CANCEL_APPEAL, TaskTypeDescriptor { one_per_user: false })
    }

    #[must_use]
    pub fn with(mut self, executor: &str, descriptor: TaskTypeDescriptor) -> Self {
        self.types.insert(executor.to_string(), descriptor);
        self
    }

    /// Unknown executors get the default (multiple tasks per user allowed).
    pub fn descriptor(&self, executor: &str) -> TaskTypeDescriptor {
        self.types.get(executor).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_task_without_time_is_due() {
        let task = ScheduledTask::new(1, CANCEL_APPEAL);
        assert!(task.is_due(Utc::now()));
    }

    #[test]
    fn test_future_task_is_not_due() {
        let task = ScheduledTask::new(1, CANCEL_APPEAL).after(chrono::Duration::minutes(5));
        assert!(!task.is_due(Utc::now()));
        assert!(task.is_due(Utc::now() + chrono::Duration::minutes(6)));
    }

    #[test]
    fn test_persisted_json_shape() {
        let task = ScheduledTask::new(42, CLEAR_PHOTO_STORAGE)
            .with_arg("user_id", 42)
            .with_arg("appeal_id", 777);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "user_id": 42,
                "executor": "clear_photo_storage",
                "kvargs": {"user_id": 42, "appeal_id": 777}
            })
        );
    }

    #[test]
    fn test_legacy_entry_without_kvargs_parses() {
        let task: ScheduledTask = serde_json::from_str(r#"{"user_id": 3, "executor": "x"}"#).unwrap();
        assert!(task.kvargs.is_empty());
        assert_eq!(task.execute_time, None);
    }

    #[test]
    fn test_builtin_task_types() {
        let types = TaskTypes::builtin();
        assert!(types.descriptor(CLEAR_CURRENT_PHOTOS).one_per_user);
        assert!(!types.descriptor(CANCEL_APPEAL).one_per_user);
        assert!(!types.descriptor("unregistered").one_per_user);
    }
}
