//! Analysis job model.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ModuleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModuleStatus::Completed | ModuleStatus::Failed | ModuleStatus::Skipped)
    }

    /// Whether a module may move from `self` to `next`.
    pub fn can_transition_to(&self, next: ModuleStatus) -> bool {
        match (self, next) {
            (ModuleStatus::Pending, ModuleStatus::Running) => true,
            (ModuleStatus::Pending, ModuleStatus::Skipped) => true,
            (ModuleStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleStatus::Pending => "pending",
            ModuleStatus::Running => "running",
            ModuleStatus::Completed => "completed",
            ModuleStatus::Failed => "failed",
            ModuleStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Module name → status, in pipeline order.
///
/// Serialized as a JSON object whose key order is the pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMap(Vec<(String, ModuleStatus)>);

impl ModuleMap {
    /// All modules `pending`, in the given order.
    pub fn pending<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| (n.into(), ModuleStatus::Pending)).collect())
    }

    pub fn get(&self, name: &str) -> Option<ModuleStatus> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| *s)
    }

    pub(crate) fn set(&mut self, name: &str, status: ModuleStatus) -> bool {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => {
                slot.1 = status;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ModuleStatus)> {
        self.0.iter().map(|(n, s)| (n.as_str(), *s))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The final module, which produces the report.
    pub fn last(&self) -> Option<(&str, ModuleStatus)> {
        self.0.last().map(|(n, s)| (n.as_str(), *s))
    }

    pub fn count(&self, status: ModuleStatus) -> usize {
        self.0.iter().filter(|(_, s)| *s == status).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.0.iter().all(|(_, s)| s.is_terminal())
    }

    /// floor(100 × completed / total).
    pub fn completion_percentage(&self) -> u8 {
        if self.0.is_empty() {
            return 0;
        }
        (self.count(ModuleStatus::Completed) * 100 / self.0.len()) as u8
    }
}

impl Serialize for ModuleMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, status) in &self.0 {
            map.serialize_entry(name, status)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ModuleMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModuleMapVisitor;

        impl<'de> Visitor<'de> for ModuleMapVisitor {
            type Value = ModuleMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of module name to status")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ModuleMap, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, status)) = access.next_entry::<String, ModuleStatus>()? {
                    entries.push((name, status));
                }
                Ok(ModuleMap(entries))
            }
        }

        deserializer.deserialize_map(ModuleMapVisitor)
    }
}

/// An admitted analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub target: String,
    pub status: JobStatus,
    pub modules: ModuleMap,
    pub completion_percentage: u8,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
}

impl AnalysisJob {
    pub fn new<I, S>(id: Uuid, target: String, modules: I, invoice_id: Option<Uuid>, now: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            target,
            status: JobStatus::Pending,
            modules: ModuleMap::pending(modules),
            completion_percentage: 0,
            created_at: now,
            completed_at: None,
            error: None,
            invoice_id,
            report: None,
        }
    }

    pub fn progress(&self) -> AnalysisProgress {
        AnalysisProgress {
            id: self.id,
            status: self.status,
            modules: self.modules.clone(),
            completion_percentage: self.completion_percentage,
        }
    }
}

/// Snapshot returned to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub id: Uuid,
    pub status: JobStatus,
    pub modules: ModuleMap,
    pub completion_percentage: u8,
}

impl AnalysisProgress {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} is already {status}")]
    Terminal { id: Uuid, status: JobStatus },

    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("module '{module}' cannot move from {from} to {to}")]
    InvalidModuleTransition {
        module: String,
        from: ModuleStatus,
        to: ModuleStatus,
    },

    /// Report requested before the job finished.
    #[error("job {id} is still {status}")]
    NotReady { id: Uuid, status: JobStatus },

    #[error("job {id} failed: {reason}")]
    Failed { id: Uuid, reason: String },
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_map_keeps_order() {
        let modules = ModuleMap::pending(["seo", "performance", "report"]);
        let json = serde_json::to_string(&modules).unwrap();
        assert_eq!(json, r#"{"seo":"pending","performance":"pending","report":"pending"}"#);

        let back: ModuleMap = serde_json::from_str(r#"{"report":"completed","seo":"running"}"#).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["report", "seo"]);
        assert_eq!(back.get("seo"), Some(ModuleStatus::Running));
    }

    #[test]
    fn test_percentage_floors() {
        let mut modules = ModuleMap::pending(["a", "b", "c"]);
        assert_eq!(modules.completion_percentage(), 0);
        modules.set("a", ModuleStatus::Completed);
        assert_eq!(modules.completion_percentage(), 33);
        modules.set("b", ModuleStatus::Skipped);
        assert_eq!(modules.completion_percentage(), 33);
        modules.set("c", ModuleStatus::Completed);
        assert_eq!(modules.completion_percentage(), 66);
    }

    #[test]
    fn test_module_transitions() {
        assert!(ModuleStatus::Pending.can_transition_to(ModuleStatus::Running));
        assert!(ModuleStatus::Pending.can_transition_to(ModuleStatus::Skipped));
        assert!(!ModuleStatus::Pending.can_transition_to(ModuleStatus::Completed));
        assert!(ModuleStatus::Running.can_transition_to(ModuleStatus::Failed));
        assert!(!ModuleStatus::Completed.can_transition_to(ModuleStatus::Running));
        assert!(!ModuleStatus::Skipped.can_transition_to(ModuleStatus::Completed));
    }
}
