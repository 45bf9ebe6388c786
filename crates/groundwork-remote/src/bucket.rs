use crate::{BucketAttrs, RemoteError, StorageClient};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_LOCATION: &str = "me-west1";

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("bucket name '{name}' is already taken: {reason}")]
    Conflict { name: String, reason: String },
    #[error("failed to ensure bucket '{name}': {source}")]
    Transient {
        name: String,
        #[source]
        source: RemoteError,
    },
    #[error("failed to list objects in bucket '{name}': {source}")]
    ListObjects {
        name: String,
        #[source]
        source: RemoteError,
    },
    #[error("failed to delete object '{object}' in bucket '{name}': {source}")]
    ObjectDelete {
        name: String,
        object: String,
        #[source]
        source: RemoteError,
    },
    #[error("failed to delete bucket '{name}': {source}")]
    ContainerDelete {
        name: String,
        #[source]
        source: RemoteError,
    },
}

impl BucketError {
    /// The object whose deletion aborted a purge, if that is what failed.
    pub fn failing_object(&self) -> Option<&str> {
        match self {
            BucketError::ObjectDelete { object, .. } => Some(object),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketDescriptor {
    pub name: String,
    pub project: String,
    pub region: String,
}

impl BucketDescriptor {
    pub fn new(name: &str, project: &str) -> Self {
        Self {
            name: name.to_owned(),
            project: project.to_owned(),
            region: DEFAULT_LOCATION.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum EnsureOutcome {
    Existing(BucketAttrs),
    Created,
}

/// Creates the remote-state bucket on demand and removes it on teardown.
pub struct StateBucketManager {
    storage: Arc<dyn StorageClient>,
    region: String,
}

impl StateBucketManager {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self {
            storage,
            region: DEFAULT_LOCATION.to_owned(),
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: &str) -> Self {
        region.clone_into(&mut self.region);
        self
    }

    pub fn descriptor(&self, project: &str, name: &str) -> BucketDescriptor {
        BucketDescriptor {
            region: self.region.clone(),
            ..BucketDescriptor::new(name, project)
        }
    }

    /// Make sure `name` exists. Any successful attribute fetch counts as
    /// "exists", whichever project owns it.
    pub fn ensure(&self, project: &str, name: &str) -> Result<EnsureOutcome, BucketError> {
        match self.storage.bucket_attrs(name) {
            Ok(attrs) => {
                info!(bucket = name, "bucket already exists");
                if let Some(number) = &attrs.project_number {
                    warn!(bucket = name, project_number = %number, "bucket exists; ownership is not verified");
                }
                return Ok(EnsureOutcome::Existing(attrs));
            }
            Err(e) => debug!(bucket = name, "bucket attributes unavailable: {e}"),
        }

        let target = self.descriptor(project, name);
        info!(bucket = name, project, region = %target.region, "creating bucket");
        match self
            .storage
            .create_bucket(&target.project, &target.name, &target.region)
        {
            Ok(()) => {
                info!(bucket = name, "bucket created");
                Ok(EnsureOutcome::Created)
            }
            Err(e) if e.is_conflict() => {
                error!(bucket = name, "bucket name is taken by another project");
                Err(BucketError::Conflict {
                    name: name.to_owned(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                error!(bucket = name, "failed to create bucket: {e}");
                Err(BucketError::Transient {
                    name: name.to_owned(),
                    source: e,
                })
            }
        }
    }

    /// Delete every object in `name`, then the bucket itself.
    ///
    /// Stops at the first object that cannot be deleted; the bucket-delete call
    /// is never issued unless every listed object was removed.
    pub fn delete(&self, project: &str, name: &str) -> Result<usize, BucketError> {
        info!(bucket = name, project, "deleting bucket contents");
        let objects = self
            .storage
            .list_objects(name)
            .map_err(|source| BucketError::ListObjects {
                name: name.to_owned(),
                source,
            })?;

        for object in &objects {
            debug!(bucket = name, object = %object, "deleting object");
            if let Err(source) = self.storage.delete_object(name, object) {
                warn!(bucket = name, object = %object, "object delete failed, aborting purge");
                return Err(BucketError::ObjectDelete {
                    name: name.to_owned(),
                    object: object.clone(),
                    source,
                });
            }
        }

        self.storage
            .delete_bucket(name)
            .map_err(|source| BucketError::ContainerDelete {
                name: name.to_owned(),
                source,
            })?;
        info!(bucket = name, objects = objects.len(), "bucket deleted");
        Ok(objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    fn setup() -> (Arc<MemoryStorage>, StateBucketManager) {
        let storage = Arc::new(MemoryStorage::new());
        let manager = StateBucketManager::new(storage.clone());
        (storage, manager)
    }

    #[test]
    fn ensure_creates_once() {
        let (storage, manager) = setup();
        assert_eq!(
            manager.ensure("acme", "acme-tfstate").unwrap(),
            EnsureOutcome::Created
        );
        assert!(matches!(
            manager.ensure("acme", "acme-tfstate").unwrap(),
            EnsureOutcome::Existing(_)
        ));
        let creates = storage
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("create"))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn bucket_visible_from_other_project_is_accepted() {
        let (storage, manager) = setup();
        storage.insert_bucket("someone-else", "shared-tfstate", &[]);
        let outcome = manager.ensure("acme", "shared-tfstate").unwrap();
        assert!(matches!(outcome, EnsureOutcome::Existing(_)));
    }

    #[test]
    fn taken_elsewhere_is_conflict() {
        let (storage, manager) = setup();
        storage.insert_foreign("taken-elsewhere");
        let err = manager.ensure("p1", "taken-elsewhere").unwrap_err();
        assert!(matches!(err, BucketError::Conflict { .. }));
        assert!(!storage.has_bucket("taken-elsewhere"));
    }

    #[test]
    fn network_failure_is_transient() {
        let (storage, manager) = setup();
        storage.set_unreachable(true);
        let err = manager.ensure("acme", "acme-tfstate").unwrap_err();
        match err {
            BucketError::Transient { source, .. } => assert!(source.is_transient()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn region_override_is_used() {
        let (storage, manager) = setup();
        let manager = manager.with_region("europe-west4");
        assert_eq!(manager.descriptor("acme", "b").region, "europe-west4");
        manager.ensure("acme", "b").unwrap();
        assert_eq!(
            storage.bucket_attrs("b").unwrap().location,
            "EUROPE-WEST4"
        );
    }

    #[test]
    fn delete_purges_then_removes_container() {
        let (storage, manager) = setup();
        storage.insert_bucket("acme", "state", &["a", "b", "c"]);
        assert_eq!(manager.delete("acme", "state").unwrap(), 3);
        assert!(!storage.has_bucket("state"));

        let calls = storage.calls();
        assert_eq!(calls.last().map(String::as_str), Some("delete state"));
        let container_delete = calls.iter().position(|c| c == "delete state").unwrap();
        let last_object = calls.iter().rposition(|c| c.starts_with("delete state/")).unwrap();
        assert!(last_object < container_delete);
    }

    #[test]
    fn delete_aborts_on_first_failing_object() {
        let (storage, manager) = setup();
        storage.insert_bucket("acme", "state", &["a", "x", "z"]);
        storage.fail_object_delete("x");

        let err = manager.delete("acme", "state").unwrap_err();
        assert_eq!(err.failing_object(), Some("x"));
        assert!(storage.has_bucket("state"));
        assert_eq!(storage.objects("state"), vec!["x", "z"]);
        assert!(!storage.calls().iter().any(|c| c == "delete state"));
        assert!(!storage.calls().iter().any(|c| c == "delete state/z"));
    }

    #[test]
    fn listing_failure_never_deletes_container() {
        let (storage, manager) = setup();
        let err = manager.delete("acme", "missing").unwrap_err();
        assert!(matches!(err, BucketError::ListObjects { .. }));
        assert_eq!(storage.calls(), vec!["list missing"]);
    }
}
