use crate::{BucketAttrs, RemoteError, StorageClient};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, Bucket>,
    /// Names owned by someone else: attrs are forbidden, creation conflicts.
    foreign: BTreeSet<String>,
    failing_objects: BTreeSet<String>,
    unreachable: bool,
    calls: Vec<String>,
}

struct Bucket {
    project: String,
    location: String,
    objects: Vec<String>,
}

/// In-memory [`StorageClient`] for tests, with failure injection.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))
    }

    /// Add a bucket owned by `project` holding `objects`.
    pub fn insert_bucket(&self, project: &str, bucket: &str, objects: &[&str]) {
        if let Ok(mut state) = self.state.lock() {
            state.buckets.insert(
                bucket.to_owned(),
                Bucket {
                    project: project.to_owned(),
                    location: "ME-WEST1".to_owned(),
                    objects: objects.iter().map(|&o| o.to_owned()).collect(),
                },
            );
        }
    }

    /// Mark `bucket` as existing in another project the caller cannot see.
    pub fn insert_foreign(&self, bucket: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.foreign.insert(bucket.to_owned());
        }
    }

    /// Make every deletion of `object` fail.
    pub fn fail_object_delete(&self, object: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_objects.insert(object.to_owned());
        }
    }

    /// Make every call fail with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unreachable = unreachable;
        }
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.state
            .lock()
            .is_ok_and(|s| s.buckets.contains_key(bucket))
    }

    pub fn objects(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.buckets.get(bucket).map(|b| b.objects.clone()))
            .unwrap_or_default()
    }

    /// Calls made so far, as `"<operation> <bucket>[/<object>]"`.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    fn enter(&self, call: String) -> Result<std::sync::MutexGuard<'_, State>, RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(call);
        if state.unreachable {
            return Err(RemoteError::Http("connection refused".to_owned()));
        }
        Ok(state)
    }
}

impl StorageClient for MemoryStorage {
    fn bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, RemoteError> {
        let state = self.enter(format!("attrs {bucket}"))?;
        if state.foreign.contains(bucket) {
            return Err(RemoteError::Forbidden(bucket.to_owned()));
        }
        let found = state
            .buckets
            .get(bucket)
            .ok_or_else(|| RemoteError::NotFound(bucket.to_owned()))?;
        Ok(BucketAttrs {
            name: bucket.to_owned(),
            location: found.location.clone(),
            project_number: Some(format!("{}-number", found.project)),
        })
    }

    fn create_bucket(
        &self,
        project: &str,
        bucket: &str,
        location: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.enter(format!("create {bucket}"))?;
        if state.foreign.contains(bucket) || state.buckets.contains_key(bucket) {
            return Err(RemoteError::Conflict(format!(
                "bucket name '{bucket}' is not available"
            )));
        }
        state.buckets.insert(
            bucket.to_owned(),
            Bucket {
                project: project.to_owned(),
                location: location.to_uppercase(),
                objects: Vec::new(),
            },
        );
        Ok(())
    }

    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, RemoteError> {
        let state = self.enter(format!("list {bucket}"))?;
        state
            .buckets
            .get(bucket)
            .map(|b| b.objects.clone())
            .ok_or_else(|| RemoteError::NotFound(bucket.to_owned()))
    }

    fn delete_object(&self, bucket: &str, object: &str) -> Result<(), RemoteError> {
        let mut state = self.enter(format!("delete {bucket}/{object}"))?;
        if state.failing_objects.contains(object) {
            return Err(RemoteError::Forbidden(format!("{bucket}/{object}")));
        }
        let found = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| RemoteError::NotFound(bucket.to_owned()))?;
        let idx = found
            .objects
            .iter()
            .position(|o| o == object)
            .ok_or_else(|| RemoteError::NotFound(format!("{bucket}/{object}")))?;
        found.objects.remove(idx);
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<(), RemoteError> {
        let mut state = self.enter(format!("delete {bucket}"))?;
        match state.buckets.get(bucket) {
            None => Err(RemoteError::NotFound(bucket.to_owned())),
            Some(b) if !b.objects.is_empty() => Err(RemoteError::Conflict(format!(
                "bucket '{bucket}' is not empty"
            ))),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }
}
