//! In-process storage implementing every repository port.

use async_trait::async_trait;
use chrono::Utc;
use oxide_core::buildset::{BuildRequest, BuildResult, Buildset, NewBuildset, NewSourceStamp, SourceStamp};
use oxide_core::change::{Change, NewChange};
use oxide_core::ids::*;
use oxide_core::ports::{
    BuildsetRepository, ChangeRepository, SchedulerStateRepository, SourceStampRepository,
};
use oxide_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    changes: BTreeMap<ChangeId, Change>,
    sourcestamps: BTreeMap<SourceStampId, SourceStamp>,
    buildsets: BTreeMap<BuildsetId, Buildset>,
    buildrequests: Vec<BuildRequest>,
    schedulers: HashMap<(String, String), SchedulerId>,
    state: HashMap<(SchedulerId, String), serde_json::Value>,
    next_id: HashMap<&'static str, i64>,
}

impl Tables {
    fn next(&mut self, table: &'static str) -> i64 {
        let id = self.next_id.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    /// Checks every referenced change before touching any table.
    fn insert_sourcestamp(&mut self, sourcestamp: &NewSourceStamp) -> Result<SourceStampId> {
        if let Some(missing) = sourcestamp
            .changeids
            .iter()
            .find(|id| !self.changes.contains_key(*id))
        {
            return Err(Error::ChangeNotFound(*missing));
        }

        let id = SourceStampId::new(self.next("sourcestamps"));
        let mut changeids = sourcestamp.changeids.clone();
        changeids.sort();
        self.sourcestamps.insert(
            id,
            SourceStamp {
                id,
                branch: sourcestamp.branch.clone(),
                revision: sourcestamp.revision.clone(),
                repository: sourcestamp.repository.clone(),
                project: sourcestamp.project.clone(),
                patch: sourcestamp.patch.clone(),
                changeids,
            },
        );
        Ok(id)
    }

    fn insert_buildset(&mut self, buildset: &NewBuildset) -> Result<BuildsetId> {
        if !self.sourcestamps.contains_key(&buildset.sourcestampid) {
            return Err(Error::SourceStampNotFound(buildset.sourcestampid));
        }

        let id = BuildsetId::new(self.next("buildsets"));
        let submitted_at = Utc::now();
        self.buildsets.insert(
            id,
            Buildset {
                id,
                sourcestampid: buildset.sourcestampid,
                reason: buildset.reason.clone(),
                builder_names: buildset.builder_names.clone(),
                external_idstring: buildset.external_idstring.clone(),
                properties: buildset.properties.clone(),
                submitted_at,
                complete: false,
                results: None,
            },
        );
        for builder in &buildset.builder_names {
            let request_id = BuildRequestId::new(self.next("buildrequests"));
            self.buildrequests.push(BuildRequest {
                id: request_id,
                buildsetid: id,
                builder_name: builder.clone(),
                submitted_at,
            });
        }
        Ok(id)
    }
}

/// Thread-safe in-memory database. Ids are assigned sequentially per table,
/// starting at 1. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Arc<dyn ChangeRepository> {
        Arc::new(self.clone())
    }

    pub fn sourcestamps(&self) -> Arc<dyn SourceStampRepository> {
        Arc::new(self.clone())
    }

    pub fn buildsets(&self) -> Arc<dyn BuildsetRepository> {
        Arc::new(self.clone())
    }

    pub fn scheduler_state(&self) -> Arc<dyn SchedulerStateRepository> {
        Arc::new(self.clone())
    }

    /// Every stored buildset, oldest first.
    pub fn all_buildsets(&self) -> Vec<Buildset> {
        self.lock().buildsets.values().cloned().collect()
    }

    /// Every stored source stamp, oldest first.
    pub fn all_sourcestamps(&self) -> Vec<SourceStamp> {
        self.lock().sourcestamps.values().cloned().collect()
    }

    /// Every stored change, oldest first.
    pub fn all_changes(&self) -> Vec<Change> {
        self.lock().changes.values().cloned().collect()
    }

    /// Insert a change with a caller-chosen id. Later `add` calls continue
    /// numbering after the highest id seen.
    pub fn insert_change(&self, change: Change) {
        let mut tables = self.lock();
        let next = tables.next_id.entry("changes").or_insert(0);
        *next = (*next).max(change.changeid.get());
        tables.changes.insert(change.changeid, change);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChangeRepository for MemoryDatabase {
    async fn add(&self, change: &NewChange) -> Result<Change> {
        let mut tables = self.lock();
        let id = ChangeId::new(tables.next("changes"));
        let change = Change::from_new(id, change.clone());
        tables.changes.insert(id, change.clone());
        Ok(change)
    }

    async fn get(&self, id: ChangeId) -> Result<Option<Change>> {
        Ok(self.lock().changes.get(&id).cloned())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<Change>> {
        Ok(self
            .lock()
            .changes
            .values()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SourceStampRepository for MemoryDatabase {
    async fn add(&self, sourcestamp: &NewSourceStamp) -> Result<SourceStampId> {
        self.lock().insert_sourcestamp(sourcestamp)
    }

    async fn get(&self, id: SourceStampId) -> Result<Option<SourceStamp>> {
        Ok(self.lock().sourcestamps.get(&id).cloned())
    }
}

#[async_trait]
impl BuildsetRepository for MemoryDatabase {
    async fn add(&self, buildset: &NewBuildset) -> Result<BuildsetId> {
        self.lock().insert_buildset(buildset)
    }

    async fn add_with_sourcestamp(
        &self,
        sourcestamp: &NewSourceStamp,
        buildset: &NewBuildset,
    ) -> Result<(SourceStampId, BuildsetId)> {
        let mut tables = self.lock();
        let ssid = tables.insert_sourcestamp(sourcestamp)?;
        let buildset = NewBuildset {
            sourcestampid: ssid,
            ..buildset.clone()
        };
        let bsid = tables.insert_buildset(&buildset)?;
        Ok((ssid, bsid))
    }

    async fn get(&self, id: BuildsetId) -> Result<Option<Buildset>> {
        Ok(self.lock().buildsets.get(&id).cloned())
    }

    async fn build_requests(&self, id: BuildsetId) -> Result<Vec<BuildRequest>> {
        Ok(self
            .lock()
            .buildrequests
            .iter()
            .filter(|br| br.buildsetid == id)
            .cloned()
            .collect())
    }

    async fn complete(&self, id: BuildsetId, results: BuildResult) -> Result<()> {
        let mut tables = self.lock();
        let buildset = tables
            .buildsets
            .get_mut(&id)
            .ok_or(Error::BuildsetNotFound(id))?;
        if buildset.complete {
            return Err(Error::BuildsetAlreadyComplete(id));
        }
        buildset.complete = true;
        buildset.results = Some(results);
        Ok(())
    }
}

#[async_trait]
impl SchedulerStateRepository for MemoryDatabase {
    async fn scheduler_id(&self, name: &str, class_name: &str) -> Result<SchedulerId> {
        let mut tables = self.lock();
        let key = (name.to_string(), class_name.to_string());
        if let Some(id) = tables.schedulers.get(&key) {
            return Ok(*id);
        }
        let id = SchedulerId::new(tables.next("schedulers"));
        tables.schedulers.insert(key, id);
        Ok(id)
    }

    async fn get_state(&self, id: SchedulerId, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.lock().state.get(&(id, key.to_string())).cloned())
    }

    async fn set_state(&self, id: SchedulerId, key: &str, value: &serde_json::Value) -> Result<()> {
        self.lock().state.insert((id, key.to_string()), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_core::buildset::Properties;
    use serde_json::json;

    fn new_change(revision: &str) -> NewChange {
        NewChange {
            who: "dev".to_string(),
            revision: revision.to_string(),
            branch: Some("master".to_string()),
            repository: "repo".to_string(),
            project: String::new(),
            category: None,
            files: vec!["a.txt".to_string()],
            comments: "msg".to_string(),
            when: None,
        }
    }

    #[tokio::test]
    async fn test_change_ids_increase() {
        let db = MemoryDatabase::new();
        let a = ChangeRepository::add(&db, &new_change("a")).await.unwrap();
        let b = ChangeRepository::add(&db, &new_change("b")).await.unwrap();
        assert!(b.changeid > a.changeid);

        let recent = db.recent(10).await.unwrap();
        assert_eq!(recent[0].revision, "b");
        assert_eq!(recent[1].revision, "a");
    }

    #[tokio::test]
    async fn test_insert_change_advances_numbering() {
        let db = MemoryDatabase::new();
        db.insert_change(Change::from_new(ChangeId::new(13), new_change("x")));
        let next = ChangeRepository::add(&db, &new_change("y")).await.unwrap();
        assert_eq!(next.changeid, ChangeId::new(14));
    }

    #[tokio::test]
    async fn test_buildset_creates_requests() {
        let db = MemoryDatabase::new();
        let ssid = SourceStampRepository::add(&db, &NewSourceStamp::default())
            .await
            .unwrap();
        let bsid = BuildsetRepository::add(
            &db,
            &NewBuildset {
                sourcestampid: ssid,
                reason: "because".to_string(),
                builder_names: vec!["a".to_string(), "b".to_string()],
                external_idstring: None,
                properties: Properties::new(),
            },
        )
        .await
        .unwrap();

        let requests = db.build_requests(bsid).await.unwrap();
        let names: Vec<_> = requests.iter().map(|r| r.builder_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_buildset_completes_once() {
        let db = MemoryDatabase::new();
        let ssid = SourceStampRepository::add(&db, &NewSourceStamp::default())
            .await
            .unwrap();
        let bsid = BuildsetRepository::add(
            &db,
            &NewBuildset {
                sourcestampid: ssid,
                reason: "r".to_string(),
                builder_names: vec!["a".to_string()],
                external_idstring: None,
                properties: Properties::new(),
            },
        )
        .await
        .unwrap();

        tokio_test::assert_ok!(db.complete(bsid, BuildResult::Success).await);
        let err = tokio_test::assert_err!(db.complete(bsid, BuildResult::Failure).await);
        assert!(matches!(err, Error::BuildsetAlreadyComplete(_)));

        let stored = BuildsetRepository::get(&db, bsid).await.unwrap().unwrap();
        assert_eq!(stored.results, Some(BuildResult::Success));
    }

    #[tokio::test]
    async fn test_sourcestamp_rejects_unknown_change() {
        let db = MemoryDatabase::new();
        let err = SourceStampRepository::add(
            &db,
            &NewSourceStamp {
                changeids: vec![ChangeId::new(99)],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ChangeNotFound(_)));
    }

    #[tokio::test]
    async fn test_add_with_sourcestamp_links_rows() {
        let db = MemoryDatabase::new();
        let change = ChangeRepository::add(&db, &new_change("a")).await.unwrap();
        let (ssid, bsid) = db
            .add_with_sourcestamp(
                &NewSourceStamp {
                    changeids: vec![change.changeid],
                    ..Default::default()
                },
                &NewBuildset {
                    sourcestampid: SourceStampId::new(0),
                    reason: "r".to_string(),
                    builder_names: vec!["a".to_string()],
                    external_idstring: None,
                    properties: Properties::new(),
                },
            )
            .await
            .unwrap();

        let stored = BuildsetRepository::get(&db, bsid).await.unwrap().unwrap();
        assert_eq!(stored.sourcestampid, ssid);
        assert_eq!(db.build_requests(bsid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_with_sourcestamp_leaves_nothing_on_failure() {
        let db = MemoryDatabase::new();
        let err = tokio_test::assert_err!(
            db.add_with_sourcestamp(
                &NewSourceStamp {
                    changeids: vec![ChangeId::new(7)],
                    ..Default::default()
                },
                &NewBuildset {
                    sourcestampid: SourceStampId::new(0),
                    reason: "r".to_string(),
                    builder_names: vec!["a".to_string()],
                    external_idstring: None,
                    properties: Properties::new(),
                },
            )
            .await
        );

        assert!(matches!(err, Error::ChangeNotFound(_)));
        assert!(db.all_sourcestamps().is_empty());
        assert!(db.all_buildsets().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_state_namespaced() {
        let db = MemoryDatabase::new();
        let a = db.scheduler_id("a", "Immediate").await.unwrap();
        let b = db.scheduler_id("b", "Immediate").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(db.scheduler_id("a", "Immediate").await.unwrap(), a);

        db.set_state(a, "k", &json!(1)).await.unwrap();
        db.set_state(a, "k", &json!(2)).await.unwrap();
        assert_eq!(db.get_state(a, "k").await.unwrap(), Some(json!(2)));
        assert_eq!(db.get_state(b, "k").await.unwrap(), None);
    }
}
