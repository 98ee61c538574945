use anyhow::{Context, Result};
use pharos_migrate_core::{
    batches, work_item_institution, ChildRecord, Destination, EventRecord, EventRefs, FileBundle,
    NewChecksum, NewEvent, NewFile, NewId, NewObject, NewUser, NewWorkItem, NewWorkItemState,
    ParentRecord, RecordKind, WorkItemRecord, WorkItemRefs,
};
use pharos_migrate_store_sqlite::SourceStore;
use rand::RngCore;
use tracing::{debug, info};

use crate::config::MigrateConfig;
use crate::context::MigrationContext;
use crate::summary::{now_rfc3339, MigrationSummary};

/// Bytes of randomness behind a generated reset-password token.
const RESET_TOKEN_BYTES: usize = 64;

/// Runs the four import phases in order: institutions (and users),
/// objects with their files and events, then work items. Each phase reads
/// ids that the previous one recorded in the [`MigrationContext`].
pub struct Migrator<'a, D: ?Sized> {
    source: &'a SourceStore,
    destination: &'a mut D,
    config: MigrateConfig,
    context: MigrationContext,
    summary: MigrationSummary,
}

impl<'a, D: Destination + ?Sized> Migrator<'a, D> {
    pub fn new(source: &'a SourceStore, destination: &'a mut D, config: MigrateConfig) -> Self {
        let context = MigrationContext::new(config.reference_policy);
        let summary = MigrationSummary {
            destination: destination.name().to_string(),
            ..MigrationSummary::default()
        };
        Self { source, destination, config, context, summary }
    }

    #[must_use]
    pub fn context(&self) -> &MigrationContext {
        &self.context
    }

    #[must_use]
    pub fn summary(&self) -> &MigrationSummary {
        &self.summary
    }

    /// Run every phase. The first failed read or write aborts the run.
    ///
    /// # Errors
    /// Returns the first error from any phase, with the failing record's
    /// identifier in its context chain.
    pub fn run(mut self) -> Result<MigrationSummary> {
        self.summary.started_at = now_rfc3339()?;
        info!(
            destination = self.destination.name(),
            limit = ?self.config.limit,
            offset = self.config.offset,
            policy = self.config.reference_policy.as_str(),
            "starting migration"
        );

        info!("creating source indexes");
        self.source.create_indexes()?;
        self.import_institutions()?;
        self.import_users()?;
        self.import_objects()?;
        self.import_work_items()?;

        self.summary.finished_at = now_rfc3339()?;
        info!(
            institutions = self.summary.institutions,
            objects = self.summary.objects,
            files = self.summary.files,
            events = self.summary.events,
            work_items = self.summary.work_items,
            "migration complete"
        );
        Ok(self.summary)
    }

    /// # Errors
    /// Returns an error when the destination cannot list or create the
    /// institutions, or a mapping conflicts.
    pub fn import_institutions(&mut self) -> Result<usize> {
        let institutions = self.source.institutions()?;
        let resolved = self
            .destination
            .resolve_institutions(&institutions)
            .context("failed to load institutions")?;
        for institution in &resolved {
            self.context.record_institution(institution)?;
            info!(
                identifier = %institution.identifier,
                id = %institution.new_id,
                "mapped institution"
            );
        }
        self.summary.institutions = resolved.len();
        Ok(resolved.len())
    }

    /// # Errors
    /// Returns an error when users cannot be read or written.
    pub fn import_users(&mut self) -> Result<usize> {
        let users = self
            .source
            .users()?
            .iter()
            .map(|user| {
                let institution_id = self.context.lookup(user.institution_old_id.as_deref());
                NewUser::from_source(user, institution_id, reset_token)
            })
            .collect::<Vec<_>>();
        let written = self.destination.create_users(&users).context("failed to import users")?;
        self.summary.users = written;
        Ok(written)
    }

    /// Import objects page by page, honoring the configured limit and offset.
    ///
    /// # Errors
    /// Returns the first error from [`Self::import_object`].
    pub fn import_objects(&mut self) -> Result<usize> {
        let mut offset = self.config.offset;
        let mut remaining = self.config.limit;
        let mut imported = 0;
        loop {
            let page_size = MigrateConfig::next_page(self.config.object_page_size, remaining);
            if page_size == 0 {
                break;
            }
            let page = self.source.objects(page_size, offset)?;
            if page.is_empty() {
                break;
            }
            for parent in &page {
                self.import_object(parent)?;
            }
            imported += page.len();
            let read = u64::try_from(page.len()).unwrap_or(u64::MAX);
            offset = offset.saturating_add(read);
            remaining = remaining.map(|remaining| remaining.saturating_sub(read));
        }
        Ok(imported)
    }

    /// Write one object, map it, then import its object-level events and
    /// its files.
    ///
    /// # Errors
    /// Returns an error when the institution reference is unresolved under
    /// the strict policy, the record is invalid, or any write fails.
    pub fn import_object(&mut self, parent: &ParentRecord) -> Result<NewId> {
        let institution_id = self
            .context
            .resolve_required(RecordKind::Institution, &parent.institution_old_id)
            .with_context(|| format!("intellectual object {}", parent.identifier))?;
        let institution = self.context.institution_name(&parent.institution_old_id).map_or_else(
            || parent.identifier.split('/').next().unwrap_or_default().to_string(),
            str::to_string,
        );

        let enrichment = self.source.object_enrichment(parent)?;
        let object = NewObject::from_source(parent, institution_id, enrichment)?;
        let new_id = self
            .destination
            .create_object(&institution, &object)
            .with_context(|| format!("error saving intellectual object {}", parent.identifier))?;
        self.context.record(&parent.old_id, &parent.identifier, new_id)?;
        self.summary.objects += 1;

        let events = self.import_object_events(parent)?;
        let files = self.import_files(parent)?;
        info!(identifier = %parent.identifier, id = %new_id, files, events, "saved object");
        Ok(new_id)
    }

    /// Import the events attached directly to an already written object.
    ///
    /// # Errors
    /// Returns an error when the object has not been written yet, an event
    /// cannot be transformed, or the write fails.
    pub fn import_object_events(&mut self, parent: &ParentRecord) -> Result<usize> {
        let object_id = self.written_object(parent)?;
        let events = self
            .source
            .object_level_events(&parent.old_id)?
            .iter()
            .map(|record| self.new_event(record, object_id, &parent.identifier))
            .collect::<Result<Vec<_>>>()?;
        if events.is_empty() {
            return Ok(0);
        }
        let written = self
            .destination
            .create_events(&events)
            .with_context(|| format!("error saving events of {}", parent.identifier))?;
        self.summary.events += written;
        Ok(written)
    }

    /// Import the files of an already written object, with their checksums
    /// and file-level events.
    ///
    /// # Errors
    /// Returns an error when the object has not been written yet, a file
    /// cannot be transformed, or a batch write fails.
    pub fn import_files(&mut self, parent: &ParentRecord) -> Result<usize> {
        let object_id = self.written_object(parent)?;
        let children = self.source.files_for_object(&parent.old_id)?;
        let batch_size = self.config.file_batch_size.unwrap_or(children.len());

        let mut written = 0;
        for batch in batches(children, batch_size) {
            let bundles = batch
                .iter()
                .map(|child| self.file_bundle(child, object_id, &parent.identifier))
                .collect::<Result<Vec<_>>>()?;
            let ids = self.destination.create_files(object_id, &bundles).with_context(|| {
                format!("error saving {} files of {}", bundles.len(), parent.identifier)
            })?;
            for (bundle, id) in bundles.iter().zip(&ids) {
                self.context.record(&bundle.old_id, &bundle.file.identifier, *id)?;
                self.summary.checksums += bundle.checksums.len();
                self.summary.events += bundle.events.len();
            }
            debug!(object = %parent.identifier, count = ids.len(), "saved file batch");
            written += ids.len();
        }
        self.summary.files += written;
        Ok(written)
    }

    /// Import processed items page by page, honoring the limit and offset.
    ///
    /// # Errors
    /// Returns the first failed read or write.
    pub fn import_work_items(&mut self) -> Result<usize> {
        let mut offset = self.config.offset;
        let mut remaining = self.config.limit;
        let mut imported = 0;
        loop {
            let page_size = MigrateConfig::next_page(self.config.work_item_page_size, remaining);
            if page_size == 0 {
                break;
            }
            let page = self.source.work_items(page_size, offset)?;
            if page.is_empty() {
                break;
            }
            for record in &page {
                self.import_work_item(record)?;
            }
            imported += page.len();
            let read = u64::try_from(page.len()).unwrap_or(u64::MAX);
            offset = offset.saturating_add(read);
            remaining = remaining.map(|remaining| remaining.saturating_sub(read));
        }
        Ok(imported)
    }

    /// # Errors
    /// Returns an error when the item or its state cannot be written.
    pub fn import_work_item(&mut self, record: &WorkItemRecord) -> Result<NewId> {
        let institution = work_item_institution(
            record.object_identifier.as_deref(),
            record.bucket.as_deref(),
            record.institution.as_deref(),
            &self.config.receiving_bucket_prefix,
        );
        let refs = WorkItemRefs {
            object_id: self.context.lookup_name(record.object_identifier.as_deref()),
            file_id: self.context.lookup_name(record.generic_file_identifier.as_deref()),
            institution_id: self.context.lookup_name(institution.as_deref()),
        };
        let item = NewWorkItem::from_source(record, refs);
        let id = self.destination.create_work_item(&item).with_context(|| {
            format!("error saving work item for processed item {}", record.old_id)
        })?;
        self.summary.work_items += 1;

        let with_state = match NewWorkItemState::from_source(record, id) {
            Some(state) => {
                self.destination.create_work_item_state(&state).with_context(|| {
                    format!("error saving state of processed item {}", record.old_id)
                })?;
                self.summary.work_item_states += 1;
                true
            }
            None => false,
        };
        info!(processed_item = record.old_id, work_item = %id, with_state, "imported work item");
        Ok(id)
    }

    fn written_object(&self, parent: &ParentRecord) -> Result<NewId> {
        self.context
            .ids()
            .require(RecordKind::Object, &parent.old_id)
            .with_context(|| {
                format!("intellectual object {} has not been written", parent.identifier)
            })
    }

    fn file_bundle(
        &self,
        child: &ChildRecord,
        object_id: NewId,
        object_identifier: &str,
    ) -> Result<FileBundle> {
        let file = NewFile::from_source(child, object_id)?;
        let checksums =
            self.source.checksums_for_file(&child.old_id)?.iter().map(NewChecksum::from).collect();
        let events = self
            .source
            .events_for_file(&child.old_id)?
            .iter()
            .map(|record| self.new_event(record, object_id, object_identifier))
            .collect::<Result<Vec<_>>>()?;
        Ok(FileBundle { old_id: child.old_id.clone(), file, checksums, events })
    }

    /// The event's own object pid wins over the parent being imported;
    /// the file id is left to the destination, which knows it after the
    /// file is written.
    fn new_event(
        &self,
        record: &EventRecord,
        parent_id: NewId,
        object_identifier: &str,
    ) -> Result<NewEvent> {
        let object_id = match record.object_old_id.as_deref() {
            Some(old_id) if !old_id.trim().is_empty() => {
                self.context.resolve_required(RecordKind::Object, old_id)?
            }
            _ => Some(parent_id),
        };
        let institution_id =
            self.context.resolve(RecordKind::Institution, record.institution_old_id.as_deref())?;
        let refs = EventRefs { object_id, file_id: None, institution_id };
        Ok(NewEvent::from_source(record, refs, object_identifier)?)
    }
}

fn reset_token() -> String {
    let mut bytes = [0_u8; RESET_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pharos_migrate_core::{InstitutionRecord, MigrateError, ResolvedInstitution};
    use rusqlite::params;

    use super::*;
    use crate::config::ReferencePolicy;

    /// In-memory destination that hands out sequential ids and remembers
    /// what it was given.
    #[derive(Default)]
    struct RecordingDestination {
        next_id: i64,
        objects: Vec<(String, NewObject)>,
        file_batches: Vec<Vec<FileBundle>>,
        events: Vec<NewEvent>,
        users: Vec<NewUser>,
        work_items: Vec<NewWorkItem>,
        states: Vec<NewWorkItemState>,
        /// Index of the file batch whose write is refused.
        fail_file_batch: Option<usize>,
    }

    impl RecordingDestination {
        fn allocate(&mut self) -> NewId {
            self.next_id += 1;
            NewId(self.next_id)
        }
    }

    impl Destination for RecordingDestination {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn resolve_institutions(
            &mut self,
            institutions: &[InstitutionRecord],
        ) -> Result<Vec<ResolvedInstitution>> {
            Ok(institutions
                .iter()
                .map(|record| ResolvedInstitution {
                    old_id: record.old_id.clone(),
                    identifier: record.identifier.clone(),
                    new_id: self.allocate(),
                })
                .collect())
        }

        fn create_users(&mut self, users: &[NewUser]) -> Result<usize> {
            self.users.extend_from_slice(users);
            Ok(users.len())
        }

        fn create_object(&mut self, institution: &str, object: &NewObject) -> Result<NewId> {
            self.objects.push((institution.to_string(), object.clone()));
            Ok(self.allocate())
        }

        fn create_files(&mut self, _object_id: NewId, files: &[FileBundle]) -> Result<Vec<NewId>> {
            if self.fail_file_batch == Some(self.file_batches.len()) {
                anyhow::bail!("destination refused file batch {}", self.file_batches.len());
            }
            self.file_batches.push(files.to_vec());
            Ok(files.iter().map(|_| self.allocate()).collect())
        }

        fn create_events(&mut self, events: &[NewEvent]) -> Result<usize> {
            self.events.extend_from_slice(events);
            Ok(events.len())
        }

        fn create_work_item(&mut self, item: &NewWorkItem) -> Result<NewId> {
            self.work_items.push(item.clone());
            Ok(self.allocate())
        }

        fn create_work_item_state(&mut self, state: &NewWorkItemState) -> Result<NewId> {
            self.states.push(state.clone());
            Ok(self.allocate())
        }
    }

    fn fixture_source() -> Result<SourceStore> {
        let source = SourceStore::open(Path::new(":memory:"))?;
        source.ensure_schema()?;
        let conn = source.connection();
        conn.execute(
            "INSERT INTO institutions(id, name, identifier)
             VALUES ('aptrust-test:1', 'Test', 'test.edu')",
            [],
        )?;
        for (pid, identifier) in
            [("aptrust-test:10", "test.edu/photos"), ("aptrust-test:20", "test.edu/audio")]
        {
            conn.execute(
                "INSERT INTO intellectual_objects(id, identifier, access, institution_id, state)
                 VALUES (?1, ?2, 'institution', 'aptrust-test:1', 'A')",
                params![pid, identifier],
            )?;
        }
        for index in 0..5 {
            conn.execute(
                "INSERT INTO generic_files(id, intellectual_object_id, identifier, size)
                 VALUES (?1, 'aptrust-test:10', ?2, 100)",
                params![
                    format!("aptrust-test:1{index}0"),
                    format!("test.edu/photos/data/{index}.jpg")
                ],
            )?;
        }
        conn.execute(
            "INSERT INTO checksums(algorithm, digest, generic_file_id)
             VALUES ('md5', 'abc', 'aptrust-test:100')",
            [],
        )?;
        conn.execute(
            "INSERT INTO premis_events_solr(intellectual_object_id, generic_file_id, institution_id,
                identifier, event_type, outcome, outcome_detail)
             VALUES ('aptrust-test:10', 'aptrust-test:100', 'aptrust-test:1', 'e-file',
                     'fixity_check', 'success', '')",
            [],
        )?;
        conn.execute(
            "INSERT INTO premis_events_solr(intellectual_object_id, generic_file_id, institution_id,
                identifier, event_type, outcome, outcome_detail)
             VALUES ('aptrust-test:10', NULL, 'aptrust-test:1', 'e-object', 'ingest', 'success',
                     'copied to aptrust.preservation.oregon')",
            [],
        )?;
        Ok(source)
    }

    fn parent(source: &SourceStore, index: u64) -> Result<ParentRecord> {
        source
            .objects(1, index)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("fixture object {index} missing"))
    }

    #[test]
    fn files_before_their_object_are_rejected() -> Result<()> {
        let source = fixture_source()?;
        let mut destination = RecordingDestination::default();
        let mut migrator = Migrator::new(&source, &mut destination, MigrateConfig::default());
        migrator.import_institutions()?;

        let err = migrator.import_files(&parent(&source, 0)?).err();
        let err = err.unwrap_or_else(|| panic!("files of an unwritten object must be rejected"));
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::MissingReference { kind: RecordKind::Object, .. })
        ));
        drop(migrator);
        assert!(destination.file_batches.is_empty());
        Ok(())
    }

    #[test]
    fn strict_policy_aborts_on_unmapped_institution() -> Result<()> {
        let source = fixture_source()?;
        let mut destination = RecordingDestination::default();
        let mut migrator = Migrator::new(&source, &mut destination, MigrateConfig::default());

        let err = migrator.import_object(&parent(&source, 0)?).err();
        assert!(err.is_some());
        assert_eq!(migrator.summary().objects, 0);
        Ok(())
    }

    #[test]
    fn lenient_policy_writes_null_institution_and_guesses_name() -> Result<()> {
        let source = fixture_source()?;
        let mut destination = RecordingDestination::default();
        let config = MigrateConfig {
            reference_policy: ReferencePolicy::Lenient,
            ..MigrateConfig::default()
        };
        let mut migrator = Migrator::new(&source, &mut destination, config);

        migrator.import_object(&parent(&source, 1)?)?;
        drop(migrator);

        let (institution, object) = &destination.objects[0];
        assert_eq!(institution, "test.edu");
        assert_eq!(object.institution_id, None);
        Ok(())
    }

    #[test]
    fn api_sized_batches_split_files_in_order() -> Result<()> {
        let source = fixture_source()?;
        let mut destination = RecordingDestination::default();
        let config = MigrateConfig { file_batch_size: Some(2), ..MigrateConfig::default() };
        let mut migrator = Migrator::new(&source, &mut destination, config);
        migrator.import_institutions()?;
        migrator.import_object(&parent(&source, 0)?)?;
        let summary = migrator.summary().clone();
        drop(migrator);

        let sizes = destination.file_batches.iter().map(Vec::len).collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);
        let identifiers = destination
            .file_batches
            .iter()
            .flatten()
            .map(|bundle| bundle.file.identifier.as_str())
            .collect::<Vec<_>>();
        assert_eq!(identifiers[0], "test.edu/photos/data/0.jpg");
        assert_eq!(identifiers[4], "test.edu/photos/data/4.jpg");
        assert_eq!(summary.files, 5);
        assert_eq!(summary.checksums, 1);
        assert_eq!(summary.events, 2);
        Ok(())
    }

    #[test]
    fn events_are_translated_and_linked() -> Result<()> {
        let source = fixture_source()?;
        let mut destination = RecordingDestination::default();
        let mut migrator = Migrator::new(&source, &mut destination, MigrateConfig::default());
        migrator.import_institutions()?;
        let object_id = migrator.import_object(&parent(&source, 0)?)?;
        drop(migrator);

        let object_event = &destination.events[0];
        assert_eq!(object_event.event_type, "replication");
        assert_eq!(object_event.outcome.as_deref(), Some("Success"));
        assert_eq!(object_event.intellectual_object_id, Some(object_id));
        assert_eq!(object_event.institution_id, Some(NewId(1)));

        let file_event = &destination.file_batches[0][0].events[0];
        assert_eq!(file_event.event_type, "fixity check");
        assert_eq!(file_event.intellectual_object_identifier, "test.edu/photos");
        Ok(())
    }

    #[test]
    fn unknown_event_type_aborts_the_object() -> Result<()> {
        let source = fixture_source()?;
        source.connection().execute(
            "INSERT INTO premis_events_solr(intellectual_object_id, identifier, event_type)
             VALUES ('aptrust-test:20', 'e-odd', 'virus_scan')",
            [],
        )?;
        let mut destination = RecordingDestination::default();
        let mut migrator = Migrator::new(&source, &mut destination, MigrateConfig::default());
        migrator.import_institutions()?;

        let err = migrator.import_object(&parent(&source, 1)?).err();
        let err = err.unwrap_or_else(|| panic!("unknown event type must abort"));
        assert!(matches!(
            err.downcast_ref::<MigrateError>(),
            Some(MigrateError::UnknownEventType { event_type, .. }) if event_type == "virus_scan"
        ));
        Ok(())
    }

    #[test]
    fn limit_and_offset_bound_objects_and_work_items() -> Result<()> {
        let source = fixture_source()?;
        for id in 1..=4 {
            source.connection().execute(
                "INSERT INTO processed_items(id, name, bucket, status, state)
                 VALUES (?1, ?2, 'aptrust.receiving.test.test.edu', 'pending', ?3)",
                params![id, format!("bag{id}.tar"), if id == 3 { "{\"ok\":true}" } else { "" }],
            )?;
        }
        let mut destination = RecordingDestination::default();
        let config = MigrateConfig {
            limit: Some(2),
            offset: 1,
            work_item_page_size: 1,
            ..MigrateConfig::default()
        };
        let summary = Migrator::new(&source, &mut destination, config).run()?;

        assert_eq!(summary.objects, 1);
        assert_eq!(destination.objects[0].1.identifier, "test.edu/audio");
        let names = destination
            .work_items
            .iter()
            .filter_map(|item| item.name.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["bag2.tar", "bag3.tar"]);
        assert_eq!(destination.states.len(), 1);
        assert_eq!(destination.work_items[0].status.as_deref(), Some("Pending"));
        assert_eq!(destination.work_items[0].institution_id, Some(NewId(1)));
        Ok(())
    }

    #[test]
    fn work_items_resolve_parents_by_name() -> Result<()> {
        let source = fixture_source()?;
        source.connection().execute(
            "INSERT INTO processed_items(id, name, object_identifier, generic_file_identifier,
                status)
             VALUES (1, 'photos.tar', 'test.edu/photos', 'test.edu/photos/data/missing.jpg',
                     'success')",
            [],
        )?;
        let mut destination = RecordingDestination::default();
        let summary = Migrator::new(&source, &mut destination, MigrateConfig::default()).run()?;

        let item = &destination.work_items[0];
        assert!(item.intellectual_object_id.is_some());
        assert_eq!(item.generic_file_id, None);
        assert_eq!(item.institution_id, Some(NewId(1)));
        assert_eq!(summary.work_item_states, 0);
        Ok(())
    }

    #[test]
    fn blank_reset_tokens_are_regenerated() -> Result<()> {
        let source = fixture_source()?;
        source.connection().execute(
            "INSERT INTO users(name, email, reset_password_token, institution_pid)
             VALUES ('Ada', 'ada@test.edu', '', 'aptrust-test:1')",
            [],
        )?;
        let mut destination = RecordingDestination::default();
        let mut migrator = Migrator::new(&source, &mut destination, MigrateConfig::default());
        migrator.import_institutions()?;
        migrator.import_users()?;
        drop(migrator);

        let user = &destination.users[0];
        assert_eq!(user.reset_password_token.len(), RESET_TOKEN_BYTES * 2);
        assert!(user.reset_password_token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(user.institution_id, Some(NewId(1)));
        Ok(())
    }

    #[test]
    fn failed_file_batch_stops_the_object_and_keeps_partial_counts() -> Result<()> {
        let source = fixture_source()?;
        let mut destination =
            RecordingDestination { fail_file_batch: Some(1), ..Default::default() };
        let config = MigrateConfig { file_batch_size: Some(2), ..MigrateConfig::default() };
        let mut migrator = Migrator::new(&source, &mut destination, config);
        migrator.import_institutions()?;

        let err = migrator.import_objects().err();
        let err = err.unwrap_or_else(|| panic!("a refused file batch must stop the import"));
        let message = format!("{err:#}");
        assert!(message.contains("error saving 2 files of test.edu/photos"), "{message}");
        assert!(message.contains("destination refused file batch 1"), "{message}");

        let summary = migrator.summary().clone();
        assert_eq!((summary.objects, summary.files, summary.checksums), (1, 2, 1));
        assert!(summary.finished_at.is_empty());
        assert!(migrator.context().ids().get("aptrust-test:100").is_some());
        assert_eq!(migrator.context().ids().get("aptrust-test:120"), None);
        drop(migrator);

        assert_eq!(destination.file_batches.len(), 1);
        let written = destination
            .objects
            .iter()
            .map(|(_, object)| object.identifier.as_str())
            .collect::<Vec<_>>();
        assert_eq!(written, vec!["test.edu/photos"]);
        Ok(())
    }

    #[test]
    fn failed_file_batch_aborts_the_run_before_work_items() -> Result<()> {
        let source = fixture_source()?;
        source.connection().execute(
            "INSERT INTO processed_items(id, name, object_identifier, status)
             VALUES (1, 'photos.tar', 'test.edu/photos', 'success')",
            [],
        )?;
        let mut destination =
            RecordingDestination { fail_file_batch: Some(0), ..Default::default() };
        let err = Migrator::new(&source, &mut destination, MigrateConfig::default()).run().err();

        assert!(err.is_some());
        assert_eq!(destination.objects.len(), 1);
        assert!(destination.file_batches.is_empty());
        assert!(destination.work_items.is_empty());
        Ok(())
    }

    #[test]
    fn reused_bag_identifier_links_work_items_to_the_newer_object() -> Result<()> {
        let source = fixture_source()?;
        let conn = source.connection();
        conn.execute(
            "INSERT INTO intellectual_objects(id, identifier, access, institution_id, state)
             VALUES ('aptrust-test:30', 'test.edu/audio', 'institution', 'aptrust-test:1', 'A')",
            [],
        )?;
        conn.execute(
            "INSERT INTO processed_items(id, name, object_identifier, status)
             VALUES (1, 'audio.tar', 'test.edu/audio', 'success')",
            [],
        )?;
        let mut destination = RecordingDestination::default();
        let summary = Migrator::new(&source, &mut destination, MigrateConfig::default()).run()?;

        assert_eq!(summary.objects, 3);
        let audio = destination
            .objects
            .iter()
            .filter(|(_, object)| object.identifier == "test.edu/audio")
            .count();
        assert_eq!(audio, 2);
        // Ids: institution 1, photos 2, five files 3..=7, first audio 8, second audio 9.
        assert_eq!(destination.work_items[0].intellectual_object_id, Some(NewId(9)));
        Ok(())
    }
}
