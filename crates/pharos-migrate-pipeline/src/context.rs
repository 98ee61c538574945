use pharos_migrate_core::{IdentifierMap, MigrateError, NewId, RecordKind, ResolvedInstitution};
use tracing::warn;

use crate::config::ReferencePolicy;

/// State threaded through every phase of one run: the identifier map and
/// the policy for references that cannot be resolved.
#[derive(Debug, Clone, Default)]
pub struct MigrationContext {
    ids: IdentifierMap,
    policy: ReferencePolicy,
}

impl MigrationContext {
    #[must_use]
    pub fn new(policy: ReferencePolicy) -> Self {
        Self { ids: IdentifierMap::new(), policy }
    }

    #[must_use]
    pub fn ids(&self) -> &IdentifierMap {
        &self.ids
    }

    /// # Errors
    /// Returns an error when the institution conflicts with an earlier mapping.
    pub fn record_institution(
        &mut self,
        institution: &ResolvedInstitution,
    ) -> Result<(), MigrateError> {
        self.record(&institution.old_id, &institution.identifier, institution.new_id)?;
        self.ids.put_display_name(&institution.old_id, &institution.identifier)
    }

    /// Map a written record by legacy pid and by its textual identifier.
    /// A reused identifier moves to the newer record.
    ///
    /// # Errors
    /// Returns an error when the pid is already mapped to another id.
    pub fn record(&mut self, old_id: &str, name: &str, new_id: NewId) -> Result<(), MigrateError> {
        self.ids.put(old_id, new_id)?;
        if let Some(previous) = self.ids.put_by_name(name, new_id) {
            warn!(
                name,
                old_id,
                %previous,
                %new_id,
                "identifier reused; name now resolves to the newer record"
            );
        }
        Ok(())
    }

    /// Resolve a foreign key under the run's [`ReferencePolicy`]. Absent or
    /// blank pids are not references and resolve to `None`.
    ///
    /// # Errors
    /// Returns [`MigrateError::MissingReference`] for an unmapped pid under
    /// [`ReferencePolicy::Strict`].
    pub fn resolve(
        &self,
        kind: RecordKind,
        old_id: Option<&str>,
    ) -> Result<Option<NewId>, MigrateError> {
        match old_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(old_id) => self.resolve_required(kind, old_id),
            None => Ok(None),
        }
    }

    /// Like [`Self::resolve`], but a blank pid counts as unmapped.
    ///
    /// # Errors
    /// Returns [`MigrateError::MissingReference`] for a blank or unmapped
    /// pid under [`ReferencePolicy::Strict`].
    pub fn resolve_required(
        &self,
        kind: RecordKind,
        old_id: &str,
    ) -> Result<Option<NewId>, MigrateError> {
        let old_id = old_id.trim();
        match (self.ids.get(old_id), self.policy) {
            (Some(new_id), _) => Ok(Some(new_id)),
            (None, ReferencePolicy::Strict) => Err(MigrateError::MissingReference {
                kind,
                old_id: old_id.to_string(),
            }),
            (None, ReferencePolicy::Lenient) => {
                warn!(%kind, old_id, "writing null reference for unmapped legacy id");
                Ok(None)
            }
        }
    }

    /// Lookup that never fails, for references the legacy data routinely
    /// leaves dangling.
    #[must_use]
    pub fn lookup(&self, old_id: Option<&str>) -> Option<NewId> {
        old_id.map(str::trim).and_then(|id| self.ids.get(id))
    }

    #[must_use]
    pub fn lookup_name(&self, name: Option<&str>) -> Option<NewId> {
        name.and_then(|name| self.ids.get_by_name(name))
    }

    #[must_use]
    pub fn institution_name(&self, old_id: &str) -> Option<&str> {
        self.ids.display_name(old_id)
    }
}
