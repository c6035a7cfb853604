use crate::data::{
    ContentProvider, DriftDirection, DriftEntry, DriftPrecedence, DriftSnapshot, FlowMapping,
    ProjectUnit, SyncScore,
};
use crate::mapping_store::MappingStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of checking one unit
#[derive(Debug)]
enum UnitCheck {
    Pending,
    InSync,
    /// The spec could not be hashed; neither stale nor confirmed
    Indeterminate,
    Drifted(DriftEntry),
}

/// Compares recorded hashes with current file content
pub struct DriftDetector {
    provider: Arc<dyn ContentProvider>,
    precedence: DriftPrecedence,
}

impl DriftDetector {
    pub fn new(provider: Arc<dyn ContentProvider>, precedence: DriftPrecedence) -> Self {
        Self {
            provider,
            precedence,
        }
    }

    /// Check every project unit and return the drift list together with the
    /// score computed from it
    pub fn detect(&self, units: &[ProjectUnit], store: &MappingStore) -> DriftSnapshot {
        let detected_at = chrono::Utc::now().to_rfc3339();
        let mut entries = Vec::new();
        let mut indeterminate = Vec::new();
        let mut recorded = 0;

        for unit in units {
            let key = unit.key.to_string();
            match self.check_unit(unit, &key, store.get(&key), &detected_at) {
                UnitCheck::Pending => {}
                UnitCheck::InSync => recorded += 1,
                UnitCheck::Indeterminate => {
                    recorded += 1;
                    indeterminate.push(key);
                }
                UnitCheck::Drifted(entry) => {
                    recorded += 1;
                    debug!(
                        flow = %entry.flow_key,
                        direction = ?entry.direction,
                        path = %entry.changed_path,
                        "Drift detected"
                    );
                    entries.push(entry);
                }
            }
        }

        let score = SyncScore::compute(units.len(), recorded, entries.len());
        info!(
            total = score.total,
            implemented = score.implemented,
            stale = score.stale,
            pending = score.pending,
            score = score.score,
            "Drift detection complete"
        );

        DriftSnapshot {
            entries,
            score,
            indeterminate,
        }
    }

    fn check_unit(
        &self,
        unit: &ProjectUnit,
        key: &str,
        mapping: Option<&FlowMapping>,
        detected_at: &str,
    ) -> UnitCheck {
        let Some(mapping) = mapping else {
            return UnitCheck::Pending;
        };

        let current_spec_hash = match self.provider.hash(&mapping.spec_path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(flow = key, error = %e, "Spec unreadable; skipping flow this pass");
                return UnitCheck::Indeterminate;
            }
        };

        let entry = |direction, changed_path: &str, previous: &str, current: String| DriftEntry {
            flow_key: key.to_string(),
            flow_name: unit.name.clone(),
            domain_id: unit.key.domain_id.clone(),
            spec_path: mapping.spec_path.clone(),
            changed_path: changed_path.to_string(),
            previous_hash: previous.to_string(),
            current_hash: current,
            implemented_at: mapping.implemented_at.clone(),
            detected_at: detected_at.to_string(),
            direction,
        };

        let forward = (current_spec_hash != mapping.spec_hash).then(|| {
            entry(
                DriftDirection::Forward,
                &mapping.spec_path,
                &mapping.spec_hash,
                current_spec_hash,
            )
        });

        match self.precedence {
            DriftPrecedence::ForwardFirst => {
                if let Some(forward) = forward {
                    return UnitCheck::Drifted(forward);
                }
                match self.first_changed_file(key, mapping) {
                    Some((path, stored, current)) => {
                        UnitCheck::Drifted(entry(DriftDirection::Reverse, path, stored, current))
                    }
                    None => UnitCheck::InSync,
                }
            }
            DriftPrecedence::ReverseFirst => {
                if let Some((path, stored, current)) = self.first_changed_file(key, mapping) {
                    return UnitCheck::Drifted(entry(
                        DriftDirection::Reverse,
                        path,
                        stored,
                        current,
                    ));
                }
                match forward {
                    Some(forward) => UnitCheck::Drifted(forward),
                    None => UnitCheck::InSync,
                }
            }
        }
    }

    /// First implementation file, in recording order, whose content no longer
    /// matches its stored hash. Files that cannot be hashed are skipped.
    fn first_changed_file<'m>(
        &self,
        key: &str,
        mapping: &'m FlowMapping,
    ) -> Option<(&'m str, &'m str, String)> {
        for (path, stored) in mapping.tracked_files() {
            match self.provider.hash(path) {
                Ok(current) if current != stored => return Some((path, stored, current)),
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        flow = key,
                        file = path,
                        error = %e,
                        "Implementation file unreadable; skipped"
                    );
                }
            }
        }
        None
    }
}
