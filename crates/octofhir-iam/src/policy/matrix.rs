//! Published permission matrices.
//!
//! The set of matrices sits behind an `ArcSwap`, so decisions read a
//! consistent snapshot with a single atomic load and never block on a
//! publish. Publishing builds a new set and swaps it in; writers serialize
//! on a small mutex so version checks and swaps cannot interleave.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use crate::error::require_id;
use crate::policy::matcher::category_matches;
use crate::types::{AccessLevel, PermissionMatrix};
use crate::{IamError, IamResult};

/// Matrix entry that granted a role-based check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    /// Granting matrix.
    pub matrix_id: String,
    /// Matrix version at decision time.
    pub matrix_version: u32,
    /// Credential that matched.
    pub role: String,
    /// Level the role holds.
    pub access_level: AccessLevel,
    /// `true` if the grant came from the category table.
    pub via_category: bool,
    /// The matrix's required compliance rules.
    pub compliance_rules: Vec<String>,
}

#[derive(Debug, Default)]
struct MatrixSet {
    matrices: BTreeMap<String, Arc<PermissionMatrix>>,
}

impl MatrixSet {
    fn active(&self) -> impl Iterator<Item = &Arc<PermissionMatrix>> {
        self.matrices.values().filter(|m| m.active)
    }
}

/// Registry of role-based permission matrices.
pub struct PermissionMatrixEngine {
    current: ArcSwap<MatrixSet>,
    publish_lock: Mutex<()>,
}

impl Default for PermissionMatrixEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PermissionMatrixEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionMatrixEngine")
            .field("matrices", &self.current.load().matrices.len())
            .finish()
    }
}

impl PermissionMatrixEngine {
    /// Creates an engine with no matrices.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(MatrixSet::default()),
            publish_lock: Mutex::new(()),
        }
    }

    /// Publishes a matrix.
    ///
    /// A matrix ID that is already published may only be replaced by a
    /// strictly greater version.
    ///
    /// # Errors
    ///
    /// Returns `IamError::InvalidInput` for an empty ID or a version that
    /// does not advance.
    pub fn publish(&self, matrix: PermissionMatrix) -> IamResult<()> {
        require_id("matrix_id", &matrix.matrix_id)?;

        let _guard = self.publish_lock.lock();
        let current = self.current.load_full();
        if let Some(existing) = current.matrices.get(&matrix.matrix_id)
            && matrix.version <= existing.version
        {
            return Err(IamError::invalid_input(format!(
                "matrix '{}' version {} does not supersede published version {}",
                matrix.matrix_id, matrix.version, existing.version
            )));
        }

        info!(
            matrix_id = %matrix.matrix_id,
            version = matrix.version,
            domain = %matrix.domain,
            roles = matrix.role_permissions.len(),
            "Permission matrix published"
        );

        let mut matrices = current.matrices.clone();
        matrices.insert(matrix.matrix_id.clone(), Arc::new(matrix));
        self.current.store(Arc::new(MatrixSet { matrices }));
        Ok(())
    }

    /// Deactivates a matrix. It stays queryable but no longer grants.
    ///
    /// # Errors
    ///
    /// Returns `IamError::MatrixNotFound` if the ID is unknown.
    pub fn retire(&self, matrix_id: &str) -> IamResult<()> {
        let _guard = self.publish_lock.lock();
        let current = self.current.load_full();
        let existing = current
            .matrices
            .get(matrix_id)
            .ok_or_else(|| IamError::matrix_not_found(matrix_id))?;

        let mut retired = PermissionMatrix::clone(existing);
        retired.active = false;

        let mut matrices = current.matrices.clone();
        matrices.insert(matrix_id.to_string(), Arc::new(retired));
        self.current.store(Arc::new(MatrixSet { matrices }));

        info!(matrix_id = %matrix_id, "Permission matrix retired");
        Ok(())
    }

    /// Returns the published matrix.
    #[must_use]
    pub fn get(&self, matrix_id: &str) -> Option<Arc<PermissionMatrix>> {
        self.current.load().matrices.get(matrix_id).cloned()
    }

    /// Snapshot of the active matrices.
    #[must_use]
    pub fn active(&self) -> Vec<Arc<PermissionMatrix>> {
        self.current.load().active().cloned().collect()
    }

    /// Finds an active matrix entry granting `required` on `resource_id` to
    /// one of `credentials`.
    ///
    /// Role patterns are checked first, then the category table.
    #[must_use]
    pub fn role_grant(
        &self,
        credentials: &[String],
        resource_id: &str,
        required: AccessLevel,
    ) -> Option<RoleGrant> {
        let set = self.current.load();
        for matrix in set.active() {
            for role in credentials {
                if let Some(level) = matrix.role_level(role, resource_id)
                    && level.satisfies(required)
                {
                    return Some(RoleGrant {
                        matrix_id: matrix.matrix_id.clone(),
                        matrix_version: matrix.version,
                        role: role.clone(),
                        access_level: level,
                        via_category: false,
                        compliance_rules: matrix.required_compliance.clone(),
                    });
                }
            }
        }

        for matrix in set.active() {
            let categories = matrix
                .resource_access_patterns
                .keys()
                .filter(|category| category_matches(category, resource_id));
            for category in categories {
                for role in credentials {
                    if let Some(level) = matrix.category_level(category, role)
                        && level.satisfies(required)
                    {
                        return Some(RoleGrant {
                            matrix_id: matrix.matrix_id.clone(),
                            matrix_version: matrix.version,
                            role: role.clone(),
                            access_level: level,
                            via_category: true,
                            compliance_rules: matrix.required_compliance.clone(),
                        });
                    }
                }
            }
        }
        None
    }

    /// Returns the first (matrix, role) allowing break-glass access.
    #[must_use]
    pub fn emergency_role(&self, credentials: &[String]) -> Option<(String, String)> {
        let set = self.current.load();
        set.active().find_map(|matrix| {
            credentials
                .iter()
                .find(|role| matrix.allows_emergency(role))
                .map(|role| (matrix.matrix_id.clone(), role.clone()))
        })
    }

    /// Returns `true` if any credential needs supervision in an active matrix.
    #[must_use]
    pub fn requires_supervision(&self, credentials: &[String]) -> bool {
        let set = self.current.load();
        set.active().any(|matrix| {
            credentials
                .iter()
                .any(|role| !matrix.supervisors_for(role).is_empty())
        })
    }

    /// Returns `true` if `supervisor` may supervise `supervisee`.
    ///
    /// When the supervisee's roles name their supervisors, the supervisor
    /// must hold one of those roles. Otherwise any role that supervises
    /// something in an active matrix qualifies.
    #[must_use]
    pub fn can_supervise(&self, supervisor: &[String], supervisee: &[String]) -> bool {
        let set = self.current.load();
        let mut named = false;
        for matrix in set.active() {
            for role in supervisee {
                let supervisors = matrix.supervisors_for(role);
                if supervisors.is_empty() {
                    continue;
                }
                named = true;
                if supervisors.iter().any(|s| supervisor.contains(s)) {
                    return true;
                }
            }
        }
        if named {
            return false;
        }
        set.active().any(|matrix| {
            matrix
                .supervision_matrix
                .values()
                .flatten()
                .any(|s| supervisor.contains(s))
        })
    }

    /// Number of published matrices (active or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().matrices.len()
    }

    /// Returns `true` if nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(r: &[&str]) -> Vec<String> {
        r.iter().map(|s| s.to_string()).collect()
    }

    fn clinical(version: u32) -> PermissionMatrix {
        PermissionMatrix::new("clinical", "Clinical", version, "clinical")
            .with_role_permission("nurse", "observation", AccessLevel::Write)
            .with_role_permission("physician", "*", AccessLevel::Delete)
            .with_category_access("lab", "nurse", AccessLevel::Read)
            .with_emergency_role("physician")
            .with_supervision("resident", ["physician"])
    }

    #[test]
    fn test_role_grant() {
        let engine = PermissionMatrixEngine::new();
        engine.publish(clinical(1)).unwrap();

        let grant = engine
            .role_grant(&roles(&["nurse"]), "observation-42", AccessLevel::Write)
            .unwrap();
        assert_eq!(grant.matrix_id, "clinical");
        assert_eq!(grant.role, "nurse");
        assert!(!grant.via_category);

        assert!(engine
            .role_grant(&roles(&["nurse"]), "observation-42", AccessLevel::Delete)
            .is_none());
        assert!(engine
            .role_grant(&roles(&["clerk"]), "observation-42", AccessLevel::Read)
            .is_none());

        let lab = engine
            .role_grant(&roles(&["nurse"]), "lab-cbc-1", AccessLevel::Read)
            .unwrap();
        assert!(lab.via_category);
        assert!(grant.compliance_rules.is_empty());
    }

    #[test]
    fn test_role_grant_respects_segment_boundaries() {
        let engine = PermissionMatrixEngine::new();
        engine
            .publish(
                PermissionMatrix::new("care", "Care", 1, "clinical")
                    .with_role_permission("carer", "patient:1", AccessLevel::Write)
                    .with_category_access("lab", "carer", AccessLevel::Read)
                    .with_required_compliance("minimum_necessary"),
            )
            .unwrap();
        let carer = roles(&["carer"]);

        let exact = engine
            .role_grant(&carer, "patient:1", AccessLevel::Write)
            .unwrap();
        assert_eq!(exact.compliance_rules, vec!["minimum_necessary".to_string()]);
        assert!(engine.role_grant(&carer, "patient:1/notes", AccessLevel::Write).is_some());
        assert!(engine.role_grant(&carer, "patient:10", AccessLevel::Write).is_none());
        assert!(engine.role_grant(&carer, "patient:1999", AccessLevel::Read).is_none());

        assert!(engine.role_grant(&carer, "lab:cbc", AccessLevel::Read).is_some());
        assert!(engine.role_grant(&carer, "laboratory-7", AccessLevel::Read).is_none());
    }

    #[test]
    fn test_version_must_advance() {
        let engine = PermissionMatrixEngine::new();
        engine.publish(clinical(2)).unwrap();
        assert!(matches!(
            engine.publish(clinical(2)),
            Err(IamError::InvalidInput { .. })
        ));
        assert!(engine.publish(clinical(1)).is_err());
        engine.publish(clinical(3)).unwrap();
        assert_eq!(engine.get("clinical").unwrap().version, 3);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_retired_matrix_does_not_grant() {
        let engine = PermissionMatrixEngine::new();
        engine.publish(clinical(1)).unwrap();
        engine.retire("clinical").unwrap();

        assert!(engine
            .role_grant(&roles(&["physician"]), "patient:1", AccessLevel::Read)
            .is_none());
        assert!(engine.emergency_role(&roles(&["physician"])).is_none());
        assert!(engine.active().is_empty());
        assert!(!engine.get("clinical").unwrap().active);
        assert!(matches!(
            engine.retire("missing"),
            Err(IamError::MatrixNotFound { .. })
        ));
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let engine = PermissionMatrixEngine::new();
        engine.publish(clinical(1)).unwrap();
        let before = engine.get("clinical").unwrap();
        engine.publish(clinical(2)).unwrap();
        assert_eq!(before.version, 1);
        assert_eq!(engine.get("clinical").unwrap().version, 2);
    }

    #[test]
    fn test_emergency_and_supervision() {
        let engine = PermissionMatrixEngine::new();
        engine.publish(clinical(1)).unwrap();

        assert_eq!(
            engine.emergency_role(&roles(&["nurse", "physician"])),
            Some(("clinical".to_string(), "physician".to_string()))
        );
        assert!(engine.emergency_role(&roles(&["nurse"])).is_none());

        assert!(engine.requires_supervision(&roles(&["resident"])));
        assert!(!engine.requires_supervision(&roles(&["nurse"])));

        assert!(engine.can_supervise(&roles(&["physician"]), &roles(&["resident"])));
        assert!(!engine.can_supervise(&roles(&["nurse"]), &roles(&["resident"])));
        // unsupervised grantee: any supervising role qualifies
        assert!(engine.can_supervise(&roles(&["physician"]), &roles(&["nurse"])));
        assert!(!engine.can_supervise(&roles(&["clerk"]), &roles(&["nurse"])));
    }
}
