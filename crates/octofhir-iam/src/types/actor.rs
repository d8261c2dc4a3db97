//! Actor identities.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Kind of actor requesting access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A person (clinician, administrator, patient).
    Human,
    /// An AI or automation agent.
    Agent,
    /// An internal system component.
    System,
    /// An organization acting as a whole.
    Organization,
}

/// A verified actor known to the directory.
///
/// Actors are never physically deleted; deactivation flips `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    /// Unique actor identifier. Generated on registration when empty.
    pub actor_id: String,

    /// Kind of actor.
    pub actor_type: ActorType,

    /// Display name.
    pub name: String,

    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Department within the organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    /// Professional license number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,

    /// Role names used for matrix lookups.
    #[serde(default)]
    pub credentials: Vec<String>,

    /// Whether the actor may currently be granted access.
    pub active: bool,

    /// When the actor was registered.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the actor was last modified.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ActorIdentity {
    /// Creates an active actor with no credentials.
    #[must_use]
    pub fn new(actor_id: impl Into<String>, actor_type: ActorType, name: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            actor_id: actor_id.into(),
            actor_type,
            name: name.into(),
            organization_id: None,
            department: None,
            license_number: None,
            credentials: Vec::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a human actor.
    #[must_use]
    pub fn human(actor_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(actor_id, ActorType::Human, name)
    }

    /// Creates an agent actor.
    #[must_use]
    pub fn agent(actor_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(actor_id, ActorType::Agent, name)
    }

    /// Adds a role credential.
    #[must_use]
    pub fn with_credential(mut self, role: impl Into<String>) -> Self {
        self.credentials.push(role.into());
        self
    }

    /// Sets the organization.
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Sets the department.
    #[must_use]
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// Sets the license number.
    #[must_use]
    pub fn with_license(mut self, license_number: impl Into<String>) -> Self {
        self.license_number = Some(license_number.into());
        self
    }

    /// Marks the actor inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Returns `true` if the actor holds the role.
    #[must_use]
    pub fn has_credential(&self, role: &str) -> bool {
        self.credentials.iter().any(|c| c == role)
    }
}
