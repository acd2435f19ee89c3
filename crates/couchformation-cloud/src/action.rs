//! Outcome types for reconciliation passes

use crate::resource::ResourceKind;
use serde::{Deserialize, Serialize};

/// Observed state of one resource slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// No reference in the document
    Unknown,
    /// A reference exists but has not been checked.
    ///
    /// Transient: `Reconciler::observe` checks every recorded reference
    /// against the provider straight away, so an observation reports
    /// `Verified` or `Stale` instead. The state names the point right after
    /// a create or adopt writes the reference.
    Recorded,
    /// The referenced resource is live
    Verified,
    /// The referenced resource no longer exists
    Stale,
    /// No reference, but a live resource matches the naming convention
    Orphaned,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceState::Unknown => write!(f, "unknown"),
            ResourceState::Recorded => write!(f, "recorded"),
            ResourceState::Verified => write!(f, "verified"),
            ResourceState::Stale => write!(f, "stale"),
            ResourceState::Orphaned => write!(f, "orphaned"),
        }
    }
}

/// What the reconciler did to a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Unknown -> Recorded via `create`
    Created,
    /// Orphaned -> Recorded without `create`
    Adopted,
    /// Recorded -> Verified, nothing changed
    Verified,
    /// Stale reference dropped
    Evicted,
    /// Destroy path: resource deleted and reference dropped
    Deleted,
    /// Destroy path: nothing was recorded
    Absent,
}

impl std::fmt::Display for TransitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionType::Created => write!(f, "created"),
            TransitionType::Adopted => write!(f, "adopted"),
            TransitionType::Verified => write!(f, "verified"),
            TransitionType::Evicted => write!(f, "evicted"),
            TransitionType::Deleted => write!(f, "deleted"),
            TransitionType::Absent => write!(f, "absent"),
        }
    }
}

/// One applied transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub transition_type: TransitionType,
    pub kind: ResourceKind,

    /// Resource name
    pub name: String,

    /// Document location of the reference
    pub reference: String,

    /// Provider id involved, if any
    pub id: Option<String>,
}

impl Transition {
    pub fn new(
        transition_type: TransitionType,
        kind: ResourceKind,
        name: impl Into<String>,
        reference: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        Self {
            transition_type,
            kind,
            name: name.into(),
            reference: reference.into(),
            id,
        }
    }

    /// Whether this transition leaves a live, recorded resource
    pub fn is_live(&self) -> bool {
        matches!(
            self.transition_type,
            TransitionType::Created | TransitionType::Adopted | TransitionType::Verified
        )
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.transition_type, self.kind, self.name)?;
        if let Some(id) = &self.id {
            write!(f, " ({})", id)?;
        }
        Ok(())
    }
}

/// Ordered record of a reconciliation or teardown pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub transitions: Vec<Transition>,
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn extend(&mut self, other: ReconcileReport) {
        self.transitions.extend(other.transitions);
    }

    /// Transitions of a given type
    pub fn by_type(&self, transition_type: TransitionType) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.transition_type == transition_type)
            .collect()
    }

    /// Whether anything was created, adopted, evicted or deleted
    pub fn has_changes(&self) -> bool {
        self.transitions.iter().any(|t| {
            !matches!(
                t.transition_type,
                TransitionType::Verified | TransitionType::Absent
            )
        })
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            created: self.by_type(TransitionType::Created).len(),
            adopted: self.by_type(TransitionType::Adopted).len(),
            evicted: self.by_type(TransitionType::Evicted).len(),
            verified: self.by_type(TransitionType::Verified).len(),
            deleted: self.by_type(TransitionType::Deleted).len(),
        }
    }
}

/// Counts per transition type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub created: usize,
    pub adopted: usize,
    pub evicted: usize,
    pub verified: usize,
    pub deleted: usize,
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} adopted, {} evicted, {} verified, {} deleted",
            self.created, self.adopted, self.evicted, self.verified, self.deleted
        )
    }
}
