use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One trigger for re-analysis: the files that changed and the files that
/// were deleted since the previous request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    #[serde(default)]
    pub changed_files: BTreeSet<PathBuf>,
    #[serde(default)]
    pub deleted_files: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn new<C, D>(changed: C, deleted: D) -> Self
    where
        C: IntoIterator,
        C::Item: Into<PathBuf>,
        D: IntoIterator,
        D::Item: Into<PathBuf>,
    {
        Self {
            changed_files: changed.into_iter().map(Into::into).collect(),
            deleted_files: deleted.into_iter().map(Into::into).collect(),
        }
    }

    /// The change set used for a full, from-scratch run.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty() && self.deleted_files.is_empty()
    }

    /// Applies `later` on top of `self`. The later change wins when a file
    /// appears in both sets.
    pub fn merge(mut self, later: ChangeSet) -> Self {
        for file in later.changed_files {
            self.deleted_files.remove(&file);
            self.changed_files.insert(file);
        }
        for file in later.deleted_files {
            self.changed_files.remove(&file);
            self.deleted_files.insert(file);
        }
        self
    }

    /// Folds change sets in arrival order.
    pub fn aggregate<I>(changes: I) -> Self
    where
        I: IntoIterator<Item = ChangeSet>,
    {
        changes.into_iter().fold(ChangeSet::empty(), ChangeSet::merge)
    }
}
