use serde::{Deserialize, Serialize};

/// Repository-wide settings stored at the head of `.sos/.meta`
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct RepoFlags {
    /// Current branch number
    pub branch: Option<u32>,
    #[serde(default)]
    pub track: bool,
    #[serde(default)]
    pub picky: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub compress: bool,
}

impl RepoFlags {
    /// True in track or picky mode; simple mode versions the whole tree
    pub fn is_tracking(&self) -> bool {
        self.track || self.picky
    }
}

/// One line of revisions
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub number: u32,
    /// Creation time in milliseconds since the epoch
    pub ctime: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// False once the branch holds changes the real VCS has not seen
    pub insync: bool,
    /// Tracked glob patterns relative to the repository root
    #[serde(default)]
    pub tracked: Vec<String>,
}

impl BranchInfo {
    /// Name if set, else the number
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("'{}'", name),
            None => format!("b{}", self.number),
        }
    }

    pub fn with_insync(&self, insync: bool) -> Self {
        Self {
            insync,
            ..self.clone()
        }
    }

    pub fn with_tracked(&self, tracked: Vec<String>) -> Self {
        Self {
            tracked,
            ..self.clone()
        }
    }
}

/// One committed revision of a branch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub number: u32,
    /// Commit time in milliseconds since the epoch
    pub ctime: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Layout of `.sos/.meta`: `[flags, [branch...]]`
pub type BranchesDocument = (RepoFlags, Vec<BranchInfo>);
