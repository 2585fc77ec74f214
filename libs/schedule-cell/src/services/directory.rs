use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::{Branch, DentistAssignment};

use crate::models::ScheduleError;

/// Source of branches and their operating hours.
#[async_trait]
pub trait BranchDirectory: Send + Sync {
    async fn list_branches(&self) -> Result<Vec<Branch>, ScheduleError>;

    async fn get_branch(&self, branch_id: &str) -> Result<Option<Branch>, ScheduleError>;
}

/// Source of the dentists currently assigned to a branch.
#[async_trait]
pub trait DentistRoster: Send + Sync {
    async fn list_dentists_for_branch(&self, branch_id: &str) -> Result<Vec<Uuid>, ScheduleError>;
}

// ==============================================================================
// STATIC DIRECTORY (seed file / tests)
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub dentists: Vec<DentistAssignment>,
}

/// In-process branch directory and roster.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    branches: RwLock<Vec<Branch>>,
    dentists: RwLock<Vec<DentistAssignment>>,
}

impl StaticDirectory {
    pub fn new(branches: Vec<Branch>) -> Self {
        Self {
            branches: RwLock::new(branches),
            dentists: RwLock::new(Vec::new()),
        }
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        Self {
            branches: RwLock::new(seed.branches),
            dentists: RwLock::new(seed.dentists),
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading branch seed file {}", path.display()))?;
        let seed: DirectorySeed = serde_json::from_str(&raw)
            .with_context(|| format!("parsing branch seed file {}", path.display()))?;

        info!(
            "Loaded {} branches and {} dentist assignments from {}",
            seed.branches.len(),
            seed.dentists.len(),
            path.display()
        );
        Ok(Self::from_seed(seed))
    }

    /// A dentist belongs to one branch at a time; assigning moves them.
    pub async fn assign_dentist(&self, dentist_id: Uuid, branch_id: &str) {
        let mut dentists = self.dentists.write().await;
        dentists.retain(|assignment| assignment.id != dentist_id);
        dentists.push(DentistAssignment {
            id: dentist_id,
            branch_id: branch_id.to_string(),
        });
    }

    pub async fn unassign_dentist(&self, dentist_id: Uuid) {
        self.dentists.write().await.retain(|assignment| assignment.id != dentist_id);
    }
}

#[async_trait]
impl BranchDirectory for StaticDirectory {
    async fn list_branches(&self) -> Result<Vec<Branch>, ScheduleError> {
        Ok(self.branches.read().await.clone())
    }

    async fn get_branch(&self, branch_id: &str) -> Result<Option<Branch>, ScheduleError> {
        Ok(self
            .branches
            .read()
            .await
            .iter()
            .find(|branch| branch.id == branch_id)
            .cloned())
    }
}

#[async_trait]
impl DentistRoster for StaticDirectory {
    async fn list_dentists_for_branch(&self, branch_id: &str) -> Result<Vec<Uuid>, ScheduleError> {
        Ok(self
            .dentists
            .read()
            .await
            .iter()
            .filter(|assignment| assignment.branch_id == branch_id)
            .map(|assignment| assignment.id)
            .collect())
    }
}

// ==============================================================================
// SUPABASE DIRECTORY
// ==============================================================================

const BRANCH_COLUMNS: &str = "id,name,operating_days,opening_time,closing_time";

/// Reads the `branches` and `dentists` tables through PostgREST.
pub struct SupabaseDirectory {
    supabase: SupabaseClient,
}

impl SupabaseDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }
}

fn directory_error(e: anyhow::Error) -> ScheduleError {
    ScheduleError::DirectoryError(e.to_string())
}

#[async_trait]
impl BranchDirectory for SupabaseDirectory {
    async fn list_branches(&self) -> Result<Vec<Branch>, ScheduleError> {
        let path = format!("/rest/v1/branches?select={}&order=id.asc", BRANCH_COLUMNS);
        let branches: Vec<Branch> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(directory_error)?;

        debug!("Fetched {} branches from directory", branches.len());
        Ok(branches)
    }

    async fn get_branch(&self, branch_id: &str) -> Result<Option<Branch>, ScheduleError> {
        let path = format!(
            "/rest/v1/branches?id=eq.{}&select={}",
            urlencoding::encode(branch_id),
            BRANCH_COLUMNS
        );
        let branches: Vec<Branch> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(directory_error)?;

        Ok(branches.into_iter().next())
    }
}

#[async_trait]
impl DentistRoster for SupabaseDirectory {
    async fn list_dentists_for_branch(&self, branch_id: &str) -> Result<Vec<Uuid>, ScheduleError> {
        let path = format!(
            "/rest/v1/dentists?branch_id=eq.{}&select=id,branch_id",
            urlencoding::encode(branch_id)
        );
        let dentists: Vec<DentistAssignment> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(directory_error)?;

        debug!("Branch {} has {} dentists on roster", branch_id, dentists.len());
        Ok(dentists.into_iter().map(|dentist| dentist.id).collect())
    }
}
