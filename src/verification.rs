//! Project submission and pending-verification pipeline
//!
//! A submitted project goes through: normalize link, fetch, SHA-256, `addProject`
//! on-chain, and a durable [`PendingProject`] record written as soon as the receipt
//! arrives. Verification later re-fetches the same URL, compares the fresh hash with
//! the on-chain `projectHash`, and on a match calls `verifyProject` and drops the
//! pending record.

use crate::content::{hash_content, normalize_project_link, validate_profile_link, ContentFetcher};
use crate::contract::{CredChainContract, NewProject, ProjectRecord, ReviewRecord};
use crate::crypto::{
    lower_hex, normalize_wallet, parse_address as parse_hex_address, serialize_checksum,
    sha256_hex, Address,
};
use crate::error::{CredError, Result};
use crate::persistence::Persistence;
use crate::profiles::{badges_for, Badge, FreelancerProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Mismatch,
    Unreachable,
}

/// A project recorded on-chain whose link has not been re-checked yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingProject {
    /// Lowercase builder address.
    pub builder: String,
    /// Position in the builder's on-chain project list; `None` until it has been
    /// looked up after the `addProject` receipt.
    #[serde(default)]
    pub index: Option<u64>,
    pub client: String,
    pub project_name: String,
    /// Link as submitted.
    pub link: String,
    /// Normalized URL that was hashed.
    pub fetch_url: String,
    pub project_hash: String,
    pub tx_hash: String,
    pub submitted_at: String,
    pub status: PendingStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_checked_at: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingProject {
    fn record_check(&mut self, status: PendingStatus, error: Option<String>) {
        self.status = status;
        self.attempts += 1;
        self.last_checked_at = Some(chrono::Utc::now().to_rfc3339());
        self.last_error = error;
    }
}

/// Body of a project submission.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSubmission {
    #[serde(alias = "user")]
    pub wallet: String,
    pub client: String,
    #[serde(alias = "projectName")]
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub languages: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedProject {
    pub hash: String,
    pub tx_hash: String,
    /// `None` when the index lookup failed; the next sweep resolves it.
    pub index: Option<u64>,
}

/// Body of a review submission.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewSubmission {
    pub freelancer: String,
    #[serde(alias = "index")]
    pub project_index: u64,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedReview {
    pub tx_hash: String,
    pub comment_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { tx_hash: String },
    /// The contract already had the project marked verified.
    AlreadyVerified,
    Mismatch { expected: String, actual: String },
    Unreachable { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    pub checked: usize,
    pub verified: usize,
    pub mismatched: usize,
    pub unreachable: usize,
    pub failed: usize,
}

/// A project found under some builder whose client is the queried wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientProject {
    #[serde(serialize_with = "serialize_checksum")]
    pub builder: Address,
    pub index: u64,
    #[serde(flatten)]
    pub project: ProjectRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeReport {
    pub count: usize,
    pub badges: Vec<Badge>,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    submitted: AtomicU64,
    verified: AtomicU64,
    mismatched: AtomicU64,
    unreachable: AtomicU64,
    reviews: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub verified: u64,
    pub mismatched: u64,
    pub unreachable: u64,
    pub reviews: u64,
}

fn parse_address(value: &str, what: &str) -> Result<Address> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CredError::InvalidInput(format!("{} required", what)));
    }
    parse_hex_address(value)
        .map_err(|_| CredError::InvalidInput(format!("Invalid {} address: {}", what, value)))
}

/// Newest on-chain position holding `hash` that no other pending record claims.
fn locate_index(projects: &[ProjectRecord], hash: &str, claimed: &BTreeSet<u64>) -> Option<u64> {
    projects
        .iter()
        .enumerate()
        .rev()
        .map(|(i, p)| (i as u64, p))
        .find(|(i, p)| p.project_hash == hash && !claimed.contains(i))
        .map(|(i, _)| i)
}

pub struct Pipeline {
    store: Arc<dyn Persistence>,
    fetcher: Arc<dyn ContentFetcher>,
    contract: Option<Arc<dyn CredChainContract>>,
    counters: PipelineCounters,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Persistence>,
        fetcher: Arc<dyn ContentFetcher>,
        contract: Option<Arc<dyn CredChainContract>>,
    ) -> Self {
        Self {
            store,
            fetcher,
            contract,
            counters: PipelineCounters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    pub fn has_contract(&self) -> bool {
        self.contract.is_some()
    }

    fn contract(&self) -> Result<&Arc<dyn CredChainContract>> {
        self.contract.as_ref().ok_or(CredError::ContractUnavailable)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            verified: self.counters.verified.load(Ordering::Relaxed),
            mismatched: self.counters.mismatched.load(Ordering::Relaxed),
            unreachable: self.counters.unreachable.load(Ordering::Relaxed),
            reviews: self.counters.reviews.load(Ordering::Relaxed),
        }
    }

    /// Fetch `url` and hash the body; anything but HTTP 200 is an error.
    async fn fetch_and_hash(&self, url: &str) -> Result<String> {
        let content = self.fetcher.fetch(url).await?;
        if !content.is_ok() {
            return Err(CredError::InvalidInput(format!(
                "Link not reachable ({})",
                content.status
            )));
        }
        Ok(hash_content(&content.body))
    }

    /// Hash a project link and remember `wallet` as a builder.
    pub async fn hash_project(&self, link: &str, wallet: Option<&str>) -> Result<String> {
        let url = normalize_project_link(link)?;
        let hash = self.fetch_and_hash(&url).await?;

        if let Some(wallet) = wallet {
            let wallet = normalize_wallet(wallet);
            if !wallet.is_empty() && wallet != "null" && wallet != "none" {
                if self.store.add_builder(&wallet)? {
                    tracing::info!(builder = %wallet, "pipeline.builder_added");
                }
            }
        }

        tracing::info!(url = %url, hash = %hash, "pipeline.hashed");
        Ok(hash)
    }

    /// Check a GitHub/LinkedIn profile link and store it on the wallet's profile.
    ///
    /// Only a 404 fails the check. When a writable contract is configured the
    /// wallet is also flagged verified on-chain; that step is best-effort.
    pub async fn verify_profile_link(&self, wallet: &str, link: &str) -> Result<()> {
        let wallet = normalize_wallet(wallet);
        let link = link.trim();
        if wallet.is_empty() {
            return Err(CredError::InvalidInput("Wallet missing".to_string()));
        }
        if link.is_empty() {
            return Err(CredError::InvalidInput("Profile link missing".to_string()));
        }
        validate_profile_link(link)?;

        let content = self.fetcher.fetch(link).await.map_err(|e| {
            let reason = match e {
                CredError::FetchError(msg) => msg,
                other => other.to_string(),
            };
            CredError::InvalidInput(format!("Request failed: {}", reason))
        })?;
        if content.status == 404 {
            return Err(CredError::InvalidInput("GitHub page not found".to_string()));
        }

        self.store.update_profile(&wallet, &mut |existing| FreelancerProfile {
            github: link.to_string(),
            ..existing.cloned().unwrap_or_default()
        })?;
        tracing::info!(wallet = %wallet, link = %link, "pipeline.profile_link_verified");

        if let (Some(contract), Ok(address)) = (&self.contract, parse_hex_address(&wallet)) {
            match contract.set_user_verified(address, true).await {
                Ok(receipt) => {
                    tracing::info!(wallet = %wallet, tx_hash = %receipt.transaction_hash, "pipeline.user_flagged")
                }
                Err(CredError::SignerUnavailable) => {}
                Err(e) => tracing::warn!(wallet = %wallet, error = %e, "Failed to flag user on-chain"),
            }
        }
        Ok(())
    }

    /// Hash the project content, record it on-chain, and queue it for verification.
    ///
    /// The pending record is stored before the index lookup, so a failed read after
    /// a confirmed write leaves a record that [`Pipeline::verify_all_pending`] resolves.
    pub async fn submit_project(&self, submission: ProjectSubmission) -> Result<SubmittedProject> {
        let contract = self.contract()?;
        let user = parse_address(&submission.wallet, "wallet")?;
        let client = parse_address(&submission.client, "client")?;
        let project_name = submission.project_name.trim().to_string();
        if project_name.is_empty() {
            return Err(CredError::InvalidInput("Project name required".to_string()));
        }

        let link = submission.link.trim().to_string();
        let fetch_url = normalize_project_link(&link)?;
        let hash = self.fetch_and_hash(&fetch_url).await?;

        let receipt = contract
            .add_project(&NewProject {
                user,
                client,
                project_name: project_name.clone(),
                description: submission.description,
                languages: submission.languages,
                project_hash: hash.clone(),
                link: link.clone(),
            })
            .await?;
        let builder = lower_hex(&user);

        let mut pending = PendingProject {
            builder: builder.clone(),
            index: None,
            client: lower_hex(&client),
            project_name,
            link,
            fetch_url,
            project_hash: hash.clone(),
            tx_hash: receipt.transaction_hash.clone(),
            submitted_at: chrono::Utc::now().to_rfc3339(),
            status: PendingStatus::Pending,
            attempts: 0,
            last_checked_at: None,
            last_error: None,
        };
        self.store.save_pending(&pending)?;
        self.store.add_builder(&builder)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let index = self.resolve_index(contract.as_ref(), &mut pending, user).await;
        tracing::info!(
            builder = %builder,
            index = ?index,
            hash = %hash,
            tx_hash = %receipt.transaction_hash,
            "pipeline.submitted"
        );
        Ok(SubmittedProject {
            hash,
            tx_hash: receipt.transaction_hash,
            index,
        })
    }

    /// Find the on-chain index of a pending record and store it.
    ///
    /// Failures are recorded on the record and logged; the record stays queued.
    async fn resolve_index(
        &self,
        contract: &dyn CredChainContract,
        pending: &mut PendingProject,
        builder: Address,
    ) -> Option<u64> {
        let lookup: Result<Option<u64>> = async {
            let claimed: BTreeSet<u64> = self
                .store
                .load_pending()?
                .iter()
                .filter(|p| p.builder == pending.builder && p.tx_hash != pending.tx_hash)
                .filter_map(|p| p.index)
                .collect();
            let projects = contract.get_all_projects(builder).await?;
            Ok(locate_index(&projects, &pending.project_hash, &claimed))
        }
        .await;

        let error = match lookup {
            Ok(Some(index)) => {
                pending.index = Some(index);
                pending.last_error = None;
                match self.store.save_pending(pending) {
                    Ok(()) => return Some(index),
                    Err(e) => e.to_string(),
                }
            }
            Ok(None) => format!("Project {} not visible on-chain yet", pending.project_hash),
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            builder = %pending.builder,
            tx_hash = %pending.tx_hash,
            error = %error,
            "Project index lookup failed; will retry on the next sweep"
        );
        pending.index = None;
        pending.last_error = Some(error);
        if let Err(e) = self.store.save_pending(pending) {
            tracing::warn!(tx_hash = %pending.tx_hash, error = %e, "Failed to record lookup error");
        }
        None
    }

    pub fn pending(&self) -> Result<Vec<PendingProject>> {
        self.store.load_pending()
    }

    /// Re-fetch a pending project and confirm it on-chain if its content still matches.
    pub async fn verify_project(&self, builder: &str, index: u64) -> Result<VerifyOutcome> {
        let contract = self.contract()?;
        let address = parse_address(builder, "builder")?;
        let builder = lower_hex(&address);

        let mut pending = self.store.get_pending(&builder, index)?.ok_or_else(|| {
            CredError::NotFound(format!("No pending verification for {} #{}", builder, index))
        })?;

        let projects = contract.get_all_projects(address).await?;
        let record = projects.get(index as usize).ok_or_else(|| {
            CredError::NotFound(format!("Project {} of {} not found on-chain", index, builder))
        })?;

        if record.verified {
            self.store.remove_pending(&builder, index)?;
            tracing::info!(builder = %builder, index, "pipeline.already_verified");
            return Ok(VerifyOutcome::AlreadyVerified);
        }

        let fetched = match self.fetcher.fetch(&pending.fetch_url).await {
            Ok(content) if content.is_ok() => Ok(hash_content(&content.body)),
            Ok(content) => Err(format!("Link not reachable ({})", content.status)),
            Err(e) => Err(e.to_string()),
        };

        let actual = match fetched {
            Ok(actual) => actual,
            Err(reason) => {
                pending.record_check(PendingStatus::Unreachable, Some(reason.clone()));
                self.store.save_pending(&pending)?;
                self.counters.unreachable.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(builder = %builder, index, reason = %reason, "pipeline.unreachable");
                return Ok(VerifyOutcome::Unreachable { reason });
            }
        };

        if actual != record.project_hash {
            pending.record_check(PendingStatus::Mismatch, Some("Content hash mismatch".to_string()));
            self.store.save_pending(&pending)?;
            self.counters.mismatched.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                builder = %builder,
                index,
                expected = %record.project_hash,
                actual = %actual,
                "pipeline.mismatch"
            );
            return Ok(VerifyOutcome::Mismatch {
                expected: record.project_hash.clone(),
                actual,
            });
        }

        let receipt = match contract.verify_project(address, index).await {
            Ok(receipt) => receipt,
            Err(e) => {
                pending.record_check(pending.status, Some(e.to_string()));
                self.store.save_pending(&pending)?;
                return Err(e);
            }
        };
        self.store.remove_pending(&builder, index)?;
        self.counters.verified.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            builder = %builder,
            index,
            hash = %actual,
            tx_hash = %receipt.transaction_hash,
            "pipeline.verified"
        );
        Ok(VerifyOutcome::Verified {
            tx_hash: receipt.transaction_hash,
        })
    }

    /// Run [`Pipeline::verify_project`] over every pending record, one at a time.
    ///
    /// Records still missing their on-chain index are resolved first.
    pub async fn verify_all_pending(&self) -> Result<VerifySummary> {
        let contract = self.contract()?;
        let pending = self.store.load_pending()?;
        let mut summary = VerifySummary::default();

        for mut project in pending {
            summary.checked += 1;
            let index = match project.index {
                Some(index) => Some(index),
                None => match parse_hex_address(&project.builder) {
                    Ok(address) => {
                        self.resolve_index(contract.as_ref(), &mut project, address)
                            .await
                    }
                    Err(e) => {
                        tracing::warn!(
                            builder = %project.builder,
                            error = %e,
                            "Skipping malformed pending record"
                        );
                        None
                    }
                },
            };
            let Some(index) = index else {
                summary.failed += 1;
                continue;
            };

            match self.verify_project(&project.builder, index).await {
                Ok(VerifyOutcome::Verified { .. } | VerifyOutcome::AlreadyVerified) => {
                    summary.verified += 1
                }
                Ok(VerifyOutcome::Mismatch { .. }) => summary.mismatched += 1,
                Ok(VerifyOutcome::Unreachable { .. }) => summary.unreachable += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        builder = %project.builder,
                        index,
                        error = %e,
                        "Pending verification failed"
                    );
                }
            }
        }

        tracing::info!(
            checked = summary.checked,
            verified = summary.verified,
            mismatched = summary.mismatched,
            unreachable = summary.unreachable,
            failed = summary.failed,
            "pipeline.batch_done"
        );
        Ok(summary)
    }

    pub async fn submit_review(&self, review: ReviewSubmission) -> Result<SubmittedReview> {
        let contract = self.contract()?;
        let freelancer = parse_address(&review.freelancer, "freelancer")?;
        if !(1..=5).contains(&review.rating) {
            return Err(CredError::InvalidInput(
                "Rating must be between 1 and 5".to_string(),
            ));
        }

        let comment_hash = sha256_hex(review.comment.as_bytes());
        let receipt = contract
            .submit_review(freelancer, review.project_index, review.rating, &comment_hash)
            .await?;
        self.counters.reviews.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            freelancer = %freelancer,
            index = review.project_index,
            rating = review.rating,
            tx_hash = %receipt.transaction_hash,
            "pipeline.review_submitted"
        );
        Ok(SubmittedReview {
            tx_hash: receipt.transaction_hash,
            comment_hash,
        })
    }

    pub async fn projects_of(&self, builder: &str) -> Result<Vec<ProjectRecord>> {
        let address = parse_address(builder, "builder")?;
        self.contract()?.get_all_projects(address).await
    }

    pub async fn project_reviews(&self, builder: &str, index: u64) -> Result<Vec<ReviewRecord>> {
        let address = parse_address(builder, "builder")?;
        self.contract()?.get_project_reviews(address, index).await
    }

    /// Every on-chain project, across known builders, commissioned by `client`.
    pub async fn projects_for_client(&self, client: &str) -> Result<Vec<ClientProject>> {
        let client = parse_address(client, "client")?;
        let contract = self.contract()?;

        let mut found = Vec::new();
        for builder in self.store.load_builders()? {
            let Ok(address) = parse_hex_address(&builder) else {
                tracing::debug!(builder = %builder, "Skipping malformed builder entry");
                continue;
            };
            for (index, project) in contract.get_all_projects(address).await?.into_iter().enumerate() {
                if project.client == client {
                    found.push(ClientProject {
                        builder: address,
                        index: index as u64,
                        project,
                    });
                }
            }
        }
        Ok(found)
    }

    pub async fn badges(&self, wallet: &str) -> Result<BadgeReport> {
        let count = self.projects_of(wallet).await?.len();
        Ok(BadgeReport {
            count,
            badges: badges_for(count),
        })
    }

    pub async fn is_user_verified(&self, wallet: &str) -> Result<bool> {
        let address = parse_address(wallet, "wallet")?;
        self.contract()?.is_verified(address).await
    }
}

/// Periodically drains the pending queue.
pub struct VerificationWorker {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    running: Arc<AtomicBool>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl VerificationWorker {
    pub fn new(pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            task: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CredError::InvalidInput(
                "Verification worker already running".to_string(),
            ));
        }

        let pipeline = self.pipeline.clone();
        let running = self.running.clone();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "worker.started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = pipeline.verify_all_pending().await {
                    tracing::warn!(error = %e, "Verification sweep failed");
                }
            }
            running.store(false, Ordering::SeqCst);
            tracing::info!("worker.stopped");
        });

        *self.task.write().await = Some(task);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CredError::InvalidInput(
                "Verification worker not running".to_string(),
            ));
        }

        if let Some(task) = self.task.write().await.take() {
            // a sweep in flight would otherwise hold the task until its next tick
            task.abort();
        }
        Ok(())
    }
}
