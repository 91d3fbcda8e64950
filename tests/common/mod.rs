//! Shared fixtures: in-process fetcher and contract doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use credchain::content::{ContentFetcher, FetchedContent};
use credchain::contract::{CredChainContract, NewProject, ProjectRecord, ReviewRecord, TxReceipt};
use credchain::crypto::Address;
use credchain::error::{CredError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const BUILDER: &str = "0x1111111111111111111111111111111111111111";
pub const CLIENT: &str = "0x2222222222222222222222222222222222222222";

/// Serves canned pages; unknown URLs fail like a refused connection.
#[derive(Default)]
pub struct StaticFetcher {
    pages: Mutex<HashMap<String, FetchedContent>>,
}

impl StaticFetcher {
    pub fn serve(&self, url: &str, status: u16, body: &str) {
        self.pages.lock().insert(
            url.to_string(),
            FetchedContent {
                status,
                body: body.as_bytes().to_vec(),
            },
        );
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent> {
        self.pages
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| CredError::FetchError(format!("connection refused: {}", url)))
    }
}

/// Contract double keeping projects, reviews, and verified users in memory.
#[derive(Default)]
pub struct FakeChain {
    pub projects: Mutex<HashMap<Address, Vec<ProjectRecord>>>,
    pub reviews: Mutex<HashMap<(Address, u64), Vec<ReviewRecord>>>,
    pub verified_users: Mutex<Vec<Address>>,
    /// When set, every read fails with this RPC error.
    pub fail_reads: Mutex<Option<String>>,
    /// When set, the first read after the next write fails once.
    pub drop_read_after_write: AtomicBool,
    fail_once: AtomicBool,
    txs: AtomicU64,
}

impl FakeChain {
    fn receipt(&self) -> TxReceipt {
        let n = self.txs.fetch_add(1, Ordering::SeqCst) + 1;
        TxReceipt {
            transaction_hash: format!("0x{:064x}", n),
            block_number: 100 + n,
            gas_used: 50_000,
            success: true,
        }
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_once.swap(false, Ordering::SeqCst) {
            return Err(CredError::RpcError("connection reset".to_string()));
        }
        match self.fail_reads.lock().clone() {
            Some(msg) => Err(CredError::RpcError(msg)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CredChainContract for FakeChain {
    async fn add_project(&self, project: &NewProject) -> Result<TxReceipt> {
        self.projects
            .lock()
            .entry(project.user)
            .or_default()
            .push(ProjectRecord {
                client: project.client,
                project_name: project.project_name.clone(),
                description: project.description.clone(),
                languages: project.languages.clone(),
                project_hash: project.project_hash.clone(),
                link: project.link.clone(),
                verified: false,
                timestamp: 1_760_000_000,
            });
        if self.drop_read_after_write.swap(false, Ordering::SeqCst) {
            self.fail_once.store(true, Ordering::SeqCst);
        }
        Ok(self.receipt())
    }

    async fn verify_project(&self, builder: Address, index: u64) -> Result<TxReceipt> {
        {
            let mut projects = self.projects.lock();
            let record = projects
                .get_mut(&builder)
                .and_then(|list| list.get_mut(index as usize))
                .ok_or_else(|| CredError::Reverted("0xbad".to_string()))?;
            record.verified = true;
        }
        Ok(self.receipt())
    }

    async fn submit_review(
        &self,
        freelancer: Address,
        index: u64,
        rating: u8,
        comment_hash: &str,
    ) -> Result<TxReceipt> {
        self.reviews
            .lock()
            .entry((freelancer, index))
            .or_default()
            .push(ReviewRecord {
                reviewer: Address::repeat_byte(0xcc),
                project_index: index,
                rating,
                comment_hash: comment_hash.to_string(),
            });
        Ok(self.receipt())
    }

    async fn set_user_verified(&self, user: Address, status: bool) -> Result<TxReceipt> {
        let mut users = self.verified_users.lock();
        users.retain(|u| *u != user);
        if status {
            users.push(user);
        }
        drop(users);
        Ok(self.receipt())
    }

    async fn get_all_projects(&self, builder: Address) -> Result<Vec<ProjectRecord>> {
        self.check_reads()?;
        Ok(self.projects.lock().get(&builder).cloned().unwrap_or_default())
    }

    async fn get_project_reviews(&self, builder: Address, index: u64) -> Result<Vec<ReviewRecord>> {
        self.check_reads()?;
        Ok(self
            .reviews
            .lock()
            .get(&(builder, index))
            .cloned()
            .unwrap_or_default())
    }

    async fn is_verified(&self, user: Address) -> Result<bool> {
        self.check_reads()?;
        Ok(self.verified_users.lock().contains(&user))
    }
}
