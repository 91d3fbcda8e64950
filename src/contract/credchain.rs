//! Binding for the deployed CredChain contract

use crate::contract::transaction::{TransactionSender, TxReceipt};
use crate::crypto::{lower_hex, serialize_checksum, Address};
use crate::error::{CredError, Result};
use async_trait::async_trait;
use ethers::abi::{Abi, Function, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionRequest, U256};
use serde::{Deserialize, Serialize};

/// ABI of the functions the backend calls.
pub const CREDCHAIN_ABI: &str = r#"[
  {
    "type": "function", "name": "addProject", "stateMutability": "nonpayable",
    "inputs": [{
      "name": "project", "type": "tuple",
      "components": [
        {"name": "user", "type": "address"},
        {"name": "client", "type": "address"},
        {"name": "projectName", "type": "string"},
        {"name": "description", "type": "string"},
        {"name": "languages", "type": "string"},
        {"name": "projectHash", "type": "string"},
        {"name": "link", "type": "string"}
      ]
    }],
    "outputs": []
  },
  {
    "type": "function", "name": "verifyProject", "stateMutability": "nonpayable",
    "inputs": [{"name": "builder", "type": "address"}, {"name": "index", "type": "uint256"}],
    "outputs": []
  },
  {
    "type": "function", "name": "submitReview", "stateMutability": "nonpayable",
    "inputs": [
      {"name": "freelancer", "type": "address"},
      {"name": "index", "type": "uint256"},
      {"name": "rating", "type": "uint8"},
      {"name": "commentHash", "type": "string"}
    ],
    "outputs": []
  },
  {
    "type": "function", "name": "setUserVerified", "stateMutability": "nonpayable",
    "inputs": [{"name": "user", "type": "address"}, {"name": "status", "type": "bool"}],
    "outputs": []
  },
  {
    "type": "function", "name": "getAllProjects", "stateMutability": "view",
    "inputs": [{"name": "builder", "type": "address"}],
    "outputs": [{
      "name": "", "type": "tuple[]",
      "components": [
        {"name": "client", "type": "address"},
        {"name": "projectName", "type": "string"},
        {"name": "description", "type": "string"},
        {"name": "languages", "type": "string"},
        {"name": "projectHash", "type": "string"},
        {"name": "link", "type": "string"},
        {"name": "verified", "type": "bool"},
        {"name": "timestamp", "type": "uint256"}
      ]
    }]
  },
  {
    "type": "function", "name": "getProjectReviews", "stateMutability": "view",
    "inputs": [{"name": "builder", "type": "address"}, {"name": "index", "type": "uint256"}],
    "outputs": [{
      "name": "", "type": "tuple[]",
      "components": [
        {"name": "reviewer", "type": "address"},
        {"name": "projectIndex", "type": "uint256"},
        {"name": "rating", "type": "uint8"},
        {"name": "commentHash", "type": "string"}
      ]
    }]
  },
  {
    "type": "function", "name": "isVerified", "stateMutability": "view",
    "inputs": [{"name": "user", "type": "address"}],
    "outputs": [{"name": "", "type": "bool"}]
  }
]"#;

/// Arguments of `addProject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub user: Address,
    pub client: Address,
    pub project_name: String,
    pub description: String,
    pub languages: String,
    pub project_hash: String,
    pub link: String,
}

impl NewProject {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.user),
            Token::Address(self.client),
            Token::String(self.project_name.clone()),
            Token::String(self.description.clone()),
            Token::String(self.languages.clone()),
            Token::String(self.project_hash.clone()),
            Token::String(self.link.clone()),
        ])
    }
}

/// A project as stored on-chain under its builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    #[serde(serialize_with = "serialize_checksum")]
    pub client: Address,
    pub project_name: String,
    pub description: String,
    pub languages: String,
    pub project_hash: String,
    pub link: String,
    pub verified: bool,
    pub timestamp: u64,
}

impl ProjectRecord {
    fn from_token(token: Token) -> Result<Self> {
        let mut fields = Fields::new(token, "project")?;
        Ok(ProjectRecord {
            client: fields.address()?,
            project_name: fields.string()?,
            description: fields.string()?,
            languages: fields.string()?,
            project_hash: fields.string()?,
            link: fields.string()?,
            verified: fields.boolean()?,
            timestamp: fields.uint()?,
        })
    }

    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.client),
            Token::String(self.project_name.clone()),
            Token::String(self.description.clone()),
            Token::String(self.languages.clone()),
            Token::String(self.project_hash.clone()),
            Token::String(self.link.clone()),
            Token::Bool(self.verified),
            Token::Uint(U256::from(self.timestamp)),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    #[serde(serialize_with = "serialize_checksum")]
    pub reviewer: Address,
    pub project_index: u64,
    pub rating: u8,
    pub comment_hash: String,
}

impl ReviewRecord {
    fn from_token(token: Token) -> Result<Self> {
        let mut fields = Fields::new(token, "review")?;
        let reviewer = fields.address()?;
        let project_index = fields.uint()?;
        let rating = fields.uint()?;
        let rating = u8::try_from(rating)
            .map_err(|_| CredError::AbiError(format!("rating {} overflows uint8", rating)))?;
        Ok(ReviewRecord {
            reviewer,
            project_index,
            rating,
            comment_hash: fields.string()?,
        })
    }

    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.reviewer),
            Token::Uint(U256::from(self.project_index)),
            Token::Uint(U256::from(self.rating)),
            Token::String(self.comment_hash.clone()),
        ])
    }
}

/// Walks the members of a decoded tuple in declaration order.
struct Fields {
    what: &'static str,
    inner: std::vec::IntoIter<Token>,
}

impl Fields {
    fn new(token: Token, what: &'static str) -> Result<Self> {
        let inner = token
            .into_tuple()
            .ok_or_else(|| CredError::AbiError(format!("{} is not a tuple", what)))?
            .into_iter();
        Ok(Self { what, inner })
    }

    fn next(&mut self) -> Result<Token> {
        self.inner
            .next()
            .ok_or_else(|| CredError::AbiError(format!("{} tuple too short", self.what)))
    }

    fn mismatch(&self, expected: &str) -> CredError {
        CredError::AbiError(format!("{} field is not {}", self.what, expected))
    }

    fn address(&mut self) -> Result<Address> {
        self.next()?.into_address().ok_or_else(|| self.mismatch("an address"))
    }

    fn string(&mut self) -> Result<String> {
        self.next()?.into_string().ok_or_else(|| self.mismatch("a string"))
    }

    fn boolean(&mut self) -> Result<bool> {
        self.next()?.into_bool().ok_or_else(|| self.mismatch("a bool"))
    }

    fn uint(&mut self) -> Result<u64> {
        let value = self.next()?.into_uint().ok_or_else(|| self.mismatch("a uint"))?;
        u64::try_from(value)
            .map_err(|_| CredError::AbiError(format!("{} value {} overflows u64", self.what, value)))
    }
}

fn abi_error(err: impl std::fmt::Display) -> CredError {
    CredError::AbiError(err.to_string())
}

/// Operations the backend performs against the CredChain contract.
#[async_trait]
pub trait CredChainContract: Send + Sync {
    async fn add_project(&self, project: &NewProject) -> Result<TxReceipt>;
    async fn verify_project(&self, builder: Address, index: u64) -> Result<TxReceipt>;
    async fn submit_review(
        &self,
        freelancer: Address,
        index: u64,
        rating: u8,
        comment_hash: &str,
    ) -> Result<TxReceipt>;
    async fn set_user_verified(&self, user: Address, status: bool) -> Result<TxReceipt>;
    async fn get_all_projects(&self, builder: Address) -> Result<Vec<ProjectRecord>>;
    async fn get_project_reviews(&self, builder: Address, index: u64) -> Result<Vec<ReviewRecord>>;
    async fn is_verified(&self, user: Address) -> Result<bool>;
}

/// JSON-RPC backed contract. Writes need a [`TransactionSender`].
pub struct CredChain {
    provider: Provider<Http>,
    address: Address,
    abi: Abi,
    sender: Option<TransactionSender>,
}

impl CredChain {
    pub fn new(
        provider: Provider<Http>,
        address: Address,
        sender: Option<TransactionSender>,
    ) -> Result<Self> {
        let abi: Abi = serde_json::from_str(CREDCHAIN_ABI).map_err(abi_error)?;
        Ok(Self {
            provider,
            address,
            abi,
            sender,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn can_write(&self) -> bool {
        self.sender.is_some()
    }

    fn function(&self, name: &str) -> Result<&Function> {
        self.abi.function(name).map_err(abi_error)
    }

    fn calldata(&self, name: &str, args: &[Token]) -> Result<Bytes> {
        let data = self.function(name)?.encode_input(args).map_err(abi_error)?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, name: &str, args: &[Token]) -> Result<TxReceipt> {
        let sender = self.sender.as_ref().ok_or(CredError::SignerUnavailable)?;
        tracing::debug!(function = name, contract = %lower_hex(&self.address), "chain.write");
        sender.send(self.address, self.calldata(name, args)?).await
    }

    async fn read(&self, name: &str, args: &[Token]) -> Result<Token> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.address)
            .data(self.calldata(name, args)?)
            .into();
        let output = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| CredError::RpcError(format!("eth_call {}: {}", name, e)))?;
        if output.is_empty() {
            return Err(CredError::RpcError(format!(
                "{} returned no data (reverted or wrong contract address)",
                name
            )));
        }
        self.function(name)?
            .decode_output(&output)
            .map_err(abi_error)?
            .into_iter()
            .next()
            .ok_or_else(|| CredError::AbiError(format!("{} returned nothing", name)))
    }

    async fn read_array(&self, name: &str, args: &[Token]) -> Result<Vec<Token>> {
        self.read(name, args)
            .await?
            .into_array()
            .ok_or_else(|| CredError::AbiError(format!("{} did not return an array", name)))
    }
}

#[async_trait]
impl CredChainContract for CredChain {
    async fn add_project(&self, project: &NewProject) -> Result<TxReceipt> {
        self.write("addProject", &[project.to_token()]).await
    }

    async fn verify_project(&self, builder: Address, index: u64) -> Result<TxReceipt> {
        self.write(
            "verifyProject",
            &[Token::Address(builder), Token::Uint(U256::from(index))],
        )
        .await
    }

    async fn submit_review(
        &self,
        freelancer: Address,
        index: u64,
        rating: u8,
        comment_hash: &str,
    ) -> Result<TxReceipt> {
        self.write(
            "submitReview",
            &[
                Token::Address(freelancer),
                Token::Uint(U256::from(index)),
                Token::Uint(U256::from(rating)),
                Token::String(comment_hash.to_string()),
            ],
        )
        .await
    }

    async fn set_user_verified(&self, user: Address, status: bool) -> Result<TxReceipt> {
        self.write("setUserVerified", &[Token::Address(user), Token::Bool(status)])
            .await
    }

    async fn get_all_projects(&self, builder: Address) -> Result<Vec<ProjectRecord>> {
        self.read_array("getAllProjects", &[Token::Address(builder)])
            .await?
            .into_iter()
            .map(ProjectRecord::from_token)
            .collect()
    }

    async fn get_project_reviews(&self, builder: Address, index: u64) -> Result<Vec<ReviewRecord>> {
        self.read_array(
            "getProjectReviews",
            &[Token::Address(builder), Token::Uint(U256::from(index))],
        )
        .await?
        .into_iter()
        .map(ReviewRecord::from_token)
        .collect()
    }

    async fn is_verified(&self, user: Address) -> Result<bool> {
        self.read("isVerified", &[Token::Address(user)])
            .await?
            .into_bool()
            .ok_or_else(|| CredError::AbiError("isVerified did not return a bool".to_string()))
    }
}
