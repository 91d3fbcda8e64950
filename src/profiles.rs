//! Freelancer and client profiles

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const UNNAMED: &str = "Unnamed User";
const NO_BIO: &str = "No bio provided.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreelancerProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Set only through profile-link verification.
    #[serde(default)]
    pub github: String,
    #[serde(default)]
    pub linkedin: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// Body of a create/edit profile request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub wallet: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ProfileUpdate {
    /// Replace every editable field, keeping the previously verified GitHub link.
    pub fn apply(self, existing: Option<&FreelancerProfile>) -> FreelancerProfile {
        FreelancerProfile {
            name: self.name.unwrap_or_default(),
            bio: self.bio.unwrap_or_default(),
            skills: self.skills.unwrap_or_default(),
            github: existing.map(|p| p.github.clone()).unwrap_or_default(),
            linkedin: self.linkedin.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            phone: self.phone.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Listing entry for the freelancer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreelancerSummary {
    pub wallet: String,
    pub name: String,
    pub bio: String,
    pub skills: Vec<String>,
    pub github: String,
    pub linkedin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

fn or_placeholder(value: &str, placeholder: &str) -> String {
    if value.trim().is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}

/// Every profile, with placeholders for missing names and bios and contact details included.
pub fn list_freelancers(profiles: &BTreeMap<String, FreelancerProfile>) -> Vec<FreelancerSummary> {
    profiles
        .iter()
        .map(|(wallet, p)| FreelancerSummary {
            wallet: wallet.clone(),
            name: or_placeholder(&p.name, UNNAMED),
            bio: or_placeholder(&p.bio, NO_BIO),
            skills: p.skills.clone(),
            github: p.github.clone(),
            linkedin: p.linkedin.clone(),
            email: Some(p.email.clone()),
            phone: Some(p.phone.clone()),
        })
        .collect()
}

/// Profiles listing `skill` (case-insensitive, exact). Contact details are left out.
pub fn search_by_skill(
    profiles: &BTreeMap<String, FreelancerProfile>,
    skill: &str,
) -> Vec<FreelancerSummary> {
    let wanted = skill.trim().to_lowercase();
    profiles
        .iter()
        .filter(|(_, p)| p.skills.iter().any(|s| s.to_lowercase() == wanted))
        .map(|(wallet, p)| FreelancerSummary {
            wallet: wallet.clone(),
            name: p.name.clone(),
            bio: p.bio.clone(),
            skills: p.skills.clone(),
            github: p.github.clone(),
            linkedin: p.linkedin.clone(),
            email: None,
            phone: None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub milestone: usize,
    pub label: &'static str,
    pub earned: bool,
}

const BADGE_MILESTONES: [(usize, &str); 4] =
    [(3, "Bronze"), (5, "Silver"), (7, "Gold"), (10, "Platinum")];

/// Milestone badges for a builder with `project_count` on-chain projects.
pub fn badges_for(project_count: usize) -> Vec<Badge> {
    BADGE_MILESTONES
        .iter()
        .map(|(milestone, label)| Badge {
            milestone: *milestone,
            label: *label,
            earned: project_count >= *milestone,
        })
        .collect()
}
