//! Request/response collaborators used next to the voice session: grounded
//! text answers and resume analysis.
//!
//! Both are blocking calls. From async code, run them inside
//! `tokio::task::spawn_blocking`.

pub mod gemini;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A web source the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingLink {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub text: String,
    /// Empty unless search grounding was requested and the model used it.
    pub grounding: Vec<GroundingLink>,
}

/// One step of a suggested learning roadmap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadmapNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
}

/// Structured resume feedback. Every field tolerates being absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResumeAnalysis {
    /// Readiness score in [0, 100].
    pub score: f64,
    pub suggestions: Vec<String>,
    pub missing_skills: Vec<String>,
    pub roadmap_nodes: Vec<RoadmapNode>,
}

pub trait TextGenerator: Send + Sync {
    /// Answer `prompt`, optionally grounded on web search.
    fn generate(&self, prompt: &str, use_search: bool) -> Result<GeneratedText>;
}

pub trait ResumeAnalyzer: Send + Sync {
    fn analyze(&self, resume_text: &str) -> Result<ResumeAnalysis>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioProject {
    pub title: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioExperience {
    pub role: String,
    pub company: String,
}

/// The parts of a student portfolio that feed resume analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Portfolio {
    pub skills: Vec<String>,
    pub projects: Vec<PortfolioProject>,
    pub experience: Vec<PortfolioExperience>,
}

impl Portfolio {
    /// Flatten the portfolio into the plain-text resume the analyzer reads.
    pub fn resume_text(&self) -> String {
        let projects: Vec<String> = self
            .projects
            .iter()
            .map(|p| format!("{}: {}", p.title, p.desc))
            .collect();
        let experience: Vec<String> = self
            .experience
            .iter()
            .map(|e| format!("{} at {}", e.role, e.company))
            .collect();
        format!(
            "Skills: {}\nProjects: {}\nExperience: {}",
            self.skills.join(", "),
            projects.join("; "),
            experience.join("; ")
        )
    }
}

/// Role the resume is scored against.
pub const TARGET_ROLE: &str = "Software Engineer";

pub fn resume_prompt(resume_text: &str) -> String {
    format!(
        "Analyze this resume and provide suggestions for improvement, missing skills for a \
         '{TARGET_ROLE}' role, and a readiness score (0-100): {resume_text}"
    )
}
