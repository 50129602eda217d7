use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use crate::classify::Generate;
use crate::store::{RecordStore, ScoredRecord};

pub const CHAT_TOP_K: usize = 5;

/// Optional exact-match filters for the chat retrieval step.
#[derive(Debug, Clone, Default)]
pub struct ChatFilters {
    pub employee: Option<String>,
    pub status: Option<String>,
}

impl ChatFilters {
    fn to_metadata(&self) -> BTreeMap<String, String> {
        let mut filters = BTreeMap::new();
        if let Some(employee) = &self.employee {
            filters.insert("employee".to_string(), employee.trim().to_lowercase());
        }
        if let Some(status) = &self.status {
            filters.insert("status".to_string(), status.trim().to_string());
        }
        filters
    }
}

#[derive(Debug, Clone)]
pub struct GroundedAnswer {
    pub answer: String,
    pub sources: Vec<ScoredRecord>,
    pub used_fallback: bool,
}

/// Answer a reviewer question grounded in stored invoice records.
///
/// Runs the filtered query first; when it comes back empty, one filterless
/// fallback search is issued so the conversation degrades to broader recall
/// instead of a hard miss. With no retrieved records at all the generation
/// service is not called.
pub fn answer_question<G: Generate>(
    store: &RecordStore,
    service: &G,
    question: &str,
    filters: &ChatFilters,
    policy_text: Option<&str>,
) -> Result<GroundedAnswer> {
    let mut used_fallback = false;
    let mut sources = store.query(question, CHAT_TOP_K, &filters.to_metadata())?;
    if sources.is_empty() {
        info!("filtered chat query empty, falling back to unfiltered search");
        used_fallback = true;
        sources = store.search_similar(question, CHAT_TOP_K)?;
    }
    if sources.is_empty() {
        return Ok(GroundedAnswer {
            answer: "No invoice records are available to answer this question.".to_string(),
            sources,
            used_fallback,
        });
    }
    let prompt = build_prompt(question, &sources, policy_text);
    let answer = service.generate(&prompt)?;
    Ok(GroundedAnswer {
        answer,
        sources,
        used_fallback,
    })
}

fn build_prompt(question: &str, sources: &[ScoredRecord], policy_text: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are an assistant for reimbursement reviewers. \
         Answer the query using only the documents below.\n\n",
    );
    if let Some(policy) = policy_text {
        if !policy.trim().is_empty() {
            prompt.push_str("Policy:\n");
            prompt.push_str(policy.trim());
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str(&format!("User Query: {question}\n\nRelevant Documents:\n"));
    for record in sources {
        let status = record
            .metadata
            .get("status")
            .map(String::as_str)
            .unwrap_or("Unknown");
        prompt.push_str(&format!("[{} | {}]\n{}\n\n", record.id, status, record.text));
    }
    prompt.push_str("Answer:");
    prompt
}
