//! Prompt construction for the generation service.
//!
//! Builds the domain-model and repair prompts and pulls Idris source back out
//! of free-form model output.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::{GenerationRequest, SourceUnit};

/// Rules appended to every generation prompt.
pub const MODEL_RULES: &str = "\n\nRules:\n\
- Mark every type and definition `public export`.\n\
- Express every calculation rule and date constraint as a dependent type \
(for example `total : Nat -> (prf : total = supply + vat)`).\n\
- Discharge proofs in smart constructors with `Refl` where possible.\n\
- No IO; pure types and values only.\n\
- Reply with a single ```idris code block containing the whole module.";

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:idris2?|idr)?[ \t]*\r?\n(.*?)```").unwrap());

/// Builds the prompt that turns project inputs into an Idris2 domain model.
///
/// Feedback on earlier versions is appended so regeneration takes it into
/// account.
pub fn generation_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "You are an Idris2 expert modelling a {doc} for project '{project}'.\n\n\
         Write a complete Idris2 domain model starting with `module Domains.{module}`.\n\
         Numeric fields (amounts, dates, payment schedules) must be proven consistent \
         by the type checker.\n\n\
         Requirements:\n{prompt}\n",
        doc = request.document_type,
        project = request.project,
        module = request.module_name,
        prompt = request.prompt.trim(),
    );

    if !request.reference_docs.is_empty() {
        prompt.push_str("\nReference documents:\n");
        for doc in &request.reference_docs {
            prompt.push_str(&format!("- {}\n", doc));
        }
    }

    if !request.feedback.is_empty() {
        tracing::debug!(
            project = %request.project,
            entries = request.feedback.len(),
            "adding feedback history to generation prompt"
        );
        prompt.push_str(&format!(
            "\nThis is version {}. Apply all feedback given on earlier versions:\n",
            request.version
        ));
        for entry in &request.feedback {
            prompt.push_str(&format!("- {}\n", entry));
        }
    }

    format!("{}{}", prompt, MODEL_RULES)
}

/// Builds the prompt asking for a fix of a compiler diagnostic.
pub fn repair_prompt(unit: &SourceUnit, diagnostic: &str) -> String {
    format!(
        "The Idris2 module `Domains.{module}` failed to compile.\n\n\
         Compiler output:\n```\n{diagnostic}\n```\n\n\
         Current source:\n```idris\n{source}\n```\n\n\
         Fix the error without changing the meaning of the model. \
         Reply with a single ```idris code block containing the whole corrected module.",
        module = unit.module_name,
        diagnostic = diagnostic.trim(),
        source = unit.source.trim_end(),
    )
}

/// Extracts Idris source from model output.
///
/// Takes the first fenced block; without one, takes everything from the
/// first `module` line. Returns `None` if neither is found.
pub fn extract_source(output: &str) -> Option<String> {
    let body = match CODE_BLOCK.captures(output).and_then(|caps| caps.get(1)) {
        Some(block) => block.as_str(),
        None => {
            let mut offset = 0;
            let mut start = None;
            for line in output.split_inclusive('\n') {
                if line.trim_start().starts_with("module ") {
                    start = Some(offset);
                    break;
                }
                offset += line.len();
            }
            &output[start?..]
        }
    };

    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("{}\n", trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            project: "supply_deal".to_string(),
            module_name: "SupplyDeal".to_string(),
            version: 1,
            document_type: "contract".to_string(),
            prompt: "Supply contract for 50,000,000 KRW plus VAT".to_string(),
            reference_docs: vec!["plan.md".to_string()],
            feedback: Vec::new(),
        }
    }

    #[test]
    fn generation_prompt_names_module_and_references() {
        let prompt = generation_prompt(&request());
        assert!(prompt.contains("module Domains.SupplyDeal"));
        assert!(prompt.contains("- plan.md"));
        assert!(prompt.contains("50,000,000 KRW"));
        assert!(prompt.ends_with(MODEL_RULES));
        assert!(!prompt.contains("earlier versions"));
    }

    #[test]
    fn generation_prompt_includes_feedback() {
        let mut request = request();
        request.version = 2;
        request.feedback = vec!["v1: add a late payment clause".to_string()];

        let prompt = generation_prompt(&request);
        assert!(prompt.contains("This is version 2"));
        assert!(prompt.contains("- v1: add a late payment clause"));
    }

    #[test]
    fn repair_prompt_contains_diagnostic_and_source() {
        let unit = SourceUnit {
            project: "supply_deal".to_string(),
            module_name: "SupplyDeal".to_string(),
            version: 1,
            source: "module Domains.SupplyDeal\n".to_string(),
        };
        let prompt = repair_prompt(&unit, "parse error at 12:4\n");
        assert!(prompt.contains("parse error at 12:4"));
        assert!(prompt.contains("module Domains.SupplyDeal"));
    }

    #[test]
    fn extract_source_prefers_fenced_block() {
        let output = "Here you go:\n```idris\nmodule Domains.A\n\nx : Nat\n```\nDone.";
        assert_eq!(
            extract_source(output).as_deref(),
            Some("module Domains.A\n\nx : Nat\n")
        );
    }

    #[test]
    fn extract_source_accepts_unlabelled_fence() {
        let output = "```\nmodule Domains.B\n```";
        assert_eq!(extract_source(output).as_deref(), Some("module Domains.B\n"));
    }

    #[test]
    fn extract_source_falls_back_to_module_line() {
        let output = "Sure.\nmodule Domains.C\n\ny : Nat\ny = 1\n";
        assert_eq!(
            extract_source(output).as_deref(),
            Some("module Domains.C\n\ny : Nat\ny = 1\n")
        );
    }

    #[test]
    fn extract_source_rejects_prose() {
        assert_eq!(extract_source("I cannot help with that."), None);
        assert_eq!(extract_source("```idris\n\n```"), None);
    }
}
