//! Plain draft renderer that lists the verified model.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

use super::{DraftRenderer, RenderedDraft, SourceUnit};

static NUMERIC_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([a-z][A-Za-z0-9_']*)\s*=\s*(\d+)\s*$").unwrap());

/// Renders the verified source as text and markdown, with the top-level
/// numeric definitions as a CSV table.
#[derive(Debug, Clone, Default)]
pub struct ListingRenderer;

impl ListingRenderer {
    pub fn new() -> Self {
        Self
    }

    fn figures(source: &str) -> Vec<(String, String)> {
        NUMERIC_DEFINITION
            .captures_iter(source)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect()
    }
}

#[async_trait]
impl DraftRenderer for ListingRenderer {
    async fn render(&self, unit: &SourceUnit) -> Result<RenderedDraft> {
        if unit.source.trim().is_empty() {
            return Err(Error::Render("cannot render an empty model".to_string()));
        }

        let figures = Self::figures(&unit.source);
        let title = format!("{} draft (v{})", unit.module_name, unit.version);

        let mut text = format!("{}\n{}\n\n", title, "=".repeat(title.len()));
        let mut markdown = format!("# {}\n\n", title);
        if !figures.is_empty() {
            markdown.push_str("## Figures\n\n| Field | Value |\n|---|---|\n");
            for (field, value) in &figures {
                text.push_str(&format!("{}: {}\n", field, value));
                markdown.push_str(&format!("| {} | {} |\n", field, value));
            }
            text.push('\n');
            markdown.push('\n');
        }
        text.push_str(&unit.source);
        markdown.push_str(&format!(
            "## Verified model\n\n```idris\n{}\n```\n",
            unit.source.trim_end()
        ));

        let csv = (!figures.is_empty()).then(|| {
            let mut csv = String::from("field,value\n");
            for (field, value) in &figures {
                csv.push_str(&format!("{},{}\n", field, value));
            }
            csv
        });

        Ok(RenderedDraft {
            text: Some(text),
            markdown: Some(markdown),
            csv,
        })
    }

    fn name(&self) -> &str {
        "listing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(source: &str) -> SourceUnit {
        SourceUnit {
            project: "supply_deal".to_string(),
            module_name: "SupplyDeal".to_string(),
            version: 2,
            source: source.to_string(),
        }
    }

    #[tokio::test]
    async fn renders_figures_into_every_format() {
        let source = "module Domains.SupplyDeal\n\nsupply : Nat\nsupply = 50000000\n\nvat : Nat\nvat = 5000000\n";
        let draft = ListingRenderer::new().render(&unit(source)).await.unwrap();

        let markdown = draft.markdown.unwrap();
        assert!(markdown.starts_with("# SupplyDeal draft (v2)"));
        assert!(markdown.contains("| supply | 50000000 |"));
        assert!(draft.text.unwrap().contains("vat: 5000000"));
        assert_eq!(
            draft.csv.as_deref(),
            Some("field,value\nsupply,50000000\nvat,5000000\n")
        );
    }

    #[tokio::test]
    async fn no_figures_means_no_csv() {
        let draft = ListingRenderer::new()
            .render(&unit("module Domains.SupplyDeal\n"))
            .await
            .unwrap();
        assert!(draft.has_body());
        assert!(draft.csv.is_none());
    }

    #[tokio::test]
    async fn empty_source_is_render_error() {
        let err = ListingRenderer::new().render(&unit("  \n")).await.unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }
}
