//! Relevance ranking of a batch of papers with one LLM call.
//!
//! The model answers with tagged records such as
//! `<paper id="2401.01234v1" score="5" recommend="true">why</paper>`. Its
//! output is not trusted to be well-formed markup, so records are picked out
//! with a lenient scanner: every record that carries an id is used, anything
//! else is skipped without an error.
//!
//! Ranking is a quality filter. When the model cannot be reached the input
//! list is returned unchanged.

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::paper::Paper;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const FALLBACK_INTERESTS: &str = "general research interests";
pub const DEFAULT_MAX_TOKENS: u32 = 3000;

/// The model's verdict on one paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub id: String,
    /// Relevance from 1 to 5, when the model gave a readable score.
    pub score: Option<u8>,
    pub recommend: bool,
    pub rationale: String,
}

pub struct PaperRecommender {
    client: Arc<dyn LlmClient>,
    interests: String,
    max_tokens: u32,
    open_tag: Regex,
    close_tag: Regex,
    attribute: Regex,
}

impl PaperRecommender {
    pub fn new(client: Arc<dyn LlmClient>, interests: impl Into<String>) -> Self {
        Self {
            client,
            interests: interests.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            open_tag: Regex::new(r"(?i)<paper\b([^>]*)>").unwrap(),
            close_tag: Regex::new(r"(?i)</paper\s*>").unwrap(),
            attribute: Regex::new(r#"(?i)([a-z_][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
                .unwrap(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Interest statement used in prompts, never empty.
    pub fn interests(&self) -> &str {
        let trimmed = self.interests.trim();
        if trimmed.is_empty() {
            FALLBACK_INTERESTS
        } else {
            trimmed
        }
    }

    pub fn build_prompt(&self, papers: &[&Paper]) -> String {
        let listing = papers
            .iter()
            .enumerate()
            .map(|(i, paper)| {
                format!(
                    "Paper {}:\nTitle: {}\nID: {}\nAbstract: {}\n",
                    i + 1,
                    paper.title,
                    paper.id,
                    paper.abstract_text.as_deref().unwrap_or_default().trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "I have {} research papers and need to know which ones are most relevant to my research interests.\n\n\
            My research interests are: {}\n\n\
            Here are the papers:\n\n\
            {}\n\
            Rate each paper's relevance to my interests from 1 to 5 (5 is highly relevant, 1 is not relevant). \
            Only recommend papers with a score of 4 or 5.\n\n\
            Format your response EXACTLY like this:\n\
            <recommendations>\n\
            <paper id=\"PAPER_ID\" score=\"SCORE\" recommend=\"true/false\">One or two sentences on why the paper is or isn't relevant</paper>\n\
            <!-- one <paper> record per paper -->\n\
            </recommendations>\n\n\
            Be selective: only recommend papers that are genuinely highly relevant to the stated interests.",
            papers.len(),
            self.interests(),
            listing
        )
    }

    /// Every record in `response` that names an id. Never fails.
    pub fn parse_recommendations(&self, response: &str) -> Vec<Recommendation> {
        let opens: Vec<_> = self.open_tag.captures_iter(response).collect();
        let mut records = Vec::with_capacity(opens.len());

        for (i, caps) in opens.iter().enumerate() {
            let (Some(whole), Some(attrs)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            let mut attributes: HashMap<String, String> = HashMap::new();
            for a in self.attribute.captures_iter(attrs.as_str()) {
                let value = a.get(2).or_else(|| a.get(3)).map(|m| m.as_str()).unwrap_or_default();
                attributes
                    .entry(a[1].to_ascii_lowercase())
                    .or_insert_with(|| value.to_string());
            }

            let id = match attributes.get("id").map(|v| v.trim()) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => {
                    debug!(tag = whole.as_str(), "skipping record without id");
                    continue;
                }
            };

            // Body runs to the closing tag, but never into the next record.
            let body_end = opens
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(response.len());
            let body = &response[whole.end()..body_end];
            let rationale = match self.close_tag.find(body) {
                Some(close) => &body[..close.start()],
                None if attrs.as_str().trim_end().ends_with('/') => "",
                None => body,
            };

            records.push(Recommendation {
                id,
                score: attributes.get("score").and_then(|s| parse_score(s)),
                recommend: attributes
                    .get("recommend")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
                rationale: rationale.trim().to_string(),
            });
        }

        records
    }

    /// Ids the model recommended.
    pub fn recommended_ids(&self, response: &str) -> HashSet<String> {
        self.parse_recommendations(response)
            .into_iter()
            .filter(|r| r.recommend)
            .map(|r| r.id)
            .collect()
    }

    /// Ask the model about every paper that has an abstract. No call is made
    /// when none has one.
    pub async fn rank(&self, papers: &[Paper]) -> Result<Vec<Recommendation>, LlmError> {
        let rankable: Vec<&Paper> = papers.iter().filter(|p| p.has_abstract()).collect();
        if rankable.is_empty() {
            return Ok(Vec::new());
        }

        let request = CompletionRequest::new(self.build_prompt(&rankable), self.max_tokens);
        let response = self.client.complete(&request).await?;
        Ok(self.parse_recommendations(&response))
    }

    /// The recommended subset of `papers`, in input order. Papers without an
    /// abstract cannot be ranked and are dropped. If the model call fails the
    /// input comes back unfiltered.
    pub async fn recommend_papers(&self, papers: Vec<Paper>) -> Vec<Paper> {
        if papers.is_empty() {
            return Vec::new();
        }
        if !papers.iter().any(Paper::has_abstract) {
            warn!("no papers with abstracts found");
            return Vec::new();
        }

        let decisions = match self.rank(&papers).await {
            Ok(decisions) => decisions,
            Err(e) => {
                error!(error = %e, "error getting recommendations, keeping all papers");
                return papers;
            }
        };

        for d in &decisions {
            debug!(id = %d.id, score = ?d.score, recommend = d.recommend, rationale = %d.rationale, "ranked");
        }

        let ids: HashSet<&str> = decisions
            .iter()
            .filter(|d| d.recommend)
            .map(|d| d.id.as_str())
            .collect();

        let total = papers.len();
        let recommended: Vec<Paper> = papers
            .into_iter()
            .filter(|p| p.has_abstract() && ids.contains(p.id.as_str()))
            .collect();

        info!(recommended = recommended.len(), total, "recommendations ready");
        recommended
    }
}

fn parse_score(raw: &str) -> Option<u8> {
    let value: f32 = raw.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.round().clamp(1.0, 5.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;

    fn paper(id: &str, abstract_text: Option<&str>) -> Paper {
        let mut p = Paper::new(id, format!("Title {}", id), format!("https://arxiv.org/abs/{}", id));
        p.abstract_text = abstract_text.map(str::to_string);
        p
    }

    fn recommender(llm: &ScriptedLlm) -> PaperRecommender {
        PaperRecommender::new(
            Arc::new(llm.clone()),
            "mechanistic interpretability and circuit discovery",
        )
    }

    const RESPONSE: &str = r#"
        <recommendations>
        <paper id="2401.01234" score="5" recommend="true">Highly relevant to circuit discovery</paper>
        <paper id="2401.01235" score="2" recommend="false">Not very relevant</paper>
        <paper id="2401.01236" score="4" recommend="true">Good match for interpretability</paper>
        </recommendations>
    "#;

    #[test]
    fn prompt_lists_every_paper_and_interests() {
        let llm = ScriptedLlm::new();
        let a = paper("2401.01234", Some("This paper explores circuit discovery in neural networks."));
        let b = paper("2401.01235", Some("This paper discusses attention mechanisms."));

        let prompt = recommender(&llm).build_prompt(&[&a, &b]);

        assert!(prompt.contains("mechanistic interpretability and circuit discovery"));
        assert!(prompt.contains("Paper 1:\nTitle: Title 2401.01234\nID: 2401.01234"));
        assert!(prompt.contains("Paper 2:"));
        assert!(prompt.contains("attention mechanisms"));
        assert!(prompt.contains("recommend=\"true/false\""));
    }

    #[test]
    fn blank_interests_use_fallback() {
        let llm = ScriptedLlm::new();
        let r = PaperRecommender::new(Arc::new(llm), "   ");
        assert_eq!(r.interests(), FALLBACK_INTERESTS);
        assert!(r.build_prompt(&[]).contains(FALLBACK_INTERESTS));
    }

    #[test]
    fn parses_true_and_false_records() {
        let llm = ScriptedLlm::new();
        let records = recommender(&llm).parse_recommendations(RESPONSE);

        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            Recommendation {
                id: "2401.01234".to_string(),
                score: Some(5),
                recommend: true,
                rationale: "Highly relevant to circuit discovery".to_string(),
            }
        );
        assert!(!records[1].recommend);

        let ids = recommender(&llm).recommended_ids(RESPONSE);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("2401.01234"));
        assert!(ids.contains("2401.01236"));
    }

    #[test]
    fn scanner_is_lenient_about_case_order_and_quotes() {
        let llm = ScriptedLlm::new();
        let text = r#"
            <PAPER Recommend="TRUE" ID="a1" score='4.4'>upper</PAPER>
            <paper score="9" recommend='true' id='b2'>clamped
            <paper recommend="true">no id at all</paper>
            <paper id="c3" recommend="yes">not exactly true</paper>
            <paper id="d4" recommend="true"/>
            <paper id="e5 broken
        "#;

        let records = recommender(&llm).parse_recommendations(text);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();

        assert_eq!(ids, vec!["a1", "b2", "c3", "d4"]);
        assert_eq!(records[0].score, Some(4));
        assert_eq!(records[1].score, Some(5));
        assert_eq!(records[1].rationale, "clamped");
        assert!(!records[2].recommend);
        assert!(records[3].recommend);
        assert_eq!(records[3].rationale, "");
    }

    #[test]
    fn garbage_yields_nothing() {
        let llm = ScriptedLlm::new();
        let r = recommender(&llm);
        assert!(r.parse_recommendations("").is_empty());
        assert!(r.parse_recommendations("<<<>>> <paper <paper>").is_empty());
        assert!(r.recommended_ids("I recommend all of them!").is_empty());
    }

    #[tokio::test]
    async fn keeps_recommended_papers_in_input_order() {
        let llm = ScriptedLlm::new().with_reply(
            r#"<paper id="p3" score="4" recommend="true">x</paper>
               <paper id="p2" score="1" recommend="false">y</paper>
               <paper id="p1" score="5" recommend="true">z</paper>"#,
        );
        let papers = vec![
            paper("p1", Some("one")),
            paper("p2", Some("two")),
            paper("p3", Some("three")),
        ];

        let result = recommender(&llm).recommend_papers(papers).await;

        let ids: Vec<_> = result.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert_eq!(llm.requests()[0].max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[tokio::test]
    async fn llm_failure_returns_input_unchanged() {
        let llm = ScriptedLlm::new().with_error(LlmError::Transport("connection refused".into()));
        let papers = vec![paper("p1", Some("one")), paper("p2", None)];

        let result = recommender(&llm).recommend_papers(papers.clone()).await;

        assert_eq!(result, papers);
    }

    #[tokio::test]
    async fn empty_input_makes_no_call() {
        let llm = ScriptedLlm::new();
        assert!(recommender(&llm).recommend_papers(Vec::new()).await.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn papers_without_abstracts_make_no_call() {
        let llm = ScriptedLlm::new();
        let papers = vec![paper("p1", None), paper("p2", Some("   "))];

        let result = recommender(&llm).recommend_papers(papers).await;

        assert!(result.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn papers_without_abstracts_are_left_out_of_prompt_and_result() {
        let llm = ScriptedLlm::new().with_reply(
            r#"<paper id="p1" recommend="true">a</paper><paper id="p2" recommend="true">b</paper>"#,
        );
        let papers = vec![paper("p1", Some("one")), paper("p2", None)];

        let result = recommender(&llm).recommend_papers(papers).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "p1");
        let prompt = &llm.requests()[0].prompt;
        assert!(prompt.contains("ID: p1"));
        assert!(!prompt.contains("ID: p2"));
    }
}
