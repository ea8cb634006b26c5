//! Health-relevance judging.
//!
//! The LLM judge scores a whole candidate batch in one call. When it accepts
//! nothing (or cannot be reached) a local keyword scorer picks a handful of
//! candidates instead, trading precision for a non-empty discovery cycle.

use crate::config::JudgeConfig;
use crate::error::{Result, ScoutError};
use crate::model::RawTweet;
use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keyword fallback keeps candidates scoring at least this much.
pub const FALLBACK_MIN_KEYWORD_SCORE: u32 = 2;
/// Keyword fallback returns at most this many candidates.
pub const FALLBACK_MAX_RESULTS: usize = 5;
/// Floor for the synthetic score given to fallback picks.
const FALLBACK_SCORE_FLOOR: f64 = 4.0;
const MAX_SCORE: f64 = 10.0;

const PRIMARY_KEYWORDS: &[&str] = &[
    "health",
    "wellness",
    "nutrition",
    "fitness",
    "metabolism",
    "longevity",
    "sleep",
    "exercise",
    "mental health",
    "gut health",
    "immune",
    "hormone",
    "supplement",
    "diet",
];

const SECONDARY_KEYWORDS: &[&str] = &[
    "study",
    "research",
    "protein",
    "workout",
    "fasting",
    "vitamin",
    "cortisol",
    "insulin",
    "glucose",
    "inflammation",
    "microbiome",
    "cardio",
    "strength",
    "recovery",
    "meditation",
    "cold exposure",
    "sauna",
];

const TERTIARY_KEYWORDS: &[&str] = &[
    "energy",
    "brain",
    "body",
    "habit",
    "stress",
    "focus",
    "walk",
    "muscle",
    "heart",
    "breath",
    "doctor",
    "calories",
];

struct KeywordTable {
    matcher: AhoCorasick,
    weights: Vec<u32>,
}

static KEYWORDS: Lazy<KeywordTable> = Lazy::new(|| {
    let tiers = [
        (PRIMARY_KEYWORDS, 3),
        (SECONDARY_KEYWORDS, 2),
        (TERTIARY_KEYWORDS, 1),
    ];
    let (patterns, weights): (Vec<&str>, Vec<u32>) = tiers
        .iter()
        .flat_map(|(words, weight)| words.iter().map(move |w| (*w, *weight)))
        .unzip();
    KeywordTable {
        matcher: AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .expect("keyword automaton"),
        weights,
    }
});

/// Weighted keyword score: each distinct keyword counts once.
#[must_use]
pub fn keyword_score(text: &str) -> u32 {
    let matched: HashSet<usize> = KEYWORDS
        .matcher
        .find_overlapping_iter(text)
        .map(|m| m.pattern().as_usize())
        .collect();
    matched.iter().map(|&idx| KEYWORDS.weights[idx]).sum()
}

/// One candidate as presented to the judge.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeInput {
    pub content: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl From<&RawTweet> for JudgeInput {
    fn from(tweet: &RawTweet) -> Self {
        Self {
            content: tweet.tweet_content.clone(),
            author: tweet.tweet_author.clone(),
            bio: None,
        }
    }
}

/// Per-candidate verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeVerdict {
    pub score: f64,
    pub is_health_relevant: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub reason: String,
}

impl JudgeVerdict {
    fn rejected() -> Self {
        Self {
            score: 0.0,
            is_health_relevant: false,
            category: String::new(),
            reason: "missing_verdict".to_string(),
        }
    }
}

/// Batch relevance classifier.
#[async_trait]
pub trait HealthJudge: Send + Sync {
    /// Return one verdict per input, in input order.
    async fn batch_judge(&self, items: &[JudgeInput]) -> Result<Vec<JudgeVerdict>>;
}

/// A candidate that survived judging.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgedTweet {
    pub tweet: RawTweet,
    pub score: f64,
    pub category: String,
    pub reason: String,
}

/// Run the judge and fall back to keyword scoring on zero yield or failure.
pub async fn judge_candidates(
    judge: Option<&dyn HealthJudge>,
    candidates: Vec<RawTweet>,
) -> Vec<JudgedTweet> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let Some(judge) = judge else {
        debug!(candidates = candidates.len(), "No judge configured, using keyword scoring");
        return keyword_fallback(candidates);
    };

    let inputs: Vec<JudgeInput> = candidates.iter().map(JudgeInput::from).collect();
    let verdicts = match judge.batch_judge(&inputs).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Relevance judge failed, using keyword fallback");
            return keyword_fallback(candidates);
        }
    };

    let relevant = verdicts.iter().filter(|v| v.is_health_relevant).count();
    if relevant == 0 {
        info!(
            candidates = candidates.len(),
            "Judge accepted nothing, using keyword fallback"
        );
        return keyword_fallback(candidates);
    }

    debug!(relevant, candidates = candidates.len(), "Judge verdicts received");
    candidates
        .into_iter()
        .zip(verdicts)
        .filter_map(|(tweet, verdict)| {
            verdict.is_health_relevant.then(|| JudgedTweet {
                tweet,
                score: verdict.score.clamp(0.0, MAX_SCORE),
                category: verdict.category,
                reason: verdict.reason,
            })
        })
        .collect()
}

/// Keyword-weighted fallback selection.
#[must_use]
pub fn keyword_fallback(candidates: Vec<RawTweet>) -> Vec<JudgedTweet> {
    let mut scored: Vec<(u32, RawTweet)> = candidates
        .into_iter()
        .map(|t| {
            let text = format!("{} {}", t.tweet_content, t.tweet_author);
            (keyword_score(&text), t)
        })
        .filter(|(score, _)| *score >= FALLBACK_MIN_KEYWORD_SCORE)
        .collect();
    // Stable sort keeps document order among equal scores.
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(FALLBACK_MAX_RESULTS);

    info!(selected = scored.len(), "Keyword fallback selected candidates");
    scored
        .into_iter()
        .map(|(kw, tweet)| JudgedTweet {
            tweet,
            score: (f64::from(kw) * 2.0).max(FALLBACK_SCORE_FLOOR).min(MAX_SCORE),
            category: "wellness".to_string(),
            reason: "keyword_fallback".to_string(),
        })
        .collect()
}

const JUDGE_SYSTEM_PROMPT: &str = r#"You classify tweets for a health and wellness account that wants to reply to relevant conversations.

For each numbered tweet, decide whether it is about health, wellness, fitness, nutrition, sleep, mental health, longevity or medical science.

Score 0-10:
- 8-10: clearly about health science or practice
- 5-7: health-adjacent lifestyle content
- 0-4: unrelated, political, promotional, or only mentions health in passing

Respond with JSON only:
{"results": [{"index": 0, "score": 7, "isHealthRelevant": true, "category": "nutrition", "reason": "short reason"}]}

isHealthRelevant must be true only when score >= 6."#;

/// OpenAI-compatible chat-completions judge.
pub struct OpenAiJudge {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiJudge {
    /// Build a judge from configuration, reading the key from the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or the HTTP client cannot be built.
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| ScoutError::EnvVarError {
            var: config.api_key_env.clone(),
            reason: "not set".to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn user_prompt(items: &[JudgeInput]) -> String {
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let bio = item
                    .bio
                    .as_deref()
                    .map(|b| format!("\nAuthor bio: {b}"))
                    .unwrap_or_default();
                format!("[{idx}] @{}: {}{bio}", item.author, item.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl HealthJudge for OpenAiJudge {
    async fn batch_judge(&self, items: &[JudgeInput]) -> Result<Vec<JudgeVerdict>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": JUDGE_SYSTEM_PROMPT },
                { "role": "user", "content": Self::user_prompt(items) },
            ],
        });

        debug!(model = %self.model, items = items.len(), "Relevance judge request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ScoutError::judge(format!("API error ({status}): {text}")));
        }

        let payload: Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ScoutError::judge("response has no message content"))?;

        parse_verdicts(content, items.len())
    }
}

/// Parse the judge's JSON answer into exactly `expected` verdicts.
///
/// Accepts `{"results": [...]}` or a bare array. Items may carry an `index`;
/// otherwise position is used. Missing entries become rejections.
///
/// # Errors
///
/// Returns an error if the content is not JSON of either shape.
pub fn parse_verdicts(content: &str, expected: usize) -> Result<Vec<JudgeVerdict>> {
    let value: Value = serde_json::from_str(content.trim())?;
    let entries = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| ScoutError::judge("response object has no results array"))?,
        _ => return Err(ScoutError::judge("response is neither an object nor an array")),
    };

    let mut verdicts = vec![JudgeVerdict::rejected(); expected];
    for (position, entry) in entries.iter().enumerate() {
        let idx = entry
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(position);
        if idx >= expected {
            continue;
        }
        match serde_json::from_value::<JudgeVerdict>(entry.clone()) {
            Ok(v) => verdicts[idx] = v,
            Err(e) => debug!(index = idx, error = %e, "Skipping malformed verdict"),
        }
    }
    Ok(verdicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tweet(id: &str, content: &str) -> RawTweet {
        RawTweet {
            tweet_id: id.to_string(),
            tweet_url: format!("https://x.com/a/status/{id}"),
            tweet_content: content.to_string(),
            tweet_author: "someone".to_string(),
            like_count: 100,
            reply_count: 1,
            posted_minutes_ago: 30,
            tweet_posted_at: Utc::now(),
        }
    }

    /// Judge that returns canned verdicts or an error.
    struct CannedJudge(Option<Vec<bool>>);

    #[async_trait]
    impl HealthJudge for CannedJudge {
        async fn batch_judge(&self, items: &[JudgeInput]) -> Result<Vec<JudgeVerdict>> {
            let flags = self.0.as_ref().ok_or_else(|| ScoutError::judge("offline"))?;
            Ok(items
                .iter()
                .zip(flags)
                .map(|(_, &relevant)| JudgeVerdict {
                    score: if relevant { 8.0 } else { 1.0 },
                    is_health_relevant: relevant,
                    category: "nutrition".to_string(),
                    reason: "canned".to_string(),
                })
                .collect())
        }
    }

    #[test]
    fn keyword_score_counts_distinct_keywords_once() {
        // study (2) + cold exposure (2) + metabolism (3)
        assert_eq!(keyword_score("New study: cold exposure boosts metabolism"), 2 + 2 + 3);
        assert_eq!(keyword_score("sleep sleep SLEEP"), 3);
        assert_eq!(keyword_score("Quarterly earnings beat estimates"), 0);
    }

    #[test]
    fn fallback_keeps_top_five_above_threshold() {
        let candidates: Vec<RawTweet> = (0..8)
            .map(|i| tweet(&i.to_string(), "Sleep and nutrition research for longevity"))
            .chain([tweet("weak", "Morning walk"), tweet("none", "Stock market recap")])
            .collect();
        let picked = keyword_fallback(candidates);
        assert_eq!(picked.len(), FALLBACK_MAX_RESULTS);
        assert!(picked.iter().all(|j| j.reason == "keyword_fallback"));
        assert!(picked.iter().all(|j| j.category == "wellness"));
        assert!(picked.iter().all(|j| j.score <= 10.0));
    }

    #[test]
    fn fallback_output_is_sorted_and_scored() {
        let picked = keyword_fallback(vec![
            tweet("low", "A short walk helps your brain"),  // walk 1 + brain 1 = 2
            tweet("high", "Sleep study on metabolism"),     // 3 + 2 + 3 = 8
            tweet("zero", "Nothing relevant in this one"),
        ]);
        let ids: Vec<_> = picked.iter().map(|j| j.tweet.tweet_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
        assert_eq!(picked[1].score, 4.0);
        assert_eq!(picked[0].score, 10.0);
    }

    #[tokio::test]
    async fn judge_results_used_when_any_relevant() {
        let judge = CannedJudge(Some(vec![true, false]));
        let out = judge_candidates(
            Some(&judge),
            vec![tweet("1", "Protein timing matters less than total intake"), tweet("2", "Sleep research")],
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tweet.tweet_id, "1");
        assert_eq!(out[0].reason, "canned");
    }

    #[tokio::test]
    async fn fallback_activates_only_on_zero_yield() {
        let judge = CannedJudge(Some(vec![false, false, false]));
        let out = judge_candidates(
            Some(&judge),
            vec![
                tweet("1", "Sleep research on hormone health"),
                tweet("2", "Earnings call transcript"),
                tweet("3", "Fasting and glucose study"),
            ],
        )
        .await;
        let ids: Vec<_> = out.iter().map(|j| j.tweet.tweet_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!(out.iter().all(|j| j.reason == "keyword_fallback"));
    }

    #[tokio::test]
    async fn judge_failure_degrades_to_fallback() {
        let judge = CannedJudge(None);
        let out = judge_candidates(Some(&judge), vec![tweet("1", "Gut health and the microbiome")]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reason, "keyword_fallback");
    }

    #[test]
    fn parse_verdicts_accepts_both_shapes() {
        let obj = r#"{"results": [
            {"index": 1, "score": 8, "isHealthRelevant": true, "category": "sleep", "reason": "sleep science"},
            {"index": 0, "score": 2, "isHealthRelevant": false}
        ]}"#;
        let verdicts = parse_verdicts(obj, 3).unwrap();
        assert_eq!(verdicts.len(), 3);
        assert!(!verdicts[0].is_health_relevant);
        assert!(verdicts[1].is_health_relevant);
        assert_eq!(verdicts[1].category, "sleep");
        assert_eq!(verdicts[2].reason, "missing_verdict");

        let arr = r#"[{"score": 7, "isHealthRelevant": true, "category": "fitness", "reason": "ok"}]"#;
        assert!(parse_verdicts(arr, 1).unwrap()[0].is_health_relevant);
        assert!(parse_verdicts("not json", 1).is_err());
        assert!(parse_verdicts(r#"{"verdicts": []}"#, 1).is_err());
    }
}
