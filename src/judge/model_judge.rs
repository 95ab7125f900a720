// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Judge backed by structured model calls

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::prompts::{self, fill, Call};
use super::{as_text, normalize_context, round4, JudgeError, Scored, Scorer};
use crate::errors::PipelineError;
use crate::llm::{reconcile, ModelClient, ModelRequest};
use crate::pipeline::{Model, Strategy};

static NULL: Value = Value::Null;

/// Scores with chained calls to a [`ModelClient`]
pub struct ModelJudge {
    client: Arc<dyn ModelClient>,
}

impl ModelJudge {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Scorer for ModelJudge {
    async fn score(
        &self,
        strategy: Strategy,
        args: &Map<String, Value>,
        model: Model,
    ) -> Result<Scored, JudgeError> {
        let arg = |key: &str| args.get(key).unwrap_or(&NULL);
        let mut session = Session {
            client: self.client.as_ref(),
            model,
            cost_usd: 0.0,
        };

        let report = match strategy {
            Strategy::Summarization => {
                summarization(&mut session, arg("source"), arg("summary")).await?
            }
            Strategy::Faithfulness => {
                faithfulness(&mut session, arg("source"), arg("response")).await?
            }
            Strategy::Hallucination => {
                hallucination(&mut session, arg("context"), arg("response")).await?
            }
            Strategy::ContextRelevance => {
                let question = as_text(arg("question"));
                let context = normalize_context(arg("context"));
                three_way(
                    &mut session,
                    &prompts::CONTEXT_RELEVANCE,
                    &[("question", &question), ("context", &context)],
                )
                .await?
            }
            Strategy::ContextUtilization => {
                let question = as_text(arg("question"));
                let context = normalize_context(arg("context"));
                let response = as_text(arg("response"));
                three_way(
                    &mut session,
                    &prompts::CONTEXT_UTILIZATION,
                    &[
                        ("question", &question),
                        ("context", &context),
                        ("response", &response),
                    ],
                )
                .await?
            }
            Strategy::ContextConciseness => {
                let question = as_text(arg("question"));
                let context = normalize_context(arg("context"));
                let concise = normalize_context(arg("concise_context"));
                three_way(
                    &mut session,
                    &prompts::CONTEXT_CONCISENESS,
                    &[
                        ("question", &question),
                        ("context", &context),
                        ("concise_context", &concise),
                    ],
                )
                .await?
            }
            Strategy::FactualAccuracy => {
                factual_accuracy(&mut session, arg("question"), arg("context"), arg("response"))
                    .await?
            }
        };

        Ok(Scored {
            report,
            cost_usd: session.cost_usd,
        })
    }
}

/// Calls made for one judgement, with their running cost
struct Session<'a> {
    client: &'a dyn ModelClient,
    model: Model,
    cost_usd: f64,
}

impl Session<'_> {
    async fn ask(&mut self, call: &Call, values: &[(&str, &str)]) -> Result<Value, JudgeError> {
        let schema = (call.schema)();
        let request = ModelRequest::new(fill(call.template, values), self.model)
            .with_system_prompt(Some(call.system.to_string()))
            .with_output_schema(Some(schema.clone()));

        debug!(stage = call.stage, model = %self.model, "Judge call");
        let response = self.client.complete(request).await?;
        self.cost_usd += response.cost_usd.unwrap_or(0.0);

        reconcile(call.stage, &response, Some(&schema)).map_err(|err| JudgeError::Output {
            stage: call.stage,
            message: match err {
                PipelineError::Llm { message, .. } => message,
                other => other.to_string(),
            },
        })
    }
}

fn list(answer: &Value, key: &str) -> Vec<Value> {
    answer
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn numbered<'a>(items: impl Iterator<Item = &'a Value>, field: &str) -> String {
    items
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, as_text(item.get(field).unwrap_or(item))))
        .collect::<Vec<_>>()
        .join("\n")
}

fn ratio(part: usize, total: usize, empty: f64) -> f64 {
    if total == 0 {
        empty
    } else {
        part as f64 / total as f64
    }
}

/// Shorter summaries score higher; an empty source scores 1
fn conciseness(source: &str, summary: &str) -> f64 {
    let source_len = source.chars().count();
    let summary_len = summary.chars().count();
    if source_len == 0 {
        return 1.0;
    }
    1.0 - summary_len.min(source_len) as f64 / (source_len as f64 + 1e-10)
}

/// Keyphrases → yes/no questions → can the summary answer them.
/// Score is the mean of question coverage and conciseness.
async fn summarization(
    session: &mut Session<'_>,
    source: &Value,
    summary: &Value,
) -> Result<Value, JudgeError> {
    let source = as_text(source);
    let summary = as_text(summary);
    let concise = round4(conciseness(&source, &summary));

    let empty = |keyphrases: &[Value]| {
        json!({
            "score": 0.0,
            "qa_score": 0.0,
            "conciseness": concise,
            "total_questions": 0,
            "correct_answers": 0,
            "keyphrases": keyphrases,
            "questions": [],
            "answers": []
        })
    };

    let answer = session
        .ask(&prompts::KEYPHRASES, &[("source", &source)])
        .await?;
    let keyphrases = list(&answer, "keyphrases");
    if keyphrases.is_empty() {
        return Ok(empty(&keyphrases));
    }

    let keyphrase_lines = keyphrases
        .iter()
        .map(|k| format!("- {}", as_text(k)))
        .collect::<Vec<_>>()
        .join("\n");
    let answer = session
        .ask(
            &prompts::QUESTIONS,
            &[("keyphrases", &keyphrase_lines), ("source", &source)],
        )
        .await?;
    let questions = list(&answer, "questions");
    if questions.is_empty() {
        return Ok(empty(&keyphrases));
    }

    let question_lines = numbered(questions.iter(), "question");
    let answer = session
        .ask(
            &prompts::ANSWERS,
            &[("summary", &summary), ("questions", &question_lines)],
        )
        .await?;
    let answers = list(&answer, "answers");

    let correct = answers
        .iter()
        .filter(|a| a.get("answer").and_then(Value::as_str) == Some("YES"))
        .count();
    let qa_score = ratio(correct, questions.len(), 0.0);
    let score = qa_score * 0.5 + conciseness(&source, &summary) * 0.5;

    Ok(json!({
        "score": round4(score),
        "qa_score": round4(qa_score),
        "conciseness": concise,
        "total_questions": questions.len(),
        "correct_answers": correct,
        "keyphrases": keyphrases,
        "questions": questions,
        "answers": answers
    }))
}

/// Claims in the response → is each supported by the source
async fn faithfulness(
    session: &mut Session<'_>,
    source: &Value,
    response: &Value,
) -> Result<Value, JudgeError> {
    let source = as_text(source);
    let response = as_text(response);

    let answer = session
        .ask(&prompts::CLAIMS, &[("response", &response)])
        .await?;
    let claims = list(&answer, "claims");
    if claims.is_empty() {
        return Ok(json!({
            "score": 1.0,
            "supported_claims": 0,
            "total_claims": 0,
            "claims": [],
            "verdicts": []
        }));
    }

    let claim_lines = numbered(claims.iter(), "claim");
    let answer = session
        .ask(
            &prompts::SUPPORT,
            &[("source", &source), ("claims", &claim_lines)],
        )
        .await?;
    let verdicts = list(&answer, "verdicts");

    let supported = verdicts
        .iter()
        .filter(|v| v.get("verdict").and_then(Value::as_i64) == Some(1))
        .count();

    Ok(json!({
        "score": round4(ratio(supported, claims.len(), 1.0)),
        "supported_claims": supported,
        "total_claims": claims.len(),
        "claims": claims,
        "verdicts": verdicts
    }))
}

/// Claims in the response → does the context contradict them.
/// Neutral claims are not penalised.
async fn hallucination(
    session: &mut Session<'_>,
    context: &Value,
    response: &Value,
) -> Result<Value, JudgeError> {
    let context = normalize_context(context);
    let response = as_text(response);

    let answer = session
        .ask(&prompts::CLAIMS, &[("response", &response)])
        .await?;
    let claims = list(&answer, "claims");
    if claims.is_empty() {
        return Ok(json!({
            "score": 1.0,
            "contradicted_claims": 0,
            "total_claims": 0,
            "claims": [],
            "verdicts": []
        }));
    }

    let claim_lines = numbered(claims.iter(), "claim");
    let answer = session
        .ask(
            &prompts::CONTRADICTION,
            &[("context", &context), ("claims", &claim_lines)],
        )
        .await?;
    let verdicts = list(&answer, "verdicts");

    let contradicted = verdicts
        .iter()
        .filter(|v| v.get("verdict").and_then(Value::as_str) == Some("contradicted"))
        .count();

    Ok(json!({
        "score": round4(1.0 - ratio(contradicted, claims.len(), 0.0)),
        "contradicted_claims": contradicted,
        "total_claims": claims.len(),
        "claims": claims,
        "verdicts": verdicts
    }))
}

/// One full/partial/none verdict
async fn three_way(
    session: &mut Session<'_>,
    call: &Call,
    values: &[(&str, &str)],
) -> Result<Value, JudgeError> {
    let answer = session.ask(call, values).await?;
    let verdict = answer
        .get("verdict")
        .and_then(Value::as_str)
        .unwrap_or("none")
        .to_string();
    let score = match verdict.as_str() {
        "full" => 1.0,
        "partial" => 0.5,
        _ => 0.0,
    };

    Ok(json!({
        "score": score,
        "verdict": verdict,
        "reasoning": answer.get("reasoning").cloned().unwrap_or_else(|| json!(""))
    }))
}

/// Facts in the response → yes/unclear/no against the context, averaged
async fn factual_accuracy(
    session: &mut Session<'_>,
    question: &Value,
    context: &Value,
    response: &Value,
) -> Result<Value, JudgeError> {
    let question = as_text(question);
    let context = normalize_context(context);
    let response = as_text(response);

    let answer = session
        .ask(&prompts::FACTS, &[("response", &response)])
        .await?;
    let facts = list(&answer, "facts");
    if facts.is_empty() {
        return Ok(json!({ "score": 1.0, "facts": [], "verdicts": [] }));
    }

    let fact_lines = numbered(facts.iter(), "fact");
    let answer = session
        .ask(
            &prompts::FACT_CHECK,
            &[
                ("question", &question),
                ("context", &context),
                ("facts", &fact_lines),
            ],
        )
        .await?;
    let verdicts = list(&answer, "verdicts");

    let total: f64 = verdicts
        .iter()
        .map(|v| match v.get("verdict").and_then(Value::as_str) {
            Some("yes") => 1.0,
            Some("unclear") => 0.5,
            _ => 0.0,
        })
        .sum();
    let score = if verdicts.is_empty() {
        1.0
    } else {
        total / verdicts.len() as f64
    };

    Ok(json!({
        "score": round4(score),
        "facts": facts,
        "verdicts": verdicts
    }))
}
