// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Judge prompts and their output schemas
//!
//! Templates use `{name}` placeholders filled by [`fill`].

use serde_json::{json, Value};

/// One judge call: system prompt, user prompt template and answer schema
pub(super) struct Call {
    pub stage: &'static str,
    pub system: &'static str,
    pub template: &'static str,
    pub schema: fn() -> Value,
}

/// Substitute `{name}` placeholders in a single pass, leaving unknown braces
/// untouched
pub(super) fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (close, *value))
        });
        match replacement {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn string_list(key: &str) -> Value {
    json!({
        "type": "object",
        "properties": { (key): { "type": "array", "items": { "type": "string" } } },
        "required": [(key)]
    })
}

fn verdict_list(item_key: &str, verdict: Value) -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdicts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        (item_key): { "type": "string" },
                        "verdict": verdict,
                        "reasoning": { "type": "string" }
                    },
                    "required": [(item_key), "verdict", "reasoning"]
                }
            }
        },
        "required": ["verdicts"]
    })
}

// ─────────────────────────────────────────────────────────────────────────
// Summarization
// ─────────────────────────────────────────────────────────────────────────

fn keyphrases_schema() -> Value {
    string_list("keyphrases")
}

pub(super) const KEYPHRASES: Call = Call {
    stage: "keyphrases",
    system: "You extract the key entities and concepts from a text and nothing else.",
    template: "List the most important keyphrases in the text below: people, \
organizations, dates, places, key concepts, findings and technical terms.
Give between 5 and 20, most important first.

Text:
{source}",
    schema: keyphrases_schema,
};

pub(super) const QUESTIONS: Call = Call {
    stage: "questions",
    system: "You write closed yes/no questions that check whether a text covers \
a piece of information.",
    template: "Write one yes/no question for each keyphrase below. The source text \
must answer every question with a plain YES or NO.

Keyphrases:
{keyphrases}

Source text:
{source}",
    schema: questions_schema,
};

fn questions_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "keyphrase": { "type": "string" },
                        "question": { "type": "string" }
                    },
                    "required": ["keyphrase", "question"]
                }
            }
        },
        "required": ["questions"]
    })
}

pub(super) const ANSWERS: Call = Call {
    stage: "answers",
    system: "You check whether a summary holds enough information to answer \
questions about its source.",
    template: "For each question, answer YES if the summary below contains enough \
information to answer it and NO otherwise.

Summary:
{summary}

Questions:
{questions}",
    schema: answers_schema,
};

fn answers_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "answers": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": { "type": "string" },
                        "answer": { "type": "string", "enum": ["YES", "NO"] },
                        "reasoning": { "type": "string" }
                    },
                    "required": ["question", "answer", "reasoning"]
                }
            }
        },
        "required": ["answers"]
    })
}

// ─────────────────────────────────────────────────────────────────────────
// Claims (faithfulness, hallucination)
// ─────────────────────────────────────────────────────────────────────────

pub(super) const CLAIMS: Call = Call {
    stage: "claims",
    system: "You split text into atomic factual statements, naming things \
explicitly instead of using pronouns.",
    template: "Split the text below into atomic factual claims. Every claim must \
stand on its own and name its subject explicitly. Leave out opinions and \
statements about the text itself.

Text:
{response}",
    schema: claims_schema,
};

fn claims_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "claims": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "claim": { "type": "string" },
                        "original_sentence": { "type": "string" }
                    },
                    "required": ["claim", "original_sentence"]
                }
            }
        },
        "required": ["claims"]
    })
}

fn support_schema() -> Value {
    verdict_list("claim", json!({ "type": "integer", "enum": [0, 1] }))
}

pub(super) const SUPPORT: Call = Call {
    stage: "support",
    system: "You decide, claim by claim, whether a source text supports it.",
    template: "For each claim, give verdict 1 when the source text clearly supports \
it and 0 when it does not or contradicts it.

Source text:
{source}

Claims:
{claims}",
    schema: support_schema,
};

pub(super) const CONTRADICTION: Call = Call {
    stage: "contradiction",
    system: "You detect contradictions: for each claim decide whether the context \
supports it, says nothing about it, or contradicts it.",
    template: "Classify each claim against the context:
- \"supported\": the context clearly supports the claim.
- \"neutral\": the context neither supports nor contradicts the claim.
- \"contradicted\": the context directly contradicts the claim.

Context:
{context}

Claims:
{claims}",
    schema: contradiction_schema,
};

fn contradiction_schema() -> Value {
    verdict_list(
        "claim",
        json!({ "type": "string", "enum": ["supported", "neutral", "contradicted"] }),
    )
}

// ─────────────────────────────────────────────────────────────────────────
// Single three-way verdicts
// ─────────────────────────────────────────────────────────────────────────

fn three_way() -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": { "type": "string", "enum": ["full", "partial", "none"] },
            "reasoning": { "type": "string" }
        },
        "required": ["verdict", "reasoning"]
    })
}

pub(super) const CONTEXT_RELEVANCE: Call = Call {
    stage: "context_relevance",
    system: "You judge retrieval quality: does the retrieved context contain what \
is needed to answer the question?",
    template: "Does the context below contain enough information to answer the question?

Question:
{question}

Context:
{context}

Answer \"full\" if the context answers the question completely, \"partial\" if \
it helps but is not enough, and \"none\" if it holds nothing relevant.",
    schema: three_way,
};

pub(super) const CONTEXT_UTILIZATION: Call = Call {
    stage: "context_utilization",
    system: "You judge whether a response made use of the relevant information in \
the context it was given.",
    template: "Did the response use all of the relevant information in the context to \
answer the question? Judge use of the context, not style.

Question:
{question}

Context:
{context}

Response:
{response}

Answer \"full\" if it used all relevant information, \"partial\" if it missed \
important parts, and \"none\" if it used none of it.",
    schema: three_way,
};

pub(super) const CONTEXT_CONCISENESS: Call = Call {
    stage: "context_conciseness",
    system: "You judge context compression: does the condensed context keep what \
matters for the question?",
    template: "Does the concise context keep all of the information from the original \
context that matters for answering the question?

Question:
{question}

Original context:
{context}

Concise context:
{concise_context}

Answer \"full\" if nothing relevant was lost, \"partial\" if some important \
information was lost, and \"none\" if most or all of it was lost.",
    schema: three_way,
};

// ─────────────────────────────────────────────────────────────────────────
// Factual accuracy
// ─────────────────────────────────────────────────────────────────────────

fn facts_schema() -> Value {
    string_list("facts")
}

pub(super) const FACTS: Call = Call {
    stage: "facts",
    system: "You extract independent, atomic factual statements from text.",
    template: "List the key factual statements made in the response below, at most 10. \
Each must stand on its own and name its subject explicitly.

Response:
{response}",
    schema: facts_schema,
};

pub(super) const FACT_CHECK: Call = Call {
    stage: "fact_check",
    system: "You verify facts against a context.",
    template: "Check each fact against the context:
- \"yes\": the context clearly supports the fact.
- \"unclear\": the context neither confirms nor denies it.
- \"no\": the context contradicts it or it is clearly unsupported.

Question (for reference):
{question}

Context:
{context}

Facts:
{facts}",
    schema: fact_check_schema,
};

fn fact_check_schema() -> Value {
    verdict_list(
        "fact",
        json!({ "type": "string", "enum": ["yes", "unclear", "no"] }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_single_pass() {
        let out = fill("A {x} B {y} {unknown} {", &[("x", "{y}"), ("y", "2")]);
        assert_eq!(out, "A {y} B 2 {unknown} {");
    }

    #[test]
    fn test_every_template_placeholder_is_known() {
        let calls = [
            &KEYPHRASES,
            &QUESTIONS,
            &ANSWERS,
            &CLAIMS,
            &SUPPORT,
            &CONTRADICTION,
            &CONTEXT_RELEVANCE,
            &CONTEXT_UTILIZATION,
            &CONTEXT_CONCISENESS,
            &FACTS,
            &FACT_CHECK,
        ];
        let known = [
            "source",
            "summary",
            "keyphrases",
            "questions",
            "response",
            "claims",
            "context",
            "question",
            "concise_context",
            "facts",
        ];
        let values: Vec<(&str, &str)> = known.iter().map(|k| (*k, "")).collect();
        for call in calls {
            assert!(
                !fill(call.template, &values).contains('{'),
                "{} has an unfilled placeholder",
                call.stage
            );
            assert_eq!((call.schema)()["type"], "object");
        }
    }
}
