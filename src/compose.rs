//! Answer composition: persona-conditioned prompting and confidence
//! aggregation.
//!
//! A [`Persona`] is a fixed pairing of instruction template and
//! generation temperature; choosing one never changes what was
//! retrieved. Confidence is the arithmetic mean of the source
//! similarities, 0.0 when there are no sources.

use anyhow::Result;
use serde::Serialize;

use crate::generation::Generator;
use crate::models::RetrievedSource;

/// Fixed response personas selectable per query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    /// Accurate, source-grounded answers.
    #[default]
    Plain,
    /// Emphasis on figures, trends, and comparisons.
    Analytical,
    /// Looser phrasing for exploratory questions.
    Creative,
    /// Brief, decision-oriented summaries.
    Executive,
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Plain => "plain",
            Persona::Analytical => "analytical",
            Persona::Creative => "creative",
            Persona::Executive => "executive",
        }
    }

    /// Generation temperature passed through to the collaborator unchanged.
    pub fn temperature(&self) -> f32 {
        match self {
            Persona::Plain => 0.1,
            Persona::Analytical => 0.2,
            Persona::Creative => 0.7,
            Persona::Executive => 0.3,
        }
    }

    /// Fixed system instructions for this persona.
    pub fn instructions(&self) -> &'static str {
        match self {
            Persona::Plain => {
                "You are a helpful assistant that answers questions based on the \
                 provided documents. Always be accurate and cite sources when relevant."
            }
            Persona::Analytical => {
                "You are an analytical assistant. Answer strictly from the provided \
                 documents, lead with the relevant figures, and call out trends, \
                 changes, and anomalies the data supports."
            }
            Persona::Creative => {
                "You are a thoughtful assistant. Ground every claim in the provided \
                 documents, but feel free to connect ideas across sources and \
                 suggest angles the user may not have considered."
            }
            Persona::Executive => {
                "You are briefing an executive. Answer from the provided documents \
                 in a few crisp sentences: the conclusion first, then the one or two \
                 numbers that support it."
            }
        }
    }
}

impl std::str::FromStr for Persona {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Persona::Plain),
            "analytical" => Ok(Persona::Analytical),
            "creative" => Ok(Persona::Creative),
            "executive" => Ok(Persona::Executive),
            other => anyhow::bail!(
                "unknown persona: '{}'. Use plain, analytical, creative, or executive.",
                other
            ),
        }
    }
}

/// A generated answer with its aggregate confidence.
#[derive(Debug, Clone)]
pub struct Composed {
    pub answer: String,
    pub confidence: f64,
}

/// Mean similarity across the selected sources; 0.0 for none.
pub fn confidence(sources: &[RetrievedSource]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    sources.iter().map(|s| s.similarity).sum::<f64>() / sources.len() as f64
}

/// Build the user prompt from the assembled context and question.
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Based on the following context from the user's documents, answer \
         their question accurately and helpfully.\n\n\
         Context:\n{}\n\n\
         Question: {}\n\n\
         Answer:",
        context, question
    )
}

/// Generate an answer from the retrieved context.
///
/// The generation collaborator is invoked exactly once; its failures are
/// surfaced unchanged, never retried here.
pub async fn compose(
    generator: &dyn Generator,
    question: &str,
    context: &str,
    sources: &[RetrievedSource],
    persona: Persona,
) -> Result<Composed> {
    let prompt = build_prompt(question, context);
    let answer = generator
        .generate(persona.instructions(), &prompt, persona.temperature())
        .await?;

    Ok(Composed {
        answer,
        confidence: confidence(sources),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileType;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn source(similarity: f64) -> RetrievedSource {
        RetrievedSource {
            source: "doc.txt".to_string(),
            chunk_index: 0,
            document_id: 1,
            similarity,
            file_type: FileType::Text,
            content_preview: String::new(),
        }
    }

    /// Records the arguments of every generate call.
    struct RecordingGenerator {
        calls: Mutex<Vec<(String, String, f32)>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, system: &str, prompt: &str, temperature: f32) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), prompt.to_string(), temperature));
            Ok("generated answer".to_string())
        }
    }

    #[test]
    fn confidence_is_mean_similarity() {
        let sources = vec![source(0.9), source(0.7), source(0.5)];
        assert!((confidence(&sources) - 0.7).abs() < 1e-12);
        assert_eq!(confidence(&[]), 0.0);
    }

    #[test]
    fn persona_parsing_roundtrip() {
        for persona in [
            Persona::Plain,
            Persona::Analytical,
            Persona::Creative,
            Persona::Executive,
        ] {
            assert_eq!(persona.as_str().parse::<Persona>().unwrap(), persona);
        }
        assert!("sarcastic".parse::<Persona>().is_err());
    }

    #[test]
    fn personas_have_distinct_temperatures() {
        assert!(Persona::Plain.temperature() < Persona::Analytical.temperature());
        assert!(Persona::Executive.temperature() < Persona::Creative.temperature());
    }

    #[tokio::test]
    async fn compose_passes_persona_template_and_temperature() {
        let generator = RecordingGenerator {
            calls: Mutex::new(Vec::new()),
        };
        let sources = vec![source(0.8), source(0.6)];

        let composed = compose(
            &generator,
            "How did revenue develop?",
            "[text file] doc.txt\nRevenue grew.",
            &sources,
            Persona::Executive,
        )
        .await
        .unwrap();

        assert_eq!(composed.answer, "generated answer");
        assert!((composed.confidence - 0.7).abs() < 1e-12);

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (system, prompt, temperature) = &calls[0];
        assert_eq!(system, &Persona::Executive.instructions());
        assert!(prompt.contains("Revenue grew."));
        assert!(prompt.contains("How did revenue develop?"));
        assert_eq!(*temperature, Persona::Executive.temperature());
    }
}
