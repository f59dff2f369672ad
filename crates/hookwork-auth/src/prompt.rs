//! Declarative prompts an auth method asks before authorizing.
//!
//! A method lists its prompts in order. Each prompt may carry a
//! [`Condition`] over the answers to earlier prompts; prompts whose
//! condition does not hold are skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Answers collected so far, keyed by prompt key.
pub type Answers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub key: String,
    pub message: String,
    #[serde(flatten)]
    pub input: PromptInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptInput {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
        /// Hide the typed value (API keys).
        #[serde(default)]
        secret: bool,
    },
    Select {
        options: Vec<SelectOption>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Prompt {
    pub fn text(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            input: PromptInput::Text {
                placeholder: None,
                secret: false,
            },
            condition: None,
        }
    }

    pub fn secret(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            input: PromptInput::Text {
                placeholder: None,
                secret: true,
            },
            ..Self::text(key, message)
        }
    }

    /// Options are `(label, value)` pairs.
    pub fn select(
        key: impl Into<String>,
        message: impl Into<String>,
        options: impl IntoIterator<Item = (&'static str, &'static str)>,
    ) -> Self {
        Self {
            input: PromptInput::Select {
                options: options
                    .into_iter()
                    .map(|(label, value)| SelectOption {
                        label: label.to_string(),
                        value: value.to_string(),
                        hint: None,
                    })
                    .collect(),
            },
            ..Self::text(key, message)
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn applies(&self, answers: &Answers) -> bool {
        self.condition.as_ref().is_none_or(|c| c.holds(answers))
    }

    /// Check an answer against the prompt's input kind.
    pub fn accepts(&self, answer: &str) -> bool {
        match &self.input {
            PromptInput::Text { .. } => !answer.trim().is_empty(),
            PromptInput::Select { options } => options.iter().any(|o| o.value == answer),
        }
    }
}

/// Predicate over earlier answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    Present { key: String },
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NotEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn present(key: impl Into<String>) -> Self {
        Self::Present { key: key.into() }
    }

    pub fn holds(&self, answers: &Answers) -> bool {
        match self {
            Self::Equals { key, value } => answers.get(key) == Some(value),
            Self::NotEquals { key, value } => answers.get(key) != Some(value),
            Self::Present { key } => answers.get(key).is_some_and(|v| !v.is_empty()),
            Self::All(conditions) => conditions.iter().all(|c| c.holds(answers)),
            Self::Any(conditions) => conditions.iter().any(|c| c.holds(answers)),
        }
    }
}

/// Walks a method's prompts against the answers collected so far.
#[derive(Debug, Clone, Copy)]
pub struct PromptPlan<'a> {
    prompts: &'a [Prompt],
}

impl<'a> PromptPlan<'a> {
    pub fn new(prompts: &'a [Prompt]) -> Self {
        Self { prompts }
    }

    /// The next prompt that applies and has no answer yet.
    pub fn next(&self, answers: &Answers) -> Option<&'a Prompt> {
        self.prompts
            .iter()
            .find(|p| !answers.contains_key(&p.key) && p.applies(answers))
    }

    /// Every prompt that applies given `answers`.
    pub fn applicable(&self, answers: &Answers) -> Vec<&'a Prompt> {
        self.prompts.iter().filter(|p| p.applies(answers)).collect()
    }

    /// Check that every applicable prompt has an acceptable answer.
    /// Returns the key of the first missing or invalid answer.
    pub fn check(&self, answers: &Answers) -> Result<(), String> {
        for prompt in self.applicable(answers) {
            match answers.get(&prompt.key) {
                Some(answer) if prompt.accepts(answer) => {}
                _ => return Err(prompt.key.clone()),
            }
        }
        Ok(())
    }

    /// Ask every applicable prompt in order through `ask`.
    pub fn collect<F>(&self, mut ask: F) -> anyhow::Result<Answers>
    where
        F: FnMut(&Prompt) -> anyhow::Result<String>,
    {
        let mut answers = Answers::new();
        while let Some(prompt) = self.next(&answers) {
            let answer = ask(prompt)?;
            if !prompt.accepts(&answer) {
                anyhow::bail!("Invalid answer for '{}'", prompt.key);
            }
            answers.insert(prompt.key.clone(), answer);
        }
        Ok(answers)
    }
}
