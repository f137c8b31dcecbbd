// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operator input.
//!
//! Recipes never read the terminal directly: missing configuration values
//! and one-time codes are requested through an [`InputProvider`], so flows
//! can run against scripted answers.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use crate::error::RecoveryError;

#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Ask the operator for a value; the answer is returned trimmed.
    async fn prompt(&self, label: &str) -> Result<String, RecoveryError>;

    async fn confirm(&self, question: &str) -> Result<bool, RecoveryError> {
        let answer = self.prompt(&format!("{question} [y/N]")).await?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// Reads answers from stdin, writing prompts to stderr.
pub struct ConsoleInput {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleInput {
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for ConsoleInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputProvider for ConsoleInput {
    async fn prompt(&self, label: &str) -> Result<String, RecoveryError> {
        let io_err = |e: std::io::Error| RecoveryError::Input(e.to_string());
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("{label}: ").as_bytes())
            .await
            .map_err(io_err)?;
        stderr.flush().await.map_err(io_err)?;

        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Ok(line.trim().to_string()),
            Ok(None) => Err(RecoveryError::Input(format!(
                "stdin closed while waiting for {label}"
            ))),
            Err(e) => Err(RecoveryError::Input(e.to_string())),
        }
    }
}

/// Answers prompts from a fixed queue, in order.
#[derive(Default)]
pub struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Labels of every prompt issued so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InputProvider for ScriptedInput {
    async fn prompt(&self, label: &str) -> Result<String, RecoveryError> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(label.to_string());
        }
        let mut answers = self
            .answers
            .lock()
            .map_err(|_| RecoveryError::Input("scripted answers poisoned".to_string()))?;
        answers
            .pop_front()
            .map(|answer| answer.trim().to_string())
            .ok_or_else(|| RecoveryError::Input(format!("no scripted answer for {label}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_answers_are_consumed_in_order() {
        let input = ScriptedInput::new([" 123456 ", "yes"]);
        assert_eq!(input.prompt("OTP for email").await.unwrap(), "123456");
        assert!(input.confirm("Proceed?").await.unwrap());
        assert_eq!(input.asked(), vec!["OTP for email", "Proceed? [y/N]"]);
    }

    #[tokio::test]
    async fn exhausted_script_is_an_input_error() {
        let input = ScriptedInput::new(Vec::<String>::new());
        let err = input.prompt("SAFE_ADDRESS").await.unwrap_err();
        assert!(matches!(err, RecoveryError::Input(ref msg) if msg.contains("SAFE_ADDRESS")));
    }

    #[tokio::test]
    async fn confirm_defaults_to_no() {
        let input = ScriptedInput::new([""]);
        assert!(!input.confirm("Cancel recovery?").await.unwrap());
    }
}
