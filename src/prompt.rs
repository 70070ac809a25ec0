//! Operator prompts
//!
//! A cancelled prompt resolves to `Ok(None)`; that is a no-op for the caller,
//! never an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, MultiSelect, Select};

/// One selectable row with its pre-selected state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickItem {
    pub label: String,
    pub picked: bool,
}

#[async_trait]
pub trait MultiSelectPrompt: Send + Sync {
    /// Indices of the confirmed selection, or `None` when dismissed
    async fn pick_many(&self, placeholder: &str, items: &[PickItem]) -> Result<Option<Vec<usize>>>;
}

#[async_trait]
pub trait SingleChoicePrompt: Send + Sync {
    /// Index of the chosen item, or `None` when dismissed
    async fn pick_one(&self, placeholder: &str, items: &[String]) -> Result<Option<usize>>;
}

/// Interactive terminal prompts
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompt;

#[async_trait]
impl MultiSelectPrompt for TerminalPrompt {
    async fn pick_many(&self, placeholder: &str, items: &[PickItem]) -> Result<Option<Vec<usize>>> {
        let placeholder = placeholder.to_string();
        let items = items.to_vec();

        tokio::task::spawn_blocking(move || {
            let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
            let defaults: Vec<bool> = items.iter().map(|i| i.picked).collect();

            MultiSelect::with_theme(&ColorfulTheme::default())
                .with_prompt(placeholder)
                .items(&labels)
                .defaults(&defaults)
                .interact_opt()
                .context("Selection prompt failed")
        })
        .await
        .context("Selection prompt panicked")?
    }
}

#[async_trait]
impl SingleChoicePrompt for TerminalPrompt {
    async fn pick_one(&self, placeholder: &str, items: &[String]) -> Result<Option<usize>> {
        let placeholder = placeholder.to_string();
        let items = items.to_vec();

        tokio::task::spawn_blocking(move || {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(placeholder)
                .items(&items)
                .default(0)
                .interact_opt()
                .context("Choice prompt failed")
        })
        .await
        .context("Choice prompt panicked")?
    }
}
