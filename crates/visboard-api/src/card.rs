use serde::{Deserialize, Serialize};

/// A single flashcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardTheme {
    #[default]
    Default,
    Gradient,
}

/// A titled collection of flashcards, generated wholesale and saved as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPack {
    pub id: String,
    pub title: String,
    pub description: String,
    pub cards: Vec<Card>,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub theme: CardTheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
}

impl CardPack {
    /// Case-insensitive title match used by the pack search box.
    pub fn matches(&self, search: &str) -> bool {
        self.title.to_lowercase().contains(&search.to_lowercase())
    }
}
