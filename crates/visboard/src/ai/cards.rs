use super::busy::BusyFlag;
use super::client::{ChatMessage, CompletionClient, CompletionRequest};
use super::extract::extract_first_json;
use crate::board::{BoardStore, make_id};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use visboard_api::{ApiError, Card, CardPack, CardTheme};

fn cards_prompt(title: &str, description: &str, count: usize) -> String {
    let count = if count > 0 {
        count.to_string()
    } else {
        "Auto".to_string()
    };
    let topic = if description.is_empty() {
        String::new()
    } else {
        format!("Topic: {description}")
    };
    format!(
        "Generate a set of flashcards based on the topic: {title}. For each flashcard,\n\n\
         Count: {count}\n{topic}\n\n\
         provide the following details in JSON format. Each flashcard should have:\n\
         1. **Title**: A concise and informative title for the flashcard.\n\
         2. **Description**: A detailed, yet concise explanation or definition related to the title.\n\n\
         The final output should follow this JSON structure:\n\
         [\n  {{\n    \"title\": \"Flashcard Title 1\",\n    \"description\": \"Description of the first flashcard\"\n  }},\n  ...\n]"
    )
}

#[derive(Deserialize)]
struct GeneratedCard {
    title: String,
    #[serde(default)]
    description: String,
}

/// Cards numbered `1..` from a model reply; `None` when the reply holds no
/// JSON array of cards.
fn parse_cards(reply: &str) -> Option<Vec<Card>> {
    let items = match extract_first_json(reply)? {
        Value::Array(items) => items,
        _ => return None,
    };
    Some(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<GeneratedCard>(item).ok())
            .enumerate()
            .map(|(i, card)| Card {
                id: (i + 1).to_string(),
                title: card.title,
                description: card.description,
            })
            .collect(),
    )
}

/// Flashcard generation.
pub struct CardsAssistant {
    client: Arc<dyn CompletionClient>,
    loading: BusyFlag,
}

impl CardsAssistant {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            loading: BusyFlag::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_busy()
    }

    /// Ask the model for `count` cards (`0` lets the model decide).
    ///
    /// A reply without a usable card list yields no cards.
    pub async fn generate(&self, title: &str, description: &str, count: usize) -> Result<Vec<Card>, ApiError> {
        let Some(_guard) = self.loading.try_acquire() else {
            return Ok(Vec::new());
        };
        let request = CompletionRequest::new(vec![ChatMessage::user(cards_prompt(
            title,
            description,
            count,
        ))]);
        let reply = self.client.complete(request).await.inspect_err(|e| {
            warn!("Card generation failed: {}", e);
        })?;

        match parse_cards(&reply) {
            Some(cards) => Ok(cards),
            None => {
                warn!("Card reply for '{}' held no card list", title);
                Ok(Vec::new())
            }
        }
    }

    /// Generate cards and save them as a new pack on `board`.
    pub async fn create_pack(
        &self,
        board: &BoardStore,
        title: &str,
        description: &str,
        count: usize,
        theme: CardTheme,
        gradient_color: Option<String>,
    ) -> Result<Option<CardPack>, ApiError> {
        let cards = self.generate(title, description, count).await?;
        if cards.is_empty() {
            return Ok(None);
        }

        let pack = CardPack {
            id: make_id(),
            title: title.to_string(),
            description: description.to_string(),
            cards,
            timestamp: chrono::Utc::now().timestamp_millis(),
            cost: 0.0,
            theme,
            gradient_color,
            ai_model: Some(self.client.model().to_string()),
        };
        board.save_card_pack(&pack).await?;
        info!("Saved pack '{}' with {} cards", pack.title, pack.cards.len());
        Ok(Some(pack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreFactory;
    use crate::testing::ScriptedClient;
    use anyhow::Result;

    #[test]
    fn test_parse_cards_numbers_from_one() {
        let reply = r#"```json
        [
          {"title": "Borrow", "description": "A reference"},
          {"oops": true},
          {"title": "Move", "description": "Ownership transfer"}
        ]
        ```"#;
        let cards = parse_cards(reply).expect("cards");
        let ids: Vec<_> = cards.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(cards[1].title, "Move");
        assert_eq!(parse_cards("{\"title\": \"single\"}"), None);
    }

    #[test]
    fn test_prompt_mentions_count() {
        assert!(cards_prompt("Rust", "", 0).contains("Count: Auto"));
        assert!(cards_prompt("Rust", "traits", 5).contains("Count: 5\nTopic: traits"));
    }

    #[tokio::test]
    async fn test_create_pack_saves_to_board() -> Result<()> {
        let client = ScriptedClient::new()
            .with_completion(r#"[{"title": "Q1", "description": "A1"}]"#)
            .with_completion("sorry, no cards");
        let cards = CardsAssistant::new(Arc::new(client));
        let board = BoardStore::open(&StoreFactory::in_memory(), "cards").await?;
        board.initialize("Cards").await?;

        let pack = cards
            .create_pack(&board, "Rust", "", 1, CardTheme::Gradient, Some("#f0a".to_string()))
            .await?
            .expect("pack");
        assert_eq!(pack.ai_model.as_deref(), Some(ScriptedClient::MODEL));
        assert_eq!(board.card_packs("").await?, vec![pack]);

        let none = cards
            .create_pack(&board, "Empty", "", 1, CardTheme::Default, None)
            .await?;
        assert!(none.is_none());
        assert_eq!(board.card_packs("").await?.len(), 1);
        assert!(!cards.is_loading());
        Ok(())
    }
}
