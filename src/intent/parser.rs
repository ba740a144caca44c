//! Deterministic parser for food-list edit commands.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::sessions::model::portion;
use crate::sessions::DetectedFood;

pub const DEFAULT_GRAMS: f64 = 100.0;

lazy_static! {
    static ref REPLACE_RE: Regex = Regex::new(
        r"^(?:trocar|troca|troque|substituir|substitui|substitua)\s+(?:o\s+|a\s+)?(?:item\s+)?(\d+)\s+(?:por|para|pra)\s+(.+?)(?:\s+(\d+(?:[.,]\d+)?)\s*(?:g|gr|gramas?))?$"
    )
    .unwrap();
    static ref REMOVE_RE: Regex = Regex::new(
        r"^(?:remover|remove|remova|tirar|tira|tire|excluir|exclui|exclua)\s+(?:o\s+|a\s+)?(?:item\s+)?(\d+)$"
    )
    .unwrap();
    static ref ADD_RE: Regex = Regex::new(
        r"^(?:adicionar|adiciona|adicione|incluir|inclui|inclua)\s+(.+?)(?:\s+(\d+(?:[.,]\d+)?)\s*(?:g|gr|gramas?))?$"
    )
    .unwrap();
}

/// A structured edit. Indexes are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub enum EditCommand {
    Add(DetectedFood),
    Remove(usize),
    Replace { index: usize, food: DetectedFood },
}

fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn grams(caps: &Captures<'_>, group: usize) -> f64 {
    caps.get(group)
        .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
        .and_then(portion)
        .unwrap_or(DEFAULT_GRAMS)
}

fn food_name(raw: &str) -> Option<String> {
    let name = raw
        .trim()
        .trim_start_matches("de ")
        .trim_end_matches(|c: char| c == '.' || c == '!')
        .trim();
    (!name.is_empty()).then(|| name.to_owned())
}

pub fn parse(text: &str) -> Option<EditCommand> {
    let t = normalize(text);

    if let Some(c) = REPLACE_RE.captures(&t) {
        let index = c[1].parse().ok()?;
        let name = food_name(&c[2])?;
        return Some(EditCommand::Replace {
            index,
            food: DetectedFood::new(name, grams(&c, 3)),
        });
    }
    if let Some(c) = REMOVE_RE.captures(&t) {
        return c[1].parse().ok().map(EditCommand::Remove);
    }
    if let Some(c) = ADD_RE.captures(&t) {
        let name = food_name(&c[1])?;
        return Some(EditCommand::Add(DetectedFood::new(name, grams(&c, 2))));
    }
    None
}

#[cfg(test)]
mod parser_tests {
    use super::*;

    #[test]
    fn parses_replace_with_grams() {
        assert_eq!(
            parse("Trocar 1 por banana 100g"),
            Some(EditCommand::Replace {
                index: 1,
                food: DetectedFood::new("banana", 100.0)
            })
        );
        assert_eq!(
            parse("substituir o item 2 para arroz integral 150 gramas"),
            Some(EditCommand::Replace {
                index: 2,
                food: DetectedFood::new("arroz integral", 150.0)
            })
        );
    }

    #[test]
    fn grams_default_to_one_hundred() {
        assert_eq!(
            parse("adicionar feijão"),
            Some(EditCommand::Add(DetectedFood::new("feijão", 100.0)))
        );
        assert_eq!(
            parse("incluir queijo 30,5g"),
            Some(EditCommand::Add(DetectedFood::new("queijo", 30.5)))
        );
    }

    #[test]
    fn absurd_weights_stay_storable() {
        let huge = format!("adicionar banana {}g", "9".repeat(400));
        let Some(EditCommand::Add(food)) = parse(&huge) else {
            panic!("expected an add command");
        };
        assert_eq!(food.grams, DEFAULT_GRAMS);

        assert_eq!(
            parse("incluir arroz 12000g"),
            Some(EditCommand::Add(DetectedFood::new("arroz", 5000.0)))
        );

        let json = serde_json::to_value(vec![food.clone()]).unwrap();
        let back: Vec<DetectedFood> = serde_json::from_value(json).unwrap();
        assert_eq!(back, vec![food]);
    }

    #[test]
    fn parses_remove_by_index() {
        assert_eq!(parse("remover 2"), Some(EditCommand::Remove(2)));
        assert_eq!(parse("  tirar o 3 "), Some(EditCommand::Remove(3)));
        assert_eq!(parse("excluir item 1"), Some(EditCommand::Remove(1)));
    }

    #[test]
    fn other_text_is_not_a_command() {
        assert_eq!(parse("remover o arroz"), None);
        assert_eq!(parse("trocar por banana"), None);
        assert_eq!(parse("bom dia"), None);
    }
}
