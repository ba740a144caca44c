//! Deterministic nutrition summation over a built-in per-100g table.

use crate::sessions::{DetectedFood, NutritionTotals};
use crate::text::{fold, round1};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Per100 {
    pub kcal: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
}

const fn p(kcal: f64, protein: f64, carbs: f64, fat: f64, fiber: f64) -> Per100 {
    Per100 {
        kcal,
        protein,
        carbs,
        fat,
        fiber,
    }
}

/// Used for foods the table does not know.
pub const GENERIC: Per100 = p(150.0, 6.0, 20.0, 5.0, 2.0);

// Keys are folded (lowercase, no accents). Longer keys win.
const TABLE: &[(&str, Per100)] = &[
    ("arroz integral", p(124.0, 2.6, 25.8, 1.0, 2.7)),
    ("arroz", p(128.0, 2.5, 28.1, 0.2, 1.6)),
    ("feijao", p(76.0, 4.8, 13.6, 0.5, 8.5)),
    ("frango", p(163.0, 31.5, 0.0, 3.2, 0.0)),
    ("peito de frango", p(159.0, 32.0, 0.0, 2.5, 0.0)),
    ("carne", p(219.0, 32.0, 0.0, 9.0, 0.0)),
    ("carne moida", p(212.0, 26.7, 0.0, 10.9, 0.0)),
    ("bife", p(219.0, 32.0, 0.0, 9.0, 0.0)),
    ("peixe", p(130.0, 24.0, 0.0, 3.0, 0.0)),
    ("ovo", p(146.0, 13.3, 0.6, 9.5, 0.0)),
    ("batata", p(52.0, 1.2, 11.9, 0.0, 1.3)),
    ("batata frita", p(267.0, 5.0, 35.6, 13.1, 8.1)),
    ("batata doce", p(77.0, 0.6, 18.4, 0.1, 2.2)),
    ("macarrao", p(102.0, 3.4, 19.9, 1.2, 1.5)),
    ("pao", p(300.0, 8.0, 58.6, 3.1, 2.3)),
    ("pao integral", p(253.0, 9.4, 49.9, 3.7, 6.9)),
    ("queijo", p(264.0, 17.4, 3.2, 20.2, 0.0)),
    ("presunto", p(94.0, 14.3, 2.1, 2.7, 0.0)),
    ("leite", p(61.0, 3.2, 4.7, 3.3, 0.0)),
    ("iogurte", p(51.0, 4.1, 1.9, 3.0, 0.0)),
    ("banana", p(98.0, 1.3, 26.0, 0.1, 2.0)),
    ("maca", p(56.0, 0.3, 15.2, 0.0, 1.3)),
    ("laranja", p(37.0, 1.0, 8.9, 0.1, 0.8)),
    ("mamao", p(40.0, 0.5, 10.4, 0.1, 1.0)),
    ("abacate", p(96.0, 1.2, 6.0, 8.4, 6.3)),
    ("salada", p(15.0, 1.2, 2.5, 0.2, 1.8)),
    ("alface", p(11.0, 1.3, 1.7, 0.2, 1.8)),
    ("tomate", p(15.0, 1.1, 3.1, 0.2, 1.2)),
    ("cenoura", p(34.0, 1.3, 7.7, 0.2, 3.2)),
    ("brocolis", p(25.0, 2.1, 4.4, 0.5, 3.4)),
    ("farofa", p(406.0, 2.1, 80.3, 9.1, 7.8)),
    ("mandioca", p(125.0, 0.6, 30.1, 0.3, 1.6)),
    ("tapioca", p(240.0, 0.0, 60.0, 0.0, 0.5)),
    ("cuscuz", p(113.0, 2.2, 25.3, 0.7, 2.1)),
    ("aveia", p(394.0, 13.9, 66.6, 8.5, 9.1)),
    ("granola", p(421.0, 10.0, 64.0, 14.0, 7.0)),
    ("cafe", p(9.0, 0.7, 1.5, 0.1, 0.0)),
    ("suco", p(45.0, 0.5, 10.5, 0.1, 0.2)),
    ("refrigerante", p(41.0, 0.0, 10.6, 0.0, 0.0)),
    ("pizza", p(266.0, 11.0, 33.0, 10.0, 2.3)),
    ("hamburguer", p(295.0, 17.0, 24.0, 14.0, 1.5)),
    ("chocolate", p(540.0, 7.2, 59.6, 30.3, 2.2)),
];

/// Per-100g values for a food name, matched accent-insensitively.
pub fn lookup(name: &str) -> Per100 {
    let folded = fold(name);
    TABLE
        .iter()
        .filter(|(key, _)| folded.contains(key))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, v)| *v)
        .unwrap_or(GENERIC)
}

/// Sums `per100 * grams / 100` over all foods, rounded to one decimal.
pub fn totals_for(foods: &[DetectedFood]) -> NutritionTotals {
    let raw = foods.iter().fold(NutritionTotals::default(), |acc, f| {
        let v = lookup(&f.name);
        let k = f.grams.max(0.0) / 100.0;
        NutritionTotals {
            kcal: acc.kcal + v.kcal * k,
            protein: acc.protein + v.protein * k,
            carbs: acc.carbs + v.carbs * k,
            fat: acc.fat + v.fat * k,
            fiber: acc.fiber + v.fiber * k,
        }
    });
    NutritionTotals {
        kcal: round1(raw.kcal),
        protein: round1(raw.protein),
        carbs: round1(raw.carbs),
        fat: round1(raw.fat),
        fiber: round1(raw.fiber),
    }
}
