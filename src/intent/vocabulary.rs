//! Fixed keyword vocabularies and loose natural-language patterns.
//!
//! Everything here is matched against [`fold`]ed text, so accents and case
//! do not matter.

use lazy_static::lazy_static;
use regex::Regex;

use crate::text::fold;

pub const CONFIRM: &[&str] = &[
    "1", "sim", "s", "ok", "confirmo", "confirma", "certo", "isso", "yes", "y",
];
pub const CANCEL: &[&str] = &["2", "nao", "n", "cancela", "cancelar", "nope", "no"];
pub const EDIT: &[&str] = &["3", "editar", "edita", "corrigir", "mudar", "alterar", "edit"];
pub const CLEAR: &[&str] = &["4", "finalizar", "limpar", "clear", "descartar"];

/// Leaves edit mode and returns to the confirmation menu.
pub const EDIT_DONE: &[&str] = &["pronto", "ok", "feito", "done", "concluir", "terminei"];

const MEDICAL_READY_EXTRA: &[&str] = &[
    "pronto", "analisar", "analisa", "analise", "pode", "vai", "manda", "enviar", "finalizar",
];
const MEDICAL_MORE: &[&str] = &["3", "mais", "more"];

const HELP: &[&str] = &["ajuda", "help", "menu", "socorro", "?"];

lazy_static! {
    static ref READY_PATTERNS: Vec<Regex> = [
        r"^finaliz",
        r"^pront",
        r"^analis",
        r"pode\s*(analisar|processar|ver|mandar)",
        r"ja\s*(foi|pode|acabou|terminei|mandei|enviei)",
        r"manda\s*ver",
        r"\b(terminei|acabei)\b",
        r"\bso\s*isso\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
    static ref CANCEL_PATTERNS: Vec<Regex> = [
        r"^cancel",
        r"desist",
        r"nao\s*quero",
        r"esquece",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
    static ref MORE_PATTERNS: Vec<Regex> = [
        r"^mais\b",
        r"(tenho|vou mandar|falta)\s*mais",
        r"mais\s*fotos?",
        r"^espera",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
    static ref MEAL_REPORT: Regex =
        Regex::new(r"^(comi|almocei|jantei|lanchei|tomei|bebi|merendei)\b").unwrap();
}

/// A reply matched exactly against one of the fixed vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Confirm,
    Cancel,
    Edit,
    Clear,
}

pub fn exact_keyword(text: &str) -> Option<Keyword> {
    let t = fold(text);
    let t = t.trim_end_matches(['!', '.']);
    if CONFIRM.contains(&t) {
        Some(Keyword::Confirm)
    } else if CANCEL.contains(&t) {
        Some(Keyword::Cancel)
    } else if EDIT.contains(&t) {
        Some(Keyword::Edit)
    } else if CLEAR.contains(&t) {
        Some(Keyword::Clear)
    } else {
        None
    }
}

pub fn is_edit_done(text: &str) -> bool {
    EDIT_DONE.contains(&fold(text).trim_end_matches(['!', '.']))
}

pub fn is_help(text: &str) -> bool {
    HELP.contains(&fold(text).as_str())
}

/// Text that looks like a mistyped or truncated menu answer ("si", "edi",
/// "confirmoo"). Exact matches are not "almost".
pub fn is_almost_confirmation(text: &str) -> bool {
    let t = fold(text);
    if t.is_empty() || exact_keyword(&t).is_some() {
        return false;
    }
    CONFIRM
        .iter()
        .chain(CANCEL)
        .chain(EDIT)
        .filter(|w| w.len() > 1)
        .any(|w| {
            (t.len() >= 2 && w.starts_with(t.as_str()))
                || (t.starts_with(w) && t.len() <= w.len() + 2)
        })
}

/// Deterministic reply to the "ready to analyze?" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedicalReply {
    Ready,
    More,
    Cancel,
}

/// Cancel beats more, more beats ready.
pub fn medical_reply(text: &str) -> Option<MedicalReply> {
    let t = fold(text);
    let t = t.trim_end_matches(['!', '.']);
    if CANCEL.contains(&t) || CANCEL_PATTERNS.iter().any(|r| r.is_match(t)) {
        return Some(MedicalReply::Cancel);
    }
    if MEDICAL_MORE.contains(&t) || MORE_PATTERNS.iter().any(|r| r.is_match(t)) {
        return Some(MedicalReply::More);
    }
    if CONFIRM.contains(&t)
        || MEDICAL_READY_EXTRA.contains(&t)
        || READY_PATTERNS.iter().any(|r| r.is_match(t))
    {
        return Some(MedicalReply::Ready);
    }
    None
}

/// "comi arroz e feijao", "almocei frango"...
pub fn looks_like_meal_report(text: &str) -> bool {
    MEAL_REPORT.is_match(&fold(text))
}
