//! User-facing texts and menus.

use crate::gateway::{Button, InteractiveMessage};
use crate::sessions::{DetectedFood, MealType, NutritionTotals};

pub mod ids {
    pub const CONFIRM: &str = "sofia_confirm";
    pub const CANCEL: &str = "sofia_cancel";
    pub const EDIT: &str = "sofia_edit";
    pub const CLEAR: &str = "sofia_clear";
    pub const EDIT_DONE: &str = "sofia_edit_done";
    pub const NEW_PHOTO: &str = "sofia_new_photo";
    pub const HELP: &str = "help";
    pub const FEELING_GREAT: &str = "feeling_great";
    pub const FEELING_OK: &str = "feeling_ok";
    pub const FEELING_BAD: &str = "feeling_bad";
    pub const ANALYZE: &str = "vital_analyze";
    pub const MORE: &str = "vital_more";
    pub const MEDICAL_CANCEL: &str = "vital_cancel";
    pub const WAIT: &str = "vital_wait";
    pub const RETRY: &str = "vital_retry";
}

fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.1}")
    }
}

pub fn food_list(foods: &[DetectedFood]) -> String {
    if foods.is_empty() {
        return "_(lista vazia)_".into();
    }
    foods
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {} ({}g)", i + 1, f.name, fmt_num(f.grams)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn totals_line(t: &NutritionTotals) -> String {
    format!(
        "🔥 {} kcal | P {}g | C {}g | G {}g | F {}g",
        fmt_num(t.kcal),
        fmt_num(t.protein),
        fmt_num(t.carbs),
        fmt_num(t.fat),
        fmt_num(t.fiber)
    )
}

pub fn nutrition_menu(
    meal_type: MealType,
    foods: &[DetectedFood],
    totals: &NutritionTotals,
) -> InteractiveMessage {
    InteractiveMessage::new(
        format!(
            "{}\n\n{}\n\nEstá correto?",
            food_list(foods),
            totals_line(totals)
        ),
        vec![
            Button::new(ids::CONFIRM, "✅ Confirmar"),
            Button::new(ids::CANCEL, "❌ Cancelar"),
            Button::new(ids::EDIT, "✏️ Editar"),
        ],
    )
    .header(format!("🍽️ {}", meal_type.label()))
    .footer("Responda 4 para descartar")
}

pub fn almost_menu(foods: &[DetectedFood], totals: &NutritionTotals) -> InteractiveMessage {
    InteractiveMessage::new(
        format!(
            "Não entendi sua resposta. Sobre esta refeição:\n\n{}\n\n{}",
            food_list(foods),
            totals_line(totals)
        ),
        vec![
            Button::new(ids::CONFIRM, "✅ Confirmar"),
            Button::new(ids::CANCEL, "❌ Cancelar"),
            Button::new(ids::EDIT, "✏️ Editar"),
        ],
    )
}

pub fn edit_menu(foods: &[DetectedFood], totals: &NutritionTotals) -> InteractiveMessage {
    InteractiveMessage::new(
        format!(
            "{}\n\n{}\n\nComandos:\n• adicionar <alimento> <g>\n• remover <nº>\n• trocar <nº> por <alimento> <g>\n\nQuando terminar, responda *pronto*.",
            food_list(foods),
            totals_line(totals)
        ),
        vec![
            Button::new(ids::EDIT_DONE, "✅ Pronto"),
            Button::new(ids::CANCEL, "❌ Cancelar"),
        ],
    )
    .header("✏️ Editando refeição")
}

pub fn confirmed(totals: &NutritionTotals, day_total_kcal: f64) -> String {
    format!(
        "✅ Refeição registrada!\n{}\n\n📊 Total do dia: {} kcal",
        totals_line(totals),
        fmt_num(day_total_kcal)
    )
}

pub const CANCELLED: &str = "❌ Registro cancelado. Quando quiser, mande outra foto.";
pub const CLEARED: &str = "🗑️ Refeição descartada.";
pub const EXPIRED: &str = "⏰ Essa refeição expirou e não foi registrada. Mande a foto de novo se quiser.";
pub const NOTHING_PENDING: &str = "Não há nenhuma refeição aguardando confirmação.";
pub const NO_FOOD_FOUND: &str = "🤔 Não consegui identificar alimentos. Pode tentar outra foto ou descrever o que comeu?";
pub const UNKNOWN_PHOTO: &str = "🤔 Não sei o que é essa foto. Mande uma foto da refeição ou de um exame.";

pub fn pending_reminder(meal_type: MealType) -> String {
    format!(
        "⏳ Você ainda tem um(a) {} aguardando confirmação. Responda 1 para confirmar, 2 para cancelar ou 3 para editar.",
        meal_type.label().to_lowercase()
    )
}

pub fn edit_error(reason: &str) -> String {
    format!("⚠️ {reason}")
}

pub const MEDICAL_FIRST: &str =
    "📄 Recebi a foto do exame. Pode mandar as outras; quando terminar eu pergunto se posso analisar.";

pub fn medical_progress(count: i32) -> String {
    format!("📸 {count} fotos recebidas. Continue enviando.")
}

/// Button order follows the numeric replies: 1 analyze, 2 cancel, 3 more.
pub fn medical_prompt(count: i32) -> InteractiveMessage {
    InteractiveMessage::new(
        format!("Recebi {count} foto(s) do exame. Posso começar a análise?"),
        vec![
            Button::new(ids::ANALYZE, "🔍 Analisar"),
            Button::new(ids::MEDICAL_CANCEL, "❌ Cancelar"),
            Button::new(ids::MORE, "📸 Enviar mais"),
        ],
    )
    .header("🩺 Exames")
}

/// Restates a batch that is still collecting when the user talks about something else.
pub fn medical_reminder(count: i32) -> InteractiveMessage {
    let noun = if count == 1 { "foto" } else { "fotos" };
    InteractiveMessage::new(
        format!("📋 Ainda tenho {count} {noun} do seu exame aguardando análise. Quando estiver pronto, é só me avisar!"),
        vec![
            Button::new(ids::ANALYZE, "✅ Analisar agora"),
            Button::new(ids::MEDICAL_CANCEL, "❌ Cancelar"),
            Button::new(ids::MORE, "📸 Enviar mais"),
        ],
    )
    .header("🩺 Exames")
}

pub fn medical_started(count: usize) -> String {
    format!("🔍 Analisando {count} foto(s). Isso pode levar alguns segundos...")
}

pub fn medical_done(summary: Option<&str>, link: Option<&str>) -> String {
    let mut out = String::from("✅ Análise concluída!");
    if let Some(s) = summary {
        out.push_str("\n\n");
        out.push_str(s);
    }
    if let Some(l) = link {
        out.push_str("\n\n📎 Relatório completo: ");
        out.push_str(l);
    }
    out
}

pub fn medical_failed() -> InteractiveMessage {
    InteractiveMessage::new(
        "😕 Não consegui analisar as fotos. Tente de novo ou reenvie fotos mais nítidas.",
        vec![
            Button::new(ids::RETRY, "🔁 Tentar de novo"),
            Button::new(ids::NEW_PHOTO, "📸 Enviar fotos"),
        ],
    )
}

pub const MEDICAL_MORE: &str = "👍 Pode enviar mais fotos.";
pub const MEDICAL_CANCELLED: &str = "❌ Envio de exames cancelado.";
pub const MEDICAL_IN_PROGRESS: &str = "⏳ Ainda estou analisando seus exames. Aguarde um pouco.";
pub const MEDICAL_WAITING: &str = "👍 Ok, fico aguardando.";
pub const MEDICAL_NOTHING: &str = "Não encontrei nenhum envio de exame em andamento.";

pub fn safe_menu(body: impl Into<String>) -> InteractiveMessage {
    InteractiveMessage::new(
        body,
        vec![
            Button::new(ids::NEW_PHOTO, "📸 Enviar foto"),
            Button::new(ids::HELP, "❓ Ajuda"),
        ],
    )
}

pub const APOLOGY: &str = "😕 Tive um problema para processar sua mensagem. Pode tentar de novo?";
pub const MENU: &str = "Como posso ajudar?";
pub const NEW_PHOTO: &str = "📸 Envie a foto da refeição ou do exame.";
pub const HELP: &str = "Eu posso:\n• registrar refeições: mande uma foto do prato ou escreva o que comeu\n• analisar exames: mande as fotos do exame\n\nDepois é só confirmar pelos botões.";
pub const ASSISTANT_FALLBACK: &str =
    "Posso te ajudar a registrar refeições (mande uma foto) ou analisar exames.";

pub fn feeling(id: &str) -> &'static str {
    match id {
        ids::FEELING_GREAT => "🎉 Que ótimo! Continue assim.",
        ids::FEELING_BAD => "💙 Sinto muito. Se quiser conversar, estou aqui.",
        _ => "🙂 Obrigado por contar!",
    }
}

#[cfg(test)]
mod copy_tests {
    use super::*;

    #[test]
    fn food_list_is_numbered_from_one() {
        let foods = vec![
            DetectedFood::new("arroz", 150.0),
            DetectedFood::new("feijão", 80.5),
        ];
        assert_eq!(food_list(&foods), "1. arroz (150g)\n2. feijão (80.5g)");
    }

    #[test]
    fn nutrition_menu_offers_three_actions() {
        let m = nutrition_menu(MealType::Lunch, &[], &NutritionTotals::default());
        let got: Vec<_> = m.buttons.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(got, vec![ids::CONFIRM, ids::CANCEL, ids::EDIT]);
        assert_eq!(m.header_text.as_deref(), Some("🍽️ Almoço"));
    }
}
