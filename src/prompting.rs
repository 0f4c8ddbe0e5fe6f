use minijinja::{context, Environment};

use crate::markers::{FLAT_PROMO_MARKER, GROUPED_PROMO_MARKER, RESERVATION_MARKER};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");

/// Separates response units in a single completion.
pub const UNIT_SEPARATOR: &str = "[[NEXT]]";

pub struct SystemPromptContext<'a> {
    pub agency_name: &'a str,
    pub customer_name: &'a str,
    pub today: &'a str,
    pub max_windows: usize,
    pub agency_notes: &'a str,
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            agency_name => ctx.agency_name,
            customer_name => ctx.customer_name,
            today => ctx.today,
            max_windows => ctx.max_windows,
            agency_notes => ctx.agency_notes.trim(),
            unit_separator => UNIT_SEPARATOR,
            grouped_promo_marker => GROUPED_PROMO_MARKER,
            flat_promo_marker => FLAT_PROMO_MARKER,
            reservation_marker => RESERVATION_MARKER,
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut prompt = format!(
        "Eres el asistente de WhatsApp de la agencia de viajes \"{}\". Hoy es {}. Hablas con {}.\n\
         Responde en español, breve y amable. Nunca inventes precios ni disponibilidad.\n\
         Termina cada respuesta con un bloque <ctrl>{{\"intent\": \"...\"}}</ctrl>.\n",
        if ctx.agency_name.trim().is_empty() {
            "la agencia"
        } else {
            ctx.agency_name.trim()
        },
        ctx.today,
        if ctx.customer_name.trim().is_empty() {
            "un cliente"
        } else {
            ctx.customer_name.trim()
        }
    );

    if !ctx.agency_notes.trim().is_empty() {
        prompt.push_str("\nNotas de la agencia:\n");
        prompt.push_str(ctx.agency_notes.trim());
        prompt.push('\n');
    }

    prompt
}

/// Splits a completion into response units.
pub fn split_units(content: &str) -> Vec<String> {
    content
        .split(UNIT_SEPARATOR)
        .map(str::trim)
        .filter(|unit| !unit.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(notes: &'a str) -> SystemPromptContext<'a> {
        SystemPromptContext {
            agency_name: "Viajes Sol y Mar",
            customer_name: "Lucía",
            today: "2030-03-01",
            max_windows: 3,
            agency_notes: notes,
        }
    }

    #[test]
    fn prompt_explains_the_markers() {
        let prompt = render_system_prompt(&ctx(""));
        assert!(prompt.contains("Viajes Sol y Mar"));
        assert!(prompt.contains("Lucía"));
        assert!(prompt.contains("[[PROMO_GROUP]]"));
        assert!(prompt.contains("[[CONSULTA_RESERVA]]"));
        assert!(prompt.contains(UNIT_SEPARATOR));
        assert!(!prompt.contains("Notas de la agencia"));
    }

    #[test]
    fn agency_notes_are_appended() {
        let prompt = render_system_prompt(&ctx("Temporada alta en Semana Santa."));
        assert!(prompt.contains("Notas de la agencia:\nTemporada alta en Semana Santa."));
    }

    #[test]
    fn units_split_on_separator() {
        assert_eq!(
            split_units("Hola 👋 [[NEXT]]  [[NEXT]] ¿A dónde viajas?"),
            vec!["Hola 👋", "¿A dónde viajas?"]
        );
        assert!(split_units("  ").is_empty());
    }
}
