//! Customer-facing copy for the paths where the model does not speak.

use crate::types::{DateWindow, TransportMode};

pub const GROUPED_PROMO_INTRO: &str = "¡Mira estas opciones que tengo para ti! 👇";
pub const FLAT_PROMO_INTRO: &str = "Te comparto nuestras promociones vigentes ✈️🌴";
pub const DEFAULT_FOLLOWUP: &str =
    "¿Te gustaría que te aparte alguna de estas opciones o prefieres que te cotice otras fechas? 😊";
pub const TURN_FAILED: &str = "Lo siento, tuvimos un problema al procesar tu mensaje 🙏 Un asesor de nuestro equipo te contactará en breve.";
pub const NO_RESERVATIONS: &str = "No encontré reservaciones asociadas a este número 🤔 ¿Me compartes tu número de reservación para revisarla?";
pub const RESERVATION_FAILED: &str = "No pude consultar tu reservación en este momento 🙏 Un asesor la revisará y te escribirá en breve.";

pub fn empty_reply(agency_name: &str) -> String {
    format!(
        "¡Gracias por escribir a {agency_name}! ✈️ En un momento uno de nuestros asesores te atiende."
    )
}

pub fn no_options(destination: &str, window: &DateWindow, mode: TransportMode) -> String {
    format!(
        "Lo siento, no encontré opciones para {destination} {} en {} 😔 ¿Probamos con otra fecha?",
        window.label(),
        mode.label().to_lowercase()
    )
}

pub fn window_failed(destination: &str, window: &DateWindow, mode: TransportMode) -> String {
    format!(
        "Tuvimos un pequeño inconveniente al buscar {destination} {} en {} 🙏 Un asesor ya fue notificado y te ayudará en breve.",
        window.label(),
        mode.label().to_lowercase()
    )
}

pub fn mode_transition(mode: TransportMode) -> String {
    format!("Ahora te comparto las opciones en {} 🔎", mode.label().to_lowercase())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn no_options_message_offers_another_date() {
        let window = DateWindow {
            departure: NaiveDate::from_ymd_opt(2030, 3, 10).unwrap(),
            return_date: NaiveDate::from_ymd_opt(2030, 3, 15).unwrap(),
        };
        let text = no_options("Mazatlán", &window, TransportMode::Bus);
        assert!(text.contains("no encontré opciones para Mazatlán del 10/03/2030 al 15/03/2030"));
        assert!(text.ends_with("¿Probamos con otra fecha?"));
    }
}
