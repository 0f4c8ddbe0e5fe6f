//! End-to-end parsing of model replies: control block, side-channel markers
//! and the quote request they carry.

use agency_chat_server::control;
use agency_chat_server::markers;
use agency_chat_server::quote::{
    self,
    windows::{derive_windows, WeekdayPatternPolicy},
};
use agency_chat_server::types::{DateWindow, TransportMode};
use chrono::NaiveDate;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn quote_reply_leaves_only_the_friendly_text() {
    let raw = "¡Perfecto, Lucía! Ya estoy buscando opciones para Mazatlán 🔎\n\
[[FICHA_COTI:77]] data: {\"destino\":\"Mazatlán\",\"fechas\":[{\"salida\":\"2030-04-03\",\"regreso\":\"2030-04-06\"}],\"transporte\":\"autobús\",\"adultos\":3}\n\
<ctrl>{\"intent\":\"cotizacion\",\"tags\":[\"mazatlan\"]}</ctrl>";

    let parsed = control::parse(raw);
    let payload = parsed.control.expect("control block decodes");
    assert_eq!(payload.intent.as_deref(), Some("cotizacion"));
    assert_eq!(payload.tags, vec!["mazatlan"]);

    let side = markers::extract(&parsed.visible_text);
    assert_eq!(
        side.visible_text,
        "¡Perfecto, Lucía! Ya estoy buscando opciones para Mazatlán 🔎"
    );
    assert_eq!(side.quotes.len(), 1);
    assert_eq!(side.quotes[0].quote_id, "77");

    let request = quote::parse_request(&side.quotes[0].payload).expect("quote request");
    assert_eq!(request.destination, "Mazatlán");
    assert_eq!(request.transport_modes, vec![TransportMode::Bus]);
    assert_eq!(request.travelers.adults, 3);

    // 2030-04-03 is a Wednesday; the Thursday bus is one day away.
    let windows = derive_windows(
        &WeekdayPatternPolicy::default(),
        TransportMode::Bus,
        &request.windows,
        3,
        date(2030, 3, 1),
    );
    assert_eq!(
        windows,
        vec![DateWindow {
            departure: date(2030, 4, 4),
            return_date: date(2030, 4, 7),
        }]
    );
}

#[test]
fn unterminated_block_never_reaches_the_customer() {
    let raw = "Claro, te comparto promociones.\n<ctrl>{\"intent\":\"promociones\",\"promoFilter\":{\"destino\":\"Huatulco\"}}";
    let parsed = control::parse(raw);
    assert_eq!(parsed.visible_text, "Claro, te comparto promociones.");
    assert!(!control::contains_markup(&parsed.visible_text));
    let payload = parsed.control.unwrap();
    assert_eq!(payload.promo_filter.unwrap()["destino"], "Huatulco");
}

#[test]
fn broken_payload_keeps_the_visible_text() {
    let parsed = control::parse("Te busco opciones <ctrl>{intent: cotizacion</ctrl> enseguida");
    assert!(parsed.control.is_none());
    assert_eq!(parsed.visible_text, "Te busco opciones\nenseguida");
}

#[test]
fn promo_reply_with_reservation_lookup() {
    let raw = r#"Aquí va lo mejor de la semana
[[PROMO_GROUP]]{"imagenes":["https://cdn.example.com/cun.jpg"],"ofertas":"Cancún 5 noches desde $8,990","incluye":"Vuelo redondo + hotel todo incluido"}
[[CONSULTA_RESERVA]]
<ctrl>{"intent":"promociones"}</ctrl>"#;

    let parsed = control::parse(raw);
    assert_eq!(
        parsed.control.and_then(|c| c.intent).as_deref(),
        Some("promociones")
    );

    let side = markers::extract(&parsed.visible_text);
    assert_eq!(side.visible_text, "Aquí va lo mejor de la semana");
    assert!(side.reservation_lookup);
    let promo = side.grouped_promo.unwrap();
    assert_eq!(promo.images, vec!["https://cdn.example.com/cun.jpg"]);
    assert_eq!(
        promo.offers_text.as_deref(),
        Some("Cancún 5 noches desde $8,990")
    );
}
