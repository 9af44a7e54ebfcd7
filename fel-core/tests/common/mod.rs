use fel_core::company::{Company, CompanyCredentials};
use fel_core::config::FelConfig;
use fel_core::pos::{OrderLine, PosOrder};
use httpmock::MockServer;
use iso_currency::Currency;
use std::path::PathBuf;

pub const TOKEN_PATH: &str = "/api/login/get_token";
pub const CERTIFY_PATH: &str = "/api/v2/transform/nuc";
pub const NIT_PATH: &str = "/api/SHAREDINFO";

#[allow(dead_code)]
pub fn try_start_server() -> Option<MockServer> {
    std::panic::catch_unwind(MockServer::start).ok()
}

#[allow(dead_code)]
pub fn config_for(server: &MockServer) -> FelConfig {
    FelConfig::new(server.url(TOKEN_PATH), server.url(CERTIFY_PATH))
        .with_nit_validation_url(server.url(NIT_PATH))
}

#[allow(dead_code)]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[allow(dead_code)]
pub fn fixture_company() -> Company {
    let raw = std::fs::read_to_string(fixture_path("company.json")).expect("read company fixture");
    serde_json::from_str(&raw).expect("parse company fixture")
}

#[allow(dead_code)]
pub fn fixture_order() -> PosOrder {
    let raw = std::fs::read_to_string(fixture_path("order.json")).expect("read order fixture");
    serde_json::from_str(&raw).expect("parse order fixture")
}

#[allow(dead_code)]
pub fn credentials() -> CompanyCredentials {
    CompanyCredentials::new("1234567-8".into(), "ventas".into(), "s3cret".into())
        .expect("valid credentials")
}

#[allow(dead_code)]
pub fn company() -> Company {
    Company::new("Napari S.A.", "1234567-8")
        .with_street("6a Avenida 1-10 Zona 1")
        .with_email("contabilidad@napari.example")
        .with_credentials(credentials())
}

/// Two lines: 2 x 10.00 and 1 x 5.00 in GTQ.
#[allow(dead_code)]
pub fn two_line_order() -> PosOrder {
    PosOrder::new(
        "Napari Centro/0001",
        Currency::GTQ,
        vec![
            OrderLine::new("Cafe americano", 2.0, 10.0),
            OrderLine::new("Pan dulce", 1.0, 5.0),
        ],
        25.0,
    )
}

#[allow(dead_code)]
pub fn token_body(token: &str, expires: &str) -> serde_json::Value {
    serde_json::json!({
        "Token": token,
        "expira_en": expires,
        "otorgado_a": "GT.000012345678.ventas"
    })
}

#[allow(dead_code)]
pub fn certified_body() -> serde_json::Value {
    serde_json::json!({
        "Codigo": 1,
        "Mensaje": "Documento certificado",
        "AcuseReciboSAT": "",
        "NUMERO": "2573461204",
        "Serie": "E4A9F1B2",
        "Autorizacion": "E4A9F1B2-9950-4B35-8B1A-03D1C35A7F4E",
        "Fecha_de_certificacion": "2024-05-17T09:30:05",
        "ResponseDATA1": ""
    })
}
