mod common;

use common::{CERTIFY_PATH, NIT_PATH, certified_body, config_for, credentials, try_start_server};
use fel_core::api::{ApiError, FelClient, NitVerification};
use fel_core::config::FelConfig;
use httpmock::Method::{GET, POST};

const XML: &str = "<dte:GTDocumento/>";

#[test]
fn certify_sends_query_params_and_token() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(CERTIFY_PATH)
            .query_param("NIT", "000012345678")
            .query_param("TIPO", "CERTIFICATE_DTE_XML_TOSIGN")
            .query_param("FORMAT", "XML")
            .query_param("USERNAME", "ventas")
            .header("Authorization", "tok-1")
            .header("Content-Type", "application/xml")
            .body(XML);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(certified_body());
    });

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = FelClient::new(config_for(&server)).expect("client");
        let result = client
            .certify_dte(XML, "tok-1", &credentials())
            .await
            .expect("certified");
        assert_eq!(result.number, "2573461204");
        assert_eq!(result.series, "E4A9F1B2");
        assert_eq!(result.authorization, "E4A9F1B2-9950-4B35-8B1A-03D1C35A7F4E");
        assert_eq!(result.certified_at, "2024-05-17T09:30:05");
    });
    mock.assert();
}

#[test]
fn rejected_document_carries_upstream_message() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(POST).path(CERTIFY_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({
                "Codigo": 0,
                "Mensaje": "Error en validacion.",
                "ResponseDATA1": "El NIT del receptor no es valido."
            }));
    });

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = FelClient::new(config_for(&server)).expect("client");
        let err = client
            .certify_dte(XML, "tok-1", &credentials())
            .await
            .expect_err("rejected");
        match err {
            ApiError::Certification(message) => {
                assert_eq!(message, "Error en validacion. El NIT del receptor no es valido.");
            }
            other => panic!("unexpected error {other:?}"),
        }
    });
}

#[test]
fn non_200_status_is_a_certification_error() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(POST).path(CERTIFY_PATH);
        then.status(503).body("upstream unavailable");
    });

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = FelClient::new(config_for(&server)).expect("client");
        let err = client
            .certify_dte(XML, "tok-1", &credentials())
            .await
            .expect_err("503");
        match err {
            ApiError::Certification(message) => {
                assert!(message.contains("503"));
                assert!(message.contains("upstream unavailable"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    });
}

#[test]
fn malformed_body_is_a_certification_error() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(POST).path(CERTIFY_PATH);
        then.status(200).body("<html>gateway</html>");
    });

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = FelClient::new(config_for(&server)).expect("client");
        let err = client
            .certify_dte(XML, "tok-1", &credentials())
            .await
            .expect_err("invalid json");
        assert!(matches!(err, ApiError::Certification(ref m) if m.contains("invalid certification response")));
    });
}

#[test]
fn accepted_without_identifiers_is_rejected() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(POST).path(CERTIFY_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({ "Codigo": 1, "NUMERO": "1" }));
    });

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = FelClient::new(config_for(&server)).expect("client");
        let err = client
            .certify_dte(XML, "tok-1", &credentials())
            .await
            .expect_err("incomplete");
        assert!(matches!(err, ApiError::Certification(_)));
    });
}

#[test]
fn verify_nit_returns_taxpayer() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(NIT_PATH)
            .query_param("NIT", "000012345678")
            .query_param("DATA1", "SHARED_GETINFONITcom")
            .query_param("DATA2", "NIT|576937K")
            .query_param("USERNAME", "ventas")
            .header("Authorization", "tok-1");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({
                "REQUEST": [{ "Respuesta": "1" }],
                "RESPONSE": [{
                    "NIT": "576937K",
                    "NOMBRE": "LOPEZ,,ANA",
                    "Direccion": "CIUDAD"
                }]
            }));
    });

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = FelClient::new(config_for(&server)).expect("client");
        let verification = client
            .verify_nit("576937-k", "tok-1", &credentials())
            .await
            .expect("lookup");
        assert_eq!(
            verification,
            NitVerification::Valid {
                nit: "576937K".into(),
                name: "LOPEZ,,ANA".into(),
                address: "CIUDAD".into(),
            }
        );
    });
    mock.assert();
}

#[test]
fn verify_nit_reports_rejection() {
    let server = match try_start_server() {
        Some(server) => server,
        None => return,
    };
    server.mock(|when, then| {
        when.method(GET).path(NIT_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({
                "REQUEST": [{ "Respuesta": "0", "Mensaje": "NIT no valido" }],
                "RESPONSE": []
            }));
    });

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let client = FelClient::new(config_for(&server)).expect("client");
        let verification = client
            .verify_nit("1111", "tok-1", &credentials())
            .await
            .expect("lookup");
        assert!(!verification.is_valid());
        assert_eq!(
            verification,
            NitVerification::Invalid {
                reason: "NIT no valido".into()
            }
        );
    });
}

#[test]
fn verify_nit_without_url_is_not_configured() {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    rt.block_on(async {
        let config = FelConfig::new("http://127.0.0.1:9/token", "http://127.0.0.1:9/certify");
        let client = FelClient::new(config).expect("client");
        let err = client
            .verify_nit("576937K", "tok-1", &credentials())
            .await
            .expect_err("no url");
        assert!(matches!(err, ApiError::NotConfigured(_)));

        let err = client
            .verify_nit("  ", "tok-1", &credentials())
            .await
            .expect_err("blank nit");
        assert!(matches!(err, ApiError::NitValidation(_)));
    });
}
