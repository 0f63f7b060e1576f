//! Remote registry client against a mock server

use sirene_ingest::lookup::{LookupConfig, LookupError, RegistryClient};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UNITE_LEGALE_BODY: &str = r#"{"header":{"statut":200,"message":"OK"},"uniteLegale":{"siren":"552100554"}}"#;

async fn client(server: &MockServer) -> RegistryClient {
    RegistryClient::new(LookupConfig::new(server.uri())).unwrap()
}

#[tokio::test]
async fn test_unite_legale_returns_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/siren/552100554"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(UNITE_LEGALE_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let body = client(&server).await.unite_legale("552100554").await.unwrap();
    assert_eq!(body, UNITE_LEGALE_BODY);
}

#[tokio::test]
async fn test_etablissement_trims_trailing_slash_in_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/siret/55210055400013"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"etablissement":{}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let client = RegistryClient::new(LookupConfig::new(format!("{}/", server.uri()))).unwrap();
    let body = client.etablissement("55210055400013").await.unwrap();
    assert_eq!(body, r#"{"etablissement":{}}"#);
}

#[tokio::test]
async fn test_not_found_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/siren/000000000"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_string(r#"{"header":{"statut":404,"message":"Aucun élément trouvé"}}"#),
        )
        .mount(&server)
        .await;

    let err = client(&server).await.unite_legale("000000000").await.unwrap_err();

    match err {
        LookupError::Remote { status, body } => {
            assert_eq!(status.as_u16(), 404);
            assert!(body.contains("Aucun"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_invalid_identifier_never_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server).await.etablissement("5521005540001").await.unwrap_err();
    assert!(matches!(err, LookupError::InvalidIdentifier { kind: "siret", .. }));
}
