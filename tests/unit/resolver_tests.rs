/*!
 * Tests for client resolution through the public API
 */

use std::sync::Arc;

use robaws_intake::app_config::{ResolverConfig, RobawsConfig};
use robaws_intake::resolver::normalize::{normalize_name, phone_key};
use robaws_intake::resolver::{ContactHint, MatchReason, Resolver};
use robaws_intake::robaws::mock::MockRobaws;
use robaws_intake::robaws::RobawsClient;

use crate::common::acme_client;

fn resolver(mock: &MockRobaws, config: ResolverConfig) -> Resolver {
    let robaws = RobawsConfig {
        page_size: 2,
        ..RobawsConfig::default()
    };
    Resolver::new(Arc::new(mock.clone()), config, &robaws)
}

fn other_clients() -> Vec<RobawsClient> {
    vec![
        RobawsClient { id: 3, name: "Lagos Auto Import Ltd".to_string(), ..RobawsClient::default() },
        RobawsClient { id: 5, name: "Tema Motors".to_string(), ..RobawsClient::default() },
        RobawsClient { id: 8, name: "Acme Tradng".to_string(), ..RobawsClient::default() },
    ]
}

#[tokio::test]
async fn test_resolve_phoneOnAnotherPage_shouldMatchByPhone() {
    let mut clients = other_clients();
    clients.push(acme_client());
    let mock = MockRobaws::with_clients(clients);
    let resolver = resolver(&mock, ResolverConfig::default());

    let hint = ContactHint {
        phone: Some("0032 470 123 456".to_string()),
        ..ContactHint::default()
    };
    let resolution = resolver.resolve(&hint).await.unwrap().unwrap();

    assert_eq!(resolution.client_id, 12);
    assert_eq!(resolution.reason, MatchReason::Phone);
    // Four clients at two per page
    assert_eq!(mock.list_calls(), 2);
}

#[tokio::test]
async fn test_resolve_typoInCompanyName_shouldMatchFuzzily() {
    let mock = MockRobaws::with_clients(other_clients());
    let resolver = resolver(&mock, ResolverConfig { min_confidence: 0.6, ..ResolverConfig::default() });

    let hint = ContactHint {
        company: Some("ACME Trading B.V.".to_string()),
        ..ContactHint::default()
    };
    let resolution = resolver.resolve(&hint).await.unwrap().unwrap();

    assert_eq!(resolution.client_id, 8);
    assert_eq!(resolution.reason, MatchReason::FuzzyName);
    assert!(resolution.score < 0.85);
}

#[tokio::test]
async fn test_resolveOrCreate_unknownCompany_shouldCreateClientWithContact() {
    let mock = MockRobaws::with_clients(other_clients());
    let resolver = resolver(
        &mock,
        ResolverConfig { create_missing_clients: true, ..ResolverConfig::default() },
    );

    let hint = ContactHint {
        company: Some("Cotonou Cars SARL".to_string()),
        name: Some("Amina Diallo".to_string()),
        email: Some("amina@cotonou-cars.bj".to_string()),
        phone: None,
    };
    let resolution = resolver.resolve_or_create(&hint).await.unwrap().unwrap();

    assert!(resolution.created());
    assert!(resolution.contact_id.is_some());
    assert_eq!(mock.created_clients(), 1);

    // Memoised: asking again does not create a second client
    resolver.resolve_or_create(&hint).await.unwrap();
    assert_eq!(mock.created_clients(), 1);
}

#[test]
fn test_normalizers_shouldAgreeAcrossFormats() {
    assert_eq!(normalize_name("ACME Trading B.V."), normalize_name("Acme Trading"));
    assert_eq!(phone_key("+32 (0)470 12 34 56"), phone_key("0470/12.34.56"));
}
