use viva_limiter::modules::api_keys::models::{ApiKey, KeyStatus, Tier};

#[test]
fn test_plaintext_embeds_environment() {
    let dev = ApiKey::generate_plaintext("dev");
    let prod = ApiKey::generate_plaintext("prod");
    assert!(dev.starts_with("viva_dev_"));
    assert!(prod.starts_with("viva_prod_"));
}

#[test]
fn test_generated_keys_are_unique() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        assert!(seen.insert(ApiKey::generate_plaintext("dev")));
    }
}

#[test]
fn test_hash_known_vector() {
    // SHA-256("abc")
    assert_eq!(
        ApiKey::hash("abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_tier_defaults_scale_up() {
    assert_eq!(Tier::Free.default_rate_limit(), 1_000);
    assert!(Tier::Pro.default_rate_limit() > Tier::Free.default_rate_limit());
    assert!(Tier::Enterprise.default_rate_limit() > Tier::Pro.default_rate_limit());
}

#[test]
fn test_tier_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&Tier::Free).unwrap(), r#""free""#);
    assert_eq!(
        serde_json::to_string(&Tier::Enterprise).unwrap(),
        r#""enterprise""#
    );
    let parsed: Tier = serde_json::from_str(r#""pro""#).unwrap();
    assert_eq!(parsed, Tier::Pro);
}

#[test]
fn test_cache_serialization_round_trip() {
    // The metadata cache stores records as JSON; every field must survive
    let (mut key, _) = ApiKey::issue(
        "round-trip".to_string(),
        Tier::Pro,
        "dev",
        Some(5_000),
        Some(120),
        Some(serde_json::json!({"team": "payments"})),
    )
    .unwrap();
    key.burst = Some(7_500);
    key.status = KeyStatus::Suspended;

    let serialized = serde_json::to_string(&key).unwrap();
    let restored: ApiKey = serde_json::from_str(&serialized).unwrap();

    assert_eq!(restored.id, key.id);
    assert_eq!(restored.key_hash, key.key_hash);
    assert_eq!(restored.tier, Tier::Pro);
    assert_eq!(restored.status, KeyStatus::Suspended);
    assert_eq!(restored.rate_limit, 5_000);
    assert_eq!(restored.rate_window, 120);
    assert_eq!(restored.burst, Some(7_500));
    assert_eq!(restored.metadata["team"], "payments");
}

#[test]
fn test_rotation_invalidates_old_plaintext() {
    let (mut key, old_plaintext) =
        ApiKey::issue("rotate-me".to_string(), Tier::Free, "dev", None, None, None).unwrap();

    let new_plaintext = key.rotate("dev");

    // old plaintext no longer hashes to the stored value
    assert_ne!(ApiKey::hash(&old_plaintext), key.key_hash);
    assert_eq!(ApiKey::hash(&new_plaintext), key.key_hash);
}
