//! End-to-end ceremonies against the ES256 verifier with a software
//! authenticator, in-memory and SQLite storage, and real Groth16 proofs.

mod common;

use common::{engine_with, memory_engine, zk_keys, zk_rng, MemoryEngine, SoftAuthenticator};
use std::sync::Arc;
use zkpass_core::{Config, CredentialId, SqliteRepository, SqliteSessionBackend, UserHandle};
use zkpass_crypto::zk::{fr_to_bytes, mimc_hash};
use zkpass_crypto::{recover_intent, Fr, CHALLENGE_LENGTH};
use zkpass_identity::{
    AuditEventType, CeremonyError, LoginOutcome, LoginRequest, PreimageProof,
    RegistrationRequest, TransactionIntent,
};

async fn register(engine: &MemoryEngine, authenticator: &SoftAuthenticator) -> UserHandle {
    let options = engine
        .begin_registration(RegistrationRequest {
            display_name: "Alice".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    engine
        .finish_registration(
            &options.user_handle,
            authenticator.make_credential(&options.challenge),
        )
        .await
        .unwrap();
    options.user_handle
}

async fn login(
    engine: &MemoryEngine,
    handle: &UserHandle,
    authenticator: &mut SoftAuthenticator,
    intent: Option<TransactionIntent>,
    proof: Option<PreimageProof>,
) -> Result<LoginOutcome, CeremonyError> {
    login_stepped(engine, handle, authenticator, intent, proof, 1).await
}

async fn login_stepped(
    engine: &MemoryEngine,
    handle: &UserHandle,
    authenticator: &mut SoftAuthenticator,
    intent: Option<TransactionIntent>,
    proof: Option<PreimageProof>,
    step: u32,
) -> Result<LoginOutcome, CeremonyError> {
    let options = engine.begin_login(handle, intent).await?;
    let response = authenticator.get_assertion(&options.challenge, step);
    engine
        .finish_login(LoginRequest {
            user_handle: handle.clone(),
            ceremony_hint: options.ceremony_hint,
            response,
            proof,
        })
        .await
}

#[tokio::test]
async fn test_registration_commits_once_and_rejects_replay() {
    let (engine, sink) = memory_engine();
    let authenticator = SoftAuthenticator::new(b"credential-1");

    let options = engine
        .begin_registration(RegistrationRequest {
            display_name: "Alice".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(options.challenge.len(), CHALLENGE_LENGTH);
    assert!(options.exclude_credentials.is_empty());

    let response = authenticator.make_credential(&options.challenge);
    let outcome = engine
        .finish_registration(&options.user_handle, response.clone())
        .await
        .unwrap();
    assert_eq!(outcome.attestation_type, "packed");
    assert!(outcome.flags.user_verified);

    let credentials = engine.ledger().for_user(&options.user_handle).await.unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].public_key.len(), 65);
    assert_eq!(credentials[0].authenticator.aaguid, [0xA5u8; 16]);

    assert_eq!(
        engine
            .finish_registration(&options.user_handle, response)
            .await
            .unwrap_err(),
        CeremonyError::SessionNotFound
    );
    assert_eq!(
        engine.ledger().for_user(&options.user_handle).await.unwrap().len(),
        1
    );
    assert_eq!(sink.count(AuditEventType::CredentialRegistered), 1);
}

#[tokio::test]
async fn test_second_registration_excludes_existing_and_rejects_duplicate_id() {
    let (engine, _) = memory_engine();
    let authenticator = SoftAuthenticator::new(b"shared-id");
    let handle = register(&engine, &authenticator).await;

    let options = engine
        .begin_registration(RegistrationRequest {
            user_handle: Some(handle.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(options.exclude_credentials.len(), 1);
    assert_eq!(options.exclude_credentials[0].id, b"shared-id".to_vec());

    let err = engine
        .finish_registration(&handle, authenticator.make_credential(&options.challenge))
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::DuplicateCredential { .. }));
}

#[tokio::test]
async fn test_login_updates_counter_and_flags() {
    let (engine, sink) = memory_engine();
    let mut authenticator = SoftAuthenticator::new(b"credential-2");
    let handle = register(&engine, &authenticator).await;

    let outcome = login(&engine, &handle, &mut authenticator, None, None)
        .await
        .unwrap();
    assert_eq!(outcome.sign_count, 1);
    assert!(!outcome.clone_suspected);
    assert!(!outcome.proof_verified);
    assert!(outcome.intent.is_none());

    let stored = engine
        .ledger()
        .get(&CredentialId::new(b"credential-2".to_vec()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.authenticator.sign_count, 1);
    assert!(stored.last_used_at.is_some());
    assert_eq!(sink.count(AuditEventType::AuthenticationSucceeded), 1);
}

#[tokio::test]
async fn test_login_replay_is_rejected() {
    let (engine, _) = memory_engine();
    let mut authenticator = SoftAuthenticator::new(b"credential-3");
    let handle = register(&engine, &authenticator).await;

    let options = engine.begin_login(&handle, None).await.unwrap();
    let request = LoginRequest {
        user_handle: handle.clone(),
        ceremony_hint: options.ceremony_hint.clone(),
        response: authenticator.get_assertion(&options.challenge, 1),
        proof: None,
    };
    engine.finish_login(request.clone()).await.unwrap();
    assert_eq!(
        engine.finish_login(request).await.unwrap_err(),
        CeremonyError::SessionNotFound
    );
}

#[tokio::test]
async fn test_cloned_authenticator_raises_sticky_warning() {
    let (engine, sink) = memory_engine();
    let mut original = SoftAuthenticator::new(b"credential-4");
    let handle = register(&engine, &original).await;

    for _ in 0..3 {
        login(&engine, &handle, &mut original, None, None).await.unwrap();
    }

    let mut clone = original.clone_device();
    let outcome = login(&engine, &handle, &mut clone, None, None).await.unwrap();
    assert!(outcome.clone_suspected);
    assert_eq!(outcome.sign_count, 1);

    // The original keeps working but the warning stays.
    let outcome = login(&engine, &handle, &mut original, None, None).await.unwrap();
    assert!(!outcome.clone_suspected);
    let stored = engine
        .ledger()
        .get(&CredentialId::new(b"credential-4".to_vec()))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.authenticator.clone_warning);
    assert_eq!(stored.authenticator.sign_count, 4);
    assert_eq!(sink.count(AuditEventType::CloneSuspected), 1);
    assert_eq!(engine.observability().metrics.snapshot().clone_warnings_total, 1);
}

#[tokio::test]
async fn test_counter_reset_to_zero_keeps_flagging() {
    let (engine, sink) = memory_engine();
    let mut original = SoftAuthenticator::new(b"credential-14");
    let handle = register(&engine, &original).await;
    login_stepped(&engine, &handle, &mut original, None, None, 5)
        .await
        .unwrap();

    let mut clone = original.clone_device();
    for _ in 0..2 {
        let outcome = login_stepped(&engine, &handle, &mut clone, None, None, 0)
            .await
            .unwrap();
        assert!(outcome.clone_suspected);
        assert_eq!(outcome.sign_count, 0);
    }
    assert_eq!(sink.count(AuditEventType::CloneSuspected), 2);
}

#[tokio::test]
async fn test_bad_signature_leaves_credential_untouched() {
    let (engine, _) = memory_engine();
    let mut authenticator = SoftAuthenticator::new(b"credential-5");
    let handle = register(&engine, &authenticator).await;

    let options = engine.begin_login(&handle, None).await.unwrap();
    let mut response = authenticator.get_assertion(&options.challenge, 10);
    let last = response.signature.len() - 1;
    response.signature[last] ^= 0x01;

    let err = engine
        .finish_login(LoginRequest {
            user_handle: handle.clone(),
            ceremony_hint: options.ceremony_hint,
            response,
            proof: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::SignatureVerificationFailed(_)));
    assert_eq!(err.public_message(), "Authentication failed");

    let stored = engine
        .ledger()
        .get(&CredentialId::new(b"credential-5".to_vec()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.authenticator.sign_count, 0);
    assert!(stored.last_used_at.is_none());
}

#[tokio::test]
async fn test_revoked_credential_cannot_finish_open_ceremony() {
    let (engine, _) = memory_engine();
    let mut authenticator = SoftAuthenticator::new(b"credential-6");
    let handle = register(&engine, &authenticator).await;

    let options = engine.begin_login(&handle, None).await.unwrap();
    engine
        .revoke_credential(&CredentialId::new(b"credential-6".to_vec()))
        .await
        .unwrap();

    let err = engine
        .finish_login(LoginRequest {
            user_handle: handle.clone(),
            ceremony_hint: options.ceremony_hint,
            response: authenticator.get_assertion(&options.challenge, 1),
            proof: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::UnknownCredential(_)));
    assert!(matches!(
        engine.begin_login(&handle, None).await,
        Err(CeremonyError::UnknownCredential(_))
    ));
}

#[tokio::test]
async fn test_unknown_user_cannot_begin_login() {
    let (engine, _) = memory_engine();
    assert_eq!(
        engine
            .begin_login(&UserHandle::generate(), None)
            .await
            .unwrap_err(),
        CeremonyError::UnknownUser
    );
}

#[tokio::test]
async fn test_intent_bound_login_with_valid_proof() {
    let (prover, verifier) = zk_keys();
    let (engine, sink) = memory_engine();
    let engine = engine.with_proof_verifier(verifier.clone());
    let mut authenticator = SoftAuthenticator::new(b"credential-7");
    let handle = register(&engine, &authenticator).await;

    let proof = prover.prove(Fr::from(42u64), &mut zk_rng()).unwrap();
    let h = fr_to_bytes(&mimc_hash(Fr::from(42u64)));
    assert_eq!(proof.public_hash, h);

    let intent = TransactionIntent::new(h.to_vec(), 77);
    let options = engine.begin_login(&handle, Some(intent.clone())).await.unwrap();
    assert_eq!(recover_intent(&options.challenge, 32), Some(intent.clone()));

    let outcome = engine
        .finish_login(LoginRequest {
            user_handle: handle.clone(),
            ceremony_hint: options.ceremony_hint,
            response: authenticator.get_assertion(&options.challenge, 1),
            proof: Some(proof),
        })
        .await
        .unwrap();
    assert!(outcome.proof_verified);
    assert_eq!(outcome.intent, Some(intent));
    assert_eq!(sink.count(AuditEventType::ProofVerified), 1);
}

#[tokio::test]
async fn test_proof_for_other_transaction_is_a_mismatch() {
    let (prover, verifier) = zk_keys();
    let (engine, _) = memory_engine();
    let engine = engine.with_proof_verifier(verifier.clone());
    let mut authenticator = SoftAuthenticator::new(b"credential-8");
    let handle = register(&engine, &authenticator).await;

    // Individually valid proof, but for MiMC(43) while the challenge binds MiMC(42).
    let proof = prover.prove(Fr::from(43u64), &mut zk_rng()).unwrap();
    let bound = fr_to_bytes(&mimc_hash(Fr::from(42u64)));

    let err = login(
        &engine,
        &handle,
        &mut authenticator,
        Some(TransactionIntent::new(bound.to_vec(), 1)),
        Some(proof),
    )
    .await
    .unwrap_err();
    assert_eq!(err, CeremonyError::IntentProofMismatch);

    let stored = engine
        .ledger()
        .get(&CredentialId::new(b"credential-8".to_vec()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.authenticator.sign_count, 0);
}

#[tokio::test]
async fn test_forged_proof_is_rejected() {
    let (prover, verifier) = zk_keys();
    let (engine, sink) = memory_engine();
    let engine = engine.with_proof_verifier(verifier.clone());
    let mut authenticator = SoftAuthenticator::new(b"credential-9");
    let handle = register(&engine, &authenticator).await;

    let h = fr_to_bytes(&mimc_hash(Fr::from(42u64)));
    let mut proof = prover.prove(Fr::from(43u64), &mut zk_rng()).unwrap();
    proof.public_hash = h;

    let err = login(
        &engine,
        &handle,
        &mut authenticator,
        Some(TransactionIntent::new(h.to_vec(), 1)),
        Some(proof),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CeremonyError::InvalidProof(_)));
    assert_eq!(sink.count(AuditEventType::ProofRejected), 1);
}

#[tokio::test]
async fn test_proof_without_configured_verifier_is_rejected() {
    let (prover, _) = zk_keys();
    let (engine, _) = memory_engine();
    let mut authenticator = SoftAuthenticator::new(b"credential-10");
    let handle = register(&engine, &authenticator).await;

    let proof = prover.prove(Fr::from(42u64), &mut zk_rng()).unwrap();
    let err = login(
        &engine,
        &handle,
        &mut authenticator,
        Some(TransactionIntent::new(proof.public_hash.to_vec(), 1)),
        Some(proof),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CeremonyError::InvalidProof(_)));
}

#[tokio::test]
async fn test_concurrent_finish_has_single_winner() {
    let (engine, _) = memory_engine();
    let engine = Arc::new(engine);
    let mut authenticator = SoftAuthenticator::new(b"credential-11");
    let handle = register(&engine, &authenticator).await;

    let options = engine.begin_login(&handle, None).await.unwrap();
    let request = LoginRequest {
        user_handle: handle.clone(),
        ceremony_hint: options.ceremony_hint,
        response: authenticator.get_assertion(&options.challenge, 1),
        proof: None,
    };

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let request = request.clone();
        tasks.push(tokio::spawn(async move { engine.finish_login(request).await }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e, CeremonyError::SessionNotFound),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_user_verification_required_rejects_presence_only() {
    let mut config = Config::default_config();
    config.ceremony.user_verification = zkpass_core::UserVerificationRequirement::Required;
    let (engine, _) = engine_with(
        &config,
        Arc::new(zkpass_core::MemoryRepository::new()),
        Arc::new(zkpass_core::MemorySessionBackend::new()),
    );

    let mut authenticator = SoftAuthenticator::new(b"credential-12");
    authenticator.user_verified = false;
    authenticator.packed = false;

    let options = engine
        .begin_registration(RegistrationRequest::default())
        .await
        .unwrap();
    let err = engine
        .finish_registration(
            &options.user_handle,
            authenticator.make_credential(&options.challenge),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CeremonyError::SignatureVerificationFailed(ref reason) if reason == "user verification required"
    ));
}

#[tokio::test]
async fn test_sqlite_backed_ceremony_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default_config();
    config.storage.database_path = Some(dir.path().join("zkpass.db"));

    let mut authenticator = SoftAuthenticator::new(b"credential-13");
    let handle = {
        let (engine, _) = engine_with(
            &config,
            Arc::new(SqliteRepository::from_config(&config.storage).unwrap()),
            Arc::new(SqliteSessionBackend::from_config(&config.storage).unwrap()),
        );
        let options = engine
            .begin_registration(RegistrationRequest::default())
            .await
            .unwrap();
        engine
            .finish_registration(
                &options.user_handle,
                authenticator.make_credential(&options.challenge),
            )
            .await
            .unwrap();
        options.user_handle
    };

    let (engine, _) = engine_with(
        &config,
        Arc::new(SqliteRepository::from_config(&config.storage).unwrap()),
        Arc::new(SqliteSessionBackend::from_config(&config.storage).unwrap()),
    );
    let options = engine.begin_login(&handle, None).await.unwrap();
    let outcome = engine
        .finish_login(LoginRequest {
            user_handle: handle.clone(),
            ceremony_hint: options.ceremony_hint,
            response: authenticator.get_assertion(&options.challenge, 3),
            proof: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.sign_count, 3);
}
