//! Ceremony engine.
//!
//! Orchestrates the registration and authentication ceremonies over the
//! ledger, the session store, a [`SignatureVerifier`] and an optional
//! [`PreimageProofVerifier`]. Each operation drives its own
//! [`CeremonyStateMachine`] and runs inside a span.
//!
//! Nothing is written to the ledger until every verification step of a
//! finish operation has succeeded, and sessions are consumed before any
//! verification starts, so a failed finish can never be retried against
//! the same challenge.

use crate::clone_detector::{CloneDetector, CounterVerdict};
use crate::error::{CeremonyError, CeremonyResult};
use crate::ledger::CredentialLedger;
use crate::observability::{AuditEntry, AuditEventType, CeremonyMetrics, Observability};
use crate::session::{CeremonyKey, CeremonySession, CeremonySessionStore};
use crate::state::{CeremonyKind, CeremonyStateMachine};
use crate::webauthn::{
    AssertionResponse, ExpectedCeremony, RegistrationResponse, SignatureVerifier,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use zkpass_core::config::{CeremonyConfig, RelyingPartyConfig, ZkConfig};
use zkpass_core::{
    current_timestamp, AttestationConveyance, AuthenticatorInfo, AuthenticatorTransport, Config,
    Credential, CredentialFlags, CredentialId, Repository, SessionBackend, UserHandle,
    UserIdentity, UserVerificationRequirement, COSE_ALG_ES256,
};
use zkpass_crypto::{
    derive_challenge, random_challenge, recover_intent, Groth16PreimageVerifier, PreimageProof,
    PreimageProofVerifier, TransactionIntent, CHALLENGE_LENGTH,
};

/// Length of the server-generated hint that keys an authentication ceremony.
pub const CEREMONY_HINT_LENGTH: usize = 16;

fn b64url<T: AsRef<[u8]>, S: Serializer>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes.as_ref()))
}

#[derive(Debug, Clone, Serialize)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    #[serde(serialize_with = "b64url")]
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(serialize_with = "b64url")]
    pub id: Vec<u8>,
    pub transports: Vec<AuthenticatorTransport>,
}

impl From<&Credential> for CredentialDescriptor {
    fn from(credential: &Credential) -> Self {
        Self {
            kind: "public-key",
            id: credential.id.as_bytes().to_vec(),
            transports: credential.transports.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationRequest {
    /// Existing user to add a credential to; a new user is created when `None`
    pub user_handle: Option<UserHandle>,
    pub display_name: String,
    pub intent: Option<TransactionIntent>,
}

/// Creation options returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    #[serde(skip)]
    pub user_handle: UserHandle,
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    #[serde(serialize_with = "b64url")]
    pub challenge: Vec<u8>,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub timeout: u64,
    pub user_verification: UserVerificationRequirement,
    pub attestation: AttestationConveyance,
    pub exclude_credentials: Vec<CredentialDescriptor>,
}

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub credential_id: CredentialId,
    pub user_handle: UserHandle,
    pub sign_count: u32,
    pub flags: CredentialFlags,
    pub attestation_type: String,
    pub intent: Option<TransactionIntent>,
}

/// Request options returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOptions {
    #[serde(serialize_with = "b64url")]
    pub challenge: Vec<u8>,
    pub timeout: u64,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
    /// Must be echoed back in [`LoginRequest::ceremony_hint`]
    #[serde(serialize_with = "b64url")]
    pub ceremony_hint: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub user_handle: UserHandle,
    pub ceremony_hint: Vec<u8>,
    pub response: AssertionResponse,
    pub proof: Option<PreimageProof>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub credential_id: CredentialId,
    pub sign_count: u32,
    /// Advisory; the authentication itself succeeded
    pub clone_suspected: bool,
    pub user_verified: bool,
    pub proof_verified: bool,
    pub intent: Option<TransactionIntent>,
}

/// Load the Groth16 verifier named by `config`, if any.
pub fn proof_verifier_from_config(
    config: &ZkConfig,
) -> CeremonyResult<Option<Arc<dyn PreimageProofVerifier>>> {
    match &config.verifying_key_path {
        Some(path) => {
            let verifier = Groth16PreimageVerifier::from_file(path)
                .map_err(|e| CeremonyError::Internal(format!("verifying key: {}", e)))?;
            info!(path = %path.display(), "Loaded preimage verifying key");
            Ok(Some(Arc::new(verifier)))
        }
        None => Ok(None),
    }
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct CeremonyEngine<R, S, V> {
    relying_party: RelyingPartyConfig,
    ceremony: CeremonyConfig,
    ledger: CredentialLedger<R>,
    sessions: CeremonySessionStore<S>,
    verifier: Arc<V>,
    proof_verifier: Option<Arc<dyn PreimageProofVerifier>>,
    observability: Observability,
    clock: Clock,
}

impl<R, S, V> CeremonyEngine<R, S, V>
where
    R: Repository,
    S: SessionBackend,
    V: SignatureVerifier,
{
    pub fn new(
        config: &Config,
        repository: Arc<R>,
        sessions: Arc<S>,
        verifier: Arc<V>,
        observability: Observability,
    ) -> Self {
        Self {
            relying_party: config.relying_party.clone(),
            ceremony: config.ceremony.clone(),
            ledger: CredentialLedger::new(repository),
            sessions: CeremonySessionStore::new(sessions),
            verifier,
            proof_verifier: None,
            observability,
            clock: Arc::new(current_timestamp),
        }
    }

    /// Enable preimage-proof checking at login-finish.
    pub fn with_proof_verifier(mut self, verifier: Arc<dyn PreimageProofVerifier>) -> Self {
        self.proof_verifier = Some(verifier);
        self
    }

    /// Replace the wall clock (Unix milliseconds).
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn ledger(&self) -> &CredentialLedger<R> {
        &self.ledger
    }

    pub fn observability(&self) -> &Observability {
        &self.observability
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Start a registration ceremony.
    pub async fn begin_registration(
        &self,
        request: RegistrationRequest,
    ) -> CeremonyResult<RegistrationOptions> {
        let span = info_span!("begin_registration", user = tracing::field::Empty);
        async move {
            // Reject a bad intent before anything is persisted.
            let (challenge, intent_len) = issue_challenge(request.intent.as_ref())?;

            let user = match &request.user_handle {
                Some(handle) => self.ledger.user(handle).await?,
                None => {
                    let user = UserIdentity::new(request.display_name.clone());
                    self.ledger.create_user(&user).await?;
                    user
                }
            };
            tracing::Span::current().record("user", user.handle.fingerprint().as_str());

            let key = CeremonyKey::registration(&user.handle);
            let mut machine = CeremonyStateMachine::new(CeremonyKind::Registration, key.fingerprint());

            let exclude_credentials = self
                .ledger
                .active_for_user(&user.handle)
                .await?
                .iter()
                .map(CredentialDescriptor::from)
                .collect();

            let session = self.new_session(
                CeremonyKind::Registration,
                &challenge,
                &user.handle,
                Vec::new(),
                intent_len,
            );
            self.sessions.open(&key, &session).await?;
            machine.on_challenge_issued(&challenge)?;
            CeremonyMetrics::incr(&self.observability.metrics.ceremonies_begun_total);

            Ok(RegistrationOptions {
                user_handle: user.handle.clone(),
                rp: RelyingPartyEntity {
                    id: self.relying_party.id.clone(),
                    name: self.relying_party.name.clone(),
                },
                user: UserEntity {
                    id: user.handle.as_bytes().to_vec(),
                    name: user.display_name.clone(),
                    display_name: user.display_name,
                },
                challenge: challenge.to_vec(),
                pub_key_cred_params: vec![PubKeyCredParam {
                    kind: "public-key",
                    alg: COSE_ALG_ES256,
                }],
                timeout: self.ceremony.timeout_ms,
                user_verification: self.ceremony.user_verification,
                attestation: self.ceremony.attestation,
                exclude_credentials,
            })
        }
        .instrument(span)
        .await
    }

    /// Complete a registration ceremony and commit the new credential.
    pub async fn finish_registration(
        &self,
        user_handle: &UserHandle,
        response: RegistrationResponse,
    ) -> CeremonyResult<RegistrationOutcome> {
        let key = CeremonyKey::registration(user_handle);
        let span = info_span!(
            "finish_registration",
            ceremony = %key.fingerprint(),
            user = %user_handle.fingerprint()
        );
        async move {
            let mut machine =
                CeremonyStateMachine::new(CeremonyKind::Registration, key.fingerprint());
            let result = self
                .registration_steps(&key, user_handle, response, &mut machine)
                .await;
            self.settle(&mut machine, Some(user_handle), result)
        }
        .instrument(span)
        .await
    }

    async fn registration_steps(
        &self,
        key: &CeremonyKey,
        user_handle: &UserHandle,
        response: RegistrationResponse,
        machine: &mut CeremonyStateMachine,
    ) -> CeremonyResult<RegistrationOutcome> {
        let session = self.take_session(key, CeremonyKind::Registration, user_handle).await?;
        machine.on_challenge_issued(&session.challenge)?;

        let credential_id = CredentialId::new(response.credential_id.clone());
        machine.on_response_received(credential_id.fingerprint())?;

        let expected = expected_ceremony(&session);
        let verified = self
            .verifier
            .verify_registration(&expected, &response)
            .await
            .map_err(|e| CeremonyError::SignatureVerificationFailed(e.to_string()))?;
        enforce_user_verification(session.user_verification, &verified.flags)?;
        machine.on_verified()?;

        let now = self.now();
        let credential = Credential {
            id: credential_id.clone(),
            user_handle: user_handle.clone(),
            label: response.label,
            public_key: verified.public_key,
            attestation_type: verified.attestation_type.clone(),
            transports: response.transports,
            flags: verified.flags,
            authenticator: AuthenticatorInfo {
                aaguid: verified.aaguid,
                sign_count: verified.sign_count,
                counter_observed: verified.sign_count != 0,
                clone_warning: false,
                attachment: response.attachment,
            },
            attestation: verified.attestation,
            created_at: now,
            last_used_at: None,
            revoked_at: None,
        };
        self.ledger.create(&credential).await?;
        machine.on_committed()?;

        self.observability.audit(
            AuditEntry::new(AuditEventType::CredentialRegistered)
                .user(user_handle.fingerprint())
                .credential(credential_id.fingerprint())
                .detail(format!("attestation={}", verified.attestation_type)),
        );

        Ok(RegistrationOutcome {
            credential_id,
            user_handle: user_handle.clone(),
            sign_count: verified.sign_count,
            flags: verified.flags,
            attestation_type: verified.attestation_type,
            intent: bound_intent(&session),
        })
    }

    /// Start an authentication ceremony for a user with at least one active credential.
    pub async fn begin_login(
        &self,
        user_handle: &UserHandle,
        intent: Option<TransactionIntent>,
    ) -> CeremonyResult<LoginOptions> {
        let span = info_span!("begin_login", user = %user_handle.fingerprint());
        async move {
            let (challenge, intent_len) = issue_challenge(intent.as_ref())?;

            self.ledger.user(user_handle).await?;
            let credentials = self.ledger.active_for_user(user_handle).await?;
            if credentials.is_empty() {
                return Err(CeremonyError::UnknownCredential(
                    "no active credentials".to_string(),
                ));
            }

            let mut hint = vec![0u8; CEREMONY_HINT_LENGTH];
            OsRng.fill_bytes(&mut hint);
            let key = CeremonyKey::authentication(user_handle, &hint);
            let mut machine =
                CeremonyStateMachine::new(CeremonyKind::Authentication, key.fingerprint());

            let session = self.new_session(
                CeremonyKind::Authentication,
                &challenge,
                user_handle,
                credentials.iter().map(|c| c.id.clone()).collect(),
                intent_len,
            );
            self.sessions.open(&key, &session).await?;
            machine.on_challenge_issued(&challenge)?;
            CeremonyMetrics::incr(&self.observability.metrics.ceremonies_begun_total);

            debug!(
                ceremony = %key.fingerprint(),
                allowed = credentials.len(),
                "Login challenge issued"
            );

            Ok(LoginOptions {
                challenge: challenge.to_vec(),
                timeout: self.ceremony.timeout_ms,
                rp_id: self.relying_party.id.clone(),
                allow_credentials: credentials.iter().map(CredentialDescriptor::from).collect(),
                user_verification: self.ceremony.user_verification,
                ceremony_hint: hint,
            })
        }
        .instrument(span)
        .await
    }

    /// Complete an authentication ceremony.
    pub async fn finish_login(&self, request: LoginRequest) -> CeremonyResult<LoginOutcome> {
        let key = CeremonyKey::authentication(&request.user_handle, &request.ceremony_hint);
        let span = info_span!(
            "finish_login",
            ceremony = %key.fingerprint(),
            user = %request.user_handle.fingerprint()
        );
        async move {
            let mut machine =
                CeremonyStateMachine::new(CeremonyKind::Authentication, key.fingerprint());
            let user_handle = request.user_handle.clone();
            let result = self.login_steps(&key, request, &mut machine).await;
            self.settle(&mut machine, Some(&user_handle), result)
        }
        .instrument(span)
        .await
    }

    async fn login_steps(
        &self,
        key: &CeremonyKey,
        request: LoginRequest,
        machine: &mut CeremonyStateMachine,
    ) -> CeremonyResult<LoginOutcome> {
        let session = self
            .take_session(key, CeremonyKind::Authentication, &request.user_handle)
            .await?;
        machine.on_challenge_issued(&session.challenge)?;

        let response = request.response;
        let credential_id = CredentialId::new(response.credential_id.clone());
        machine.on_response_received(credential_id.fingerprint())?;

        let credential = self.select_credential(&session, &credential_id, &response).await?;

        let expected = expected_ceremony(&session);
        let verified = self
            .verifier
            .verify_assertion(&expected, &credential.public_key, &response)
            .await
            .map_err(|e| CeremonyError::SignatureVerificationFailed(e.to_string()))?;
        enforce_user_verification(session.user_verification, &verified.flags)?;

        let intent = bound_intent(&session);
        let proof_verified = match &request.proof {
            Some(proof) => {
                self.check_proof(proof, intent.as_ref(), &session.user_handle)
                    .await?;
                true
            }
            None => false,
        };
        machine.on_verified()?;

        let now = self.now();
        let presented = verified.sign_count;
        let flags = verified.flags;
        let verdict = self
            .ledger
            .update(&credential_id, move |stored| {
                if stored.is_revoked() {
                    return None;
                }
                let verdict = CloneDetector::apply(&mut stored.authenticator, presented);
                stored.flags.user_present = flags.user_present;
                stored.flags.user_verified = flags.user_verified;
                stored.flags.backup_state = flags.backup_state;
                stored.last_used_at = Some(now);
                Some(verdict)
            })
            .await?
            .ok_or_else(|| CeremonyError::UnknownCredential(credential_id.fingerprint()))?;
        machine.on_committed()?;

        let clone_suspected = verdict == CounterVerdict::CloneSuspected;
        if clone_suspected {
            CeremonyMetrics::incr(&self.observability.metrics.clone_warnings_total);
            warn!(
                credential = %credential_id.fingerprint(),
                stored = credential.authenticator.sign_count,
                presented,
                "Signature counter did not increase; possible cloned authenticator"
            );
            self.observability.audit(
                AuditEntry::new(AuditEventType::CloneSuspected)
                    .user(session.user_handle.fingerprint())
                    .credential(credential_id.fingerprint())
                    .detail(format!(
                        "stored={} presented={}",
                        credential.authenticator.sign_count, presented
                    )),
            );
        }
        self.observability.audit(
            AuditEntry::new(AuditEventType::AuthenticationSucceeded)
                .user(session.user_handle.fingerprint())
                .credential(credential_id.fingerprint()),
        );

        Ok(LoginOutcome {
            credential_id,
            sign_count: presented,
            clone_suspected,
            user_verified: flags.user_verified,
            proof_verified,
            intent,
        })
    }

    /// The responding credential must be allowed by the session, owned by
    /// the session's user, and not revoked.
    async fn select_credential(
        &self,
        session: &CeremonySession,
        credential_id: &CredentialId,
        response: &AssertionResponse,
    ) -> CeremonyResult<Credential> {
        let unknown = || CeremonyError::UnknownCredential(credential_id.fingerprint());

        if !session.allowed_credentials.contains(credential_id) {
            return Err(unknown());
        }
        if let Some(handle) = &response.user_handle {
            if handle.as_slice() != session.user_handle.as_bytes() {
                return Err(unknown());
            }
        }

        self.ledger
            .get(credential_id)
            .await?
            .filter(|c| !c.is_revoked() && c.user_handle == session.user_handle)
            .ok_or_else(unknown)
    }

    async fn check_proof(
        &self,
        proof: &PreimageProof,
        intent: Option<&TransactionIntent>,
        user_handle: &UserHandle,
    ) -> CeremonyResult<()> {
        let bound = intent.is_some_and(|i| i.transaction_hash.as_slice() == proof.public_hash.as_slice());
        if !bound {
            return Err(CeremonyError::IntentProofMismatch);
        }

        let Some(verifier) = self.proof_verifier.clone() else {
            return Err(CeremonyError::InvalidProof(
                "no verifying key configured".to_string(),
            ));
        };

        let owned = proof.clone();
        let result = tokio::task::spawn_blocking(move || verifier.verify(&owned.public_hash, &owned))
            .await
            .map_err(|e| CeremonyError::Internal(format!("proof task: {}", e)))?;

        let hash = hex::encode(proof.public_hash);
        match result {
            Ok(()) => {
                CeremonyMetrics::incr(&self.observability.metrics.proofs_verified_total);
                self.observability.audit(
                    AuditEntry::new(AuditEventType::ProofVerified)
                        .user(user_handle.fingerprint())
                        .detail(format!("hash={}", hash)),
                );
                Ok(())
            }
            Err(e) => {
                CeremonyMetrics::incr(&self.observability.metrics.proofs_rejected_total);
                self.observability.audit(
                    AuditEntry::new(AuditEventType::ProofRejected)
                        .user(user_handle.fingerprint())
                        .detail(format!("hash={} reason={}", hash, e)),
                );
                Err(e.into())
            }
        }
    }

    /// Soft-revoke a credential. It stops appearing in login options and is
    /// rejected at login-finish.
    pub async fn revoke_credential(&self, credential_id: &CredentialId) -> CeremonyResult<()> {
        self.ledger.revoke(credential_id, self.now()).await?;
        self.observability.audit(
            AuditEntry::new(AuditEventType::CredentialRevoked)
                .credential(credential_id.fingerprint()),
        );
        Ok(())
    }

    /// Drop stale sessions from the backend.
    pub async fn evict_expired_sessions(&self) -> CeremonyResult<usize> {
        self.sessions.evict_expired(self.now()).await
    }

    async fn take_session(
        &self,
        key: &CeremonyKey,
        kind: CeremonyKind,
        user_handle: &UserHandle,
    ) -> CeremonyResult<CeremonySession> {
        let session = self.sessions.consume(key, self.now()).await?;
        if session.kind != kind || &session.user_handle != user_handle {
            return Err(CeremonyError::SessionCorrupted(
                "session does not belong to this ceremony".to_string(),
            ));
        }
        Ok(session)
    }

    fn new_session(
        &self,
        kind: CeremonyKind,
        challenge: &[u8],
        user_handle: &UserHandle,
        allowed_credentials: Vec<CredentialId>,
        intent_len: Option<usize>,
    ) -> CeremonySession {
        CeremonySession {
            kind,
            challenge: challenge.to_vec(),
            rp_id: self.relying_party.id.clone(),
            user_handle: user_handle.clone(),
            allowed_credentials,
            expires_at: self.now().saturating_add(self.ceremony.timeout_ms),
            user_verification: self.ceremony.user_verification,
            intent_len,
            extensions: BTreeMap::new(),
        }
    }

    /// Record the outcome of a finish operation.
    fn settle<T>(
        &self,
        machine: &mut CeremonyStateMachine,
        user_handle: Option<&UserHandle>,
        result: CeremonyResult<T>,
    ) -> CeremonyResult<T> {
        let metrics = &self.observability.metrics;
        match &result {
            Ok(_) => {
                CeremonyMetrics::incr(&metrics.ceremonies_committed_total);
                info!(
                    kind = machine.kind().as_str(),
                    transition = machine.last_transition_hash().unwrap_or_default(),
                    "Ceremony committed"
                );
            }
            Err(e) => {
                machine.on_failure(e);
                CeremonyMetrics::incr(&metrics.ceremonies_failed_total);
                match e {
                    CeremonyError::SessionNotFound => {
                        CeremonyMetrics::incr(&metrics.replays_rejected_total)
                    }
                    CeremonyError::SessionExpired => {
                        CeremonyMetrics::incr(&metrics.sessions_expired_total)
                    }
                    _ => {}
                }
                warn!(
                    kind = machine.kind().as_str(),
                    code = e.code(),
                    error = %e,
                    "Ceremony failed"
                );

                let mut entry = AuditEntry::new(AuditEventType::CeremonyFailed).detail(e.code());
                if let Some(handle) = user_handle {
                    entry = entry.user(handle.fingerprint());
                }
                self.observability.audit(entry);
            }
        }
        result
    }
}

/// Intent-bound challenge when an intent is given, plain random otherwise.
fn issue_challenge(
    intent: Option<&TransactionIntent>,
) -> CeremonyResult<([u8; CHALLENGE_LENGTH], Option<usize>)> {
    match intent {
        Some(intent) => Ok((
            derive_challenge(&intent.transaction_hash, intent.nonce)?,
            Some(intent.transaction_hash.len()),
        )),
        None => Ok((random_challenge(), None)),
    }
}

fn bound_intent(session: &CeremonySession) -> Option<TransactionIntent> {
    session
        .intent_len
        .and_then(|len| recover_intent(&session.challenge, len))
}

fn expected_ceremony(session: &CeremonySession) -> ExpectedCeremony<'_> {
    ExpectedCeremony {
        challenge: &session.challenge,
        rp_id: &session.rp_id,
        user_verification: session.user_verification,
    }
}

fn enforce_user_verification(
    requirement: UserVerificationRequirement,
    flags: &CredentialFlags,
) -> CeremonyResult<()> {
    if requirement == UserVerificationRequirement::Required && !flags.user_verified {
        return Err(CeremonyError::SignatureVerificationFailed(
            "user verification required".to_string(),
        ));
    }
    Ok(())
}
