//! Fixtures for unit tests in this crate.

use crate::types::{
    AttestationArtifacts, AuthenticatorAttachment, AuthenticatorInfo, AuthenticatorTransport,
    Credential, CredentialFlags, CredentialId, UserHandle, COSE_ALG_ES256,
};
use std::collections::BTreeSet;

pub(crate) fn sample_credential(owner: &UserHandle, id: &[u8]) -> Credential {
    Credential {
        id: CredentialId::new(id.to_vec()),
        user_handle: owner.clone(),
        label: "test-agent".to_string(),
        public_key: vec![4u8; 65],
        attestation_type: "none".to_string(),
        transports: BTreeSet::from([AuthenticatorTransport::Usb, AuthenticatorTransport::Nfc]),
        flags: CredentialFlags {
            user_present: true,
            user_verified: true,
            backup_eligible: false,
            backup_state: false,
        },
        authenticator: AuthenticatorInfo {
            aaguid: [7u8; 16],
            sign_count: 0,
            counter_observed: false,
            clone_warning: false,
            attachment: Some(AuthenticatorAttachment::CrossPlatform),
        },
        attestation: AttestationArtifacts {
            client_data_json: b"{}".to_vec(),
            client_data_hash: vec![1u8; 32],
            authenticator_data: vec![2u8; 37],
            public_key_algorithm: COSE_ALG_ES256,
            object: vec![0xa0],
        },
        created_at: 1_700_000_000_000,
        last_used_at: None,
        revoked_at: None,
    }
}
