//! Encrypt-before-store and decrypt-after-fetch around an [`ObjectStore`]
//!
//! Objects are bound to their owner through AAD (`hstash-object-v1:{user_id}`),
//! so a ciphertext copied under another user's name never opens, while the
//! rename performed by a direct-mode rotation does not break it.

use std::sync::Arc;

use hstash_core::config::{HstashConfig, PasswordPolicy};
use hstash_core::{
    EncryptedObjectRecord, HstashError, HstashResult, KeyMode, RotationState, UserKeyMaterial,
};
use hstash_crypto::{
    checksum, decode_wrapped, derive_user_key, direct_content_key, encode_wrapped,
    generate_content_key, generate_object_name, generate_salt, hash_password, key_secret,
    open_with_aad, seal_with_aad, unwrap_content_key, verify_checksum, wrap_content_key,
    ContentKey, CryptoError, KdfParams, UserKey,
};
use hstash_storage::ObjectStore;
use secrecy::{ExposeSecret, SecretString};

use crate::keystore::KeyMaterialStore;
use crate::locks::UserLocks;
use crate::now_epoch;
use crate::records::RecordStore;

const OBJECT_AAD_PREFIX: &str = "hstash-object-v1:";

/// Runtime settings for a [`Vault`], usually built from the config file
#[derive(Debug)]
pub struct VaultSettings {
    pub kdf: KdfParams,
    pub server_secret: SecretString,
    /// Key mode for new uploads; existing records keep theirs
    pub key_mode: KeyMode,
    pub password_policy: PasswordPolicy,
    pub verify_on_download: bool,
}

impl VaultSettings {
    /// Fails with [`HstashError::Configuration`] when the server secret is
    /// missing or weak.
    pub fn from_config(cfg: &HstashConfig) -> HstashResult<Self> {
        Ok(Self {
            kdf: KdfParams::from(&cfg.crypto),
            server_secret: cfg.crypto.server_secret()?,
            key_mode: cfg.crypto.key_mode,
            password_policy: cfg.password.clone(),
            verify_on_download: cfg.crypto.verify_on_download,
        })
    }
}

/// Output of [`Vault::encrypt_for_storage`]: everything the caller persists.
#[derive(Debug, Clone)]
pub struct SealedObject {
    pub ciphertext: Vec<u8>,
    /// SHA-256 of the plaintext, lowercase hex
    pub checksum: String,
    pub wrapped_content_key: Option<String>,
    pub key_generation: u64,
    pub plaintext_len: u64,
}

/// Per-user encryption at rest.
///
/// User keys are derived on every call from the password, the stored salt and
/// the server secret, and dropped (zeroized) before the call returns.
pub struct Vault {
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) keys: Arc<dyn KeyMaterialStore>,
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) settings: VaultSettings,
    pub(crate) locks: UserLocks,
}

impl Vault {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        keys: Arc<dyn KeyMaterialStore>,
        records: Arc<dyn RecordStore>,
        settings: VaultSettings,
    ) -> Self {
        Self {
            objects,
            keys,
            records,
            settings,
            locks: UserLocks::new(),
        }
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    /// Create key material for a new account: verifier, first salt, generation 0.
    ///
    /// Concurrent enrollments of the same id are serialized; exactly one wins
    /// and the others get [`HstashError::AlreadyEnrolled`].
    pub async fn enroll(
        &self,
        user_id: &str,
        password: &SecretString,
    ) -> HstashResult<UserKeyMaterial> {
        check_user_id(user_id)?;
        self.settings
            .password_policy
            .check(password.expose_secret())?;

        let _guard = self.locks.exclusive(user_id).await;
        if self.keys.load(user_id).await?.is_some() {
            return Err(HstashError::AlreadyEnrolled(user_id.to_string()));
        }

        let material = UserKeyMaterial {
            user_id: user_id.to_string(),
            password_verifier: self.hash_verifier(password).await?,
            salt: generate_salt(),
            generation: 0,
        };
        self.keys.create(material.clone()).await?;

        tracing::info!(user_id = %user_id, "user enrolled");
        Ok(material)
    }

    /// Check a login password against the stored verifier.
    pub async fn verify_password(
        &self,
        user_id: &str,
        password: &SecretString,
    ) -> HstashResult<bool> {
        let material = self.load_material(user_id).await?;
        self.check_password(password, &material).await
    }

    /// Seal `plaintext` for `user_id` without touching the object store.
    ///
    /// The password is verified first, so a typo cannot produce an object
    /// that no later password opens.
    pub async fn encrypt_for_storage(
        &self,
        user_id: &str,
        password: &SecretString,
        plaintext: &[u8],
    ) -> HstashResult<SealedObject> {
        let _guard = self.locks.read(user_id).await;
        self.encrypt_locked(user_id, password, plaintext).await
    }

    /// Open a ciphertext described by `record`.
    ///
    /// A wrong password, a foreign ciphertext or any tampering yields
    /// [`HstashError::AuthenticationFailure`]; a record from an older key
    /// generation yields [`HstashError::StaleGeneration`].
    pub async fn decrypt_from_storage(
        &self,
        user_id: &str,
        password: &SecretString,
        record: &EncryptedObjectRecord,
        ciphertext: &[u8],
    ) -> HstashResult<Vec<u8>> {
        let _guard = self.locks.read(user_id).await;
        self.decrypt_locked(user_id, password, record, ciphertext)
            .await
    }

    /// Encrypt, store the ciphertext under a fresh opaque name, and record it.
    pub async fn upload(
        &self,
        user_id: &str,
        password: &SecretString,
        original_filename: &str,
        plaintext: &[u8],
    ) -> HstashResult<EncryptedObjectRecord> {
        let _guard = self.locks.read(user_id).await;
        let sealed = self.encrypt_locked(user_id, password, plaintext).await?;

        let object_name = generate_object_name(user_id, original_filename);
        self.objects.put(&object_name, sealed.ciphertext).await?;

        let record = EncryptedObjectRecord {
            object_name: object_name.clone(),
            owner_user_id: user_id.to_string(),
            checksum: sealed.checksum,
            plaintext_len: sealed.plaintext_len,
            key_generation: sealed.key_generation,
            wrapped_content_key: sealed.wrapped_content_key,
            created_at: now_epoch(),
        };

        if let Err(e) = self.records.put(record.clone()).await {
            if let Err(cleanup) = self.objects.delete(&object_name).await {
                tracing::warn!(object = %object_name, error = %cleanup, "orphaned object after failed record write");
            }
            return Err(e);
        }

        tracing::info!(
            user_id = %user_id,
            object = %object_name,
            bytes = record.plaintext_len,
            mode = ?record.key_mode(),
            "object uploaded"
        );
        Ok(record)
    }

    /// Fetch, decrypt and (when enabled) re-verify the checksum of an object.
    pub async fn download(
        &self,
        user_id: &str,
        password: &SecretString,
        object_name: &str,
    ) -> HstashResult<Vec<u8>> {
        let _guard = self.locks.read(user_id).await;
        let record = self.owned_record(user_id, object_name).await?;
        let ciphertext = self.objects.get(object_name).await?;
        let plaintext = self
            .decrypt_locked(user_id, password, &record, &ciphertext)
            .await?;

        if self.settings.verify_on_download && !verify_checksum(&plaintext, &record.checksum) {
            tracing::error!(user_id = %user_id, object = %object_name, "checksum mismatch after decrypt");
            return Err(HstashError::Integrity(object_name.to_string()));
        }

        tracing::debug!(user_id = %user_id, object = %object_name, "object downloaded");
        Ok(plaintext)
    }

    /// Remove an object and its record. An already-missing object is not an error.
    pub async fn delete(&self, user_id: &str, object_name: &str) -> HstashResult<()> {
        let _guard = self.locks.read(user_id).await;
        self.owned_record(user_id, object_name).await?;

        match self.objects.delete(object_name).await {
            Ok(()) | Err(HstashError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.records.remove(object_name).await?;

        tracing::info!(user_id = %user_id, object = %object_name, "object deleted");
        Ok(())
    }

    /// Records owned by `user_id`, oldest first.
    pub async fn list(&self, user_id: &str) -> HstashResult<Vec<EncryptedObjectRecord>> {
        self.records.list_by_owner(user_id).await
    }

    /// Where the user is in the rotation lifecycle.
    pub async fn rotation_state(&self, user_id: &str) -> HstashResult<RotationState> {
        if let Some(from_generation) = self.locks.rotating_from(user_id) {
            return Ok(RotationState::Rotating { from_generation });
        }
        let material = self.load_material(user_id).await?;
        Ok(RotationState::Stable {
            generation: material.generation,
        })
    }

    async fn encrypt_locked(
        &self,
        user_id: &str,
        password: &SecretString,
        plaintext: &[u8],
    ) -> HstashResult<SealedObject> {
        let material = self.load_material(user_id).await?;
        if !self.check_password(password, &material).await? {
            tracing::warn!(user_id = %user_id, "encrypt rejected: wrong password");
            return Err(HstashError::AuthenticationFailure);
        }

        let user_key = self.derive_key(user_id, password, &material.salt).await?;
        let (ciphertext, wrapped_content_key) =
            seal_object(&user_key, user_id, self.settings.key_mode, plaintext)?;

        Ok(SealedObject {
            ciphertext,
            checksum: checksum(plaintext),
            wrapped_content_key,
            key_generation: material.generation,
            plaintext_len: plaintext.len() as u64,
        })
    }

    async fn decrypt_locked(
        &self,
        user_id: &str,
        password: &SecretString,
        record: &EncryptedObjectRecord,
        ciphertext: &[u8],
    ) -> HstashResult<Vec<u8>> {
        if record.owner_user_id != user_id {
            return Err(HstashError::NotFound(record.object_name.clone()));
        }

        // Generation is pinned for the whole call: rotation needs the write lock
        let material = self.load_material(user_id).await?;
        if record.key_generation != material.generation {
            return Err(HstashError::StaleGeneration {
                record: record.key_generation,
                current: material.generation,
            });
        }

        let user_key = self.derive_key(user_id, password, &material.salt).await?;
        open_object(&user_key, record, ciphertext).inspect_err(|e| {
            tracing::warn!(user_id = %user_id, object = %record.object_name, error = %e, "decrypt failed");
        })
    }

    async fn owned_record(
        &self,
        user_id: &str,
        object_name: &str,
    ) -> HstashResult<EncryptedObjectRecord> {
        self.records
            .get(object_name)
            .await?
            .filter(|r| r.owner_user_id == user_id)
            .ok_or_else(|| HstashError::NotFound(object_name.to_string()))
    }

    pub(crate) async fn load_material(&self, user_id: &str) -> HstashResult<UserKeyMaterial> {
        self.keys
            .load(user_id)
            .await?
            .ok_or_else(|| HstashError::UnknownUser(user_id.to_string()))
    }

    /// Argon2id on the blocking pool
    pub(crate) async fn derive_key(
        &self,
        user_id: &str,
        password: &SecretString,
        salt: &[u8],
    ) -> HstashResult<UserKey> {
        let secret = key_secret(user_id, password, &self.settings.server_secret)?;
        let salt = salt.to_vec();
        let params = self.settings.kdf.clone();

        let key = tokio::task::spawn_blocking(move || derive_user_key(&secret, &salt, &params))
            .await
            .map_err(|e| anyhow::anyhow!("key derivation task failed: {e}"))??;
        Ok(key)
    }

    pub(crate) async fn check_password(
        &self,
        password: &SecretString,
        material: &UserKeyMaterial,
    ) -> HstashResult<bool> {
        let password = duplicate(password);
        let verifier = material.password_verifier.clone();

        let ok = tokio::task::spawn_blocking(move || {
            hstash_crypto::verify_password(&password, &verifier)
        })
        .await
        .map_err(|e| anyhow::anyhow!("password verification task failed: {e}"))??;
        Ok(ok)
    }

    pub(crate) async fn hash_verifier(&self, password: &SecretString) -> HstashResult<String> {
        let password = duplicate(password);
        let params = self.settings.kdf.clone();

        let verifier = tokio::task::spawn_blocking(move || hash_password(&password, &params))
            .await
            .map_err(|e| anyhow::anyhow!("password hashing task failed: {e}"))??;
        Ok(verifier)
    }
}

fn duplicate(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

/// `/` would escape the user's object prefix; `:` separates the fields of the
/// key derivation input.
fn check_user_id(user_id: &str) -> HstashResult<()> {
    if user_id.is_empty() || user_id.contains(['/', ':']) {
        return Err(HstashError::InvalidInput(format!(
            "user id must be non-empty and contain no '/' or ':': {user_id:?}"
        )));
    }
    Ok(())
}

pub(crate) fn object_aad(user_id: &str) -> Vec<u8> {
    format!("{OBJECT_AAD_PREFIX}{user_id}").into_bytes()
}

/// Seal one object's bytes; returns the ciphertext and, in envelope mode, the
/// encoded wrapped content key.
pub(crate) fn seal_object(
    user_key: &UserKey,
    user_id: &str,
    mode: KeyMode,
    plaintext: &[u8],
) -> HstashResult<(Vec<u8>, Option<String>)> {
    let aad = object_aad(user_id);
    match mode {
        KeyMode::Envelope => {
            let content_key = generate_content_key();
            let ciphertext = seal_with_aad(content_key.as_bytes(), plaintext, &aad)?;
            let wrapped = wrap_content_key(user_key, &content_key)?;
            Ok((ciphertext, Some(encode_wrapped(&wrapped))))
        }
        KeyMode::Direct => {
            let key = direct_content_key(user_key)?;
            Ok((seal_with_aad(key.as_bytes(), plaintext, &aad)?, None))
        }
    }
}

/// Recover the key that sealed `record`'s object.
///
/// A corrupt wrapped key reads as an authentication failure like any other
/// mismatch on the read path.
pub(crate) fn content_key_for(
    user_key: &UserKey,
    record: &EncryptedObjectRecord,
) -> HstashResult<ContentKey> {
    let result = match &record.wrapped_content_key {
        Some(encoded) => decode_wrapped(encoded).and_then(|w| unwrap_content_key(user_key, &w)),
        None => direct_content_key(user_key),
    };
    result.map_err(|e| match e {
        CryptoError::Malformed(_) => HstashError::AuthenticationFailure,
        other => other.into(),
    })
}

pub(crate) fn open_object(
    user_key: &UserKey,
    record: &EncryptedObjectRecord,
    ciphertext: &[u8],
) -> HstashResult<Vec<u8>> {
    let key = content_key_for(user_key, record)?;
    Ok(open_with_aad(
        key.as_bytes(),
        ciphertext,
        &object_aad(&record.owner_user_id),
    )?)
}
