//! Password change and key rotation
//!
//! A rotation moves a user from key generation `g` to `g + 1`:
//!
//! ```text
//! Stable(g) ──change_password──▶ Rotating(g) ──commit──▶ Stable(g + 1)
//!                                     │
//!                                     └──any failure──▶ Stable(g)
//! ```
//!
//! Envelope-mode records only need their content key re-wrapped. Direct-mode
//! objects are decrypted under the old key and written under the new key to
//! fresh staged names; the old objects are deleted only once the new key
//! material is committed.

use hstash_core::{EncryptedObjectRecord, HstashError, HstashResult, UserKeyMaterial};
use hstash_crypto::{
    decode_wrapped, encode_wrapped, generate_object_name, generate_salt, unwrap_content_key,
    verify_checksum, wrap_content_key, UserKey,
};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::vault::{open_object, seal_object, Vault};

/// Summary of a committed rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Key generation now in force
    pub generation: u64,
    /// Envelope-mode records whose content key was re-wrapped
    pub rewrapped: usize,
    /// Direct-mode objects rewritten under the new key
    pub reencrypted: usize,
}

/// New record states computed before anything is committed
struct RotationPlan {
    records: Vec<EncryptedObjectRecord>,
    /// Direct-mode object names replaced by staged copies
    superseded: Vec<String>,
    rewrapped: usize,
    reencrypted: usize,
}

impl Vault {
    /// Change a user's password, rotating every key that depends on it.
    ///
    /// All-or-nothing: on any failure every object stays readable with
    /// `current_password` and the stored salt is unchanged.
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &SecretString,
        new_password: &SecretString,
    ) -> HstashResult<RotationReport> {
        let guard = self.locks.begin_rotation(user_id).await?;

        let old = self.load_material(user_id).await?;
        guard.set_from_generation(old.generation);
        tracing::info!(user_id = %user_id, generation = old.generation, "rotation started");

        if !self.check_password(current_password, &old).await? {
            tracing::warn!(user_id = %user_id, "rotation rejected: wrong current password");
            return Err(HstashError::AuthenticationFailure);
        }
        self.settings
            .password_policy
            .check(new_password.expose_secret())?;

        let mut new_salt = generate_salt();
        while new_salt == old.salt {
            new_salt = generate_salt();
        }
        let old_key = self.derive_key(user_id, current_password, &old.salt).await?;
        let new_key = self.derive_key(user_id, new_password, &new_salt).await?;
        let new_verifier = self.hash_verifier(new_password).await?;
        let next_generation = old.generation + 1;

        let previous = self.records.list_by_owner(user_id).await?;
        let mut staged = Vec::new();

        let plan = match self
            .prepare_rotation(&old, &old_key, &new_key, &previous, next_generation, &mut staged)
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "rotation aborted while preparing");
                self.discard_staged(&staged).await;
                return Err(e);
            }
        };

        if let Err(e) = self.records.replace_all(user_id, plan.records).await {
            tracing::warn!(user_id = %user_id, error = %e, "rotation aborted: record commit failed");
            self.discard_staged(&staged).await;
            return Err(e);
        }

        let material = UserKeyMaterial {
            user_id: user_id.to_string(),
            password_verifier: new_verifier,
            salt: new_salt,
            generation: next_generation,
        };
        if let Err(e) = self.keys.store(material).await {
            tracing::error!(user_id = %user_id, error = %e, "key material commit failed, restoring records");
            match self.records.replace_all(user_id, previous).await {
                Ok(()) => self.discard_staged(&staged).await,
                // Records may still point at staged objects; keep them
                Err(restore) => tracing::error!(
                    user_id = %user_id,
                    error = %restore,
                    staged = staged.len(),
                    "record rollback failed"
                ),
            }
            return Err(e);
        }

        for name in &plan.superseded {
            if let Err(e) = self.objects.delete(name).await {
                tracing::warn!(object = %name, error = %e, "superseded object not deleted");
            }
        }

        tracing::info!(
            user_id = %user_id,
            generation = next_generation,
            rewrapped = plan.rewrapped,
            reencrypted = plan.reencrypted,
            "rotation committed"
        );
        Ok(RotationReport {
            generation: next_generation,
            rewrapped: plan.rewrapped,
            reencrypted: plan.reencrypted,
        })
    }

    async fn prepare_rotation(
        &self,
        old: &UserKeyMaterial,
        old_key: &UserKey,
        new_key: &UserKey,
        previous: &[EncryptedObjectRecord],
        next_generation: u64,
        staged: &mut Vec<String>,
    ) -> HstashResult<RotationPlan> {
        let mut plan = RotationPlan {
            records: Vec::with_capacity(previous.len()),
            superseded: Vec::new(),
            rewrapped: 0,
            reencrypted: 0,
        };

        for record in previous {
            if record.key_generation != old.generation {
                return Err(HstashError::StaleGeneration {
                    record: record.key_generation,
                    current: old.generation,
                });
            }

            let mut next = record.clone();
            next.key_generation = next_generation;

            match &record.wrapped_content_key {
                Some(encoded) => {
                    let wrapped = decode_wrapped(encoded)?;
                    let content_key = unwrap_content_key(old_key, &wrapped)?;
                    next.wrapped_content_key =
                        Some(encode_wrapped(&wrap_content_key(new_key, &content_key)?));
                    plan.rewrapped += 1;
                }
                None => {
                    let ciphertext = self.objects.get(&record.object_name).await?;
                    let plaintext =
                        Zeroizing::new(open_object(old_key, record, &ciphertext)?);
                    if !verify_checksum(&plaintext, &record.checksum) {
                        return Err(HstashError::Integrity(record.object_name.clone()));
                    }

                    let (resealed, _) = seal_object(
                        new_key,
                        &record.owner_user_id,
                        record.key_mode(),
                        &plaintext,
                    )?;
                    let staged_name =
                        generate_object_name(&record.owner_user_id, &record.object_name);
                    self.objects.put(&staged_name, resealed).await?;
                    staged.push(staged_name.clone());

                    next.object_name = staged_name;
                    plan.superseded.push(record.object_name.clone());
                    plan.reencrypted += 1;
                }
            }
            plan.records.push(next);
        }

        Ok(plan)
    }

    async fn discard_staged(&self, staged: &[String]) {
        for name in staged {
            if let Err(e) = self.objects.delete(name).await {
                tracing::warn!(object = %name, error = %e, "staged object not deleted");
            }
        }
    }
}
