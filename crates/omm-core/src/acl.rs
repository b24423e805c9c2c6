//! Access checks applied by the facade before dispatch.
//!
//! Administrators pass every check. Volume owners and admins own everything
//! under their volume. Anyone else needs an ACL entry granting the right the
//! operation requires: on the bucket for bucket and key operations, on the
//! volume for creating and listing buckets.

use crate::context::RequestContext;
use crate::metrics::OmOperation;
use derive_more::Display;
use omm_common::config::SecurityConfig;
use omm_common::{AclRights, OmError, OmResult};
use omm_store::OmStore;
use omm_store::keys::{bucket_key, volume_key};
use omm_store::rows::{AclRow, BucketRow, VolumeRow, to_acls};
use std::collections::HashSet;
use tracing::debug;

/// The resource a check is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AccessTarget<'a> {
    #[display("cluster")]
    Cluster,
    #[display("{_0}")]
    Volume(&'a str),
    #[display("{_0}/{_1}")]
    Bucket(&'a str, &'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// Right an operation needs from an ACL entry
#[must_use]
pub const fn required_right(op: OmOperation) -> AclRights {
    match op {
        OmOperation::CreateBucket => AclRights::CREATE,
        OmOperation::DeleteVolume | OmOperation::DeleteBucket | OmOperation::DeleteKey => {
            AclRights::DELETE
        }
        OmOperation::GetVolumeInfo
        | OmOperation::GetBucketInfo
        | OmOperation::LookupKey
        | OmOperation::ListMultipartUploadParts => AclRights::READ,
        OmOperation::ListVolumes
        | OmOperation::ListBuckets
        | OmOperation::ListKeys
        | OmOperation::ListTrash => AclRights::LIST,
        _ => AclRights::WRITE,
    }
}

fn grants(acls: &[AclRow], user: &str, right: AclRights) -> bool {
    to_acls(acls).iter().any(|acl| acl.grants(user, right))
}

pub struct AccessChecker {
    store: OmStore,
    enabled: bool,
    administrators: HashSet<String>,
}

impl AccessChecker {
    pub fn new(store: OmStore, security: &SecurityConfig) -> Self {
        Self {
            store,
            enabled: security.acl_enabled,
            administrators: security.administrators.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fail with `PERMISSION_DENIED` unless every target allows `op`
    pub fn check(
        &self,
        ctx: &RequestContext,
        op: OmOperation,
        targets: &[AccessTarget<'_>],
    ) -> OmResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(user) = ctx.user.as_deref() else {
            return Err(OmError::PermissionDenied {
                user: ctx.user_name().to_string(),
                resource: targets
                    .first()
                    .map_or_else(|| "cluster".to_string(), ToString::to_string),
            });
        };
        if self.administrators.contains(user) {
            return Ok(());
        }
        for target in targets {
            if self.evaluate(user, op, *target)? == AccessDecision::Deny {
                debug!("Denied {} on {} for {}", op.as_str(), target, user);
                return Err(OmError::PermissionDenied {
                    user: user.to_string(),
                    resource: target.to_string(),
                });
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        user: &str,
        op: OmOperation,
        target: AccessTarget<'_>,
    ) -> OmResult<AccessDecision> {
        let right = required_right(op);
        let allowed = match target {
            // only administrators create volumes; anyone may list them
            AccessTarget::Cluster => op == OmOperation::ListVolumes,
            AccessTarget::Volume(volume) => {
                match self.store.get_row::<VolumeRow>(&volume_key(volume))? {
                    // nothing to protect; the manager reports the absence
                    None => true,
                    Some(row) if row.owner == user || row.admin == user => true,
                    Some(_) if matches!(
                        op,
                        OmOperation::SetVolumeProperty | OmOperation::DeleteVolume
                    ) =>
                    {
                        false
                    }
                    Some(row) => grants(&row.acls, user, right),
                }
            }
            AccessTarget::Bucket(volume, bucket) => {
                let owner = self
                    .store
                    .get_row::<VolumeRow>(&volume_key(volume))?
                    .is_some_and(|row| row.owner == user || row.admin == user);
                owner
                    || match self.store.get_row::<BucketRow>(&bucket_key(volume, bucket))? {
                        None => true,
                        Some(row) => grants(&row.acls, user, right),
                    }
            }
        };
        Ok(if allowed {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny
        })
    }
}
