//! Permission enforcer
//!
//! Deny-by-default gate in front of every filesystem operation. Decision
//! order:
//!
//! 1. System subjects may touch `/system/` only; anything else is a typed
//!    "system bypass not allowed" error.
//! 2. Admin bypass, when enabled, requires a matching capability, the
//!    same zone, and (if configured) an allowlisted path prefix.
//! 3. Cross-zone access (`/zone/<other>/…`) requires `MANAGE_ZONES`.
//! 4. Everything else consults ReBAC: the path itself first, then each
//!    ancestor up to `/`, stopping at the first allow.
//!
//! Every bypass decision, allow or deny, lands in the audit store. The
//! enforcer is the only component that turns permission failures into
//! user-visible denials.

use crate::engine::RebacEngine;
use nexus_core::{
    DenialReason, EnforcerConfig, NexusError, ObjectRef, Permission, Result, Subject, ZoneId,
};
use nexus_records::{AuditEvent, RecordStore};
use std::sync::Arc;
use tracing::debug;

/// Identity and flags accompanying a request
#[derive(Debug, Clone)]
pub struct AccessContext {
    /// The acting subject
    pub subject: Subject,
    /// Group identities the subject belongs to
    pub groups: Vec<String>,
    /// Zone the subject operates in; None means the default zone
    pub zone_id: Option<ZoneId>,
    /// Administrator flag (bypass still requires capability + zone)
    pub is_admin: bool,
    /// Internal system component flag
    pub is_system: bool,
    /// Capabilities held by an admin ("read", "write", "*", "MANAGE_ZONES")
    pub admin_capabilities: Vec<String>,
}

impl AccessContext {
    /// Plain user context
    pub fn user(id: impl Into<String>) -> Self {
        AccessContext {
            subject: Subject::user(id),
            groups: Vec::new(),
            zone_id: None,
            is_admin: false,
            is_system: false,
            admin_capabilities: Vec::new(),
        }
    }

    /// Builder: zone
    pub fn in_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone_id = Some(ZoneId::new(zone_id));
        self
    }

    /// Builder: admin with capabilities
    pub fn as_admin(mut self, capabilities: &[&str]) -> Self {
        self.is_admin = true;
        self.admin_capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Builder: system component
    pub fn as_system(mut self) -> Self {
        self.is_system = true;
        self
    }

    fn zone(&self) -> ZoneId {
        self.zone_id.clone().unwrap_or_else(ZoneId::default_zone)
    }
}

/// The zone a path addresses through the `/zone/<id>/…` convention
fn path_zone(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/zone/")?;
    let end = rest.find('/').unwrap_or(rest.len());
    let zone = &rest[..end];
    (!zone.is_empty()).then_some(zone)
}

/// Deny-by-default permission gate
pub struct PermissionEnforcer {
    engine: Arc<RebacEngine>,
    audit: Arc<RecordStore>,
    config: EnforcerConfig,
}

impl PermissionEnforcer {
    /// Build an enforcer over the engine and the audit store
    pub fn new(engine: Arc<RebacEngine>, audit: Arc<RecordStore>, config: EnforcerConfig) -> Self {
        PermissionEnforcer {
            engine,
            audit,
            config,
        }
    }

    /// The wrapped engine
    pub fn engine(&self) -> &Arc<RebacEngine> {
        &self.engine
    }

    /// Authorize `(path, permission)` for the context; Err on deny
    pub fn check(&self, path: &str, permission: Permission, ctx: &AccessContext) -> Result<()> {
        if ctx.subject.subject_id.is_empty() {
            return Err(NexusError::denied(
                DenialReason::InvalidContext,
                "empty subject",
            ));
        }

        // 1. System bypass: /system/ only
        if ctx.is_system {
            let allowed = path == "/system" || path.starts_with("/system/");
            self.record_bypass("system", allowed, path, permission, ctx, {
                (!allowed).then(|| DenialReason::SystemBypassNotAllowed)
            })?;
            return if allowed {
                Ok(())
            } else {
                Err(NexusError::denied(
                    DenialReason::SystemBypassNotAllowed,
                    format!("system subject may not touch {path}"),
                ))
            };
        }

        // 3. Cross-zone fence applies before ReBAC and before admin bypass
        //    can reach another zone's subtree
        if let Some(target_zone) = path_zone(path) {
            if target_zone != ctx.zone().as_str()
                && !self.has_capability(ctx, "MANAGE_ZONES")
            {
                if ctx.is_admin {
                    self.record_bypass(
                        "admin",
                        false,
                        path,
                        permission,
                        ctx,
                        Some(DenialReason::WrongZone),
                    )?;
                }
                return Err(NexusError::denied(
                    DenialReason::WrongZone,
                    format!(
                        "zone {} may not access {path}",
                        ctx.zone().as_str()
                    ),
                ));
            }
        }

        // 2. Admin bypass
        if ctx.is_admin && self.config.allow_admin_bypass {
            let capability_ok = self.has_capability(ctx, permission.as_str());
            let path_ok = self.config.admin_bypass_paths.is_empty()
                || self
                    .config
                    .admin_bypass_paths
                    .iter()
                    .any(|prefix| path == prefix || path.starts_with(&format!("{prefix}/")));
            if capability_ok && path_ok {
                self.record_bypass("admin", true, path, permission, ctx, None)?;
                return Ok(());
            }
            if !capability_ok {
                self.record_bypass(
                    "admin",
                    false,
                    path,
                    permission,
                    ctx,
                    Some(DenialReason::MissingCapability),
                )?;
                return Err(NexusError::denied(
                    DenialReason::MissingCapability,
                    format!("admin lacks the {} capability", permission.as_str()),
                ));
            }
            // Path outside the allowlist: fall through to ReBAC
        }

        // 4. ReBAC with ancestor walk
        if self.check_rebac_with_ancestors(path, permission, ctx)? {
            debug!(path, permission = permission.as_str(), "allowed by rebac");
            return Ok(());
        }

        Err(NexusError::denied(
            DenialReason::NoGrant,
            format!(
                "{} may not {} {path}",
                ctx.subject,
                permission.as_str()
            ),
        ))
    }

    /// Boolean form of [`check`](Self::check)
    pub fn is_allowed(&self, path: &str, permission: Permission, ctx: &AccessContext) -> bool {
        self.check(path, permission, ctx).is_ok()
    }

    /// Wildcard capability covers everything except zone management,
    /// which must be granted by name
    fn has_capability(&self, ctx: &AccessContext, capability: &str) -> bool {
        ctx.is_admin
            && ctx
                .admin_capabilities
                .iter()
                .any(|c| c == capability || (c == "*" && capability != "MANAGE_ZONES"))
    }

    /// Check the path, then each ancestor, stopping at the first allow
    fn check_rebac_with_ancestors(
        &self,
        path: &str,
        permission: Permission,
        ctx: &AccessContext,
    ) -> Result<bool> {
        let zone = ctx.zone();
        let mut subjects = vec![ctx.subject.clone()];
        subjects.extend(ctx.groups.iter().map(|g| Subject::new("group", g.clone())));

        let mut candidate = Some(path.to_string());
        while let Some(current) = candidate {
            let object = ObjectRef::file(&current);
            for subject in &subjects {
                if self
                    .engine
                    .check(subject, permission.as_str(), &object, &zone)?
                {
                    return Ok(true);
                }
            }
            candidate = parent_of(&current);
        }
        Ok(false)
    }

    fn record_bypass(
        &self,
        bypass_type: &str,
        allowed: bool,
        path: &str,
        permission: Permission,
        ctx: &AccessContext,
        denial: Option<DenialReason>,
    ) -> Result<()> {
        self.audit.append_audit(&AuditEvent {
            bypass_type: Some(bypass_type.to_string()),
            allowed,
            denial_reason: denial.map(|d| d.to_string()),
            subject_type: ctx.subject.subject_type.clone(),
            subject_id: ctx.subject.subject_id.clone(),
            permission: permission.as_str().to_string(),
            path: path.to_string(),
            zone_id: ctx.zone().as_str().to_string(),
        })
    }
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(path[..idx].to_string()),
        None => None,
    }
}
