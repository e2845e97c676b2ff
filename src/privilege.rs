//! Post-registration role grant.
//!
//! Granting the role is a convenience on top of account creation. Callers
//! treat every error from [`PrivilegeAssignor`] as loggable and carry on.

use async_trait::async_trait;

use crate::channels::{ChannelRef, Identity};
use crate::error::ChannelError;

#[async_trait]
pub trait PrivilegeAssignor: Send + Sync {
    /// Grant the member role to `identity`.
    ///
    /// `origin` is where the registration command was issued; its kind tells
    /// the implementation whether a community context is directly available.
    async fn grant_post_registration_role(
        &self,
        identity: &Identity,
        origin: &ChannelRef,
    ) -> Result<(), ChannelError>;
}

/// Assignor for deployments without a role system.
pub struct NoopAssignor;

#[async_trait]
impl PrivilegeAssignor for NoopAssignor {
    async fn grant_post_registration_role(
        &self,
        identity: &Identity,
        _origin: &ChannelRef,
    ) -> Result<(), ChannelError> {
        tracing::debug!(%identity, "No role system configured, skipping grant");
        Ok(())
    }
}
