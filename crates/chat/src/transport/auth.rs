// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use futures_util::future::BoxFuture;

use crate::credential::Credential;
use crate::error::TransportError;

/// Signs subscriptions to private channels.
///
/// Returns the `auth` string the broker expects in `pusher:subscribe`.
/// A rejected credential must map to [`TransportError::Unauthorized`].
pub trait ChannelAuthorizer: Send + Sync + 'static {
    fn authorize(
        &self,
        credential: &Credential,
        socket_id: &str,
        channel: &str,
    ) -> BoxFuture<'static, Result<String, TransportError>>;
}
