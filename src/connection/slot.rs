use std::sync::Arc;

use crate::error::{Result, StoreError};

/// Builds a backend client from connection params.
pub type ClientFactory<P, C> = Arc<dyn Fn(&P) -> Result<C> + Send + Sync>;

/// Holds the current connection params and the one client built from them.
///
/// Replacing the params always drops the previous client, even when the new
/// params compare equal to the old ones.
pub struct ClientSlot<P, C> {
    params: Option<P>,
    client: Option<C>,
}

impl<P, C> Default for ClientSlot<P, C> {
    fn default() -> Self {
        Self {
            params: None,
            client: None,
        }
    }
}

impl<P, C> ClientSlot<P, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `params` and build a fresh client from them.
    ///
    /// On factory failure the params are kept but the slot has no client,
    /// so `is_ready` stays false until the next successful replace.
    pub fn replace(&mut self, params: P, factory: &ClientFactory<P, C>) -> Result<()> {
        self.client = None;
        let built = factory(&params);
        self.params = Some(params);
        match built {
            Ok(client) => {
                self.client = Some(client);
                Ok(())
            }
            Err(err) => Err(match err {
                StoreError::ClientFactory(_) => err,
                other => StoreError::ClientFactory(other.to_string()),
            }),
        }
    }

    /// Both params and client are present.
    pub fn is_ready(&self) -> bool {
        self.params.is_some() && self.client.is_some()
    }

    pub fn params(&self) -> Option<&P> {
        self.params.as_ref()
    }

    pub fn client(&self) -> Option<&C> {
        self.client.as_ref()
    }

    pub fn clear(&mut self) {
        self.params = None;
        self.client = None;
    }
}

impl<P: Clone, C: Clone> ClientSlot<P, C> {
    /// Clone out the client and params for one backend call.
    pub fn checkout(&self) -> Result<(C, P)> {
        let params = self.params.clone().ok_or(StoreError::MissingParams)?;
        let client = self.client.clone().ok_or(StoreError::ClientNotReady)?;
        Ok((client, params))
    }
}
