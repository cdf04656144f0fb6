//! A [`Transport`](vasp_core::transport::Transport) implementation backed
//! by `reqwest`.

use std::collections::HashMap;
use std::sync::RwLock;

use vasp_core::address::Address;
use vasp_core::error::ProtocolError;
use vasp_core::hooks::BoxFuture;
use vasp_core::transport::Transport;
use vasp_core::wire::{CommandRequestObject, CommandResponseObject};

/// Sends protocol frames to counterparty VASPs over HTTP.
///
/// Address-to-hostname resolution (which the reference implementation
/// performs against on-chain VASP metadata) is out of scope for this
/// crate; callers register each peer's base URL with [`Self::register_peer`]
/// before the first send.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    local_address: String,
    peer_base_urls: RwLock<HashMap<String, String>>,
}

impl ReqwestTransport {
    /// Creates a transport identifying this node as `local_address` (its
    /// own encoded address) in outbound request paths.
    #[must_use]
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            local_address: local_address.into(),
            peer_base_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the base URL (e.g. `https://vasp-b.example.com`) to use
    /// when sending to `peer`.
    pub fn register_peer(&self, peer: &Address, base_url: impl Into<String>) {
        self.peer_base_urls
            .write()
            .expect("peer_base_urls lock poisoned")
            .insert(peer.encode(), base_url.into());
    }

    fn endpoint(&self, peer: &Address) -> Result<String, ProtocolError> {
        let base_url = self
            .peer_base_urls
            .read()
            .expect("peer_base_urls lock poisoned")
            .get(&peer.encode())
            .cloned()
            .ok_or_else(|| {
                ProtocolError::new("unknown_peer")
                    .with_message(format!("no base URL registered for peer '{}'", peer.encode()))
            })?;

        Ok(format!(
            "{base_url}/{}/{}/process/",
            peer.encode(),
            self.local_address
        ))
    }
}

impl Transport for ReqwestTransport {
    fn send_request<'a>(
        &'a self,
        peer: &'a Address,
        request: &'a CommandRequestObject,
    ) -> BoxFuture<'a, Result<CommandResponseObject, ProtocolError>> {
        Box::pin(async move {
            let url = self.endpoint(peer)?;
            let response = self
                .client
                .post(&url)
                .json(request)
                .send()
                .await
                .map_err(|err| ProtocolError::new("connection_error").with_message(err.to_string()))?;

            response
                .json::<CommandResponseObject>()
                .await
                .map_err(|err| ProtocolError::new("malformed_response").with_message(err.to_string()))
        })
    }
}
