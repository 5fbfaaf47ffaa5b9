//! An approved connection to a game server.

use crate::auth::Identity;
use crate::error::ClientError;
use quarry_net::FramedConnection;
use quarry_protocol::{Init, Message, MessageBody, MessageContext};
use tracing::debug;

/// The client's end of an approved game-server session. Owns the identity
/// token for the lifetime of the connection; disconnecting drops both.
#[derive(Debug)]
pub struct GameConnection {
    connection: FramedConnection,
    identity: Identity,
    init: Init,
}

impl GameConnection {
    /// Wraps an approved connection, decoding the approval hail. On a
    /// malformed approval the identity is handed back so the caller can
    /// return to the authenticated state.
    pub(crate) fn new(
        connection: FramedConnection,
        identity: Identity,
        approval: &[u8],
    ) -> Result<Self, (Identity, ClientError)> {
        let message = match Message::decode(approval, MessageContext::Server) {
            Ok(message) => message,
            Err(e) => return Err((identity, e.into())),
        };
        let MessageBody::Init(init) = message.body else {
            return Err((
                identity,
                ClientError::UnexpectedMessage(message.kind().name()),
            ));
        };
        Ok(Self {
            connection,
            identity,
            init,
        })
    }

    /// The server identity from the approval hail.
    pub fn init(&self) -> &Init {
        &self.init
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Sends one message to the game server.
    pub async fn send(&mut self, body: MessageBody) -> Result<(), ClientError> {
        let bytes = Message::new(body).encode(MessageContext::Client)?;
        self.connection.write_frame(&bytes).await?;
        Ok(())
    }

    /// Receives the next message, or `None` on a clean server-side close.
    pub async fn recv(&mut self) -> Result<Option<Message>, ClientError> {
        match self.connection.read_frame().await? {
            Some(frame) => Ok(Some(Message::decode(&frame, MessageContext::Server)?)),
            None => Ok(None),
        }
    }

    /// Closes the connection. Consumes self, dropping the identity token.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        debug!("Disconnecting {} from the game server", self.identity.uuid);
        self.connection.disconnect().await?;
        Ok(())
    }
}
