pub(crate) mod options;
pub(crate) mod session;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{
    concern::{ReadConcern, WriteConcern},
    error::{Error, Result},
    read_preference::ReadPreference,
};

pub use session::ClientSession;
use session::ServerSession;

/// The capabilities a driver client provides to the sessions it owns.
///
/// The session core never touches the network itself: commands built by a
/// [`ClientSession`] are dispatched through [`run_command`](Self::run_command),
/// and teardown hands resources back through the hook methods. The client-wide
/// concern defaults seed the default transaction options of every new session.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Dispatch a command against the named database, with session and concern
    /// fields carried in `options`, and return the server's reply.
    async fn run_command(
        &self,
        db: &str,
        command: Document,
        options: Document,
    ) -> Result<Document>;

    /// Remove the session with the given id from the client's session
    /// registry. May be called more than once for the same id.
    fn unregister_session(&self, client_session_id: u32);

    /// Return a server session to the client's pool.
    fn check_in_server_session(&self, session: ServerSession);

    /// The client-wide default read concern, if one is configured.
    fn read_concern(&self) -> Option<ReadConcern> {
        None
    }

    /// The client-wide default write concern, if one is configured.
    fn write_concern(&self) -> Option<WriteConcern> {
        None
    }

    /// The client-wide default read preference, if one is configured.
    fn read_preference(&self) -> Option<ReadPreference> {
        None
    }
}

/// Maps the 32-bit session handles written by [`ClientSession::append`] back
/// to live sessions. Implemented by the owning client.
pub trait SessionRegistry {
    /// Whatever the registry hands out for a live session (a guard, an index,
    /// a reference).
    type Session;

    /// Look up the live session registered under `client_session_id`.
    fn lookup(&self, client_session_id: u32) -> Result<Self::Session>;
}

/// Resolves a `sessionId` field from a command options document into the live
/// session it refers to.
///
/// The field must be a 64-bit integer whose value fits in a 32-bit unsigned
/// integer; anything else fails with an invalid-argument error without
/// consulting the registry.
pub fn session_from_handle<R: SessionRegistry>(
    registry: &R,
    field: &Bson,
) -> Result<R::Session> {
    let id = match field {
        Bson::Int64(id) => {
            u32::try_from(*id).map_err(|_| Error::invalid_argument("Invalid sessionId"))?
        }
        _ => return Err(Error::invalid_argument("Invalid sessionId")),
    };

    registry.lookup(id)
}
