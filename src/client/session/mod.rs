pub(crate) mod cluster_time;
pub(crate) mod pool;

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use bson::{doc, spec::BinarySubtype, Binary, Bson, Document, Timestamp};
use rand::{rngs::OsRng, TryRngCore};
use uuid::Uuid;

use crate::{
    client::{
        options::{SessionOptions, TransactionOptions},
        SessionClient,
    },
    concern::WriteConcern,
    error::{Error, Result},
};

pub use cluster_time::ClusterTime;
pub use pool::ServerSessionPool;

/// A client session, used to order the operations executed on it.
///
/// A `ClientSession` pairs a pooled [`ServerSession`] with the causal
/// consistency bookkeeping and transaction state for one logical stream of
/// operations. Sessions are not thread safe: each session may be used by at
/// most one in-flight operation at a time.
///
/// The owning client threads a session through an operation in three steps:
/// [`append`](ClientSession::append) and
/// [`append_txn_fields`](ClientSession::append_txn_fields) decorate the
/// outbound command, the command is dispatched externally, and the reply is
/// fed back through [`handle_reply`](ClientSession::handle_reply).
pub struct ClientSession {
    client: Arc<dyn SessionClient>,
    server_session: ServerSession,
    client_session_id: u32,
    options: SessionOptions,
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    pub(crate) transaction: Transaction,
}

#[derive(Clone, Debug)]
pub(crate) struct Transaction {
    pub(crate) state: TransactionState,
    pub(crate) options: Option<TransactionOptions>,
}

impl Transaction {
    fn start(&mut self, options: TransactionOptions) {
        self.state = TransactionState::Starting;
        self.options = Some(options);
    }

    fn commit(&mut self) {
        self.state = TransactionState::Committed;
    }

    fn abort(&mut self) {
        self.state = TransactionState::Aborted;
        self.options = None;
    }

    fn reset(&mut self) {
        self.state = TransactionState::None;
        self.options = None;
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            state: TransactionState::None,
            options: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransactionState {
    None,
    Starting,
    InProgress,
    Committed,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransactionIntent {
    Commit,
    Abort,
}

impl TransactionIntent {
    fn command_name(self) -> &'static str {
        match self {
            Self::Commit => "commitTransaction",
            Self::Abort => "abortTransaction",
        }
    }
}

impl ClientSession {
    /// Creates a new session wrapping the provided server session.
    ///
    /// The session's default transaction options are seeded from the
    /// client-wide read concern, write concern, and read preference; options
    /// provided by the caller are layered on top of those, field by field.
    pub fn new(
        client: Arc<dyn SessionClient>,
        server_session: ServerSession,
        options: Option<SessionOptions>,
        client_session_id: u32,
    ) -> Self {
        let mut default_transaction_options = TransactionOptions {
            read_concern: client.read_concern(),
            write_concern: client.write_concern(),
            read_preference: client.read_preference(),
        };

        // sessions are causally consistent unless the caller opts out
        let mut causal_consistency = true;
        if let Some(ref options) = options {
            causal_consistency = options.causal_consistency;
            if let Some(ref user_defaults) = options.default_transaction_options {
                default_transaction_options.apply(user_defaults);
            }
        }

        Self {
            client,
            server_session,
            client_session_id,
            options: SessionOptions {
                causal_consistency,
                default_transaction_options: Some(default_transaction_options),
            },
            cluster_time: None,
            operation_time: None,
            transaction: Transaction::default(),
        }
    }

    /// The client used to create this session.
    pub fn client(&self) -> Arc<dyn SessionClient> {
        Arc::clone(&self.client)
    }

    /// The handle under which this session is registered with its client.
    pub fn client_session_id(&self) -> u32 {
        self.client_session_id
    }

    /// The logical session id the server uses to correlate operations on this
    /// session, in its wire form.
    pub fn lsid(&self) -> &Document {
        self.server_session.lsid()
    }

    /// The effective options this session was created with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The highest cluster time this session has seen, if any.
    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// The timestamp of the most recent acknowledged operation observed by
    /// this session, if any.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    /// The current transaction number of the underlying server session.
    pub fn txn_number(&self) -> i64 {
        self.server_session.txn_number
    }

    /// Whether this session currently has an active transaction.
    pub fn in_transaction(&self) -> bool {
        self.transaction.state == TransactionState::Starting
            || self.transaction.state == TransactionState::InProgress
    }

    /// Whether this session has an active transaction that has executed at
    /// least one operation.
    pub fn transaction_in_progress(&self) -> bool {
        self.transaction.state == TransactionState::InProgress
    }

    /// Marks the underlying server session as dirty so the pool discards it
    /// instead of recycling it. Called by the dispatcher when an operation on
    /// this session hits a network error.
    pub fn mark_dirty(&mut self) {
        self.server_session.dirty = true;
    }

    /// Stamps the underlying server session as used now. Called by the
    /// dispatcher whenever an operation carrying this session is sent.
    pub fn update_last_use(&mut self) {
        self.server_session.update_last_use();
    }

    /// Appends this session's handle to an outbound options document as a
    /// 64-bit `sessionId` field.
    pub fn append(&self, options: &mut Document) -> Result<()> {
        options.insert("sessionId", i64::from(self.client_session_id));
        Ok(())
    }

    /// Advances the session's cluster time to `to` iff it is greater than the
    /// stored one. Unparseable cluster times are ignored.
    pub fn advance_cluster_time(&mut self, to: &ClusterTime) {
        let newer = match self.cluster_time {
            None => to.timestamp().is_some(),
            Some(ref current) => to > current,
        };
        if newer {
            self.cluster_time = Some(to.clone());
        }
    }

    /// Advances the session's operation time to `to` iff it is greater than
    /// the stored one.
    pub fn advance_operation_time(&mut self, to: Timestamp) {
        let newer = match self.operation_time {
            None => true,
            Some(current) => (to.time, to.increment) > (current.time, current.increment),
        };
        if newer {
            self.operation_time = Some(to);
        }
    }

    /// Absorbs the clock fields of a server reply: `$clusterTime` gossip is
    /// always absorbed, `operationTime` only from acknowledged replies.
    /// Unknown fields are ignored, unparseable clocks dropped.
    pub fn handle_reply(&mut self, reply: &Document, is_acknowledged: bool) {
        if let Some(Bson::Document(cluster_time)) = reply.get("$clusterTime") {
            self.advance_cluster_time(&ClusterTime::from(cluster_time.clone()));
        }

        if is_acknowledged {
            if let Some(Bson::Timestamp(operation_time)) = reply.get("operationTime") {
                self.advance_operation_time(*operation_time);
            }
        }
    }

    /// Starts a new transaction on this session with the given options
    /// layered over the session's defaults. This session must be passed into
    /// each operation meant to execute within the transaction.
    pub fn start_transaction(
        &mut self,
        options: impl Into<Option<TransactionOptions>>,
    ) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::transaction_state("Transaction already in progress"));
        }

        let mut effective = self
            .options
            .default_transaction_options
            .clone()
            .unwrap_or_default();
        if let Some(options) = options.into() {
            effective.apply(&options);
        }

        self.transaction.start(effective);
        Ok(())
    }

    /// Appends the transaction fields appropriate for the current state to an
    /// outbound command, advancing the state machine. Must be called for
    /// every operation executed with this session.
    ///
    /// The first operation after [`start_transaction`](Self::start_transaction)
    /// increments the server session's transaction number and announces the
    /// transaction with `startTransaction: true` and the transaction's read
    /// concern; every in-transaction operation carries `txnNumber` and
    /// `autocommit: false`. The first operation after a commit or abort
    /// clears the finished transaction and runs outside of it.
    pub fn append_txn_fields(&mut self, command: &mut Document) -> Result<()> {
        match self.transaction.state {
            TransactionState::Starting => {
                self.transaction.state = TransactionState::InProgress;
                self.server_session.txn_number += 1;

                if let Some(read_concern) = self
                    .transaction
                    .options
                    .as_ref()
                    .and_then(|options| options.read_concern.as_ref())
                {
                    let read_concern = bson::to_bson(read_concern).map_err(|_| {
                        Error::transaction_state("Invalid read concern in transaction")
                    })?;
                    command.insert("readConcern", read_concern);
                }

                command.insert("startTransaction", true);
                command.insert("txnNumber", self.server_session.txn_number);
                command.insert("autocommit", false);
                Ok(())
            }
            TransactionState::InProgress => {
                command.insert("txnNumber", self.server_session.txn_number);
                command.insert("autocommit", false);
                Ok(())
            }
            TransactionState::Committed | TransactionState::Aborted => {
                // the next operation after a finished transaction runs
                // outside of it
                self.transaction.reset();
                Ok(())
            }
            TransactionState::None => Ok(()),
        }
    }

    /// Commits the transaction that is currently active on this session,
    /// returning the server's reply.
    ///
    /// Commit may be called again from the committed state to retry the
    /// commit, for example after a network error left its outcome unknown.
    pub async fn commit_transaction(&mut self) -> Result<Document> {
        match self.transaction.state {
            TransactionState::None => Err(Error::transaction_state("No transaction started")),
            TransactionState::Starting => {
                // no commands were sent, so the transaction never started
                // server-side
                self.transaction.commit();
                Ok(Document::new())
            }
            TransactionState::InProgress | TransactionState::Committed => {
                let (result, reply) = self.finish_transaction(TransactionIntent::Commit).await;
                // stay committed even on failure so the commit can be retried
                self.transaction.commit();
                result.map(|()| reply)
            }
            TransactionState::Aborted => {
                Err(Error::transaction_state("Cannot call commit after abort"))
            }
        }
    }

    /// Aborts the transaction that is currently active on this session.
    ///
    /// Server-side abort failures are logged and swallowed: the transaction
    /// ends client-side either way, and the server discards abandoned
    /// transactions on its own.
    pub async fn abort_transaction(&mut self) -> Result<()> {
        match self.transaction.state {
            TransactionState::Starting => {
                // no commands were sent, nothing to abort server-side
                self.transaction.abort();
                Ok(())
            }
            TransactionState::InProgress => {
                let _ = self.finish_transaction(TransactionIntent::Abort).await;
                self.transaction.abort();
                Ok(())
            }
            TransactionState::Committed => {
                Err(Error::transaction_state("Cannot call abort after commit"))
            }
            TransactionState::Aborted => Err(Error::transaction_state("Cannot call abort twice")),
            TransactionState::None => Err(Error::transaction_state("No transaction started")),
        }
    }

    /// Runs the transaction-terminating command for `intent` against the
    /// `admin` database, retrying once on a network or not-primary error.
    ///
    /// Returns the dispatch outcome together with the server reply; paths
    /// that never reach the server yield an empty reply document.
    async fn finish_transaction(
        &mut self,
        intent: TransactionIntent,
    ) -> (Result<()>, Document) {
        let command_name = intent.command_name();

        let mut options = Document::new();
        if let Err(error) = self.append(&mut options) {
            return (Err(error), Document::new());
        }

        if let Some(write_concern) = self
            .transaction
            .options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
        {
            if !write_concern.is_empty() {
                let encoded = write_concern
                    .validate()
                    .and_then(|_| bson::to_bson(write_concern).map_err(Error::from));
                match encoded {
                    Ok(write_concern) => {
                        options.insert("writeConcern", write_concern);
                    }
                    Err(_) => {
                        return (
                            Err(Error::transaction_state("Invalid transaction write concern")),
                            Document::new(),
                        );
                    }
                }
            }
        }

        let mut command = Document::new();
        command.insert(command_name, 1_i32);

        self.server_session.update_last_use();
        let mut result = self
            .client
            .run_command("admin", command.clone(), options.clone())
            .await;

        // drivers retry the transaction-terminating commands exactly once
        // after a retryable failure
        if let Err(ref error) = result {
            if error.is_retryable_terminator() {
                result = self.client.run_command("admin", command, options).await;
            }
        }

        match result {
            Ok(reply) => {
                let acknowledged = self
                    .transaction
                    .options
                    .as_ref()
                    .and_then(|options| options.write_concern.as_ref())
                    .map(WriteConcern::is_acknowledged)
                    .unwrap_or(true);
                self.handle_reply(&reply, acknowledged);
                (Ok(()), reply)
            }
            Err(error) => {
                if intent == TransactionIntent::Abort {
                    tracing::warn!(command = command_name, %error, "error aborting transaction");
                }
                (Err(error), Document::new())
            }
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_session_id", &self.client_session_id)
            .field("server_session", &self.server_session)
            .field("options", &self.options)
            .field("cluster_time", &self.cluster_time)
            .field("operation_time", &self.operation_time)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

struct DroppedClientSession {
    client: Arc<dyn SessionClient>,
    server_session: ServerSession,
    client_session_id: u32,
    options: SessionOptions,
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    transaction: Transaction,
}

impl From<DroppedClientSession> for ClientSession {
    fn from(dropped_session: DroppedClientSession) -> Self {
        Self {
            client: dropped_session.client,
            server_session: dropped_session.server_session,
            client_session_id: dropped_session.client_session_id,
            options: dropped_session.options,
            cluster_time: dropped_session.cluster_time,
            operation_time: dropped_session.operation_time,
            transaction: dropped_session.transaction,
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if self.transaction.state == TransactionState::Starting {
            self.transaction.abort();
        }

        if self.transaction.state == TransactionState::InProgress {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let dropped_session = DroppedClientSession {
                    client: Arc::clone(&self.client),
                    server_session: self.server_session.clone(),
                    client_session_id: self.client_session_id,
                    options: self.options.clone(),
                    cluster_time: self.cluster_time.clone(),
                    operation_time: self.operation_time,
                    transaction: self.transaction.clone(),
                };
                self.client.unregister_session(self.client_session_id);
                handle.spawn(async move {
                    let mut session: ClientSession = dropped_session.into();
                    let _result = session.abort_transaction().await;
                });
                return;
            }
            tracing::warn!(
                "dropping a session with an in-progress transaction outside an async runtime; \
                 the server-side transaction cannot be aborted"
            );
        }

        self.client.unregister_session(self.client_session_id);
        self.client
            .check_in_server_session(self.server_session.clone());
    }
}

/// Client-side abstraction of a server session. These are pooled, and may be
/// associated with multiple [`ClientSession`]s over the course of their
/// lifetime.
#[derive(Clone, Debug)]
pub struct ServerSession {
    /// The logical session id: a document holding a single binary `id` field
    /// containing a v4 UUID.
    lsid: Document,

    /// A monotonically increasing transaction number for this session.
    txn_number: i64,

    /// When an operation was last executed with this session, or `None` if it
    /// has never been used.
    last_use: Option<Instant>,

    /// Whether a network error was encountered while using this session.
    dirty: bool,
}

impl ServerSession {
    /// Creates a new server session, generating the logical session id client
    /// side.
    ///
    /// Fails when the operating system's random source is unavailable.
    pub fn new() -> Result<Self> {
        let mut bytes = [0u8; 16];
        OsRng.try_fill_bytes(&mut bytes).map_err(|_| {
            Error::client_session("Could not generate UUID for logical session id")
        })?;

        // RFC 4122 4.4: sixteen random bytes, with the version nibble set to
        // 4 and the variant bits to 10
        bytes[6] = 0x40 | (bytes[6] & 0x0f);
        bytes[8] = 0x80 | (bytes[8] & 0x3f);

        let uuid = Uuid::from_bytes(bytes);
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        });

        Ok(Self {
            lsid: doc! { "id": binary },
            txn_number: 0,
            last_use: None,
            dirty: false,
        })
    }

    /// The logical session id document in its wire form.
    pub fn lsid(&self) -> &Document {
        &self.lsid
    }

    /// The transaction number of the most recent transaction on this session.
    pub fn txn_number(&self) -> i64 {
        self.txn_number
    }

    /// Whether a network error was encountered while using this session.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stamps the session as used now.
    pub fn update_last_use(&mut self) {
        self.last_use = Some(Instant::now());
    }

    /// Whether this session should no longer be used.
    ///
    /// A timeout of `None` means the server's session lifetime is unknown
    /// (for example, the client is not currently connected), in which case
    /// the session is kept. A session that has never been used cannot have
    /// timed out. Otherwise the session is considered timed out once one
    /// minute or less of its lifetime remains, so that it cannot expire while
    /// an operation on it is in flight.
    pub fn is_timed_out(&self, logical_session_timeout: Option<Duration>) -> bool {
        let timeout = match logical_session_timeout {
            Some(timeout) => timeout,
            None => return false,
        };
        let last_use = match self.last_use {
            Some(last_use) => last_use,
            None => return false,
        };

        last_use + timeout <= Instant::now() + Duration::from_secs(60)
    }
}
