//! Client identities and admin authorization.
//!
//! A client is whatever key a caller sends in the `X-Client-Key` header. There are no
//! accounts: a client row is created the first time a key uploads content or registers.

use std::{collections::BTreeSet, sync::Arc};

use snafu::ensure;
use tracing::debug;

use crate::{
    error::{ForbiddenSnafu, InvalidArgumentSnafu, Result, UnauthorizedSnafu},
    models::Client,
    store::MetadataStore,
};

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// The identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// The client row.
    pub client: Client,
    /// Whether the client is listed in `admin_client_ids`.
    pub is_admin: bool,
}

impl Caller {
    /// The client id.
    pub fn id(&self) -> &str {
        &self.client.id
    }

    /// Whether the caller may manage something owned by `owner`.
    pub fn can_manage(&self, owner: Option<&str>) -> bool {
        self.is_admin || owner == Some(self.id())
    }
}

/// Resolves client keys to [`Caller`]s.
#[derive(Debug, Clone)]
pub struct ClientService {
    store: MetadataStore,
    admins: Arc<BTreeSet<String>>,
}

impl ClientService {
    /// Create the service with the configured admin ids.
    pub fn new(store: MetadataStore, admin_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            admins: Arc::new(admin_ids.into_iter().collect()),
        }
    }

    /// Whether a client id has admin rights.
    pub fn is_admin(&self, client_id: &str) -> bool {
        self.admins.contains(client_id)
    }

    /// Number of configured admins.
    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    fn caller(&self, client: Client) -> Caller {
        let is_admin = self.is_admin(&client.id);
        Caller { client, is_admin }
    }

    /// Look up a known client.
    pub fn resolve(&self, key: Option<&str>) -> Result<Option<Caller>> {
        let Some(key) = key else {
            return Ok(None);
        };
        let client = self.store.read()?.client(key)?;
        Ok(client.map(|client| self.caller(client)))
    }

    /// Look up a client, creating it on first sight.
    pub fn resolve_or_create(&self, key: Option<&str>) -> Result<Option<Caller>> {
        let Some(key) = key else {
            return Ok(None);
        };
        let (client, _created) = self.get_or_insert(key)?;
        Ok(Some(self.caller(client)))
    }

    /// Look up a known client, failing with `Unauthorized` otherwise.
    pub fn require(&self, key: Option<&str>) -> Result<Caller> {
        self.resolve(key)?.ok_or_else(|| UnauthorizedSnafu.build())
    }

    /// Look up a known admin client.
    pub fn require_admin(&self, key: Option<&str>) -> Result<Caller> {
        // admins may not have a client row yet
        let Some(key) = key else {
            return UnauthorizedSnafu.fail();
        };
        ensure!(
            self.is_admin(key),
            ForbiddenSnafu {
                reason: "admin access required"
            }
        );
        self.resolve_or_create(Some(key))?
            .ok_or_else(|| UnauthorizedSnafu.build())
    }

    /// Register a key, returning the client and whether it was created now.
    pub fn register(&self, key: Option<&str>) -> Result<(Caller, bool)> {
        let Some(key) = key else {
            return InvalidArgumentSnafu {
                message: "X-Client-Key header is required",
            }
            .fail();
        };
        let (client, created) = self.get_or_insert(key)?;
        Ok((self.caller(client), created))
    }

    /// Set the display name of a known client.
    pub fn set_name(&self, key: Option<&str>, name: &str) -> Result<Client> {
        let caller = self.require(key)?;
        let name = name.trim();
        ensure!(
            !name.is_empty(),
            InvalidArgumentSnafu {
                message: "name must not be empty"
            }
        );
        ensure!(
            name.chars().count() <= MAX_NAME_LEN,
            InvalidArgumentSnafu {
                message: format!("name must be at most {MAX_NAME_LEN} characters"),
            }
        );
        let tx = self.store.write()?;
        let mut client = tx.client(caller.id())?.unwrap_or(caller.client);
        client.name = Some(name.to_string());
        tx.put_client(&client)?;
        tx.commit()?;
        Ok(client)
    }

    fn get_or_insert(&self, key: &str) -> Result<(Client, bool)> {
        let tx = self.store.write()?;
        if let Some(client) = tx.client(key)? {
            return Ok((client, false));
        }
        let client = Client::new(key);
        tx.put_client(&client)?;
        tx.commit()?;
        debug!(client_id = key, "created client");
        Ok((client, true))
    }
}
