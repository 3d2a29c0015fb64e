//! LDAP adapter over the `ldap3` library.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::DirectoryClient;
use crate::config::DirectoryConfig;
use crate::entry::{AttrValue, Entry, Modification};
use crate::error::{ClientError, ClientResult};
use crate::filter::{Filter, Scope};
use crate::{RC_INVALID_CREDENTIALS, RC_NO_SUCH_OBJECT, RC_SUCCESS};

/// Production directory client backed by `ldap3`.
///
/// The connection is established lazily on first use and cached; the
/// connection driver runs on a spawned tokio task.
pub struct LdapClient {
    config: DirectoryConfig,
    connection: Arc<RwLock<Option<Ldap>>>,
}

impl LdapClient {
    /// Create a client from a validated configuration.
    pub fn new(config: DirectoryConfig) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the cached connection, creating one if necessary.
    async fn get_connection(&self) -> ClientResult<Ldap> {
        {
            let guard = self.connection.read().await;
            if let Some(ref conn) = *guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;

        {
            let mut guard = self.connection.write().await;
            *guard = Some(conn.clone());
        }

        Ok(conn)
    }

    /// Establish a connection and bind.
    async fn create_connection(&self) -> ClientResult<Ldap> {
        let url = self.config.url();
        debug!(url = %url, "Connecting to directory server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(std::time::Duration::from_secs(
                self.config.connection_timeout_secs,
            ))
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                ClientError::connection_failed_with_source(
                    format!("failed to connect to directory server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "Directory connection driver error");
            }
        });

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing simple bind");

        let result = ldap.simple_bind(bind_dn, bind_password).await.map_err(|e| {
            ClientError::connection_failed_with_source(format!("bind failed for {bind_dn}"), e)
        })?;

        if result.rc == RC_INVALID_CREDENTIALS {
            return Err(ClientError::InvalidCredentials);
        }
        if result.rc != RC_SUCCESS {
            return Err(ClientError::connection_failed(format!(
                "bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "Directory connection established");

        Ok(ldap)
    }

    fn scope_to_ldap(scope: Scope) -> ldap3::Scope {
        match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        }
    }

    fn value_bytes(value: AttrValue) -> Vec<u8> {
        match value {
            AttrValue::Text(s) => s.into_bytes(),
            AttrValue::Bytes(b) => b,
        }
    }

    fn value_set(values: Vec<AttrValue>) -> HashSet<Vec<u8>> {
        values.into_iter().map(Self::value_bytes).collect()
    }
}

#[async_trait]
impl DirectoryClient for LdapClient {
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> ClientResult<Vec<Entry>> {
        let mut ldap = self.get_connection().await?;
        let filter_text = filter.to_filter_string();

        debug!(base = %base, filter = %filter_text, "Directory search");

        let ldap3::SearchResult(result_entries, res) = ldap
            .search(base, Self::scope_to_ldap(scope), &filter_text, attrs.to_vec())
            .await
            .map_err(|e| ClientError::protocol_with_source("search failed", e))?;

        // A missing base is "nothing found" for probe searches, not a failure.
        if res.rc == RC_NO_SUCH_OBJECT {
            return Ok(Vec::new());
        }
        if res.rc != RC_SUCCESS {
            return Err(ClientError::operation(res.rc, base, res.text));
        }

        Ok(result_entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|e| Entry {
                dn: e.dn,
                attrs: e.attrs,
                bin_attrs: e.bin_attrs,
            })
            .collect())
    }

    async fn add(&self, dn: &str, attrs: Vec<(String, Vec<AttrValue>)>) -> ClientResult<()> {
        let mut ldap = self.get_connection().await?;

        debug!(dn = %dn, "Directory add");

        let ldap_attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attrs
            .into_iter()
            .map(|(name, values)| (name.into_bytes(), Self::value_set(values)))
            .collect();

        let result = ldap
            .add(dn, ldap_attrs)
            .await
            .map_err(|e| ClientError::protocol_with_source(format!("add failed for {dn}"), e))?;

        if result.rc != RC_SUCCESS {
            return Err(ClientError::operation(result.rc, dn, result.text));
        }
        Ok(())
    }

    async fn modify(&self, dn: &str, mods: Vec<Modification>) -> ClientResult<()> {
        if mods.is_empty() {
            return Ok(());
        }
        let mut ldap = self.get_connection().await?;

        debug!(dn = %dn, mods = mods.len(), "Directory modify");

        let ldap_mods: Vec<ldap3::Mod<Vec<u8>>> = mods
            .into_iter()
            .map(|m| match m {
                Modification::Replace(name, values) => {
                    ldap3::Mod::Replace(name.into_bytes(), Self::value_set(values))
                }
                Modification::Add(name, values) => {
                    ldap3::Mod::Add(name.into_bytes(), Self::value_set(values))
                }
                Modification::Delete(name, values) => {
                    ldap3::Mod::Delete(name.into_bytes(), Self::value_set(values))
                }
            })
            .collect();

        let result = ldap
            .modify(dn, ldap_mods)
            .await
            .map_err(|e| ClientError::protocol_with_source(format!("modify failed for {dn}"), e))?;

        if result.rc != RC_SUCCESS {
            return Err(ClientError::operation(result.rc, dn, result.text));
        }
        Ok(())
    }

    async fn delete(&self, dn: &str) -> ClientResult<()> {
        let mut ldap = self.get_connection().await?;

        debug!(dn = %dn, "Directory delete");

        let result = ldap
            .delete(dn)
            .await
            .map_err(|e| ClientError::protocol_with_source(format!("delete failed for {dn}"), e))?;

        if result.rc != RC_SUCCESS {
            return Err(ClientError::operation(result.rc, dn, result.text));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LdapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapClient")
            .field("config", &self.config)
            .finish()
    }
}
