use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::StreamExt;
use mysql_async::prelude::Query;
use mysql_async::{ClientIdentity, OptsBuilder, Pool, ResultSetStream, Row, SslOpts, TextProtocol, Value};
use querydeck_core::datasources::{DatasourceProfile, PasswordSource, TlsMode};
use querydeck_core::execution::ResultRow;
use tracing::debug;

use crate::local::runner::{QueryBackend, QueryBackendError, QueryRowStream};

pub const PASSWORD_ENV_VAR: &str = "QUERYDECK_DB_PASSWORD";
const DEFAULT_KEYRING_SERVICE: &str = "querydeck";

/// Row backend for one MySQL datasource, backed by a connection pool.
#[derive(Debug, Clone)]
pub struct MysqlRowBackend {
    datasource_id: String,
    pool: Pool,
}

impl MysqlRowBackend {
    #[must_use]
    pub fn from_profile(profile: &DatasourceProfile) -> Self {
        Self {
            datasource_id: profile.id.clone(),
            pool: Pool::new(opts_from_profile(profile)),
        }
    }

    #[must_use]
    pub fn datasource_id(&self) -> &str {
        &self.datasource_id
    }

    pub async fn disconnect(&self) -> Result<(), mysql_async::Error> {
        self.pool.clone().disconnect().await
    }
}

#[derive(Debug)]
pub struct MysqlRowStream {
    stream: Option<ResultSetStream<'static, 'static, 'static, Row, TextProtocol>>,
    columns: Vec<String>,
}

#[async_trait]
impl QueryRowStream for MysqlRowStream {
    async fn next_row(&mut self) -> Result<Option<ResultRow>, QueryBackendError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        match stream.next().await {
            Some(Ok(row)) => {
                if self.columns.is_empty() {
                    self.columns = row
                        .columns_ref()
                        .iter()
                        .map(|column| column.name_str().into_owned())
                        .collect();
                }
                Ok(Some(row_to_result_row(row)))
            }
            Some(Err(error)) => Err(to_query_error(error)),
            None => {
                self.stream = None;
                Ok(None)
            }
        }
    }

    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    async fn cancel(&mut self) -> Result<(), QueryBackendError> {
        // Dropping the stream returns the connection to the pool, which
        // drains what the server still sends.
        self.stream = None;
        Ok(())
    }
}

#[async_trait]
impl QueryBackend for MysqlRowBackend {
    type Stream = MysqlRowStream;

    async fn start_query(&self, sql: &str) -> Result<Self::Stream, QueryBackendError> {
        debug!(datasource = %self.datasource_id, "starting mysql query");
        let stream = sql
            .to_string()
            .stream::<Row, _>(self.pool.clone())
            .await
            .map_err(to_query_error)?;
        Ok(MysqlRowStream {
            stream: Some(stream),
            columns: Vec::new(),
        })
    }
}

fn opts_from_profile(profile: &DatasourceProfile) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()));

    if let Some(password) = resolve_password(profile) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = non_empty(profile.database.as_deref()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    if let Some(ssl_opts) = ssl_opts_from_profile(profile) {
        builder = builder.ssl_opts(ssl_opts);
    }

    if matches!(profile.tls_mode, TlsMode::Disabled) {
        builder = builder.prefer_socket(false);
    }

    builder
}

fn resolve_password(profile: &DatasourceProfile) -> Option<String> {
    let env_password = std::env::var(PASSWORD_ENV_VAR)
        .ok()
        .filter(|pw| !pw.is_empty());

    match profile.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(profile) {
                return Some(password);
            }

            let password = env_password?;
            store_keyring_password(profile, &password);
            Some(password)
        }
    }
}

fn ssl_opts_from_profile(profile: &DatasourceProfile) -> Option<SslOpts> {
    if !profile_requests_tls(profile) {
        return None;
    }

    let mut ssl_opts = SslOpts::default()
        .with_danger_skip_domain_validation(profile.tls_skip_domain_validation)
        .with_danger_accept_invalid_certs(profile.tls_accept_invalid_certs);

    if let Some(ca_cert_path) = non_empty(profile.tls_ca_cert_path.as_deref()) {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(ca_cert_path).into()]);
    }

    if let Some(hostname_override) = non_empty(profile.tls_hostname_override.as_deref()) {
        ssl_opts = ssl_opts.with_danger_tls_hostname_override(Some(hostname_override.to_string()));
    }

    if let Some(identity) = client_identity_from_profile(profile) {
        ssl_opts = ssl_opts.with_client_identity(Some(identity));
    }

    Some(ssl_opts)
}

fn profile_requests_tls(profile: &DatasourceProfile) -> bool {
    match profile.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => has_custom_tls_settings(profile),
        TlsMode::Require | TlsMode::VerifyIdentity => true,
    }
}

fn has_custom_tls_settings(profile: &DatasourceProfile) -> bool {
    [
        &profile.tls_ca_cert_path,
        &profile.tls_client_cert_path,
        &profile.tls_client_key_path,
        &profile.tls_hostname_override,
    ]
    .into_iter()
    .any(|value| non_empty(value.as_deref()).is_some())
        || profile.tls_skip_domain_validation
        || profile.tls_accept_invalid_certs
}

fn client_identity_from_profile(profile: &DatasourceProfile) -> Option<ClientIdentity> {
    let cert_path = non_empty(profile.tls_client_cert_path.as_deref())?;
    let key_path = non_empty(profile.tls_client_key_path.as_deref())?;
    Some(ClientIdentity::new(
        PathBuf::from(cert_path).into(),
        PathBuf::from(key_path).into(),
    ))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &DatasourceProfile) -> Option<String> {
    let entry = keyring_entry(profile)?;
    entry.get_password().ok().filter(|pw| !pw.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &DatasourceProfile) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_keyring_password(profile: &DatasourceProfile, password: &str) {
    if let Some(entry) = keyring_entry(profile) {
        if let Err(err) = entry.set_password(password) {
            debug!(datasource = %profile.id, error = %err, "could not store password in keyring");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_keyring_password(_profile: &DatasourceProfile, _password: &str) {}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(profile: &DatasourceProfile) -> Option<keyring::Entry> {
    let service =
        non_empty(profile.keyring_service.as_deref()).unwrap_or(DEFAULT_KEYRING_SERVICE);
    let account = non_empty(profile.keyring_account.as_deref()).unwrap_or(profile.id.as_str());
    keyring::Entry::new(service, account).ok()
}

fn row_to_result_row(row: Row) -> ResultRow {
    ResultRow::new(row.unwrap().into_iter().map(mysql_value_to_string).collect())
}

fn mysql_value_to_string(value: Value) -> String {
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        ),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            format!("{sign}{days:03} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    }
}

fn to_query_error(error: mysql_async::Error) -> QueryBackendError {
    QueryBackendError::new(error.to_string())
}
