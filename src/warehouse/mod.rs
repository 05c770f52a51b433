//! Minimal Snowflake session client: password login, statement execution
//! and session close over the REST endpoints the official drivers use.

use std::time::Duration;

use tracing::{debug, info};

use crate::cfg::WarehouseConfig;
use client::SnowflakeClient;
use query::Query;
use session::{LoginOptions, PasswordLogin, Session};

mod client;
mod query;
mod session;

pub mod errors;

pub use errors::{Result, WarehouseError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that runs SQL statements in order.
pub trait Warehouse {
    async fn execute(&mut self, sql: &str) -> Result<()>;

    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Opens a warehouse session.
pub trait Connect {
    type Conn: Warehouse;

    async fn connect(&self) -> Result<Self::Conn>;
}

#[derive(Debug)]
pub struct ConnectionBuilder {
    account_name: String,
    login_name: String,

    password: Option<String>,
    database_name: Option<String>,
    schema_name: Option<String>,
    warehouse: Option<String>,
    role_name: Option<String>,
    host: Option<String>,
    region: Option<String>,
    port: Option<u16>,
}

macro_rules! builder_fn {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, $name: $ty) -> Self {
            self.$name = Some($name);
            self
        }
    };
}

impl ConnectionBuilder {
    builder_fn! {password, String}

    builder_fn! {database_name, String}

    builder_fn! {schema_name, String}

    builder_fn! {warehouse, String}

    builder_fn! {role_name, String}

    builder_fn! {host, String}

    builder_fn! {region, String}

    builder_fn! {port, u16}

    pub fn new(account_name: String, login_name: String) -> Self {
        Self {
            account_name,
            login_name,

            password: None,
            database_name: None,
            schema_name: None,
            warehouse: None,
            role_name: None,
            host: None,
            region: None,
            port: None,
        }
    }

    fn base_url(&self) -> String {
        let port = self.port.unwrap_or(443);
        match (&self.host, &self.region) {
            (Some(host), _) => format!("https://{}:{}", host, port),
            (None, Some(region)) => format!(
                "https://{}.{}.snowflakecomputing.com:{}",
                self.account_name, region, port
            ),
            (None, None) => format!("https://{}.snowflakecomputing.com:{}", self.account_name, port),
        }
    }

    pub async fn build(self) -> Result<Connection> {
        if self.account_name.is_empty() || self.login_name.is_empty() {
            return Err(WarehouseError::InvalidConnectionParameters(
                "account_name and login_name cannot be empty".to_string(),
            ));
        }

        let password = self.password.clone().ok_or(WarehouseError::InvalidConnectionParameters(
            "password is required for default authentication".to_string(),
        ))?;

        let url = self.base_url();
        debug!("Connecting to {}", url);
        let client = SnowflakeClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build(url)?;

        let login = PasswordLogin {
            account_name: self.account_name,
            login_name: self.login_name,
            password,
        };

        let options = LoginOptions {
            database_name: self.database_name,
            schema_name: self.schema_name,
            warehouse: self.warehouse,
            role_name: self.role_name,
        };

        let session = login.authenticate(&client, options).await?;
        info!("Opened Snowflake session on {}", client.base_url());

        Ok(Connection {
            client,
            session,
            sequence_id: 0,
        })
    }
}

pub struct Connection {
    client: SnowflakeClient,
    session: Session,
    sequence_id: u64,
}

impl Connection {
    pub fn builder(account_name: String, login_name: String) -> ConnectionBuilder {
        ConnectionBuilder::new(account_name, login_name)
    }

    pub async fn exec(&mut self, sql: &str) -> Result<Option<String>> {
        self.sequence_id += 1;
        let q = Query {
            sql: sql.to_string(),
            sequence_id: self.sequence_id,
        };
        q.exec(&self.client, &self.session).await
    }
}

impl Warehouse for Connection {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        let query_id = self.exec(sql).await?;
        debug!("Statement finished, query id {:?}", query_id);
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.session.close(&self.client).await?;
        debug!("Closed Snowflake session");
        Ok(())
    }
}

impl From<&WarehouseConfig> for ConnectionBuilder {
    fn from(config: &WarehouseConfig) -> Self {
        let mut builder = Connection::builder(config.account.clone(), config.user.clone())
            .password(config.password.clone());
        if let Some(warehouse) = &config.warehouse {
            builder = builder.warehouse(warehouse.clone());
        }
        if let Some(role) = &config.role {
            builder = builder.role_name(role.clone());
        }
        if let Some(database) = &config.database {
            builder = builder.database_name(database.clone());
        }
        if let Some(schema) = &config.schema {
            builder = builder.schema_name(schema.clone());
        }
        if let Some(host) = &config.host {
            builder = builder.host(host.clone());
        }
        if let Some(region) = &config.region {
            builder = builder.region(region.clone());
        }
        if let Some(port) = config.port {
            builder = builder.port(port);
        }
        builder
    }
}

impl Connect for WarehouseConfig {
    type Conn = Connection;

    async fn connect(&self) -> Result<Connection> {
        ConnectionBuilder::from(self).build().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WarehouseConfig {
        WarehouseConfig {
            account: "xy12345.us-east-1".into(),
            user: "loader".into(),
            password: "pw".into(),
            warehouse: Some("LOAD_WH".into()),
            role: None,
            database: Some("ANALYTICS".into()),
            schema: None,
            host: None,
            region: None,
            port: None,
        }
    }

    #[test]
    fn builder_maps_config_fields() {
        let builder = ConnectionBuilder::from(&config());
        assert_eq!(builder.account_name, "xy12345.us-east-1");
        assert_eq!(builder.login_name, "loader");
        assert_eq!(builder.password.as_deref(), Some("pw"));
        assert_eq!(builder.warehouse.as_deref(), Some("LOAD_WH"));
        assert_eq!(builder.database_name.as_deref(), Some("ANALYTICS"));
        assert_eq!(builder.role_name, None);
    }

    #[test]
    fn base_url_defaults_to_account_host() {
        let builder = ConnectionBuilder::from(&config());
        assert_eq!(builder.base_url(), "https://xy12345.us-east-1.snowflakecomputing.com:443");

        let mut cfg = config();
        cfg.host = Some("proxy.internal.example".into());
        assert_eq!(
            ConnectionBuilder::from(&cfg).base_url(),
            "https://proxy.internal.example:443"
        );
    }

    #[test]
    fn base_url_adds_region_and_port() {
        let mut cfg = config();
        cfg.account = "xy12345".into();
        cfg.region = Some("us-east-2.aws".into());
        assert_eq!(
            ConnectionBuilder::from(&cfg).base_url(),
            "https://xy12345.us-east-2.aws.snowflakecomputing.com:443"
        );

        cfg.port = Some(8443);
        assert_eq!(
            ConnectionBuilder::from(&cfg).base_url(),
            "https://xy12345.us-east-2.aws.snowflakecomputing.com:8443"
        );

        cfg.host = Some("proxy.internal.example".into());
        assert_eq!(
            ConnectionBuilder::from(&cfg).base_url(),
            "https://proxy.internal.example:8443"
        );
    }

    #[tokio::test]
    async fn build_rejects_missing_credentials_before_network() {
        let err = Connection::builder(String::new(), "loader".into())
            .password("pw".into())
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WarehouseError::InvalidConnectionParameters(_)));

        let err = Connection::builder("xy12345".into(), "loader".into())
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WarehouseError::InvalidConnectionParameters(_)));
    }
}
